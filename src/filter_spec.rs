//! Validated filter selections.

use std::fmt;

use crate::domain::{DomainSet, SubRegionDomain, WHOLE_REGION_SENTINEL, month_name};
use crate::error::{PanelError, Result};

/// Sub-region restriction of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubRegion {
    WholeRegion,
    Named(String),
}

impl SubRegion {
    /// Maps the sentinel text to [`SubRegion::WholeRegion`].
    pub fn from_choice(choice: &str) -> Self {
        if choice == WHOLE_REGION_SENTINEL {
            SubRegion::WholeRegion
        } else {
            SubRegion::Named(choice.to_string())
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            SubRegion::WholeRegion => None,
            SubRegion::Named(name) => Some(name),
        }
    }
}

/// Whether counts cover a single period or all periods at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewMode {
    /// One `(year, month)` period, counting rows.
    Period { year: i32, month: u32 },
    /// All periods, counting distinct households.
    Panel,
}

/// Raw user choices before validation. Year and month are ignored in panel
/// mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub region: String,
    pub sub_region: String,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub panel_mode: bool,
}

impl Selection {
    /// Builds a [`FilterSpec`] and checks the sub-region against the options
    /// offered for the region.
    pub fn build(
        &self,
        domain: &DomainSet,
        sub_regions: &SubRegionDomain,
    ) -> Result<FilterSpec> {
        let spec = FilterSpec::build(
            domain,
            &self.region,
            &self.sub_region,
            self.year,
            self.month,
            self.panel_mode,
        )?;
        spec.check_sub_region(sub_regions)?;
        Ok(spec)
    }
}

/// A selection checked against the resolved domains. Only [`FilterSpec::build`]
/// constructs one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterSpec {
    region: String,
    sub_region: SubRegion,
    view: ViewMode,
}

impl FilterSpec {
    /// Validates raw choices against the resolved domain.
    ///
    /// # Errors
    /// [`PanelError::InvalidFilter`] when the region is unknown or, in period
    /// view, the year or month is missing or not offered by the domain.
    pub fn build(
        domain: &DomainSet,
        region: &str,
        sub_region: &str,
        year: Option<i32>,
        month: Option<u32>,
        panel_mode: bool,
    ) -> Result<Self> {
        if !domain.contains_region(region) {
            return Err(PanelError::InvalidFilter(format!("unknown region '{region}'")));
        }

        let view = if panel_mode {
            ViewMode::Panel
        } else {
            let year =
                year.ok_or_else(|| PanelError::InvalidFilter("year is required".to_string()))?;
            let month =
                month.ok_or_else(|| PanelError::InvalidFilter("month is required".to_string()))?;
            if !domain.contains_year(year) {
                return Err(PanelError::InvalidFilter(format!("unknown year {year}")));
            }
            if !domain.contains_month(month) {
                return Err(PanelError::InvalidFilter(format!("unknown month {month}")));
            }
            ViewMode::Period { year, month }
        };

        Ok(FilterSpec {
            region: region.to_string(),
            sub_region: SubRegion::from_choice(sub_region),
            view,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn sub_region(&self) -> &SubRegion {
        &self.sub_region
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    /// Checks that a named sub-region is offered for this region.
    pub fn check_sub_region(&self, sub_regions: &SubRegionDomain) -> Result<()> {
        if sub_regions.region() != self.region {
            return Err(PanelError::InvalidFilter(format!(
                "sub-regions of '{}' do not apply to region '{}'",
                sub_regions.region(),
                self.region
            )));
        }
        match &self.sub_region {
            SubRegion::Named(name) if !sub_regions.contains(name) => Err(PanelError::InvalidFilter(
                format!("unknown sub-region '{name}' in region '{}'", self.region),
            )),
            _ => Ok(()),
        }
    }

    /// Caption such as `"in Patna, Bihar for January/2020"`.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_region {
            SubRegion::WholeRegion => write!(f, "in {}", self.region)?,
            SubRegion::Named(name) => write!(f, "in {name}, {}", self.region)?,
        }
        match self.view {
            ViewMode::Period { year, month } => write!(f, " for {}/{year}", month_name(month)),
            ViewMode::Panel => write!(f, " across the entire panel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> DomainSet {
        DomainSet {
            regions: vec!["Bihar".into(), "Goa".into()],
            years: vec![2019, 2020],
            months: vec![1, 2],
            modal_region: Some("Bihar".into()),
        }
    }

    fn bihar() -> SubRegionDomain {
        SubRegionDomain::new("Bihar", vec!["Gaya".into(), "Patna".into()])
    }

    #[test]
    fn test_build_period_named() {
        let spec =
            FilterSpec::build(&domain(), "Bihar", "Patna", Some(2020), Some(1), false)
                .unwrap();
        assert_eq!(spec.sub_region(), &SubRegion::Named("Patna".into()));
        assert_eq!(spec.view(), ViewMode::Period { year: 2020, month: 1 });
        assert_eq!(spec.describe(), "in Patna, Bihar for January/2020");
    }

    #[test]
    fn test_sentinel_normalised() {
        let spec = FilterSpec::build(
            &domain(),
            "Bihar",
            WHOLE_REGION_SENTINEL,
            Some(2019),
            Some(2),
            false,
        )
        .unwrap();
        assert_eq!(spec.sub_region(), &SubRegion::WholeRegion);
        assert_eq!(spec.sub_region().name(), None);
        assert_eq!(spec.describe(), "in Bihar for February/2019");
    }

    #[test]
    fn test_panel_ignores_period() {
        let spec = FilterSpec::build(
            &domain(),
            "Bihar",
            WHOLE_REGION_SENTINEL,
            Some(1900),
            None,
            true,
        )
        .unwrap();
        assert_eq!(spec.view(), ViewMode::Panel);
        assert_eq!(spec.describe(), "in Bihar across the entire panel");
    }

    #[test]
    fn test_rejects_values_outside_domain() {
        let cases = [
            ("Atlantis", Some(2020), Some(1)),
            ("Bihar", Some(2030), Some(1)),
            ("Bihar", Some(2020), Some(7)),
            ("Bihar", None, Some(1)),
            ("Bihar", Some(2020), None),
        ];
        for (region, year, month) in cases {
            let result = FilterSpec::build(&domain(), region, "Patna", year, month, false);
            assert!(
                matches!(result, Err(PanelError::InvalidFilter(_))),
                "{region}/{year:?}/{month:?} accepted"
            );
        }
    }

    #[test]
    fn test_unknown_region_rejected_in_panel_mode() {
        let result = FilterSpec::build(&domain(), "Atlantis", WHOLE_REGION_SENTINEL, None, None, true);
        assert!(matches!(result, Err(PanelError::InvalidFilter(_))));
    }

    #[test]
    fn test_check_sub_region() {
        let spec = FilterSpec::build(&domain(), "Bihar", "Mumbai", Some(2020), Some(1), false).unwrap();
        assert!(matches!(
            spec.check_sub_region(&bihar()),
            Err(PanelError::InvalidFilter(_))
        ));

        let whole =
            FilterSpec::build(&domain(), "Bihar", WHOLE_REGION_SENTINEL, None, None, true).unwrap();
        assert!(whole.check_sub_region(&bihar()).is_ok());
        let goa = SubRegionDomain::new("Goa", vec!["North Goa".into()]);
        assert!(matches!(
            whole.check_sub_region(&goa),
            Err(PanelError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_selection_build() {
        let selection = domain().default_selection().unwrap();
        let spec = selection.build(&domain(), &bihar()).unwrap();
        assert_eq!(spec.region(), "Bihar");
        assert_eq!(spec.view(), ViewMode::Period { year: 2020, month: 1 });
    }
}
