//! Filter domains: the distinct values offered for each filter dimension.
//!
//! Every scan goes through the shared [`QueryCache`], so repeated resolution
//! against an unchanged dataset is served from memory and a new dataset
//! version drops all cached scans at once.

use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::SchemaMapping;
use crate::error::{PanelError, Result};
use crate::filter_spec::Selection;
use crate::processor::dataset::Dataset;
use crate::processor::query_builder::{QueryCache, QueryResult};
use crate::processor::{FilterPredicate, Value};

/// Synthetic sub-region option meaning "do not restrict by sub-region".
pub const WHOLE_REGION_SENTINEL: &str = "Entire State";

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// English month name, or the number itself when outside 1..=12.
pub fn month_name(month: u32) -> String {
    month
        .checked_sub(1)
        .and_then(|idx| MONTH_NAMES.get(idx as usize))
        .map_or_else(|| month.to_string(), |name| name.to_string())
}

/// Distinct values for the region, year and month filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSet {
    /// Ascending
    pub regions: Vec<String>,
    /// Ascending
    pub years: Vec<i32>,
    /// Ascending, within 1..=12
    pub months: Vec<u32>,
    /// Region with the most rows; ties go to the alphabetically first region.
    pub modal_region: Option<String>,
}

impl DomainSet {
    pub fn contains_region(&self, region: &str) -> bool {
        self.regions.binary_search_by(|r| r.as_str().cmp(region)).is_ok()
    }

    pub fn contains_year(&self, year: i32) -> bool {
        self.years.binary_search(&year).is_ok()
    }

    pub fn contains_month(&self, month: u32) -> bool {
        self.months.binary_search(&month).is_ok()
    }

    /// Initial selection: the modal region (else the first), the latest year,
    /// January when present (else the latest month), whole region, period view.
    pub fn default_selection(&self) -> Option<Selection> {
        let region = self
            .modal_region
            .clone()
            .filter(|r| self.contains_region(r))
            .or_else(|| self.regions.first().cloned())?;
        let month = if self.contains_month(1) {
            Some(1)
        } else {
            self.months.last().copied()
        };
        Some(Selection {
            region,
            sub_region: WHOLE_REGION_SENTINEL.to_string(),
            year: self.years.last().copied(),
            month,
            panel_mode: false,
        })
    }
}

/// Sub-region options for one region; element 0 is always the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRegionDomain {
    region: String,
    options: Vec<String>,
}

impl SubRegionDomain {
    /// Builds the option list from sorted distinct sub-regions. A real value
    /// equal to the sentinel text is folded into the leading sentinel.
    pub fn new(region: &str, sub_regions: Vec<String>) -> Self {
        let mut options = Vec::with_capacity(sub_regions.len() + 1);
        options.push(WHOLE_REGION_SENTINEL.to_string());
        options.extend(
            sub_regions
                .into_iter()
                .filter(|s| s != WHOLE_REGION_SENTINEL),
        );
        SubRegionDomain {
            region: region.to_string(),
            options,
        }
    }

    pub fn sentinel_only(region: &str) -> Self {
        Self::new(region, Vec::new())
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Options without the leading sentinel.
    pub fn sub_regions(&self) -> &[String] {
        &self.options[1..]
    }

    pub fn contains(&self, sub_region: &str) -> bool {
        self.options.iter().any(|s| s == sub_region)
    }
}

/// Computes filter domains from a dataset.
#[derive(Debug, Clone)]
pub struct DomainResolver {
    dataset: Rc<Dataset>,
    schema: SchemaMapping,
    cache: Rc<QueryCache>,
}

impl DomainResolver {
    pub fn new(dataset: Rc<Dataset>, schema: SchemaMapping, cache: Rc<QueryCache>) -> Self {
        Self {
            dataset,
            schema,
            cache,
        }
    }

    pub fn dataset(&self) -> &Rc<Dataset> {
        &self.dataset
    }

    /// Points the resolver at a reloaded dataset. Cached scans of the previous
    /// version are dropped on the next lookup.
    pub fn replace_dataset(&mut self, dataset: Rc<Dataset>) {
        self.dataset = dataset;
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> PanelError {
        PanelError::unavailable(self.dataset.location(), reason)
    }

    fn check_schema(&self) -> Result<()> {
        self.schema
            .validate(&self.dataset)
            .map_err(|err| self.unavailable(err))
    }

    fn distinct_values(
        &self,
        column: &str,
        filter: Option<(&str, &str)>,
    ) -> Result<Vec<Value>> {
        let mut query = self.dataset.query_with_cache(&self.cache);
        if let Some((filter_col, value)) = filter {
            query = query.filter(filter_col, FilterPredicate::Equals(Value::from(value)));
        }
        match query.distinct(column).execute() {
            Ok(QueryResult::Distinct(values)) => Ok(values),
            Ok(other) => Err(self.unavailable(format!("unexpected result {other:?}"))),
            Err(err) => Err(self.unavailable(err)),
        }
    }

    fn distinct_ints<T: TryFrom<i64>>(&self, column: &str) -> Result<Vec<T>> {
        self.distinct_values(column, None)?
            .into_iter()
            .map(|value| {
                value
                    .as_int()
                    .and_then(|v| T::try_from(v).ok())
                    .ok_or_else(|| {
                        self.unavailable(format!("column '{column}' holds out-of-range value {value}"))
                    })
            })
            .collect()
    }

    fn modal_region(&self) -> Result<Option<String>> {
        let result = self
            .dataset
            .query_with_cache(&self.cache)
            .group_by(&self.schema.region)
            .count_rows()
            .execute()
            .map_err(|err| self.unavailable(err))?;
        let QueryResult::Groups(groups) = result else {
            return Err(self.unavailable("unexpected result for region counts"));
        };

        // Groups arrive in ascending key order; a strict comparison keeps the
        // first region among equal counts.
        let mut best: Option<(&Value, u64)> = None;
        for group in &groups {
            let Some(region) = group.key.first().filter(|v| !matches!(v, Value::Null)) else {
                continue;
            };
            if best.is_none_or(|(_, count)| group.count > count) {
                best = Some((region, group.count));
            }
        }
        Ok(best.map(|(region, _)| region.to_string()))
    }

    /// Scans the dataset for the region, year and month domains plus the modal
    /// region.
    ///
    /// # Errors
    /// [`PanelError::DataUnavailable`] when the schema does not match, the
    /// dataset has no rows, or any of the three domains is empty.
    pub fn resolve_domain(&self) -> Result<DomainSet> {
        self.check_schema()?;
        if self.dataset.row_count() == 0 {
            return Err(self.unavailable("dataset contains no rows"));
        }

        let regions: Vec<String> = self
            .distinct_values(&self.schema.region, None)?
            .iter()
            .map(Value::to_string)
            .collect();
        let years: Vec<i32> = self.distinct_ints(&self.schema.year)?;
        let months: Vec<u32> = self.distinct_ints(&self.schema.month)?;

        if let Some(bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(self.unavailable(format!(
                "column '{}' holds invalid month {bad}",
                self.schema.month
            )));
        }
        if regions.is_empty() || years.is_empty() || months.is_empty() {
            return Err(self.unavailable("no values available for filters"));
        }

        let modal_region = match self.modal_region() {
            Ok(region) => region,
            Err(err) => {
                warn!(error = %err, "modal region unavailable, using first region");
                regions.first().cloned()
            }
        };

        debug!(
            regions = regions.len(),
            years = years.len(),
            months = months.len(),
            modal_region = modal_region.as_deref().unwrap_or(""),
            "domain resolved"
        );

        Ok(DomainSet {
            regions,
            years,
            months,
            modal_region,
        })
    }

    /// Distinct sub-regions of `region`, ascending, behind the sentinel.
    pub fn resolve_sub_regions(&self, region: &str) -> Result<SubRegionDomain> {
        self.check_schema()?;
        let sub_regions = self
            .distinct_values(&self.schema.sub_region, Some((&self.schema.region, region)))?
            .iter()
            .map(Value::to_string)
            .collect();
        Ok(SubRegionDomain::new(region, sub_regions))
    }

    /// Like [`resolve_sub_regions`](Self::resolve_sub_regions) but degrades to
    /// a sentinel-only domain on failure.
    pub fn resolve_sub_regions_or_sentinel(&self, region: &str) -> SubRegionDomain {
        self.resolve_sub_regions(region).unwrap_or_else(|err| {
            warn!(region, error = %err, "sub-region lookup failed, offering whole region only");
            SubRegionDomain::sentinel_only(region)
        })
    }
}
