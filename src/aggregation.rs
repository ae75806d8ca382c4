//! Ranked category distributions for a filter.

use std::rc::Rc;
use std::sync::Arc;

use arrow2::{
    array::{Array, Float64Array, UInt32Array, UInt64Array, Utf8Array},
    chunk::Chunk,
    datatypes::{DataType, Field, Schema},
};
use tracing::debug;

use crate::config::SchemaMapping;
use crate::error::{self, PanelError};
use crate::filter_spec::{FilterSpec, SubRegion, ViewMode};
use crate::helpers::math_helpers::percentage;
use crate::processor::dataset::Dataset;
use crate::processor::query_builder::{QueryCache, QueryResult};
use crate::processor::{FilterPredicate, GroupCount, Value};

/// One `(category, category class)` group of a distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    pub category: String,
    pub category_class: String,
    pub household_count: u64,
    /// Share of the grand total, rounded to two decimals.
    pub percentage: f64,
    /// 1 for the largest count; unique within a distribution.
    pub rank: u32,
}

/// Rows ordered by rank plus the sum of their counts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Distribution {
    pub rows: Vec<RankedRow>,
    pub grand_total: u64,
}

impl Distribution {
    /// Ranks `(category, category class, count)` triples. Groups are ordered by
    /// count descending, then category and class ascending. Zero counts are
    /// dropped.
    pub fn from_counts(counts: impl IntoIterator<Item = (String, String, u64)>) -> Self {
        let mut counts: Vec<(String, String, u64)> =
            counts.into_iter().filter(|(_, _, count)| *count > 0).collect();
        counts.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)).then_with(|| a.1.cmp(&b.1)));

        let grand_total: u64 = counts.iter().map(|(_, _, count)| count).sum();
        let rows = counts
            .into_iter()
            .zip(1u32..)
            .map(|((category, category_class, household_count), rank)| RankedRow {
                category,
                category_class,
                household_count,
                percentage: percentage(household_count, grand_total),
                rank,
            })
            .collect();

        Distribution { rows, grand_total }
    }

    fn from_groups(groups: Vec<GroupCount>) -> Result<Self, String> {
        let counts = groups
            .into_iter()
            .map(|group| match group.key.as_slice() {
                [category, class] => Ok((category.to_string(), class.to_string(), group.count)),
                key => Err(format!("expected a two-column group key, got {key:?}")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_counts(counts))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// The rank-1 row.
    pub fn dominant(&self) -> Option<&RankedRow> {
        self.rows.first()
    }

    /// Table with columns `Rank`, `Category`, `Households`, `Percentage` and
    /// `CategoryClass`, one row per ranked group.
    pub fn to_arrow(&self) -> (Schema, Chunk<Arc<dyn Array>>) {
        let schema = Schema::from(vec![
            Field::new("Rank", DataType::UInt32, false),
            Field::new("Category", DataType::Utf8, false),
            Field::new("Households", DataType::UInt64, false),
            Field::new("Percentage", DataType::Float64, false),
            Field::new("CategoryClass", DataType::Utf8, false),
        ]);

        let ranks: Vec<u32> = self.rows.iter().map(|r| r.rank).collect();
        let categories: Vec<&str> = self.rows.iter().map(|r| r.category.as_str()).collect();
        let counts: Vec<u64> = self.rows.iter().map(|r| r.household_count).collect();
        let percentages: Vec<f64> = self.rows.iter().map(|r| r.percentage).collect();
        let classes: Vec<&str> = self.rows.iter().map(|r| r.category_class.as_str()).collect();

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(UInt32Array::from_vec(ranks)),
            Arc::new(Utf8Array::<i32>::from_slice(categories)),
            Arc::new(UInt64Array::from_vec(counts)),
            Arc::new(Float64Array::from_vec(percentages)),
            Arc::new(Utf8Array::<i32>::from_slice(classes)),
        ];

        (schema, Chunk::new(arrays))
    }
}

/// Computes ranked distributions over one dataset snapshot.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    dataset: Rc<Dataset>,
    schema: SchemaMapping,
    cache: Rc<QueryCache>,
}

impl AggregationEngine {
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

    pub fn replace_dataset(&mut self, dataset: Rc<Dataset>) {
        self.dataset = dataset;
    }

    /// Ranks category groups among the rows matching `spec`.
    ///
    /// Period views count rows with a household id; panel views count
    /// distinct households so a household seen in several periods counts once.
    /// Rows with a missing category fall into a group with an empty name. A
    /// filter matching no rows yields an empty distribution with a zero total.
    ///
    /// # Errors
    /// [`PanelError::DataUnavailable`] when the dataset schema does not match
    /// or the query cannot run.
    pub fn compute_distribution(&self, spec: &FilterSpec) -> error::Result<Distribution> {
        let unavailable = |reason: String| PanelError::unavailable(self.dataset.location(), reason);
        self.schema
            .validate(&self.dataset)
            .map_err(|err| unavailable(err.to_string()))?;

        let schema = &self.schema;
        let mut query = self.dataset.query_with_cache(&self.cache).filter(
            &schema.region,
            FilterPredicate::Equals(Value::from(spec.region())),
        );
        if let ViewMode::Period { year, month } = spec.view() {
            query = query
                .filter(&schema.year, FilterPredicate::Equals(Value::from(i64::from(year))))
                .filter(&schema.month, FilterPredicate::Equals(Value::from(i64::from(month))));
        }
        if let SubRegion::Named(name) = spec.sub_region() {
            query = query.filter(
                &schema.sub_region,
                FilterPredicate::Equals(Value::from(name.as_str())),
            );
        }

        query = query.group_by_multi(vec![
            schema.category.as_str(),
            schema.category_class.as_str(),
        ]);
        query = match spec.view() {
            ViewMode::Period { .. } => query.count_non_null(&schema.household_id),
            ViewMode::Panel => query.count_distinct(&schema.household_id),
        };

        let groups = match query.execute() {
            Ok(QueryResult::Groups(groups)) => groups,
            Ok(other) => return Err(unavailable(format!("unexpected result {other:?}"))),
            Err(err) => return Err(unavailable(err.to_string())),
        };
        let distribution = Distribution::from_groups(groups).map_err(unavailable)?;

        debug!(
            filter = %spec,
            groups = distribution.len(),
            grand_total = distribution.grand_total,
            "distribution computed"
        );
        Ok(distribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainSet, WHOLE_REGION_SENTINEL};
    use crate::processor::dataset::{DatasetLocation, LoadOptions};

    const HEADER: &str = "hh_id,state,district,date_year,date_month,caste,caste_category\n";

    fn engine(body: &str) -> AggregationEngine {
        let schema = SchemaMapping::default();
        let options = LoadOptions {
            type_hints: schema.type_hints(),
            ..LoadOptions::default()
        };
        let dataset = Dataset::from_bytes(
            DatasetLocation::parse("aggregation.csv"),
            format!("{HEADER}{body}").into_bytes(),
            &options,
        )
        .unwrap();
        AggregationEngine::new(Rc::new(dataset), schema, Rc::new(QueryCache::new()))
    }

    fn spec(region: &str, sub_region: &str, view: ViewMode) -> FilterSpec {
        let domain = DomainSet {
            regions: vec!["A".into(), "B".into()],
            years: vec![2019, 2020, 2021],
            months: vec![1],
            modal_region: None,
        };
        let (year, month, panel_mode) = match view {
            ViewMode::Period { year, month } => (Some(year), Some(month), false),
            ViewMode::Panel => (None, None, true),
        };
        FilterSpec::build(&domain, region, sub_region, year, month, panel_mode).unwrap()
    }

    #[test]
    fn test_from_counts_ranks_with_tie_breaks() {
        let dist = Distribution::from_counts(vec![
            ("Yadav".to_string(), "OBC".to_string(), 5),
            ("Brahmin".to_string(), "General".to_string(), 5),
            ("Brahmin".to_string(), "Forward".to_string(), 5),
            ("Kurmi".to_string(), "OBC".to_string(), 10),
            ("Empty".to_string(), "None".to_string(), 0),
        ]);

        let order: Vec<(&str, &str, u32)> = dist
            .rows
            .iter()
            .map(|r| (r.category.as_str(), r.category_class.as_str(), r.rank))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Kurmi", "OBC", 1),
                ("Brahmin", "Forward", 2),
                ("Brahmin", "General", 3),
                ("Yadav", "OBC", 4),
            ]
        );
        assert_eq!(dist.grand_total, 25);
        assert_eq!(dist.rows[0].percentage, 40.0);
        assert_eq!(dist.dominant().map(|r| r.category.as_str()), Some("Kurmi"));
    }

    #[test]
    fn test_period_view_counts_rows() {
        let engine = engine(
            "1,A,X,2020,1,C1,K1\n\
             2,A,X,2020,1,C1,K1\n\
             3,A,X,2020,1,C2,K2\n",
        );
        let dist = engine
            .compute_distribution(&spec(
                "A",
                WHOLE_REGION_SENTINEL,
                ViewMode::Period { year: 2020, month: 1 },
            ))
            .unwrap();

        assert_eq!(dist.grand_total, 3);
        assert_eq!(dist.rows.len(), 2);
        assert_eq!(dist.rows[0].category, "C1");
        assert_eq!(dist.rows[0].household_count, 2);
        assert_eq!(dist.rows[0].percentage, 66.67);
        assert_eq!(dist.rows[1].category, "C2");
        assert_eq!(dist.rows[1].percentage, 33.33);
        assert_eq!(dist.rows[1].rank, 2);
    }

    #[test]
    fn test_period_view_skips_missing_households() {
        let engine = engine(
            "1,A,X,2020,1,C1,K1\n\
             ,A,X,2020,1,C1,K1\n\
             3,A,X,2020,1,,K3\n\
             4,A,X,2020,1,C1,K1\n",
        );
        let dist = engine
            .compute_distribution(&spec(
                "A",
                WHOLE_REGION_SENTINEL,
                ViewMode::Period { year: 2020, month: 1 },
            ))
            .unwrap();

        assert_eq!(dist.grand_total, 3);
        assert_eq!(dist.rows[0].category, "C1");
        assert_eq!(dist.rows[0].household_count, 2);
        assert_eq!(dist.rows[1].category, "");
        assert_eq!(dist.rows[1].category_class, "K3");
        assert_eq!(dist.rows[1].household_count, 1);
    }

    #[test]
    fn test_panel_view_counts_households_once() {
        let engine = engine(
            "1,A,X,2020,1,C1,K1\n\
             2,A,X,2020,1,C1,K1\n\
             3,A,X,2020,1,C2,K2\n\
             1,A,X,2021,1,C1,K1\n",
        );
        let panel = engine
            .compute_distribution(&spec("A", WHOLE_REGION_SENTINEL, ViewMode::Panel))
            .unwrap();
        assert_eq!(panel.grand_total, 3);
        assert_eq!(panel.rows[0].household_count, 2);
    }

    #[test]
    fn test_named_sub_region_restricts_rows() {
        let engine = engine(
            "1,A,X,2020,1,C1,K1\n\
             2,A,Y,2020,1,C2,K2\n\
             3,A,Y,2020,1,C2,K2\n",
        );
        let dist = engine
            .compute_distribution(&spec("A", "X", ViewMode::Period { year: 2020, month: 1 }))
            .unwrap();
        assert_eq!(dist.grand_total, 1);
        assert_eq!(dist.rows[0].category, "C1");
        assert_eq!(dist.rows[0].percentage, 100.0);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let engine = engine("1,A,X,2020,1,C1,K1\n");
        let dist = engine
            .compute_distribution(&spec(
                "A",
                WHOLE_REGION_SENTINEL,
                ViewMode::Period { year: 2019, month: 1 },
            ))
            .unwrap();
        assert!(dist.is_empty());
        assert_eq!(dist.grand_total, 0);
        assert!(dist.dominant().is_none());
    }

    #[test]
    fn test_schema_mismatch_is_unavailable() {
        let base = engine("1,A,X,2020,1,C1,K1\n");
        let schema = SchemaMapping {
            category: "jati".to_string(),
            ..SchemaMapping::default()
        };
        let engine = AggregationEngine::new(base.dataset().clone(), schema, Rc::new(QueryCache::new()));
        let result = engine.compute_distribution(&spec("A", WHOLE_REGION_SENTINEL, ViewMode::Panel));
        assert!(matches!(result, Err(PanelError::DataUnavailable { .. })));
    }

    #[test]
    fn test_to_arrow_columns() {
        let dist = Distribution::from_counts(vec![
            ("C1".to_string(), "K1".to_string(), 2),
            ("C2".to_string(), "K2".to_string(), 1),
        ]);
        let (schema, chunk) = dist.to_arrow();
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Rank", "Category", "Households", "Percentage", "CategoryClass"]
        );
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.arrays().len(), 5);
    }
}
