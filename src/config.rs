//! Runtime configuration for opening and querying a household panel.
//!
//! Values default to the public panel dataset and the column names it uses.
//! Environment overrides are read by [`PanelConfig::from_env`]:
//!
//! - `PANEL_DATASET_LOCATION`: local path or `http(s)` URL of the dataset.
//! - `PANEL_FETCH_TIMEOUT_SECS`: timeout for fetching a remote dataset.
//! - `PANEL_CACHE_CAPACITY`: number of query results kept in the LRU cache.
//!
//! Unparsable values are logged and ignored.

use std::rc::Rc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{self, PanelError};
use crate::processor::dataset::{Dataset, DatasetLocation, LoadOptions};
use crate::processor::loader::TypeHints;
use crate::processor::query_builder::{DEFAULT_CACHE_CAPACITY, QueryCache};
use crate::processor::{ColumnType, ProcessorError};

pub const ENV_DATASET_LOCATION: &str = "PANEL_DATASET_LOCATION";
pub const ENV_FETCH_TIMEOUT_SECS: &str = "PANEL_FETCH_TIMEOUT_SECS";
pub const ENV_CACHE_CAPACITY: &str = "PANEL_CACHE_CAPACITY";

pub const DEFAULT_DATASET_LOCATION: &str =
    "https://storage.googleapis.com/jati-data/new_replication_panel.parquet";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Names of the columns the engine reads. The defaults match the published panel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaMapping {
    pub household_id: String,
    pub region: String,
    pub sub_region: String,
    pub year: String,
    pub month: String,
    pub category: String,
    pub category_class: String,
}

impl Default for SchemaMapping {
    fn default() -> Self {
        Self {
            household_id: "hh_id".to_string(),
            region: "state".to_string(),
            sub_region: "district".to_string(),
            year: "date_year".to_string(),
            month: "date_month".to_string(),
            category: "caste".to_string(),
            category_class: "caste_category".to_string(),
        }
    }
}

impl SchemaMapping {
    fn string_columns(&self) -> [&str; 5] {
        [
            self.household_id.as_str(),
            self.region.as_str(),
            self.sub_region.as_str(),
            self.category.as_str(),
            self.category_class.as_str(),
        ]
    }

    fn integer_columns(&self) -> [&str; 2] {
        [self.year.as_str(), self.month.as_str()]
    }

    /// Every mapped column, the only ones decoded when a dataset is opened.
    pub fn columns(&self) -> Vec<String> {
        self.string_columns()
            .into_iter()
            .chain(self.integer_columns())
            .map(str::to_string)
            .collect()
    }

    /// Types forced on CSV input so labels that look numeric stay strings.
    pub fn type_hints(&self) -> TypeHints {
        let mut hints = TypeHints::new();
        for column in self.string_columns() {
            hints.insert(column.to_string(), ColumnType::Str);
        }
        for column in self.integer_columns() {
            hints.insert(column.to_string(), ColumnType::Int64);
        }
        hints
    }

    /// Checks that every mapped column exists with a usable type. The household
    /// id may be of any type.
    pub fn validate(&self, dataset: &Dataset) -> Result<(), ProcessorError> {
        dataset.get_col(&self.household_id)?;
        for column in self.string_columns().into_iter().skip(1) {
            expect_type(dataset, column, ColumnType::Str)?;
        }
        for column in self.integer_columns() {
            expect_type(dataset, column, ColumnType::Int64)?;
        }
        Ok(())
    }
}

fn expect_type(dataset: &Dataset, column: &str, expected: ColumnType) -> Result<(), ProcessorError> {
    let actual = dataset.column_type(column)?;
    if actual != expected {
        return Err(ProcessorError::ColumnType {
            column: column.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Where the dataset is read from.
    pub dataset_location: DatasetLocation,
    /// Column names of the dataset.
    pub schema: SchemaMapping,
    /// Timeout applied to remote fetches.
    pub fetch_timeout: Duration,
    /// Entries kept by the query cache.
    pub cache_capacity: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            dataset_location: DatasetLocation::parse(DEFAULT_DATASET_LOCATION),
            schema: SchemaMapping::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl PanelConfig {
    pub fn new(dataset_location: DatasetLocation) -> Self {
        Self {
            dataset_location,
            ..Self::default()
        }
    }

    /// Defaults overridden by the `PANEL_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(location) = lookup(ENV_DATASET_LOCATION) {
            if location.trim().is_empty() {
                warn!(var = ENV_DATASET_LOCATION, "empty dataset location ignored");
            } else {
                self.dataset_location = DatasetLocation::parse(&location);
            }
        }
        if let Some(raw) = lookup(ENV_FETCH_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.fetch_timeout = Duration::from_secs(secs),
                _ => warn!(var = ENV_FETCH_TIMEOUT_SECS, value = %raw, "invalid timeout ignored"),
            }
        }
        if let Some(raw) = lookup(ENV_CACHE_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => self.cache_capacity = capacity,
                _ => warn!(var = ENV_CACHE_CAPACITY, value = %raw, "invalid cache capacity ignored"),
            }
        }
        self
    }

    pub fn with_schema(mut self, schema: SchemaMapping) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            fetch_timeout: self.fetch_timeout,
            type_hints: self.schema.type_hints(),
            columns: Some(self.schema.columns()),
        }
    }

    /// Opens the configured dataset. Any read or decode failure is reported as
    /// [`PanelError::DataUnavailable`].
    pub fn open_dataset(&self) -> error::Result<Rc<Dataset>> {
        info!(location = %self.dataset_location, "opening dataset");
        Dataset::open(self.dataset_location.clone(), &self.load_options())
            .map(Rc::new)
            .map_err(|err| PanelError::from_processor(&self.dataset_location, err))
    }

    pub fn new_cache(&self) -> Rc<QueryCache> {
        Rc::new(QueryCache::with_capacity(self.cache_capacity))
    }
}
