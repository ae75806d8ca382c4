//! # household-panel
//!
//! Filter-and-rank engine over a household panel: a columnar table with one
//! row per household per `(year, month)` period, tagged with a region, a
//! sub-region and a two-level category. It supports:
//!
//! - Memory-mapped CSV loading with parallel chunk parsing
//! - Parquet loading, local or fetched over HTTP
//! - Filter domains (regions, years, months, sub-regions) for selection UIs
//! - Validated filter selections with period and whole-panel views
//! - Ranked category distributions with shares of the grand total
//! - A query cache invalidated wholesale when the dataset changes
//!
//! # Example
//!
//! ```no_run
//! use household_panel::{AggregationEngine, DomainResolver, PanelConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PanelConfig::from_env();
//!     let dataset = config.open_dataset()?;
//!     let cache = config.new_cache();
//!
//!     let resolver = DomainResolver::new(dataset.clone(), config.schema.clone(), cache.clone());
//!     let domain = resolver.resolve_domain()?;
//!     let selection = domain.default_selection().ok_or("no regions")?;
//!     let sub_regions = resolver.resolve_sub_regions_or_sentinel(&selection.region);
//!     let spec = selection.build(&domain, &sub_regions)?;
//!
//!     let engine = AggregationEngine::new(dataset, config.schema.clone(), cache);
//!     let distribution = engine.compute_distribution(&spec)?;
//!     println!("Total households {spec}: {}", distribution.grand_total);
//!     for row in &distribution.rows {
//!         println!("{:>3} {} ({}) {} {:.2}%", row.rank, row.category, row.category_class,
//!             row.household_count, row.percentage);
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod config;
pub mod domain;
pub mod error;
pub mod filter_spec;
mod helpers;
pub mod processor;

pub use aggregation::{AggregationEngine, Distribution, RankedRow};
pub use config::{PanelConfig, SchemaMapping};
pub use domain::{DomainResolver, DomainSet, SubRegionDomain, WHOLE_REGION_SENTINEL, month_name};
pub use error::PanelError;
pub use filter_spec::{FilterSpec, Selection, SubRegion, ViewMode};
pub use processor::dataset::{Dataset, DatasetLocation, DatasetVersion, LoadOptions};
pub use processor::query_builder::{QueryBuilder, QueryCache};
