use thiserror::Error;

use crate::processor::ProcessorError;
use crate::processor::dataset::DatasetLocation;

/// Failures surfaced by the domain resolver, filter construction and the
/// aggregation engine. An empty result is not an error.
#[derive(Debug, Error)]
pub enum PanelError {
    /// The dataset is unreachable, unreadable, empty or has an incompatible schema.
    #[error("dataset '{location}' is unavailable: {reason}")]
    DataUnavailable { location: String, reason: String },

    /// A filter value lies outside the resolved domain.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

impl PanelError {
    pub fn unavailable(location: &DatasetLocation, reason: impl std::fmt::Display) -> Self {
        PanelError::DataUnavailable {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn from_processor(location: &DatasetLocation, err: ProcessorError) -> Self {
        Self::unavailable(location, err)
    }
}

pub type Result<T> = std::result::Result<T, PanelError>;
