#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature engineering for retail site prediction.
//!
//! [`engine::FeatureEngine::compute_features`] takes a coordinate through
//! resolution, radius aggregation and assembly and returns a
//! [`FeatureVector`](site_predict_features_models::FeatureVector).
//! [`batch`] runs the same pipeline over many points with bounded
//! concurrency.

pub mod assembler;
pub mod batch;
pub mod config;
pub mod engine;

use site_predict_geocoder::ResolveError;
use site_predict_geography::CatalogError;
use site_predict_geography::fetch::FetchError;
use site_predict_geography_models::{LatLon, Region, UnitId};
use site_predict_source::SourceError;
use site_predict_spatial::SpatialError;
use thiserror::Error;

/// Why a query produced no feature vector. Every kind is terminal for the
/// query.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The coordinate is malformed or outside the requested region.
    #[error("Invalid coordinates {at} for {region}: {reason}")]
    InvalidCoordinates {
        /// Query coordinate.
        at: LatLon,
        /// Requested region.
        region: Region,
        /// Why the coordinate was rejected.
        reason: String,
    },

    /// The coordinate could not be mapped to a tract.
    #[error("Could not resolve {at} to a census tract: {reason}")]
    ResolutionFailed {
        /// Query coordinate.
        at: LatLon,
        /// What failed.
        reason: String,
    },

    /// Data the vector depends on could not be found or fetched.
    #[error("Data not found for {at}: {reason}")]
    DataNotFound {
        /// Query coordinate.
        at: LatLon,
        /// Tract concerned, when known.
        unit: Option<UnitId>,
        /// What was missing.
        reason: String,
    },

    /// Required fields are missing and cannot be imputed.
    #[error("Incomplete feature set for tract {home_unit}: missing {}", .missing.join(", "))]
    IncompleteFeatureSet {
        /// Home tract of the query.
        home_unit: UnitId,
        /// Fields that could not be filled.
        missing: Vec<String>,
    },
}

impl FeatureError {
    /// Classifies a resolution failure for the query at `at`.
    #[must_use]
    pub fn from_resolve(at: LatLon, error: ResolveError) -> Self {
        match error {
            ResolveError::InvalidCoordinates { at, region, reason } => {
                Self::InvalidCoordinates { at, region, reason }
            }
            ResolveError::ServiceFailed { at, source } => Self::ResolutionFailed {
                at,
                reason: source.to_string(),
            },
            ResolveError::NoTract { at } => Self::ResolutionFailed {
                at,
                reason: "no tract contains the point".to_string(),
            },
            ResolveError::Fetch(fetch) => Self::from_fetch(at, fetch),
        }
    }

    /// Classifies an on-demand fetch failure.
    #[must_use]
    pub fn from_fetch(at: LatLon, error: FetchError) -> Self {
        let unit = match &error {
            FetchError::NotFound { id, .. } | FetchError::Source { id, .. } => Some(id.clone()),
            FetchError::Catalog(_) => None,
        };
        Self::DataNotFound {
            at,
            unit,
            reason: error.to_string(),
        }
    }

    /// Short machine-readable kind, used in batch output.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCoordinates { .. } => "invalid_coordinates",
            Self::ResolutionFailed { .. } => "resolution_failed",
            Self::DataNotFound { .. } => "data_not_found",
            Self::IncompleteFeatureSet { .. } => "incomplete_feature_set",
        }
    }
}

/// Errors from building an engine from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}
