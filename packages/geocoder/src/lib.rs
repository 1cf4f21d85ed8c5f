#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reference point resolution.
//!
//! Maps a latitude/longitude to the census tract containing it using the
//! Census Bureau geographies geocoder, then makes sure the tract is in the
//! catalog (fetching it on demand when it is not).

pub mod census;
pub mod resolver;

use async_trait::async_trait;
use site_predict_geography::fetch::FetchError;
use site_predict_geography_models::{LatLon, Region, UnitId};
use site_predict_source::SourceError;
use thiserror::Error;

/// A tract returned by a boundary lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TractMatch {
    /// Tract GEOID.
    pub id: UnitId,
    /// Human-readable tract number (e.g. `"165.01"`), when provided.
    pub basename: Option<String>,
}

/// Point-in-tract lookup service.
#[async_trait]
pub trait BoundaryService: Send + Sync {
    /// Returns the tract containing `at`, or `None` if the point lies in
    /// no tract (open water outside every boundary).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] once the service's retry budget is spent or
    /// on a permanent failure.
    async fn tract_at(&self, at: LatLon) -> Result<Option<TractMatch>, SourceError>;
}

/// Errors from resolving a coordinate to its home tract.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The coordinate is malformed or outside the region.
    #[error("Invalid coordinates {at} for {region}: {reason}")]
    InvalidCoordinates {
        /// Query coordinate.
        at: LatLon,
        /// Requested region.
        region: Region,
        /// Why the coordinate was rejected.
        reason: String,
    },

    /// The boundary service failed after its retry budget.
    #[error("Boundary lookup for {at} failed: {source}")]
    ServiceFailed {
        /// Query coordinate.
        at: LatLon,
        /// Underlying error.
        source: SourceError,
    },

    /// The boundary service answered but placed the point in no tract.
    #[error("No census tract contains {at}")]
    NoTract {
        /// Query coordinate.
        at: LatLon,
    },

    /// The home tract was missing from the catalog and could not be
    /// fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
