#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Area-weighted spatial aggregation.
//!
//! Tract geometries are projected into a per-region Albers equal-area
//! plane and held in an R-tree. Circular buffers around a query point are
//! intersected with candidate tracts to apportion population, and roster
//! sites are counted by geodesic distance.

pub mod aggregator;
pub mod buffer;
pub mod index;
pub mod projection;

use site_predict_geography_models::Region;

/// Errors from boundary loading and aggregation.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// A boundary file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A boundary file is not a usable `GeoJSON` feature collection.
    #[error("Invalid boundary GeoJSON: {message}")]
    GeoJson {
        /// Parse error description.
        message: String,
    },

    /// The catalog holds no tracts for the region.
    #[error("No tracts loaded for {region}")]
    RegionNotLoaded {
        /// Requested region.
        region: Region,
    },
}
