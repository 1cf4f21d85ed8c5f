#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Census tract catalog and on-demand tract fetching.
//!
//! The [`catalog::UnitCatalog`] holds every tract of the loaded regions in
//! memory, backed by one CSV snapshot per region. When a query lands in a
//! tract the snapshot does not know, [`fetch::UnitFetcher`] assembles it
//! from the Census Gazetteer (or `TIGERweb`) and the ACS 5-year API,
//! appends it to the snapshot and hands back the catalog's instance.

pub mod acs;
pub mod catalog;
pub mod fetch;
pub mod gazetteer;
pub mod paths;
pub mod roster;
pub mod snapshot;
pub mod tigerweb;

use std::path::PathBuf;

use site_predict_geography_models::Region;
use thiserror::Error;

/// Errors that can occur while loading or persisting catalog data.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The configured snapshot file for a region does not exist.
    #[error("Snapshot for {region} not found at {path}")]
    SnapshotMissing {
        /// Region whose snapshot was requested.
        region: Region,
        /// Expected snapshot location.
        path: PathBuf,
    },

    /// CSV parsing or writing failed.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// File being read or written.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// I/O error reading or writing a data file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A row could not be interpreted.
    #[error("Malformed row in {path} (record {record}): {message}")]
    Malformed {
        /// File containing the row.
        path: String,
        /// 1-based record number, excluding the header.
        record: u64,
        /// Description of what went wrong.
        message: String,
    },

    /// A background load task panicked or was cancelled.
    #[error("Catalog load task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CatalogError {
    fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn csv(path: &std::path::Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.display().to_string(),
            source,
        }
    }
}
