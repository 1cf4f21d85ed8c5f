//! On-demand tract fetching.
//!
//! A tract missing from the catalog is assembled from two independent live
//! sources: a geometry source (centroid and land area) and a demographics
//! source (ACS). The result is persisted through
//! [`UnitCatalog::insert_fetched`] and the caller continues with the
//! instance the catalog holds.
//!
//! Fetches are serialized: a second caller asking for a tract that is being
//! fetched waits, rechecks the catalog, and finds the inserted unit.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use site_predict_geography_models::{
    Attribute, Demographics, LatLon, StatisticalUnit, UnitId,
};
use site_predict_source::SourceError;

use crate::CatalogError;
use crate::catalog::{Lookup, UnitCatalog};

/// Centroid and land area of a tract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitGeometry {
    /// Internal point of the tract.
    pub centroid: LatLon,
    /// Land area in square meters.
    pub land_area_sqm: f64,
}

/// Raw demographic values for one tract as published. `None` marks a value
/// the source did not publish (null or a sentinel code).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemographicRecord {
    /// Total population.
    pub population: Option<f64>,
    /// Remaining attributes.
    pub demographics: Demographics,
}

/// Looks up tract centroids and land areas.
#[async_trait]
pub trait UnitGeometrySource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Returns the tract's geometry, or `None` if the source does not know
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the source could not be consulted.
    async fn geometry(&self, id: &UnitId) -> Result<Option<UnitGeometry>, SourceError>;
}

/// Looks up tract demographics.
#[async_trait]
pub trait DemographicsSource: Send + Sync {
    /// Returns the tract's published values, or `None` if the source has no
    /// row for it.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the source could not be consulted.
    async fn demographics(&self, id: &UnitId) -> Result<Option<DemographicRecord>, SourceError>;
}

/// Tries several geometry sources in order and returns the first match.
///
/// A source that errors is logged and skipped. If no source knows the tract
/// and at least one errored, the last error is returned so a transient
/// outage is not mistaken for a missing tract.
pub struct FallbackGeometry {
    sources: Vec<Arc<dyn UnitGeometrySource>>,
}

impl FallbackGeometry {
    /// Creates a fallback chain.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn UnitGeometrySource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl UnitGeometrySource for FallbackGeometry {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn geometry(&self, id: &UnitId) -> Result<Option<UnitGeometry>, SourceError> {
        let mut last_error = None;

        for source in &self.sources {
            match source.geometry(id).await {
                Ok(Some(geometry)) => {
                    log::debug!("Tract {id}: geometry from {}", source.name());
                    return Ok(Some(geometry));
                }
                Ok(None) => log::debug!("Tract {id}: not found in {}", source.name()),
                Err(e) => {
                    log::warn!("Tract {id}: {} lookup failed: {e}", source.name());
                    last_error = Some(e);
                }
            }
        }

        last_error.map_or(Ok(None), Err)
    }
}

/// Errors from the on-demand fetch path.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// A live source has no record of the tract.
    #[error("No {component} found for tract {id} at {at}")]
    NotFound {
        /// Tract being fetched.
        id: UnitId,
        /// Query coordinate that resolved to the tract.
        at: LatLon,
        /// Which component was missing.
        component: &'static str,
    },

    /// A live source could not be consulted.
    #[error("Fetching tract {id} failed: {source}")]
    Source {
        /// Tract being fetched.
        id: UnitId,
        /// Underlying error.
        source: SourceError,
    },

    /// The fetched tract could not be persisted.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Builds a unit from fetched components, applying the default-on-absence
/// rule: missing population becomes zero and is recorded as estimated;
/// missing demographic attributes stay absent.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn materialize(id: UnitId, geometry: UnitGeometry, record: DemographicRecord) -> StatisticalUnit {
    let mut estimated = BTreeSet::new();

    let population = match record.population {
        Some(p) if p.is_finite() && p >= 0.0 => p.round().min(f64::from(u32::MAX)) as u32,
        _ => {
            estimated.insert(Attribute::Population);
            0
        }
    };

    let unit = StatisticalUnit {
        id,
        centroid: geometry.centroid,
        land_area_sqm: geometry.land_area_sqm,
        population,
        demographics: record.demographics,
        estimated,
    };

    if !unit.is_complete() {
        log::warn!(
            "Tract {} fetched with degraded data: estimated {:?}, absent {:?}",
            unit.id,
            unit.estimated,
            unit.demographics.absent()
        );
    }

    unit
}

/// Fetches tracts the catalog does not know and inserts them.
pub struct UnitFetcher {
    catalog: Arc<UnitCatalog>,
    geometry: Arc<dyn UnitGeometrySource>,
    demographics: Arc<dyn DemographicsSource>,
    in_flight: tokio::sync::Mutex<()>,
    fetches: AtomicU64,
}

impl UnitFetcher {
    /// Creates a fetcher inserting into `catalog`.
    #[must_use]
    pub fn new(
        catalog: Arc<UnitCatalog>,
        geometry: Arc<dyn UnitGeometrySource>,
        demographics: Arc<dyn DemographicsSource>,
    ) -> Self {
        Self {
            catalog,
            geometry,
            demographics,
            in_flight: tokio::sync::Mutex::new(()),
            fetches: AtomicU64::new(0),
        }
    }

    /// The catalog fetched tracts are inserted into.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<UnitCatalog> {
        &self.catalog
    }

    /// Number of live fetches performed so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Returns the catalog's entry for `id`, fetching and inserting it first
    /// if it is missing. Never returns [`Lookup::Missing`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::NotFound`] if either live source has no record
    /// of the tract, [`FetchError::Source`] if a source failed after its
    /// retry budget, or [`FetchError::Catalog`] if persisting failed.
    pub async fn ensure(&self, id: &UnitId, at: LatLon) -> Result<Lookup, FetchError> {
        let lookup = self.catalog.lookup(id);
        if !matches!(lookup, Lookup::Missing) {
            return Ok(lookup);
        }

        let _guard = self.in_flight.lock().await;

        let lookup = self.catalog.lookup(id);
        if !matches!(lookup, Lookup::Missing) {
            log::debug!("Tract {id} was inserted while waiting, skipping fetch");
            return Ok(lookup);
        }

        log::info!("Tract {id} not in catalog, fetching from live sources...");
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let (geometry, record) =
            tokio::join!(self.geometry.geometry(id), self.demographics.demographics(id));

        let source_error = |source| FetchError::Source {
            id: id.clone(),
            source,
        };
        let not_found = |component| FetchError::NotFound {
            id: id.clone(),
            at,
            component,
        };

        let geometry = geometry
            .map_err(source_error)?
            .ok_or_else(|| not_found("centroid/area record"))?;
        let record = record
            .map_err(source_error)?
            .ok_or_else(|| not_found("demographic record"))?;

        let unit = materialize(id.clone(), geometry, record);
        let catalog = Arc::clone(&self.catalog);
        tokio::task::spawn_blocking(move || catalog.insert_fetched(unit))
            .await
            .map_err(CatalogError::from)??;

        Ok(self.catalog.lookup(id))
    }
}
