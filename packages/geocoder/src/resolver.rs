//! Coordinate to home-tract resolution.
//!
//! Validation happens before any network call: a coordinate outside the
//! region's envelope is rejected immediately. Resolved identifiers are
//! memoized per coordinate (rounded to six decimals, about 0.1 m) so batch
//! runs with repeated points hit the boundary service once. The memo is
//! bounded and starts over when full.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use site_predict_geography::catalog::Lookup;
use site_predict_geography::fetch::UnitFetcher;
use site_predict_geography_models::{LatLon, Region, StatisticalUnit, UnitId};

use crate::{BoundaryService, ResolveError};

/// A coordinate resolved to its home tract.
#[derive(Debug, Clone)]
pub struct ResolvedPoint {
    /// Query coordinate.
    pub at: LatLon,
    /// Requested region.
    pub region: Region,
    /// The home tract, as held by the catalog.
    pub home: Arc<StatisticalUnit>,
    /// Whether the home tract has zero population.
    pub unpopulated: bool,
}

type MemoKey = (Region, i64, i64);

/// Coordinates remembered before the memo is cleared.
pub const DEFAULT_MEMO_CAPACITY: usize = 50_000;

#[allow(clippy::cast_possible_truncation)]
fn memo_key(region: Region, at: LatLon) -> MemoKey {
    (
        region,
        (at.latitude * 1e6).round() as i64,
        (at.longitude * 1e6).round() as i64,
    )
}

/// Validates a coordinate against a region's envelope.
///
/// # Errors
///
/// Returns [`ResolveError::InvalidCoordinates`] if the coordinate is not
/// finite, out of range, or outside the region.
pub fn validate(at: LatLon, region: Region) -> Result<(), ResolveError> {
    let reason = if !at.is_valid() {
        "not a valid latitude/longitude"
    } else if !region.envelope().contains(at) {
        "outside the region's bounding envelope"
    } else {
        return Ok(());
    };

    Err(ResolveError::InvalidCoordinates {
        at,
        region,
        reason: reason.to_string(),
    })
}

/// Resolves coordinates to catalog tracts.
pub struct Resolver {
    service: Arc<dyn BoundaryService>,
    fetcher: Arc<UnitFetcher>,
    memo: RwLock<HashMap<MemoKey, UnitId>>,
    memo_capacity: usize,
}

impl Resolver {
    /// Creates a resolver over a boundary service and the on-demand fetch
    /// path.
    #[must_use]
    pub fn new(service: Arc<dyn BoundaryService>, fetcher: Arc<UnitFetcher>) -> Self {
        Self {
            service,
            fetcher,
            memo: RwLock::new(HashMap::new()),
            memo_capacity: DEFAULT_MEMO_CAPACITY,
        }
    }

    /// Sets how many coordinates are memoized before the memo is cleared.
    #[must_use]
    pub fn with_memo_capacity(mut self, capacity: usize) -> Self {
        self.memo_capacity = capacity.max(1);
        self
    }

    /// Number of memoized coordinates.
    #[must_use]
    pub fn memo_len(&self) -> usize {
        self.memo.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// The fetcher used for catalog misses.
    #[must_use]
    pub const fn fetcher(&self) -> &Arc<UnitFetcher> {
        &self.fetcher
    }

    async fn tract_id(&self, at: LatLon, region: Region) -> Result<UnitId, ResolveError> {
        let key = memo_key(region, at);
        if let Some(id) = self
            .memo
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            log::trace!("Resolved {at} from memo: {id}");
            return Ok(id.clone());
        }

        let tract = self
            .service
            .tract_at(at)
            .await
            .map_err(|source| ResolveError::ServiceFailed { at, source })?
            .ok_or(ResolveError::NoTract { at })?;

        if tract.id.region() != Some(region) {
            return Err(ResolveError::InvalidCoordinates {
                at,
                region,
                reason: format!("resolves to tract {} outside {region}", tract.id),
            });
        }

        log::debug!("Resolved {at} to tract {}", tract.id);
        let mut memo = self.memo.write().unwrap_or_else(PoisonError::into_inner);
        if memo.len() >= self.memo_capacity {
            log::debug!("Resolve memo reached {} entries, clearing", memo.len());
            memo.clear();
        }
        memo.insert(key, tract.id.clone());
        drop(memo);
        Ok(tract.id)
    }

    /// Resolves `(latitude, longitude)` in `region` to its home tract,
    /// fetching the tract into the catalog first if it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidCoordinates`] without any network
    /// call for a coordinate outside the region, a service or no-tract
    /// error if the lookup fails, or [`ResolveError::Fetch`] if the home
    /// tract could not be fetched.
    pub async fn resolve(
        &self,
        latitude: f64,
        longitude: f64,
        region: Region,
    ) -> Result<ResolvedPoint, ResolveError> {
        let at = LatLon::new(latitude, longitude);
        validate(at, region)?;

        let id = self.tract_id(at, region).await?;

        let (home, unpopulated) = match self.fetcher.ensure(&id, at).await? {
            Lookup::Populated(unit) => (unit, false),
            Lookup::Unpopulated(unit) => {
                log::warn!("Home tract {id} of {at} has zero population");
                (unit, true)
            }
            Lookup::Missing => {
                return Err(ResolveError::NoTract { at });
            }
        };

        Ok(ResolvedPoint {
            at,
            region,
            home,
            unpopulated,
        })
    }
}
