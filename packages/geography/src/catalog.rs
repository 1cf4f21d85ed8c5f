//! In-memory tract catalog shared by every query.
//!
//! The catalog is read-mostly: regions are loaded once at startup and the
//! only mutation afterwards is [`UnitCatalog::insert_fetched`], which is
//! append-only and idempotent. Tracts with zero population are kept in a
//! separate table so they never enter population or demographic math but
//! still resolve (as [`Lookup::Unpopulated`]) without triggering a refetch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use site_predict_geography_models::{Attribute, Region, StatisticalUnit, UnitId};

use crate::CatalogError;
use crate::paths::DataPaths;
use crate::snapshot;

/// Result of looking a tract up in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A tract with residents.
    Populated(Arc<StatisticalUnit>),
    /// A known tract with zero population (water, parks, airports).
    Unpopulated(Arc<StatisticalUnit>),
    /// Not in the catalog.
    Missing,
}

impl Lookup {
    /// The unit, if the tract is known.
    #[must_use]
    pub fn unit(&self) -> Option<&Arc<StatisticalUnit>> {
        match self {
            Self::Populated(unit) | Self::Unpopulated(unit) => Some(unit),
            Self::Missing => None,
        }
    }
}

/// Outcome of [`UnitCatalog::insert_fetched`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The unit was added (and persisted, for a file-backed catalog).
    Inserted(Arc<StatisticalUnit>),
    /// A unit with the same identifier was already present; the existing
    /// instance is returned untouched.
    AlreadyPresent(Arc<StatisticalUnit>),
}

impl InsertOutcome {
    /// The instance the catalog now holds.
    #[must_use]
    pub const fn unit(&self) -> &Arc<StatisticalUnit> {
        match self {
            Self::Inserted(unit) | Self::AlreadyPresent(unit) => unit,
        }
    }
}

/// Counts describing one loaded region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSummary {
    /// Region described.
    pub region: Region,
    /// Tracts with residents.
    pub populated: usize,
    /// Tracts with zero population.
    pub unpopulated: usize,
    /// Populated tracts with estimated or absent attributes.
    pub incomplete: usize,
    /// Sum of tract populations.
    pub total_population: u64,
    /// Attribute medians over observed values.
    pub medians: BTreeMap<Attribute, f64>,
}

#[derive(Debug, Default)]
struct RegionTable {
    populated: HashMap<UnitId, Arc<StatisticalUnit>>,
    unpopulated: HashMap<UnitId, Arc<StatisticalUnit>>,
    medians: BTreeMap<Attribute, f64>,
}

impl RegionTable {
    fn build(units: Vec<StatisticalUnit>) -> Self {
        let mut table = Self::default();
        for unit in units {
            table.insert(Arc::new(unit));
        }
        table.medians = attribute_medians(table.populated.values().map(|u| u.as_ref()));
        table
    }

    fn insert(&mut self, unit: Arc<StatisticalUnit>) {
        let target = if unit.population == 0 {
            &mut self.unpopulated
        } else {
            &mut self.populated
        };
        target.insert(unit.id.clone(), unit);
    }

    fn lookup(&self, id: &UnitId) -> Lookup {
        if let Some(unit) = self.populated.get(id) {
            Lookup::Populated(Arc::clone(unit))
        } else if let Some(unit) = self.unpopulated.get(id) {
            Lookup::Unpopulated(Arc::clone(unit))
        } else {
            Lookup::Missing
        }
    }
}

/// Median of each attribute over the units that observed it. Estimated
/// values are excluded.
fn attribute_medians<'a>(
    units: impl Iterator<Item = &'a StatisticalUnit> + Clone,
) -> BTreeMap<Attribute, f64> {
    Attribute::DEMOGRAPHIC
        .iter()
        .filter_map(|&attribute| {
            let values = units
                .clone()
                .filter(|u| !u.estimated.contains(&attribute))
                .filter_map(|u| u.demographics.get(attribute))
                .collect::<Vec<_>>();
            median(values).map(|m| (attribute, m))
        })
        .collect()
}

/// Median of a set of values, averaging the middle pair for even counts.
/// Non-finite values are ignored.
#[must_use]
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        f64::midpoint(values[mid - 1], values[mid])
    } else {
        values[mid]
    })
}

/// Tract catalog for the loaded regions.
#[derive(Debug)]
pub struct UnitCatalog {
    paths: Option<DataPaths>,
    regions: RwLock<BTreeMap<Region, RegionTable>>,
    /// Serializes `insert_fetched` across the snapshot write, which happens
    /// without the `regions` lock held.
    persist: Mutex<()>,
}

impl UnitCatalog {
    /// Creates an empty catalog persisting fetched tracts under `paths`.
    #[must_use]
    pub fn new(paths: DataPaths) -> Self {
        Self {
            paths: Some(paths),
            regions: RwLock::new(BTreeMap::new()),
            persist: Mutex::new(()),
        }
    }

    /// Creates an empty catalog that never touches the filesystem.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            paths: None,
            regions: RwLock::new(BTreeMap::new()),
            persist: Mutex::new(()),
        }
    }

    /// Loads one region's snapshot, replacing anything previously loaded
    /// for it. Returns the number of tracts read.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::SnapshotMissing`] if the snapshot file does
    /// not exist, or another [`CatalogError`] if it cannot be parsed.
    pub fn load(&self, region: Region) -> Result<usize, CatalogError> {
        let table = self.read_region(region)?;
        let count = table.populated.len() + table.unpopulated.len();
        self.install(region, table);
        Ok(count)
    }

    /// Loads several regions concurrently on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns the first [`CatalogError`] encountered. Nothing is installed
    /// unless every region reads successfully.
    pub async fn load_regions(self: &Arc<Self>, regions: &[Region]) -> Result<usize, CatalogError> {
        let tasks = regions.iter().map(|&region| {
            let catalog = Arc::clone(self);
            async move {
                let table =
                    tokio::task::spawn_blocking(move || catalog.read_region(region)).await??;
                Ok::<_, CatalogError>((region, table))
            }
        });

        let tables = futures::future::try_join_all(tasks).await?;
        let mut total = 0;
        for (region, table) in tables {
            total += table.populated.len() + table.unpopulated.len();
            self.install(region, table);
        }
        Ok(total)
    }

    /// Installs units for a region directly, without reading a snapshot.
    pub fn install_units(&self, region: Region, units: Vec<StatisticalUnit>) {
        self.install(region, RegionTable::build(units));
    }

    fn read_region(&self, region: Region) -> Result<RegionTable, CatalogError> {
        let Some(paths) = &self.paths else {
            return Ok(RegionTable::default());
        };

        let path = paths.snapshot(region);
        if !path.exists() {
            return Err(CatalogError::SnapshotMissing { region, path });
        }

        let units = snapshot::read_snapshot(&path)?;
        Ok(RegionTable::build(units))
    }

    fn install(&self, region: Region, table: RegionTable) {
        log::info!(
            "Loaded {} tracts for {region} ({} unpopulated excluded from aggregation)",
            table.populated.len(),
            table.unpopulated.len()
        );
        self.regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region, table);
    }

    /// Whether a region has been loaded.
    #[must_use]
    pub fn is_loaded(&self, region: Region) -> bool {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&region)
    }

    /// Looks a tract up by identifier.
    #[must_use]
    pub fn lookup(&self, id: &UnitId) -> Lookup {
        let Some(region) = id.region() else {
            return Lookup::Missing;
        };
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&region)
            .map_or(Lookup::Missing, |table| table.lookup(id))
    }

    /// Returns the tract with the given identifier, populated or not.
    #[must_use]
    pub fn get(&self, id: &UnitId) -> Option<Arc<StatisticalUnit>> {
        self.lookup(id).unit().cloned()
    }

    /// Every populated tract of a region.
    #[must_use]
    pub fn units(&self, region: Region) -> Vec<Arc<StatisticalUnit>> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&region)
            .map(|table| table.populated.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of populated tracts in a region.
    #[must_use]
    pub fn unit_count(&self, region: Region) -> usize {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&region)
            .map_or(0, |table| table.populated.len())
    }

    /// Median of an attribute over the region's observed values, computed
    /// when the region was loaded.
    #[must_use]
    pub fn median(&self, region: Region, attribute: Attribute) -> Option<f64> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&region)
            .and_then(|table| table.medians.get(&attribute).copied())
    }

    /// Adds a live-fetched tract. Idempotent: if the identifier is already
    /// known the existing instance is returned and nothing is written.
    ///
    /// For a file-backed catalog the unit is appended to the region's
    /// snapshot before it becomes visible in memory. Inserts are serialized
    /// among themselves; lookups are only blocked for the in-memory insert,
    /// not the file write. The write is blocking I/O, so async callers
    /// should run this on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Malformed`] if the identifier does not belong
    /// to a supported region, or a persistence error if the snapshot append
    /// fails (in which case the unit is not inserted).
    pub fn insert_fetched(&self, unit: StatisticalUnit) -> Result<InsertOutcome, CatalogError> {
        let Some(region) = unit.id.region() else {
            return Err(CatalogError::Malformed {
                path: "<fetched>".to_string(),
                record: 0,
                message: format!("tract {} is outside every supported region", unit.id),
            });
        };

        let _persist = self.persist.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = self.lookup(&unit.id).unit() {
            log::debug!("Tract {} already in catalog, skipping insert", unit.id);
            return Ok(InsertOutcome::AlreadyPresent(Arc::clone(existing)));
        }

        if let Some(paths) = &self.paths {
            snapshot::append_unit(&paths.snapshot(region), &unit)?;
        }

        log::info!(
            "Added fetched tract {} to {region} catalog (population {}, complete: {})",
            unit.id,
            unit.population,
            unit.is_complete()
        );

        let unit = Arc::new(unit);
        self.regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(region)
            .or_default()
            .insert(Arc::clone(&unit));
        Ok(InsertOutcome::Inserted(unit))
    }

    /// Summary counts for a loaded region.
    #[must_use]
    pub fn summary(&self, region: Region) -> Option<RegionSummary> {
        let regions = self.regions.read().unwrap_or_else(PoisonError::into_inner);
        let table = regions.get(&region)?;

        Some(RegionSummary {
            region,
            populated: table.populated.len(),
            unpopulated: table.unpopulated.len(),
            incomplete: table
                .populated
                .values()
                .filter(|u| !u.is_complete())
                .count(),
            total_population: table
                .populated
                .values()
                .map(|u| u64::from(u.population))
                .sum(),
            medians: table.medians.clone(),
        })
    }
}
