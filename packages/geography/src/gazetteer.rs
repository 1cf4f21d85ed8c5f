//! Census Gazetteer tract files.
//!
//! One tab-delimited file per state:
//!
//! ```text
//! USPS  GEOID  ALAND  AWATER  ALAND_SQMI  AWATER_SQMI  INTPTLAT  INTPTLONG
//! ```
//!
//! The published files pad the last header with trailing whitespace, so
//! headers are trimmed before matching.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use site_predict_geography_models::{LatLon, Region, UnitId};
use site_predict_source::SourceError;

use crate::fetch::{UnitGeometry, UnitGeometrySource};
use crate::paths::DataPaths;

/// Reads a Gazetteer tract file into a map keyed by tract identifier.
///
/// Rows with an unparseable identifier, area or internal point are skipped
/// and logged.
///
/// # Errors
///
/// Returns [`SourceError::Io`] if the file cannot be read, or
/// [`SourceError::Normalization`] if a required column is missing.
pub fn read_gazetteer(path: &Path) -> Result<HashMap<UnitId, UnitGeometry>, SourceError> {
    let bytes = std::fs::read(path)?;
    parse_gazetteer(&bytes).map_err(|message| SourceError::Normalization {
        message: format!("{}: {message}", path.display()),
    })
}

fn parse_gazetteer(bytes: &[u8]) -> Result<HashMap<UnitId, UnitGeometry>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(|h| h.trim().to_owned())
        .collect();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| format!("missing column {name}"))
    };
    let geoid_col = column("GEOID")?;
    let aland_col = column("ALAND")?;
    let lat_col = column("INTPTLAT")?;
    let lon_col = column("INTPTLONG")?;

    let mut records = HashMap::new();
    let mut skipped = 0u64;

    for result in reader.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or_default();
        let number = |i: usize| field(i).parse::<f64>().ok();

        let Ok(id) = field(geoid_col).parse::<UnitId>() else {
            skipped += 1;
            continue;
        };
        let (Some(land_area_sqm), Some(lat), Some(lon)) =
            (number(aland_col), number(lat_col), number(lon_col))
        else {
            log::trace!("Gazetteer: skipping incomplete row for {id}");
            skipped += 1;
            continue;
        };

        records.insert(
            id,
            UnitGeometry {
                centroid: LatLon::new(lat, lon),
                land_area_sqm,
            },
        );
    }

    if skipped > 0 {
        log::debug!("Gazetteer: skipped {skipped} malformed rows");
    }
    Ok(records)
}

/// Gazetteer files on disk, loaded lazily per region and kept in memory.
pub struct GazetteerFiles {
    paths: DataPaths,
    year: u16,
    loaded: tokio::sync::Mutex<BTreeMap<Region, Arc<HashMap<UnitId, UnitGeometry>>>>,
}

impl GazetteerFiles {
    /// Creates a source reading `{year}` Gazetteer files under `paths`.
    #[must_use]
    pub fn new(paths: DataPaths, year: u16) -> Self {
        Self {
            paths,
            year,
            loaded: tokio::sync::Mutex::new(BTreeMap::new()),
        }
    }

    async fn region_table(
        &self,
        region: Region,
    ) -> Result<Arc<HashMap<UnitId, UnitGeometry>>, SourceError> {
        let mut loaded = self.loaded.lock().await;
        if let Some(table) = loaded.get(&region) {
            return Ok(Arc::clone(table));
        }

        let path = self.paths.gazetteer(region, self.year);
        let table = if path.exists() {
            let reader_path = path.clone();
            let table = tokio::task::spawn_blocking(move || read_gazetteer(&reader_path))
                .await
                .map_err(|e| SourceError::Normalization {
                    message: format!("Gazetteer load task failed: {e}"),
                })??;
            log::info!(
                "Loaded {} Gazetteer tracts for {region} from {}",
                table.len(),
                path.display()
            );
            table
        } else {
            log::warn!(
                "Gazetteer file for {region} not found at {}; relying on fallback sources",
                path.display()
            );
            HashMap::new()
        };

        let table = Arc::new(table);
        loaded.insert(region, Arc::clone(&table));
        Ok(table)
    }
}

#[async_trait]
impl UnitGeometrySource for GazetteerFiles {
    fn name(&self) -> &str {
        "gazetteer"
    }

    async fn geometry(&self, id: &UnitId) -> Result<Option<UnitGeometry>, SourceError> {
        let Some(region) = id.region() else {
            return Ok(None);
        };
        Ok(self.region_table(region).await?.get(id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "USPS\tGEOID\tALAND\tAWATER\tALAND_SQMI\tAWATER_SQMI\tINTPTLAT\tINTPTLONG                                                                                                               \n\
        FL\t12095016501\t4561619\t12000\t1.761\t0.005\t28.568512\t-81.216301\n\
        FL\t12095016502\t\t0\t0\t0\t28.5\t-81.2\n\
        FL\tnot-a-geoid\t1\t0\t0\t0\t28.5\t-81.2\n";

    #[test]
    fn parses_rows_with_padded_header() {
        let records = parse_gazetteer(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);

        let geometry = records[&"12095016501".parse::<UnitId>().unwrap()];
        assert!((geometry.land_area_sqm - 4_561_619.0).abs() < f64::EPSILON);
        assert!((geometry.centroid.longitude + 81.216_301).abs() < 1e-9);
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = parse_gazetteer(b"USPS\tGEOID\tALAND\n").unwrap_err();
        assert!(err.contains("INTPTLAT"));
    }

    #[tokio::test]
    async fn file_source_loads_lazily() {
        let dir = std::env::temp_dir().join("site_predict_test_gazetteer");
        let _ = std::fs::remove_dir_all(&dir);
        let paths = DataPaths::new(&dir);
        let file = paths.gazetteer(Region::Florida, 2023);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, SAMPLE).unwrap();

        let source = GazetteerFiles::new(paths, 2023);
        let found = source
            .geometry(&"12095016501".parse().unwrap())
            .await
            .unwrap();
        assert!(found.is_some());

        let absent_region = source
            .geometry(&"42101000100".parse().unwrap())
            .await
            .unwrap();
        assert!(absent_region.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
