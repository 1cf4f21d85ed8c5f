//! Per-region catalog snapshot: one CSV row per tract.
//!
//! An empty cell means the value is explicitly absent. `estimated_fields`
//! lists (`;`-separated) the attributes that were defaulted because the
//! live source published no value. `census_data_complete` is derived from
//! the other columns on write and ignored on read.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use site_predict_geography_models::{Attribute, Demographics, LatLon, StatisticalUnit, UnitId};

use crate::CatalogError;
use crate::paths::write_atomic;

/// Column order of every snapshot file.
pub const HEADER: &[&str] = &[
    "geoid",
    "centroid_lat",
    "centroid_lon",
    "land_area_sqm",
    "total_population",
    "median_age",
    "median_household_income",
    "per_capita_income",
    "total_pop_25_plus",
    "bachelors_degree",
    "masters_degree",
    "professional_degree",
    "doctorate_degree",
    "census_data_complete",
    "estimated_fields",
];

/// One snapshot row as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SnapshotRow {
    geoid: String,
    centroid_lat: Option<f64>,
    centroid_lon: Option<f64>,
    land_area_sqm: Option<f64>,
    total_population: Option<f64>,
    median_age: Option<f64>,
    median_household_income: Option<f64>,
    per_capita_income: Option<f64>,
    total_pop_25_plus: Option<f64>,
    bachelors_degree: Option<f64>,
    masters_degree: Option<f64>,
    professional_degree: Option<f64>,
    doctorate_degree: Option<f64>,
    #[serde(default)]
    census_data_complete: Option<String>,
    #[serde(default)]
    estimated_fields: Option<String>,
}

impl SnapshotRow {
    fn from_unit(unit: &StatisticalUnit) -> Self {
        let d = &unit.demographics;
        let estimated = unit
            .estimated
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";");

        Self {
            geoid: unit.id.to_string(),
            centroid_lat: Some(unit.centroid.latitude),
            centroid_lon: Some(unit.centroid.longitude),
            land_area_sqm: Some(unit.land_area_sqm),
            total_population: Some(f64::from(unit.population)),
            median_age: d.median_age,
            median_household_income: d.median_household_income,
            per_capita_income: d.per_capita_income,
            total_pop_25_plus: d.total_pop_25_plus,
            bachelors_degree: d.bachelors_degree,
            masters_degree: d.masters_degree,
            professional_degree: d.professional_degree,
            doctorate_degree: d.doctorate_degree,
            census_data_complete: Some(unit.is_complete().to_string()),
            estimated_fields: (!estimated.is_empty()).then_some(estimated),
        }
    }

    /// Converts the row into a unit. A missing population is read as zero
    /// and recorded as estimated.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn into_unit(self) -> Result<StatisticalUnit, String> {
        let id: UnitId = self.geoid.parse().map_err(|e| format!("{e}"))?;

        let (Some(lat), Some(lon)) = (self.centroid_lat, self.centroid_lon) else {
            return Err(format!("tract {id} has no centroid"));
        };
        let centroid = LatLon::new(lat, lon);
        if !centroid.is_valid() {
            return Err(format!("tract {id} has invalid centroid {centroid}"));
        }

        let land_area_sqm = match self.land_area_sqm {
            Some(a) if a.is_finite() && a >= 0.0 => a,
            Some(a) => return Err(format!("tract {id} has invalid land area {a}")),
            None => return Err(format!("tract {id} has no land area")),
        };

        let mut estimated = parse_estimated(self.estimated_fields.as_deref(), &id);

        let population = match self.total_population {
            Some(p) if p.is_finite() && p >= 0.0 => p.round().min(f64::from(u32::MAX)) as u32,
            Some(p) => return Err(format!("tract {id} has negative population {p}")),
            None => {
                estimated.insert(Attribute::Population);
                0
            }
        };

        Ok(StatisticalUnit {
            id,
            centroid,
            land_area_sqm,
            population,
            demographics: Demographics {
                median_age: self.median_age,
                median_household_income: self.median_household_income,
                per_capita_income: self.per_capita_income,
                total_pop_25_plus: self.total_pop_25_plus,
                bachelors_degree: self.bachelors_degree,
                masters_degree: self.masters_degree,
                professional_degree: self.professional_degree,
                doctorate_degree: self.doctorate_degree,
            },
            estimated,
        })
    }
}

fn parse_estimated(raw: Option<&str>, id: &UnitId) -> BTreeSet<Attribute> {
    raw.unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|name| {
            name.parse::<Attribute>()
                .inspect_err(|_| log::warn!("Tract {id}: unknown estimated field '{name}'"))
                .ok()
        })
        .collect()
}

/// Reads every unit from a snapshot file.
///
/// # Errors
///
/// Returns [`CatalogError`] if the file cannot be read or a row is
/// malformed. A snapshot is a verified artifact, so a bad row fails the
/// whole load rather than silently shrinking the catalog.
pub fn read_snapshot(path: &Path) -> Result<Vec<StatisticalUnit>, CatalogError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| CatalogError::csv(path, e))?;

    let mut units = Vec::new();
    for (index, result) in reader.deserialize::<SnapshotRow>().enumerate() {
        let record = index as u64 + 1;
        let row = result.map_err(|e| CatalogError::csv(path, e))?;
        let unit = row.into_unit().map_err(|message| CatalogError::Malformed {
            path: path.display().to_string(),
            record,
            message,
        })?;
        units.push(unit);
    }

    log::debug!("Read {} tracts from {}", units.len(), path.display());
    Ok(units)
}

fn encode(units: &[&StatisticalUnit], with_header: bool) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(Vec::new());
    for unit in units {
        writer.serialize(SnapshotRow::from_unit(unit))?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Writes a complete snapshot, replacing any existing file atomically.
///
/// # Errors
///
/// Returns [`CatalogError`] if encoding or writing fails.
pub fn write_snapshot(path: &Path, units: &[&StatisticalUnit]) -> Result<(), CatalogError> {
    let bytes = encode(units, true).map_err(|e| CatalogError::csv(path, e))?;
    write_atomic(path, &bytes).map_err(|e| CatalogError::io(path, e))
}

/// Appends one unit to a snapshot. The existing contents are rewritten with
/// the new row through [`write_atomic`], so a crash mid-append leaves the
/// previous snapshot intact. A missing file is created with a header.
///
/// # Errors
///
/// Returns [`CatalogError`] if reading, encoding or writing fails.
pub fn append_unit(path: &Path, unit: &StatisticalUnit) -> Result<(), CatalogError> {
    let mut bytes = match std::fs::read(path) {
        Ok(existing) => existing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(CatalogError::io(path, e)),
    };

    let with_header = bytes.is_empty();
    if !with_header && !bytes.ends_with(b"\n") {
        bytes.push(b'\n');
    }

    let row = encode(&[unit], with_header).map_err(|e| CatalogError::csv(path, e))?;
    bytes.extend_from_slice(&row);

    write_atomic(path, &bytes).map_err(|e| CatalogError::io(path, e))
}
