//! Competitor roster loading.
//!
//! The roster is a verified artifact (`id,region,latitude,longitude,sq_ft`),
//! so any malformed row fails the load instead of silently shrinking the
//! competitor set.

use std::path::Path;

use serde::Deserialize;
use site_predict_geography_models::{CompetitorSite, LatLon, Region};

use crate::CatalogError;

#[derive(Debug, Deserialize)]
struct RosterRow {
    id: String,
    region: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    sq_ft: Option<f64>,
}

impl RosterRow {
    fn into_site(self) -> Result<CompetitorSite, String> {
        let region: Region = self
            .region
            .parse()
            .map_err(|_| format!("site {} has unsupported region '{}'", self.id, self.region))?;

        let location = LatLon::new(self.latitude, self.longitude);
        if !location.is_valid() {
            return Err(format!("site {} has invalid location {location}", self.id));
        }

        Ok(CompetitorSite {
            id: self.id,
            region,
            location,
            sq_ft: self.sq_ft.filter(|s| s.is_finite() && *s > 0.0),
        })
    }
}

/// Reads every competitor site from a roster CSV.
///
/// # Errors
///
/// Returns [`CatalogError`] if the file cannot be read or any row is
/// malformed.
pub fn load_roster(path: &Path) -> Result<Vec<CompetitorSite>, CatalogError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| CatalogError::csv(path, e))?;

    let mut sites = Vec::new();
    for (index, result) in reader.deserialize::<RosterRow>().enumerate() {
        let row = result.map_err(|e| CatalogError::csv(path, e))?;
        let site = row.into_site().map_err(|message| CatalogError::Malformed {
            path: path.display().to_string(),
            record: index as u64 + 1,
            message,
        })?;
        sites.push(site);
    }

    let florida = sites.iter().filter(|s| s.region == Region::Florida).count();
    log::info!(
        "Loaded {} competitor sites from {} ({florida} FL, {} PA)",
        sites.len(),
        path.display(),
        sites.len() - florida
    );
    Ok(sites)
}
