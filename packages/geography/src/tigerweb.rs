//! Census tract data from the Census Bureau `TIGERweb` REST API.
//!
//! Two uses: a live fallback for tract centroids and land areas when the
//! Gazetteer file does not know a tract, and bulk download of a region's
//! tract polygons into the boundary `GeoJSON` the radius aggregator reads.

use std::path::Path;

use async_trait::async_trait;
use site_predict_geography_models::{LatLon, Region, UnitId};
use site_predict_source::SourceError;
use site_predict_source::retry::{self, RetryPolicy};

use crate::fetch::{UnitGeometry, UnitGeometrySource};
use crate::paths::write_atomic;

/// Default ACS 2023 vintage tract layer.
pub const DEFAULT_TRACT_LAYER_URL: &str = "https://tigerweb.geo.census.gov/arcgis/rest/services/TIGERweb/tigerWMS_ACS2023/MapServer/8/query";

/// Page size for paginated requests. Kept low to avoid WAF blocks on large
/// geospatial responses.
const PAGE_SIZE: u32 = 100;

/// Courtesy delay between pages.
const PAGE_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

/// Progress reporting for long downloads.
pub trait DownloadProgress: Send + Sync {
    /// Called after each page with the running feature count.
    fn on_page(&self, fetched: u64);
}

impl DownloadProgress for () {
    fn on_page(&self, _fetched: u64) {}
}

/// Client for the `TIGERweb` tract layer.
pub struct TigerwebClient {
    client: reqwest::Client,
    layer_url: String,
    policy: RetryPolicy,
}

/// Rejects an `ArcGIS` error envelope:
/// `{"error": {"code": 500, "message": "..."}}`.
///
/// `ArcGIS` reports server trouble with HTTP 200 and this envelope, so the
/// embedded code is mapped onto [`SourceError::Status`] to let the retry
/// policy treat 5xx codes as transient.
fn check_arcgis_error(json: &serde_json::Value, url: &str) -> Result<(), SourceError> {
    let Some(error) = json.get("error") else {
        return Ok(());
    };

    let code = error
        .get("code")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    let message = error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown");
    log::warn!("ArcGIS error {code} from {url}: {message}");

    match u16::try_from(code) {
        Ok(status) if status >= 400 => Err(SourceError::Status {
            status,
            url: url.to_string(),
        }),
        _ => Err(SourceError::Normalization {
            message: format!("ArcGIS error {code}: {message}"),
        }),
    }
}

/// Parses a numeric attribute that `TIGERweb` may return as a string
/// (`CENTLAT` is `"+28.5685123"`) or a number.
fn attribute_f64(attributes: &serde_json::Value, name: &str) -> Option<f64> {
    let value = &attributes[name];
    value
        .as_str()
        .and_then(|s| s.trim().trim_start_matches('+').parse::<f64>().ok())
        .or_else(|| value.as_f64())
}

/// Extracts centroid and land area from a feature's attributes (`f=json`)
/// or properties (`f=geojson`).
fn feature_geometry(feature: &serde_json::Value) -> Option<UnitGeometry> {
    let attributes = feature
        .get("attributes")
        .or_else(|| feature.get("properties"))?;

    let land_area_sqm = attribute_f64(attributes, "AREALAND")?;
    let centroid = LatLon::new(
        attribute_f64(attributes, "CENTLAT")?,
        attribute_f64(attributes, "CENTLON")?,
    );

    (centroid.is_valid() && land_area_sqm >= 0.0).then_some(UnitGeometry {
        centroid,
        land_area_sqm,
    })
}

impl TigerwebClient {
    /// Creates a client for the tract layer at `layer_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn new(layer_url: &str, policy: RetryPolicy) -> Result<Self, SourceError> {
        Ok(Self {
            client: site_predict_source::http_client(policy.timeout())?,
            layer_url: layer_url.to_string(),
            policy,
        })
    }

    /// Fetches one page, retried under the policy.
    async fn fetch_page(
        &self,
        params: &[(&str, String)],
        offset: u32,
        label: &str,
    ) -> Result<serde_json::Value, SourceError> {
        let page_label = format!("{label} (offset={offset})");
        self.policy
            .run(&page_label, || async {
                let json = retry::send_json(|| {
                    self.client
                        .get(&self.layer_url)
                        .query(params)
                        .query(&[("resultRecordCount", PAGE_SIZE), ("resultOffset", offset)])
                })
                .await?;
                check_arcgis_error(&json, &self.layer_url)?;
                Ok(json)
            })
            .await
    }

    /// Fetches all features matching `params`, following `ArcGIS`
    /// pagination (`resultOffset` + `resultRecordCount`, continuing while
    /// the server sets `exceededTransferLimit`).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if any page fails after its retry budget or
    /// lacks a features array.
    pub async fn fetch_paginated(
        &self,
        params: &[(&str, String)],
        label: &str,
        progress: &dyn DownloadProgress,
    ) -> Result<Vec<serde_json::Value>, SourceError> {
        let mut all_features: Vec<serde_json::Value> = Vec::new();
        let mut offset = 0u32;

        loop {
            let json = self.fetch_page(params, offset, label).await?;

            let features = json["features"]
                .as_array()
                .ok_or_else(|| SourceError::Normalization {
                    message: format!(
                        "No features array in TIGERweb response for {label} (offset={offset})"
                    ),
                })?;

            if features.is_empty() {
                break;
            }

            let page_len = u32::try_from(features.len()).unwrap_or(u32::MAX);
            all_features.extend(features.iter().cloned());
            progress.on_page(all_features.len() as u64);

            let exceeded = json
                .get("exceededTransferLimit")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            if !exceeded {
                break;
            }

            offset = offset.saturating_add(page_len);
            log::info!(
                "{label}: fetched {page_len} features (total so far: {}), fetching next page...",
                all_features.len()
            );
            tokio::time::sleep(PAGE_DELAY).await;
        }

        Ok(all_features)
    }

    /// Downloads every tract polygon of a region and writes them as a
    /// `GeoJSON` `FeatureCollection` with a `GEOID` property per feature.
    /// Returns the number of features written.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the download fails or the file cannot be
    /// written.
    pub async fn download_boundaries(
        &self,
        region: Region,
        dest: &Path,
        progress: &dyn DownloadProgress,
    ) -> Result<usize, SourceError> {
        let params = [
            ("where", format!("STATE='{}'", region.state_fips())),
            ("outFields", "GEOID".to_string()),
            ("outSR", "4326".to_string()),
            ("f", "geojson".to_string()),
            ("returnGeometry", "true".to_string()),
        ];

        let label = format!("tract boundaries for {} ({region})", region.name());
        log::info!("Fetching {label}...");

        let features = self.fetch_paginated(&params, &label, progress).await?;

        let kept: Vec<serde_json::Value> = features
            .into_iter()
            .filter_map(|feature| {
                let geoid = feature["properties"]["GEOID"].as_str()?.to_string();
                let geometry = feature.get("geometry").filter(|g| !g.is_null())?.clone();
                Some(serde_json::json!({
                    "type": "Feature",
                    "properties": { "GEOID": geoid },
                    "geometry": geometry,
                }))
            })
            .collect();

        let collection = serde_json::json!({
            "type": "FeatureCollection",
            "features": kept,
        });
        let count = collection["features"].as_array().map_or(0, Vec::len);

        let bytes = serde_json::to_vec(&collection)?;
        write_atomic(dest, &bytes)?;

        log::info!("{region}: wrote {count} tract boundaries to {}", dest.display());
        Ok(count)
    }
}

#[async_trait]
impl UnitGeometrySource for TigerwebClient {
    fn name(&self) -> &str {
        "tigerweb"
    }

    async fn geometry(&self, id: &UnitId) -> Result<Option<UnitGeometry>, SourceError> {
        let params = [
            ("where", format!("GEOID='{id}'")),
            ("outFields", "GEOID,AREALAND,CENTLAT,CENTLON".to_string()),
            ("returnGeometry", "false".to_string()),
            ("f", "json".to_string()),
        ];

        let label = format!("TIGERweb tract {id}");
        let json = self.fetch_page(&params, 0, &label).await?;

        Ok(json["features"]
            .as_array()
            .and_then(|features| features.first())
            .and_then(feature_geometry))
    }
}
