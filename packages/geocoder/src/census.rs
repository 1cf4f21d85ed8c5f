//! US Census Bureau geographies geocoder client.
//!
//! `GET {base}/geographies/coordinates?x={lon}&y={lat}&benchmark=4&vintage=4&format=json`
//!
//! The tract is read from `result.geographies["Census Tracts"][0]`. No API
//! key is required.
//!
//! See <https://geocoding.geo.census.gov/geocoder/Geocoding_Services_API.html>

use async_trait::async_trait;
use site_predict_geography_models::{LatLon, UnitId};
use site_predict_source::SourceError;
use site_predict_source::retry::{self, RetryPolicy};

use crate::{BoundaryService, TractMatch};

/// Default geocoder base URL.
pub const DEFAULT_BASE_URL: &str = "https://geocoding.geo.census.gov/geocoder";

/// `Public_AR_Current`.
const BENCHMARK: &str = "4";

/// `Current_Current`.
const VINTAGE: &str = "4";

/// Layer holding tract geographies in the response.
const TRACT_LAYER: &str = "Census Tracts";

/// Client for the coordinates-to-geographies endpoint.
pub struct CensusBoundaryClient {
    client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
}

impl CensusBoundaryClient {
    /// Creates a client for the geocoder at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, policy: RetryPolicy) -> Result<Self, SourceError> {
        Ok(Self {
            client: site_predict_source::http_client(policy.timeout())?,
            url: format!(
                "{}/geographies/coordinates",
                base_url.trim_end_matches('/')
            ),
            policy,
        })
    }
}

#[async_trait]
impl BoundaryService for CensusBoundaryClient {
    async fn tract_at(&self, at: LatLon) -> Result<Option<TractMatch>, SourceError> {
        let query = [
            ("x", at.longitude.to_string()),
            ("y", at.latitude.to_string()),
            ("benchmark", BENCHMARK.to_string()),
            ("vintage", VINTAGE.to_string()),
            ("format", "json".to_string()),
        ];
        let label = format!("tract lookup {at}");

        let body = self
            .policy
            .run(&label, || {
                retry::send_json(|| self.client.get(&self.url).query(&query))
            })
            .await?;

        parse_geographies_response(&body)
    }
}

/// Parses the geographies response.
///
/// The tract identifier is taken from `GEOID`, or assembled from `STATE`,
/// `COUNTY` and `TRACT` when `GEOID` is absent.
///
/// # Errors
///
/// Returns [`SourceError::Normalization`] if the response lacks the
/// `result.geographies` object or the tract entry has no usable identifier.
pub fn parse_geographies_response(
    body: &serde_json::Value,
) -> Result<Option<TractMatch>, SourceError> {
    let geographies =
        body["result"]["geographies"]
            .as_object()
            .ok_or_else(|| SourceError::Normalization {
                message: "Missing result.geographies object".to_string(),
            })?;

    let Some(tract) = geographies
        .get(TRACT_LAYER)
        .and_then(serde_json::Value::as_array)
        .and_then(|tracts| tracts.first())
    else {
        return Ok(None);
    };

    let field = |name: &str| tract[name].as_str().map(str::trim);

    let id = match field("GEOID") {
        Some(geoid) => geoid.parse::<UnitId>(),
        None => UnitId::from_parts(
            field("STATE").unwrap_or_default(),
            field("COUNTY").unwrap_or_default(),
            field("TRACT").unwrap_or_default(),
        ),
    }
    .map_err(|e| SourceError::Normalization {
        message: format!("Unusable tract identifier in geocoder response: {e}"),
    })?;

    Ok(Some(TractMatch {
        id,
        basename: field("BASENAME").map(String::from),
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_tract_match() {
        let body = json!({
            "result": {
                "input": {"location": {"x": -81.2163, "y": 28.5685}},
                "geographies": {
                    "Census Tracts": [{
                        "GEOID": "12095016501",
                        "STATE": "12",
                        "COUNTY": "095",
                        "TRACT": "016501",
                        "BASENAME": "165.01"
                    }]
                }
            }
        });

        let tract = parse_geographies_response(&body).unwrap().unwrap();
        assert_eq!(tract.id.as_str(), "12095016501");
        assert_eq!(tract.basename.as_deref(), Some("165.01"));
    }

    #[test]
    fn assembles_geoid_from_parts() {
        let body = json!({
            "result": {"geographies": {"Census Tracts": [{
                "STATE": "42", "COUNTY": "101", "TRACT": "000500"
            }]}}
        });

        let tract = parse_geographies_response(&body).unwrap().unwrap();
        assert_eq!(tract.id.as_str(), "42101000500");
        assert_eq!(tract.basename, None);
    }

    #[test]
    fn empty_tract_layer_is_no_match() {
        let body = json!({"result": {"geographies": {"Census Tracts": []}}});
        assert_eq!(parse_geographies_response(&body).unwrap(), None);

        let body = json!({"result": {"geographies": {}}});
        assert_eq!(parse_geographies_response(&body).unwrap(), None);
    }

    #[test]
    fn missing_result_is_an_error() {
        let body = json!({"errors": ["Invalid benchmark"], "status": "400"});
        assert!(parse_geographies_response(&body).is_err());
    }
}
