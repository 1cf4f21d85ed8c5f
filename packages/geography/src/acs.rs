//! ACS 5-year demographics for single tracts.
//!
//! The Census Data API answers with a JSON array of arrays: a header row
//! naming the requested variables and geography columns, then one row per
//! tract. Values are strings; suppressed estimates use negative sentinel
//! codes instead of null.
//!
//! ```text
//! [["B01001_001E","B01002_001E",...,"state","county","tract"],
//!  ["4062","29.1",...,"12","095","016501"]]
//! ```

use async_trait::async_trait;
use site_predict_geography_models::{Attribute, Demographics, UnitId};
use site_predict_source::SourceError;
use site_predict_source::retry::{self, RetryPolicy};

use crate::fetch::{DemographicRecord, DemographicsSource};

/// Default base URL of the Census Data API.
pub const DEFAULT_BASE_URL: &str = "https://api.census.gov/data";

/// Environment variable holding the optional Census API key.
pub const API_KEY_ENV: &str = "CENSUS_API_KEY";

/// Sentinel codes the ACS publishes in place of a value (insufficient
/// sample, not applicable, top/bottom-coded medians without a point
/// estimate, and so on).
pub const MISSING_MARKERS: &[i64] = &[
    -666_666_666,
    -888_888_888,
    -999_999_999,
    -222_222_222,
    -333_333_333,
    -555_555_555,
];

/// Variables requested for every tract, population first.
const VARIABLES: &[Attribute] = &[
    Attribute::Population,
    Attribute::MedianAge,
    Attribute::MedianHouseholdIncome,
    Attribute::PerCapitaIncome,
    Attribute::Population25Plus,
    Attribute::Bachelors,
    Attribute::Masters,
    Attribute::Professional,
    Attribute::Doctorate,
];

/// Whether a published value is one of the sentinel codes.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn is_missing_marker(value: f64) -> bool {
    value.fract() == 0.0 && MISSING_MARKERS.contains(&(value as i64))
}

/// Parses one published cell. Null, empty, non-numeric and sentinel values
/// are all absent.
fn parse_value(cell: &serde_json::Value) -> Option<f64> {
    let value = match cell {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        serde_json::Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (value.is_finite() && !is_missing_marker(value)).then_some(value)
}

/// Extracts the record for `id` from an API response.
///
/// Returns `Ok(None)` when the response has a header but no matching row,
/// or is empty.
///
/// # Errors
///
/// Returns [`SourceError::Normalization`] if the response is not an array
/// of arrays with a header row.
pub fn parse_response(
    body: &serde_json::Value,
    id: &UnitId,
) -> Result<Option<DemographicRecord>, SourceError> {
    if body.is_null() {
        return Ok(None);
    }

    let rows = body.as_array().ok_or_else(|| SourceError::Normalization {
        message: format!("ACS response for {id} is not an array"),
    })?;
    let Some((header, data)) = rows.split_first() else {
        return Ok(None);
    };
    let header: Vec<&str> = header
        .as_array()
        .ok_or_else(|| SourceError::Normalization {
            message: format!("ACS response for {id} has no header row"),
        })?
        .iter()
        .map(|h| h.as_str().unwrap_or_default())
        .collect();

    let column = |name: &str| header.iter().position(|h| *h == name);
    let (Some(state), Some(county), Some(tract)) =
        (column("state"), column("county"), column("tract"))
    else {
        return Err(SourceError::Normalization {
            message: format!("ACS response for {id} lacks geography columns"),
        });
    };

    let row = data.iter().filter_map(serde_json::Value::as_array).find(|row| {
        let cell = |i: usize| row.get(i).and_then(serde_json::Value::as_str);
        cell(state) == Some(id.state_fips())
            && cell(county) == Some(id.county_fips())
            && cell(tract) == Some(id.tract_code())
    });
    let Some(row) = row else {
        return Ok(None);
    };

    let value = |attribute: Attribute| {
        column(attribute.acs_variable())
            .and_then(|i| row.get(i))
            .and_then(parse_value)
    };

    let mut demographics = Demographics::default();
    for &attribute in Attribute::DEMOGRAPHIC {
        demographics.set(attribute, value(attribute));
    }

    Ok(Some(DemographicRecord {
        population: value(Attribute::Population),
        demographics,
    }))
}

/// Client for the ACS 5-year detailed tables.
pub struct AcsClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl AcsClient {
    /// Creates a client for the `{base_url}/{year}/acs/acs5` endpoint. The
    /// API key is read from [`API_KEY_ENV`] when present.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, year: u16, policy: RetryPolicy) -> Result<Self, SourceError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            log::debug!("{API_KEY_ENV} not set; ACS requests are unauthenticated");
        }

        Ok(Self {
            client: site_predict_source::http_client(policy.timeout())?,
            endpoint: format!("{}/{year}/acs/acs5", base_url.trim_end_matches('/')),
            api_key,
            policy,
        })
    }

    fn query(&self, id: &UnitId) -> Vec<(&'static str, String)> {
        let variables = VARIABLES
            .iter()
            .map(|a| a.acs_variable())
            .collect::<Vec<_>>()
            .join(",");

        let mut query = vec![
            ("get", variables),
            ("for", format!("tract:{}", id.tract_code())),
            (
                "in",
                format!("state:{} county:{}", id.state_fips(), id.county_fips()),
            ),
        ];
        if let Some(key) = &self.api_key {
            query.push(("key", key.clone()));
        }
        query
    }
}

#[async_trait]
impl DemographicsSource for AcsClient {
    async fn demographics(&self, id: &UnitId) -> Result<Option<DemographicRecord>, SourceError> {
        let query = self.query(id);
        let label = format!("ACS {id}");

        let body = self
            .policy
            .run(&label, || {
                retry::send_json(|| self.client.get(&self.endpoint).query(&query))
            })
            .await?;

        let record = parse_response(&body, id)?;
        if record.is_none() {
            log::warn!("ACS returned no row for tract {id}");
        }
        Ok(record)
    }
}
