//! Pipeline configuration.
//!
//! The defaults live in `config/default.toml`, compiled into the binary.
//! A user file is merged over them table by table, so an override only
//! needs the keys it changes.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use site_predict_geography_models::Region;
use site_predict_source::retry::RetryPolicy;
use site_predict_spatial::aggregator::AggregationSettings;
use thiserror::Error;

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Radii the derived features are defined over.
const REQUIRED_RADII: &[f64] = &[3.0, 5.0, 20.0];

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The override file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A file is not valid TOML or does not match the schema.
    #[error("Invalid configuration in {origin}: {message}")]
    Parse {
        /// `"defaults"` or the override file path.
        origin: String,
        /// Parser message.
        message: String,
    },

    /// The merged configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Buffer and competitor parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationConfig {
    /// Radii in miles, strictly ascending.
    pub radii_miles: Vec<f64>,
    /// Self-exclusion distance in miles.
    pub self_exclusion_miles: f64,
    /// Vertices per buffer polygon.
    pub buffer_segments: usize,
}

impl AggregationConfig {
    /// Settings for the radius aggregator.
    #[must_use]
    pub fn settings(&self) -> AggregationSettings {
        AggregationSettings {
            radii_miles: self.radii_miles.clone(),
            self_exclusion_miles: self.self_exclusion_miles,
            buffer_segments: self.buffer_segments,
        }
    }
}

/// Remote service endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesConfig {
    /// Census geocoder base URL.
    pub geocoder_url: String,
    /// ACS API base URL (without year or dataset).
    pub acs_url: String,
    /// `TIGERweb` tract layer query URL.
    pub tigerweb_tract_layer_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Points computed concurrently.
    pub concurrency: usize,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root of the data file layout.
    pub data_dir: PathBuf,
    /// Regions loaded at startup.
    pub regions: Vec<Region>,
    /// ACS 5-year release queried for live demographics.
    pub acs_year: u16,
    /// Gazetteer release read for live centroids.
    pub gazetteer_year: u16,
    pub aggregation: AggregationConfig,
    pub retry: RetryPolicy,
    pub services: ServicesConfig,
    pub batch: BatchConfig,
}

impl PipelineConfig {
    /// The embedded defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the embedded file is invalid.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_table(parse_table(DEFAULT_CONFIG, "defaults")?)
    }

    /// Loads the defaults and merges `override_path` over them, if given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a file cannot be read or parsed, or the
    /// merged configuration fails validation.
    pub fn load(override_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut table = parse_table(DEFAULT_CONFIG, "defaults")?;

        if let Some(path) = override_path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let user = parse_table(&text, &path.display().to_string())?;
            merge(&mut table, user);
            log::info!("Loaded configuration overrides from {}", path.display());
        }

        Self::from_table(table)
    }

    /// Parses a complete configuration from TOML text merged over the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is invalid.
    pub fn from_overrides(text: &str) -> Result<Self, ConfigError> {
        let mut table = parse_table(DEFAULT_CONFIG, "defaults")?;
        merge(&mut table, parse_table(text, "overrides")?);
        Self::from_table(table)
    }

    fn from_table(table: toml::Table) -> Result<Self, ConfigError> {
        let config: Self =
            toml::Value::Table(table)
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::Parse {
                    origin: "merged configuration".to_string(),
                    message: e.message().to_string(),
                })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let radii = &self.aggregation.radii_miles;

        if radii.is_empty() {
            return Err(ConfigError::Invalid("at least one radius is required".into()));
        }
        if radii.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "radii must be positive: {radii:?}"
            )));
        }
        if radii.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(ConfigError::Invalid(format!(
                "radii must be strictly ascending: {radii:?}"
            )));
        }
        for required in REQUIRED_RADII {
            if !radii.iter().any(|r| (r - required).abs() < 1e-9) {
                return Err(ConfigError::Invalid(format!(
                    "radii must include {required} miles for the derived features"
                )));
            }
        }
        let exclusion = self.aggregation.self_exclusion_miles;
        if exclusion.is_nan() || exclusion < 0.0 {
            return Err(ConfigError::Invalid(
                "self_exclusion_miles must be non-negative".into(),
            ));
        }
        if self.regions.is_empty() {
            return Err(ConfigError::Invalid("at least one region is required".into()));
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid("batch concurrency must be at least 1".into()));
        }

        Ok(())
    }
}

fn parse_table(text: &str, origin: &str) -> Result<toml::Table, ConfigError> {
    text.parse::<toml::Table>().map_err(|e| ConfigError::Parse {
        origin: origin.to_string(),
        message: e.message().to_string(),
    })
}

/// Merges `overrides` into `base`. Nested tables merge recursively; any
/// other value replaces the base value.
fn merge(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge(existing, incoming);
                } else {
                    base.insert(key, toml::Value::Table(incoming));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::defaults().unwrap();
        assert_eq!(config.aggregation.radii_miles, vec![1.0, 3.0, 5.0, 10.0, 20.0]);
        assert!((config.aggregation.self_exclusion_miles - 0.1).abs() < 1e-12);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.regions, vec![Region::Florida, Region::Pennsylvania]);
        assert_eq!(config.batch.concurrency, 8);
    }

    #[test]
    fn overrides_merge_per_key() {
        let config = PipelineConfig::from_overrides(
            r#"
            data_dir = "/srv/site-predict"
            regions = ["FL"]

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/site-predict"));
        assert_eq!(config.regions, vec![Region::Florida]);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.timeout_ms, 10_000);
        assert_eq!(config.aggregation.buffer_segments, 128);
    }

    #[test]
    fn rejects_radii_missing_derived_feature_radius() {
        let err = PipelineConfig::from_overrides(
            r"
            [aggregation]
            radii_miles = [1.0, 3.0, 10.0, 20.0]
            ",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unsorted_radii() {
        let err = PipelineConfig::from_overrides(
            r"
            [aggregation]
            radii_miles = [1.0, 5.0, 3.0, 20.0]
            ",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = PipelineConfig::from_overrides("radius = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn reads_override_file() {
        let dir = std::env::temp_dir().join("site_predict_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("override.toml");
        std::fs::write(&path, "[batch]\nconcurrency = 2\n").unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.batch.concurrency, 2);

        std::fs::remove_dir_all(&dir).ok();
    }
}
