//! Batch feature computation.
//!
//! Points are read from CSV (`id,region,latitude,longitude,sq_ft`), run
//! through the engine with bounded concurrency and written back as one row
//! per input point, in input order. A failed point gets a row with its
//! error kind and message and empty feature cells.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use serde::Deserialize;
use site_predict_features_models::FeatureVector;
use site_predict_geography::paths::write_atomic;
use site_predict_geography_models::Region;
use thiserror::Error;

use crate::FeatureError;
use crate::engine::FeatureEngine;

/// Errors reading or writing batch files.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: String,
        source: csv::Error,
    },

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// One input row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchPoint {
    /// Caller's identifier, echoed in the output.
    pub id: String,
    pub region: Region,
    pub latitude: f64,
    pub longitude: f64,
    /// Store size in square feet.
    #[serde(default)]
    pub sq_ft: Option<f64>,
}

/// Result for one input row.
#[derive(Debug)]
pub struct BatchOutcome {
    pub point: BatchPoint,
    pub result: Result<FeatureVector, FeatureError>,
}

/// Receives completion notifications as points finish.
pub trait BatchProgress: Send + Sync {
    /// Called after each point completes, in completion order.
    fn on_point(&self, completed: u64, total: u64);
}

impl BatchProgress for () {
    fn on_point(&self, _completed: u64, _total: u64) {}
}

/// Counts of a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl BatchSummary {
    #[must_use]
    pub fn of(outcomes: &[BatchOutcome]) -> Self {
        outcomes
            .iter()
            .fold(Self::default(), |mut summary, outcome| {
                match &outcome.result {
                    Ok(vector) => {
                        summary.succeeded += 1;
                        if vector.is_degraded() {
                            summary.degraded += 1;
                        }
                    }
                    Err(_) => summary.failed += 1,
                }
                summary
            })
    }
}

/// Reads batch points from CSV.
///
/// # Errors
///
/// Returns [`BatchError::Csv`] if the file cannot be read or a row does not
/// match the schema.
pub fn read_points(path: &Path) -> Result<Vec<BatchPoint>, BatchError> {
    let csv_error = |source| BatchError::Csv {
        path: path.display().to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_error)?;

    let points = reader
        .deserialize()
        .collect::<Result<Vec<BatchPoint>, _>>()
        .map_err(csv_error)?;

    log::info!("Read {} batch points from {}", points.len(), path.display());
    Ok(points)
}

/// Computes features for every point, at most `concurrency` at a time.
/// Outcomes are returned in input order.
pub async fn compute_batch(
    engine: &FeatureEngine,
    points: Vec<BatchPoint>,
    concurrency: usize,
    progress: &dyn BatchProgress,
) -> Vec<BatchOutcome> {
    let total = points.len() as u64;
    let completed = AtomicU64::new(0);

    log::info!(
        "Computing features for {total} points ({} concurrent)",
        concurrency.max(1)
    );

    let mut indexed: Vec<(usize, BatchOutcome)> = futures::stream::iter(points.into_iter().enumerate())
        .map(|(index, point)| {
            let completed = &completed;
            async move {
                let result = engine
                    .compute_features(point.latitude, point.longitude, point.region, point.sq_ft)
                    .await;
                if let Err(e) = &result {
                    log::warn!("Point {}: {e}", point.id);
                }
                progress.on_point(completed.fetch_add(1, Ordering::Relaxed) + 1, total);
                (index, BatchOutcome { point, result })
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    indexed.sort_by_key(|(index, _)| *index);
    let outcomes: Vec<BatchOutcome> = indexed.into_iter().map(|(_, outcome)| outcome).collect();

    let summary = BatchSummary::of(&outcomes);
    log::info!(
        "Batch complete: {} succeeded ({} degraded), {} failed",
        summary.succeeded,
        summary.degraded,
        summary.failed
    );
    outcomes
}

/// Leading columns of every output row.
const LEADING_COLUMNS: &[&str] = &[
    "id",
    "region",
    "latitude",
    "longitude",
    "home_unit",
    "status",
    "error",
    "degraded",
];

/// Renders outcomes as CSV. Feature columns come from the first successful
/// vector; every vector from one engine has the same layout.
///
/// # Errors
///
/// Returns [`csv::Error`] if a record cannot be written.
pub fn render_results(outcomes: &[BatchOutcome]) -> Result<Vec<u8>, csv::Error> {
    let feature_names: Vec<String> = outcomes
        .iter()
        .find_map(|o| o.result.as_ref().ok())
        .map(|v| v.names().map(ToString::to_string).collect())
        .unwrap_or_default();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(
        LEADING_COLUMNS
            .iter()
            .copied()
            .chain(feature_names.iter().map(String::as_str)),
    )?;

    for outcome in outcomes {
        let point = &outcome.point;
        let mut record = vec![
            point.id.clone(),
            point.region.to_string(),
            point.latitude.to_string(),
            point.longitude.to_string(),
        ];

        match &outcome.result {
            Ok(vector) => {
                record.push(vector.provenance.home_unit.to_string());
                record.push("ok".to_string());
                record.push(String::new());
                record.push(vector.degradations().join("; "));
                record.extend(
                    feature_names
                        .iter()
                        .map(|name| vector.get(name).map(|v| v.to_string()).unwrap_or_default()),
                );
            }
            Err(e) => {
                let home = match e {
                    FeatureError::DataNotFound { unit: Some(id), .. } => id.to_string(),
                    FeatureError::IncompleteFeatureSet { home_unit, .. } => home_unit.to_string(),
                    _ => String::new(),
                };
                record.push(home);
                record.push(e.kind().to_string());
                record.push(e.to_string());
                record.push(String::new());
                record.extend(feature_names.iter().map(|_| String::new()));
            }
        }

        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Writes outcomes to `path` atomically.
///
/// # Errors
///
/// Returns [`BatchError`] if rendering or writing fails.
pub fn write_results(path: &Path, outcomes: &[BatchOutcome]) -> Result<BatchSummary, BatchError> {
    let bytes = render_results(outcomes).map_err(|source| BatchError::Csv {
        path: path.display().to_string(),
        source,
    })?;
    write_atomic(path, &bytes).map_err(|source| BatchError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let summary = BatchSummary::of(outcomes);
    log::info!("Wrote {} rows to {}", outcomes.len(), path.display());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use site_predict_features_models::{Feature, Provenance};
    use site_predict_geography_models::LatLon;

    use super::*;

    fn point(id: &str) -> BatchPoint {
        BatchPoint {
            id: id.to_string(),
            region: Region::Florida,
            latitude: 28.5685,
            longitude: -81.2163,
            sq_ft: None,
        }
    }

    fn vector() -> FeatureVector {
        FeatureVector::new(
            Region::Florida,
            LatLon::new(28.5685, -81.2163),
            vec![
                Feature {
                    name: "sq_ft".to_string(),
                    value: 4_000.0,
                },
                Feature {
                    name: "pop_1mi".to_string(),
                    value: 14_594.5,
                },
            ],
            Provenance::new("12095016501".parse().unwrap()),
        )
    }

    #[test]
    fn reads_points_with_optional_size() {
        let dir = std::env::temp_dir().join("site_predict_test_batch_read");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("points.csv");
        std::fs::write(
            &path,
            "id,region,latitude,longitude,sq_ft\n\
             a, FL ,28.5685,-81.2163,4200\n\
             b,PA,39.95,-75.16,\n",
        )
        .unwrap();

        let points = read_points(&path).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].region, Region::Florida);
        assert_eq!(points[0].sq_ft, Some(4_200.0));
        assert_eq!(points[1].region, Region::Pennsylvania);
        assert_eq!(points[1].sq_ft, None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn renders_success_and_failure_rows() {
        let outcomes = vec![
            BatchOutcome {
                point: point("ok"),
                result: Ok(vector()),
            },
            BatchOutcome {
                point: point("bad"),
                result: Err(FeatureError::InvalidCoordinates {
                    at: LatLon::new(28.5685, -81.2163),
                    region: Region::Florida,
                    reason: "outside".to_string(),
                }),
            },
        ];

        let text = String::from_utf8(render_results(&outcomes).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "id,region,latitude,longitude,home_unit,status,error,degraded,sq_ft,pop_1mi"
        );
        assert_eq!(lines[1], "ok,FL,28.5685,-81.2163,12095016501,ok,,,4000,14594.5");
        assert!(lines[2].starts_with("bad,FL,28.5685,-81.2163,,invalid_coordinates,"));
        assert!(lines[2].ends_with(",,,"));

        let summary = BatchSummary::of(&outcomes);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
    }
}
