#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the site predict toolchain.
//!
//! Provides `indicatif`-backed progress bars for boundary downloads and
//! batch runs, plus [`init_logger`] which sets up `indicatif-log-bridge` so
//! that `log::info!` and friends are suspended while progress bars redraw.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use site_predict_features::batch::BatchProgress;
use site_predict_geography::tigerweb::DownloadProgress;

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] driven by pipeline progress callbacks.
pub struct IndicatifProgress {
    bar: ProgressBar,
}

impl IndicatifProgress {
    /// A spinner counting downloaded features; the total is not known up
    /// front for paginated layers.
    #[must_use]
    pub fn download_spinner(multi: &MultiProgress, message: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} {pos} features [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        Self { bar }
    }

    /// A bar over a known number of batch points.
    #[must_use]
    pub fn points_bar(multi: &MultiProgress, message: &str, total: u64) -> Self {
        let bar = multi.add(ProgressBar::new(total));
        bar.set_style(
            ProgressStyle::with_template(
                "  {msg} {wide_bar:.yellow/dim} {pos}/{len} {percent}% [{eta}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        bar.set_message(message.to_string());
        Self { bar }
    }

    pub fn finish(&self, message: String) {
        self.bar.finish_with_message(message);
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl DownloadProgress for IndicatifProgress {
    fn on_page(&self, fetched: u64) {
        self.bar.set_position(fetched);
    }
}

impl BatchProgress for IndicatifProgress {
    fn on_point(&self, completed: u64, total: u64) {
        if self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
        self.bar.set_position(completed);
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Ignore error if logger was already set (e.g., in tests)

    log::set_max_level(level);

    multi
}
