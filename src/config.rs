//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the pipeline.
//! Configuration is loaded from:
//! 1. `config/ppg_vitals.toml` (base configuration)
//! 2. Environment variables (prefixed with `PPG_VITALS_`, sections split on `__`)
//!
//! Every field carries a serde default, so a missing file or an empty section
//! yields the stock HTTP-variant configuration.
//!
//! # Example
//! ```no_run
//! use ppg_vitals::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Window threshold: {}", config.acquisition.window_threshold);
//! # Ok::<(), ppg_vitals::error::PpgError>(())
//! ```

use crate::data::iir_filter::min_filtfilt_samples;
use crate::error::{AppResult, PpgError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/ppg_vitals.toml";

/// Highest Butterworth band-pass order accepted by `validate()`.
pub const MAX_BAND_ORDER: usize = 16;

/// Largest live broadcast buffer accepted by `validate()`.
pub const MAX_BROADCAST_CAPACITY: usize = 1 << 20;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Sample accumulation settings
    pub acquisition: AcquisitionConfig,
    /// Filter kernel settings
    pub filters: FilterConfig,
    /// Peak detection and SpO2 calibration
    pub estimation: EstimationConfig,
    /// Archive storage settings
    pub storage: StorageConfig,
    /// HTTP / WebSocket transport settings
    pub server: ServerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "PPG Vitals".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// What to do with a drained window that contains suspect-range samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetakePolicy {
    /// Emit the retake notification and still estimate the window.
    #[default]
    NotifyAndEstimate,
    /// Emit the retake notification and drop the window.
    RejectWindow,
}

/// Inclusive ADC-count range that flags a sample as suspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspectBand {
    /// Lower bound in ADC counts
    pub low: i64,
    /// Upper bound in ADC counts
    pub high: i64,
}

impl Default for SuspectBand {
    fn default() -> Self {
        Self {
            low: 10,
            high: 10_000,
        }
    }
}

impl SuspectBand {
    /// True when the magnitude of `value` falls inside the band (both ends inclusive).
    pub fn contains(&self, value: i64) -> bool {
        // i64::MIN has no i64 magnitude and lies above any band.
        value
            .checked_abs()
            .is_some_and(|magnitude| (self.low..=self.high).contains(&magnitude))
    }
}

/// Sample accumulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Sensor sampling rate in Hz
    pub sampling_rate_hz: f64,
    /// The analysis window is drained once its length exceeds this value.
    /// 80 matches the HTTP ingest variant; the publish/subscribe variant used 70.
    pub window_threshold: usize,
    /// Suspect-range band for retake requests
    pub suspect_band: SuspectBand,
    /// Precedence between retake notification and estimation
    pub retake_policy: RetakePolicy,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 50.0,
            window_threshold: 80,
            suspect_band: SuspectBand::default(),
            retake_policy: RetakePolicy::default(),
        }
    }
}

/// Filter kernel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Cutoff of the first-order high-pass used for AC/DC separation
    pub highpass_cutoff_hz: f64,
    /// Lower edge of the cardiac band
    pub band_low_hz: f64,
    /// Upper edge of the cardiac band
    pub band_high_hz: f64,
    /// Butterworth order of the band-pass
    pub band_order: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            highpass_cutoff_hz: 0.5,
            band_low_hz: 0.5,
            band_high_hz: 5.0,
            band_order: 5,
        }
    }
}

/// Peak detection and SpO2 calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Minimum spacing between two systolic peaks in seconds (0.33 s = 180 bpm)
    pub min_peak_interval_secs: f64,
    /// Noise floor as a fraction of the window maximum
    pub peak_height_fraction: f64,
    /// SpO2 = intercept - slope * R
    pub spo2_intercept: f64,
    /// Counts subtracted per unit of R
    pub spo2_slope: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            min_peak_interval_secs: 0.33,
            peak_height_fraction: 0.3,
            spo2_intercept: 110.0,
            spo2_slope: 25.0,
        }
    }
}

/// Archive storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for archive files
    pub output_dir: PathBuf,
    /// File name prefix, followed by label and timestamp
    pub file_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("csv"),
            file_prefix: "ppg_data".to_string(),
        }
    }
}

/// HTTP / WebSocket transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Capacity of the live broadcast channel; lagging subscribers lose the oldest events
    pub broadcast_capacity: usize,
    /// Route that accepts sample batches
    pub ingest_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            broadcast_capacity: 256,
            ingest_path: "/esp32Test".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/ppg_vitals.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix `PPG_VITALS_`.
    /// Example: `PPG_VITALS_ACQUISITION__WINDOW_THRESHOLD=70`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PPG_VITALS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(PpgError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let fs = self.acquisition.sampling_rate_hz;
        if !(fs.is_finite() && fs > 0.0) {
            return Err(PpgError::Configuration(format!(
                "Invalid sampling_rate_hz {fs}. Must be positive"
            )));
        }
        let nyquist = fs / 2.0;

        let filters = &self.filters;
        if filters.highpass_cutoff_hz <= 0.0 || filters.highpass_cutoff_hz >= nyquist {
            return Err(PpgError::Configuration(format!(
                "highpass_cutoff_hz {} must lie in (0, {nyquist})",
                filters.highpass_cutoff_hz
            )));
        }
        if filters.band_low_hz <= 0.0
            || filters.band_low_hz >= filters.band_high_hz
            || filters.band_high_hz >= nyquist
        {
            return Err(PpgError::Configuration(format!(
                "Cardiac band {}-{} Hz must satisfy 0 < low < high < {nyquist}",
                filters.band_low_hz, filters.band_high_hz
            )));
        }
        if !(1..=MAX_BAND_ORDER).contains(&filters.band_order) {
            return Err(PpgError::Configuration(format!(
                "band_order {} must lie in 1..={MAX_BAND_ORDER}",
                filters.band_order
            )));
        }

        // A drained window holds threshold + 1 samples at minimum.
        let required = min_filtfilt_samples(2 * filters.band_order);
        if self.acquisition.window_threshold.saturating_add(1) < required {
            return Err(PpgError::Configuration(format!(
                "window_threshold {} is too small for an order-{} band-pass (needs windows of {} samples)",
                self.acquisition.window_threshold, filters.band_order, required
            )));
        }

        let band = self.acquisition.suspect_band;
        if band.low > band.high {
            return Err(PpgError::Configuration(format!(
                "suspect_band low {} exceeds high {}",
                band.low, band.high
            )));
        }

        let est = &self.estimation;
        if !(est.min_peak_interval_secs > 0.0) {
            return Err(PpgError::Configuration(
                "min_peak_interval_secs must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&est.peak_height_fraction) {
            return Err(PpgError::Configuration(format!(
                "peak_height_fraction {} must lie in [0, 1)",
                est.peak_height_fraction
            )));
        }

        if self.storage.file_prefix.trim().is_empty() {
            return Err(PpgError::Configuration(
                "storage.file_prefix must not be empty".to_string(),
            ));
        }
        if self.server.broadcast_capacity == 0 || self.server.broadcast_capacity > MAX_BROADCAST_CAPACITY {
            return Err(PpgError::Configuration(format!(
                "server.broadcast_capacity {} must lie in 1..={MAX_BROADCAST_CAPACITY}",
                self.server.broadcast_capacity
            )));
        }
        if !self.server.ingest_path.starts_with('/') {
            return Err(PpgError::Configuration(format!(
                "server.ingest_path '{}' must start with '/'",
                self.server.ingest_path
            )));
        }

        Ok(())
    }
}
