//! Ratio-of-ratios SpO2 estimation from the IR and red channels.
//!
//! Each channel is split into AC (zero-phase high-pass) and DC (`x - ac`), the AC part
//! is band-limited to the cardiac band, and the normalised pulsatile amplitudes are
//! compared:
//!
//! ```text
//! R    = (rms(ac_red) / mean(dc_red)) / (rms(ac_ir) / mean(dc_ir))
//! SpO2 = intercept - slope * R
//! ```
//!
//! The default `110 - 25 R` line is an uncalibrated placeholder and needs
//! device-specific calibration before any clinical reading.
use crate::config::{EstimationConfig, FilterConfig};
use crate::data::iir_filter::{band_pass, high_pass};
use crate::error::EstimationError;

/// Denominators with a smaller magnitude are treated as zero.
const DEGENERATE_EPSILON: f64 = 1e-9;

/// Linear mapping from the ratio of ratios to a saturation percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spo2Calibration {
    /// Saturation at R = 0.
    pub intercept: f64,
    /// Percentage points lost per unit of R.
    pub slope: f64,
}

impl Default for Spo2Calibration {
    fn default() -> Self {
        Self {
            intercept: 110.0,
            slope: 25.0,
        }
    }
}

impl From<&EstimationConfig> for Spo2Calibration {
    fn from(config: &EstimationConfig) -> Self {
        Self {
            intercept: config.spo2_intercept,
            slope: config.spo2_slope,
        }
    }
}

impl Spo2Calibration {
    /// Maps a ratio of ratios to a saturation percentage.
    pub fn saturation(&self, ratio: f64) -> f64 {
        self.intercept - self.slope * ratio
    }
}

/// Root-mean-square amplitude; zero for an empty slice.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Pulsatile and baseline components of one optical channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelComponents {
    /// RMS of the band-limited AC component.
    pub ac_rms: f64,
    /// Mean of the DC component.
    pub dc_mean: f64,
}

impl ChannelComponents {
    /// Separates `channel` into its band-limited AC RMS and its DC mean.
    pub fn split(
        channel: &[f64],
        filters: &FilterConfig,
        sampling_hz: f64,
    ) -> Result<Self, EstimationError> {
        let ac = high_pass(channel, filters.highpass_cutoff_hz, sampling_hz)?;
        let dc: Vec<f64> = channel.iter().zip(&ac).map(|(x, a)| x - a).collect();
        let ac_band = band_pass(
            &ac,
            filters.band_low_hz,
            filters.band_high_hz,
            sampling_hz,
            filters.band_order,
        )?;
        Ok(Self {
            ac_rms: rms(&ac_band),
            dc_mean: mean(&dc),
        })
    }

    fn perfusion(&self, channel: &str) -> Result<f64, EstimationError> {
        if !self.dc_mean.is_finite() || self.dc_mean.abs() < DEGENERATE_EPSILON {
            return Err(EstimationError::DegenerateSignal(format!(
                "{channel} DC mean is {}",
                self.dc_mean
            )));
        }
        Ok(self.ac_rms / self.dc_mean)
    }
}

/// Computes the ratio of ratios `R` for one window.
pub fn ratio_of_ratios(
    ir: &[f64],
    red: &[f64],
    filters: &FilterConfig,
    sampling_hz: f64,
) -> Result<f64, EstimationError> {
    if ir.len() != red.len() {
        return Err(EstimationError::LengthMismatch {
            ir: ir.len(),
            red: red.len(),
        });
    }
    let ir = ChannelComponents::split(ir, filters, sampling_hz)?;
    let red = ChannelComponents::split(red, filters, sampling_hz)?;

    let ir_perfusion = ir.perfusion("IR")?;
    let red_perfusion = red.perfusion("red")?;
    if ir_perfusion.abs() < DEGENERATE_EPSILON {
        return Err(EstimationError::DegenerateSignal(
            "IR channel has no pulsatile component".to_string(),
        ));
    }

    let ratio = red_perfusion / ir_perfusion;
    if !ratio.is_finite() {
        return Err(EstimationError::DegenerateSignal(format!(
            "ratio of ratios is {ratio}"
        )));
    }
    Ok(ratio)
}

/// Estimated saturation percentage for one window, before truncation.
pub fn estimate_spo2(
    ir: &[f64],
    red: &[f64],
    filters: &FilterConfig,
    calibration: &Spo2Calibration,
    sampling_hz: f64,
) -> Result<f64, EstimationError> {
    let ratio = ratio_of_ratios(ir, red, filters, sampling_hz)?;
    Ok(calibration.saturation(ratio))
}
