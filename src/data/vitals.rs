//! Turns one drained analysis window into an [`EstimationResult`].
use crate::config::{AppConfig, FilterConfig};
use crate::core::{EstimationResult, Sample};
use crate::data::iir_filter::band_pass;
use crate::data::peaks::{heart_rate_from_peaks, PeakDetector};
use crate::data::spo2::{estimate_spo2, Spo2Calibration};
use crate::error::EstimationError;
use tracing::{debug, warn};

/// Stateless estimator: every window is filtered and analysed independently.
#[derive(Debug, Clone, PartialEq)]
pub struct VitalsEstimator {
    /// Sensor sampling rate in Hz.
    pub sampling_hz: f64,
    /// Cutoffs and order for both filter stages.
    pub filters: FilterConfig,
    /// Peak detector run on the band-passed IR channel.
    pub peaks: PeakDetector,
    /// SpO2 calibration line.
    pub calibration: Spo2Calibration,
}

impl Default for VitalsEstimator {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl VitalsEstimator {
    /// Builds an estimator from the acquisition, filter and estimation sections.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sampling_hz: config.acquisition.sampling_rate_hz,
            filters: config.filters.clone(),
            peaks: PeakDetector::from(&config.estimation),
            calibration: Spo2Calibration::from(&config.estimation),
        }
    }

    /// Band-limits the IR channel, finds peaks and estimates heart rate and SpO2.
    ///
    /// An IR filtering failure fails the whole window. A degenerate SpO2 ratio only
    /// drops `spo2_percent`.
    #[tracing::instrument(skip_all, fields(window_len = window.len()))]
    pub fn estimate(&self, window: &[Sample]) -> Result<EstimationResult, EstimationError> {
        let ir: Vec<f64> = window.iter().map(|s| s.ir as f64).collect();
        let red: Vec<f64> = window.iter().map(|s| s.red as f64).collect();

        let filtered = band_pass(
            &ir,
            self.filters.band_low_hz,
            self.filters.band_high_hz,
            self.sampling_hz,
            self.filters.band_order,
        )?;
        let peak_indices = self.peaks.find_peaks(&filtered, self.sampling_hz);
        let heart_rate_bpm =
            heart_rate_from_peaks(&peak_indices, self.sampling_hz).map(|bpm| bpm.trunc() as u32);

        let spo2_percent =
            match estimate_spo2(&ir, &red, &self.filters, &self.calibration, self.sampling_hz) {
                Ok(spo2) => Some(spo2.trunc() as i32),
                Err(EstimationError::DegenerateSignal(reason)) => {
                    warn!(%reason, "SpO2 omitted for window");
                    None
                }
                Err(e) => return Err(e),
            };

        let timestamps = (0..window.len())
            .map(|i| i as f64 / self.sampling_hz)
            .collect();

        debug!(
            peaks = peak_indices.len(),
            heart_rate_bpm = ?heart_rate_bpm,
            spo2_percent = ?spo2_percent,
            "Window estimated"
        );

        Ok(EstimationResult {
            timestamps,
            filtered_signal: filtered,
            peak_indices,
            heart_rate_bpm,
            spo2_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn pulse_window(len: usize, bpm: f64) -> Vec<Sample> {
        let freq = bpm / 60.0;
        (0..len)
            .map(|i| {
                let phase = (2.0 * PI * freq * i as f64 / 50.0).sin();
                Sample::new(
                    (5000.0 + 200.0 * phase).round() as i64,
                    (3000.0 + 100.0 * phase).round() as i64,
                )
            })
            .collect()
    }

    #[test]
    fn estimates_plausible_vitals() {
        let estimator = VitalsEstimator::default();
        let result = estimator.estimate(&pulse_window(200, 72.0)).unwrap();

        assert_eq!(result.timestamps.len(), 200);
        assert_eq!(result.filtered_signal.len(), 200);
        assert_eq!(result.timestamps[50], 1.0);

        let bpm = result.heart_rate_bpm.unwrap();
        assert!((64..=80).contains(&bpm), "bpm {bpm}");
        let spo2 = result.spo2_percent.unwrap();
        assert!((86..=90).contains(&spo2), "spo2 {spo2}");
    }

    #[test]
    fn peaks_index_into_filtered_signal() {
        let result = VitalsEstimator::default()
            .estimate(&pulse_window(81, 90.0))
            .unwrap();
        assert!(result
            .peak_indices
            .iter()
            .all(|&i| i < result.filtered_signal.len()));
    }

    #[test]
    fn short_window_is_insufficient() {
        let err = VitalsEstimator::default()
            .estimate(&pulse_window(20, 72.0))
            .unwrap_err();
        assert!(matches!(err, EstimationError::InsufficientSamples { .. }));
    }

    #[test]
    fn zero_red_channel_omits_spo2_only() {
        let window: Vec<Sample> = pulse_window(81, 72.0)
            .into_iter()
            .map(|s| Sample::new(s.ir, 0))
            .collect();
        let result = VitalsEstimator::default().estimate(&window).unwrap();
        assert_eq!(result.spo2_percent, None);
        assert_eq!(result.filtered_signal.len(), 81);
    }
}
