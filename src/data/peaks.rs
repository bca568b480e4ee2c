//! Systolic peak detection and heart-rate estimation.
//!
//! Peaks are searched on the band-limited IR signal. A candidate must be an interior
//! local maximum (`x[i-1] < x[i] >= x[i+1]`), must rise above a noise floor of
//! `height_fraction * max(x)` (with `max(x) > 0`), and must sit at least
//! `ceil(min_interval_secs * fs)` samples from any taller peak.
use crate::config::EstimationConfig;

/// Thresholds applied when picking systolic peaks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakDetector {
    /// Minimum spacing between peaks in seconds.
    pub min_interval_secs: f64,
    /// Noise floor as a fraction of the window maximum.
    pub height_fraction: f64,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self {
            min_interval_secs: 0.33,
            height_fraction: 0.3,
        }
    }
}

impl From<&EstimationConfig> for PeakDetector {
    fn from(config: &EstimationConfig) -> Self {
        Self {
            min_interval_secs: config.min_peak_interval_secs,
            height_fraction: config.peak_height_fraction,
        }
    }
}

impl PeakDetector {
    /// Minimum peak spacing in samples at `sampling_hz`.
    pub fn min_distance(&self, sampling_hz: f64) -> usize {
        ((self.min_interval_secs * sampling_hz).ceil() as usize).max(1)
    }

    /// Returns the indices of systolic peaks in `signal`, in ascending order.
    pub fn find_peaks(&self, signal: &[f64], sampling_hz: f64) -> Vec<usize> {
        if signal.len() < 3 {
            return Vec::new();
        }
        let max = signal.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(max.is_finite() && max > 0.0) {
            return Vec::new();
        }
        let floor = self.height_fraction * max;

        let mut candidates: Vec<usize> = (1..signal.len() - 1)
            .filter(|&i| signal[i - 1] < signal[i] && signal[i] >= signal[i + 1])
            .filter(|&i| signal[i] > floor)
            .collect();

        // Tallest first; ties keep the earlier index.
        candidates.sort_by(|&a, &b| signal[b].total_cmp(&signal[a]).then(a.cmp(&b)));

        let distance = self.min_distance(sampling_hz);
        let mut kept: Vec<usize> = Vec::with_capacity(candidates.len());
        for idx in candidates {
            if kept.iter().all(|&k| k.abs_diff(idx) >= distance) {
                kept.push(idx);
            }
        }
        kept.sort_unstable();
        kept
    }
}

/// Heart rate in beats per minute from the spacing of the first two peaks.
///
/// Only one cardiac cycle is used, so a single spurious early peak skews the
/// estimate. Returns `None` with fewer than two peaks.
pub fn heart_rate_from_peaks(peaks: &[usize], sampling_hz: f64) -> Option<f64> {
    match peaks {
        [first, second, ..] if second > first => {
            let interval_secs = (second - first) as f64 / sampling_hz;
            Some(60.0 / interval_secs)
        }
        _ => None,
    }
}
