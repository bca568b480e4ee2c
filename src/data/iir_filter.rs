//! Zero-phase Butterworth IIR filters over finite sample windows.
//!
//! Filters are built as cascades of second-order sections from the `biquad` crate
//! (plus one hand-designed first-order section for odd orders) and applied
//! forward-and-backward, so the output is phase-aligned with the input.
//!
//! Every window is filtered independently: coefficients are designed per call and
//! no state survives between windows, so transients at window edges are expected.
use crate::error::EstimationError;
use biquad::{Biquad, Coefficients, DirectForm1, Hertz};
use std::f64::consts::PI;

/// The response shape of a Butterworth cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Passes frequencies below the cutoff.
    Lowpass,
    /// Passes frequencies above the cutoff.
    Highpass,
    /// Passes frequencies between the two cutoffs.
    Bandpass,
}

/// Number of samples a zero-phase pass needs for a filter with `order` poles.
///
/// The signal is padded on both sides by `3 * (order + 1)` reflected samples and the
/// padding must be strictly shorter than the signal itself.
pub fn min_filtfilt_samples(order: usize) -> usize {
    3 * (order + 1) + 1
}

/// A Butterworth filter realised as a cascade of biquad sections.
///
/// # Example
///
/// ```
/// use ppg_vitals::data::iir_filter::ButterworthFilter;
///
/// let filter = ButterworthFilter::bandpass(5, 0.5, 5.0, 50.0).unwrap();
/// let signal: Vec<f64> = (0..200).map(|i| (i as f64 * 0.2).sin()).collect();
/// let filtered = filter.filtfilt(&signal).unwrap();
/// assert_eq!(filtered.len(), signal.len());
/// ```
#[derive(Debug, Clone)]
pub struct ButterworthFilter {
    filter_type: FilterType,
    sections: Vec<Coefficients<f64>>,
    order: usize,
}

impl ButterworthFilter {
    /// Designs an order-`order` low-pass with cutoff `cutoff_hz`.
    pub fn lowpass(order: usize, cutoff_hz: f64, sampling_hz: f64) -> Result<Self, EstimationError> {
        Ok(Self {
            filter_type: FilterType::Lowpass,
            sections: design_sections(FilterType::Lowpass, order, cutoff_hz, sampling_hz)?,
            order,
        })
    }

    /// Designs an order-`order` high-pass with cutoff `cutoff_hz`.
    pub fn highpass(order: usize, cutoff_hz: f64, sampling_hz: f64) -> Result<Self, EstimationError> {
        Ok(Self {
            filter_type: FilterType::Highpass,
            sections: design_sections(FilterType::Highpass, order, cutoff_hz, sampling_hz)?,
            order,
        })
    }

    /// Designs a band-pass as an order-`order` high-pass at `low_hz` cascaded with an
    /// order-`order` low-pass at `high_hz` (2 * `order` poles in total).
    pub fn bandpass(
        order: usize,
        low_hz: f64,
        high_hz: f64,
        sampling_hz: f64,
    ) -> Result<Self, EstimationError> {
        if low_hz >= high_hz {
            return Err(EstimationError::InvalidFilter(format!(
                "band edges must be increasing, got {low_hz} Hz..{high_hz} Hz"
            )));
        }
        let mut sections = design_sections(FilterType::Highpass, order, low_hz, sampling_hz)?;
        sections.extend(design_sections(
            FilterType::Lowpass,
            order,
            high_hz,
            sampling_hz,
        )?);
        Ok(Self {
            filter_type: FilterType::Bandpass,
            sections,
            order: 2 * order,
        })
    }

    /// Response shape of the cascade.
    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// Total number of poles in the cascade.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of biquad or first-order sections in the cascade.
    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    /// Smallest window this filter accepts in [`filtfilt`](Self::filtfilt).
    pub fn min_samples(&self) -> usize {
        min_filtfilt_samples(self.order)
    }

    /// Runs one causal pass over `data` with fresh section state.
    ///
    /// The leading sample is subtracted first. All cascades here either block DC
    /// or pass it unchanged, so this starts the filter in its steady state for that
    /// level instead of ringing on an artificial step; the level is restored for
    /// low-pass cascades.
    fn run(&self, data: &[f64]) -> Vec<f64> {
        let offset = data.first().copied().unwrap_or(0.0);
        let mut stages: Vec<DirectForm1<f64>> = self
            .sections
            .iter()
            .cloned()
            .map(DirectForm1::<f64>::new)
            .collect();
        let restore = match self.filter_type {
            FilterType::Lowpass => offset,
            FilterType::Highpass | FilterType::Bandpass => 0.0,
        };

        data.iter()
            .map(|&x| {
                let y = stages
                    .iter_mut()
                    .fold(x - offset, |acc, stage| stage.run(acc));
                y + restore
            })
            .collect()
    }

    /// Applies the filter forward and backward over `samples` with odd-reflection
    /// padding at both edges, cancelling the phase delay of a single pass.
    pub fn filtfilt(&self, samples: &[f64]) -> Result<Vec<f64>, EstimationError> {
        let n = samples.len();
        let required = self.min_samples();
        if n < required {
            return Err(EstimationError::InsufficientSamples {
                required,
                actual: n,
            });
        }
        let pad = required - 1;

        let first = samples[0];
        let last = samples[n - 1];
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - samples[i]));
        extended.extend_from_slice(samples);
        extended.extend((n - 1 - pad..n - 1).rev().map(|i| 2.0 * last - samples[i]));

        let mut forward = self.run(&extended);
        forward.reverse();
        let mut backward = self.run(&forward);
        backward.reverse();

        Ok(backward[pad..pad + n].to_vec())
    }
}

/// Zero-phase first-order Butterworth high-pass.
///
/// Used to strip the baseline from a channel; the baseline itself is
/// `original - high_pass(original)`.
pub fn high_pass(
    samples: &[f64],
    cutoff_hz: f64,
    sampling_hz: f64,
) -> Result<Vec<f64>, EstimationError> {
    ButterworthFilter::highpass(1, cutoff_hz, sampling_hz)?.filtfilt(samples)
}

/// Zero-phase order-`order` Butterworth band-pass between `low_hz` and `high_hz`.
pub fn band_pass(
    samples: &[f64],
    low_hz: f64,
    high_hz: f64,
    sampling_hz: f64,
    order: usize,
) -> Result<Vec<f64>, EstimationError> {
    ButterworthFilter::bandpass(order, low_hz, high_hz, sampling_hz)?.filtfilt(samples)
}

fn design_sections(
    filter_type: FilterType,
    order: usize,
    cutoff_hz: f64,
    sampling_hz: f64,
) -> Result<Vec<Coefficients<f64>>, EstimationError> {
    if order == 0 {
        return Err(EstimationError::InvalidFilter(
            "filter order must be at least 1".to_string(),
        ));
    }
    if !(cutoff_hz.is_finite() && sampling_hz.is_finite()) || 2.0 * cutoff_hz >= sampling_hz {
        return Err(EstimationError::InvalidFilter(format!(
            "cutoff {cutoff_hz} Hz must lie below Nyquist for {sampling_hz} Hz sampling"
        )));
    }
    let fs = Hertz::<f64>::from_hz(sampling_hz)
        .map_err(|e| EstimationError::InvalidFilter(format!("sampling rate: {e:?}")))?;
    let f0 = Hertz::<f64>::from_hz(cutoff_hz)
        .map_err(|e| EstimationError::InvalidFilter(format!("cutoff: {e:?}")))?;

    if filter_type == FilterType::Bandpass {
        return Err(EstimationError::InvalidFilter(
            "band-pass is composed from low-pass and high-pass sections".to_string(),
        ));
    }

    // Conjugate pole pairs of the analog prototype sit at angles (2k-1)pi/2N from
    // the imaginary axis, giving Q = 1 / (2 sin(angle)).
    let mut sections = Vec::with_capacity(order / 2 + order % 2);
    for k in 1..=order / 2 {
        let angle = (2 * k - 1) as f64 * PI / (2 * order) as f64;
        let q = 1.0 / (2.0 * angle.sin());
        let biquad_type = match filter_type {
            FilterType::Highpass => biquad::Type::HighPass,
            FilterType::Lowpass | FilterType::Bandpass => biquad::Type::LowPass,
        };
        let coeffs = Coefficients::<f64>::from_params(biquad_type, fs, f0, q).map_err(|e| {
            EstimationError::InvalidFilter(format!("section {k} of order {order}: {e:?}"))
        })?;
        sections.push(coeffs);
    }
    if order % 2 == 1 {
        sections.push(first_order_section(filter_type, cutoff_hz, sampling_hz));
    }
    Ok(sections)
}

/// Bilinear-transformed first-order section with the cutoff prewarped.
fn first_order_section(filter_type: FilterType, cutoff_hz: f64, sampling_hz: f64) -> Coefficients<f64> {
    let k = (PI * cutoff_hz / sampling_hz).tan();
    let norm = 1.0 / (1.0 + k);
    let (b0, b1) = match filter_type {
        FilterType::Highpass => (norm, -norm),
        FilterType::Lowpass | FilterType::Bandpass => (k * norm, k * norm),
    };
    Coefficients {
        a1: (k - 1.0) * norm,
        a2: 0.0,
        b0,
        b1,
        b2: 0.0,
    }
}
