//! Sample accumulation for one labeled recording.
//!
//! A `Session` owns two buffers fed by every appended sample:
//!
//! - **analysis window**: bounded, drained for each estimation pass once its length
//!   exceeds the configured threshold.
//! - **archive**: every sample since the last relabel, flushed to persistence when the
//!   label changes.
//!
//! The type is a plain owned value with no interior locking. The pipeline wraps the
//! active session in a mutex; a registry keyed by device id could hold several.

use crate::config::SuspectBand;
use crate::core::Sample;

/// Label used until a relabel request arrives.
pub const DEFAULT_LABEL: &str = "default";

/// Window plus archive for the active label.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    label: String,
    threshold: usize,
    window: Vec<Sample>,
    archive: Vec<Sample>,
}

impl Session {
    /// Creates an empty session labeled [`DEFAULT_LABEL`].
    pub fn new(threshold: usize) -> Self {
        Self::with_label(DEFAULT_LABEL, threshold)
    }

    /// Creates an empty session under `label`.
    pub fn with_label(label: impl Into<String>, threshold: usize) -> Self {
        Self {
            label: label.into(),
            threshold,
            window: Vec::new(),
            archive: Vec::new(),
        }
    }

    /// Current label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Window length that triggers a drain.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Samples waiting in the analysis window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Samples archived since the last relabel.
    pub fn archive_len(&self) -> usize {
        self.archive.len()
    }

    /// Everything appended since the last relabel.
    pub fn archive(&self) -> &[Sample] {
        &self.archive
    }

    /// Records one sample in both the analysis window and the archive.
    pub fn append(&mut self, ir: i64, red: i64) {
        let sample = Sample::new(ir, red);
        self.window.push(sample);
        self.archive.push(sample);
    }

    /// True once the analysis window holds more samples than the threshold.
    pub fn should_drain(&self) -> bool {
        self.window.len() > self.threshold
    }

    /// Takes the analysis window, leaving it empty. The archive is untouched.
    pub fn drain_window(&mut self) -> Vec<Sample> {
        std::mem::take(&mut self.window)
    }

    /// Swaps in `new_label` and clears both buffers, returning the outgoing label and
    /// everything archived under it.
    pub fn relabel(&mut self, new_label: impl Into<String>) -> (String, Vec<Sample>) {
        let old_label = std::mem::replace(&mut self.label, new_label.into());
        let snapshot = std::mem::take(&mut self.archive);
        self.window.clear();
        (old_label, snapshot)
    }
}

/// Number of samples with either channel inside `band`.
pub fn count_suspect(window: &[Sample], band: &SuspectBand) -> usize {
    window
        .iter()
        .filter(|s| band.contains(s.ir) || band.contains(s.red))
        .count()
}
