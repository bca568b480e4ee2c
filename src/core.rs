//! Core traits and data types for the PPG pipeline.
use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

/// One sensor tick: raw ADC counts of the infrared and red channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Infrared channel
    pub ir: i64,
    /// Red channel
    pub red: i64,
}

impl Sample {
    /// Builds a sample from raw counts.
    pub fn new(ir: i64, red: i64) -> Self {
        Self { ir, red }
    }
}

/// Vital signs derived from one drained analysis window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    /// Seconds from the start of the window, one per sample.
    pub timestamps: Vec<f64>,
    /// Band-limited IR signal the peaks were found on.
    pub filtered_signal: Vec<f64>,
    /// Indices into `filtered_signal`.
    pub peak_indices: Vec<usize>,
    /// Truncated beats per minute; `None` with fewer than two peaks.
    pub heart_rate_bpm: Option<u32>,
    /// Truncated saturation; `None` when the ratio is degenerate.
    pub spo2_percent: Option<i32>,
}

/// Notification that a drained window held samples inside the suspect band.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetakeNotice {
    /// Session label the window was recorded under.
    pub label: String,
    /// Number of samples in the window with either channel inside the band.
    pub suspect_samples: usize,
    /// Length of the drained window.
    pub window_len: usize,
    /// Lower edge of the suspect band.
    pub band_low: i64,
    /// Upper edge of the suspect band.
    pub band_high: i64,
}

/// Messages fanned out to live subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A completed estimation pass.
    #[serde(rename = "ppg_data")]
    Result(EstimationResult),
    /// The current recording should be retaken.
    Retake(RetakeNotice),
}

/// Receiver of finished results and retake notices.
///
/// Delivery is best-effort: implementations must never block the caller on a slow
/// or absent subscriber.
pub trait EventSink: Send + Sync {
    /// Delivers `event` to whoever is listening.
    fn publish(&self, event: PipelineEvent);
}

impl EventSink for broadcast::Sender<PipelineEvent> {
    fn publish(&self, event: PipelineEvent) {
        // An error only means nobody is listening right now.
        if self.send(event).is_err() {
            tracing::trace!("No live subscribers; event dropped");
        }
    }
}

/// Durable store for labeled raw sample archives.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Persists `samples` under `label` and returns where they were written.
    async fn persist(&self, label: &str, samples: &[Sample]) -> AppResult<PathBuf>;
}
