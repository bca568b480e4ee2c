//! Pipeline orchestration: ingest → session buffer → estimation → sinks.
//!
//! The [`Pipeline`] owns the active [`Session`] behind a mutex so ingress from several
//! transports cannot interleave appends, drains or relabels. Estimation runs on the
//! ingesting caller after the lock is released; results and retake notices go to the
//! [`EventSink`], relabel snapshots go to the [`ArchiveSink`].
//!
//! Failures never escape: malformed batches append nothing, estimation errors drop
//! the window, persistence errors lose the archive file. Each case logs a warning.

use crate::config::{AppConfig, RetakePolicy, SuspectBand};
use crate::core::{ArchiveSink, EstimationResult, EventSink, PipelineEvent, RetakeNotice, Sample};
use crate::data::vitals::VitalsEstimator;
use crate::error::EstimationError;
use crate::ingress::parse_batch;
use crate::session::{count_suspect, Session};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The active session, shared between transports.
pub type SharedSession = Arc<Mutex<Session>>;

/// What happened to one drained analysis window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutcome {
    /// Session label at drain time.
    pub label: String,
    /// Number of samples drained.
    pub window_len: usize,
    /// Set when the window held suspect-range samples.
    pub retake: Option<RetakeNotice>,
    /// The emitted result, if estimation ran and succeeded.
    pub result: Option<EstimationResult>,
    /// Why no result was emitted, if estimation ran and failed.
    pub error: Option<EstimationError>,
}

/// Summary of one ingested batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IngestOutcome {
    /// Samples appended from the batch.
    pub appended: usize,
    /// Set when the batch crossed the window threshold.
    pub window: Option<WindowOutcome>,
}

/// Summary of one relabel request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelabelOutcome {
    /// Label the archive was flushed under.
    pub previous_label: String,
    /// Label now active.
    pub label: String,
    /// Samples handed to the archive.
    pub archived_samples: usize,
    /// Archive file, when there was something to write and the write succeeded.
    pub file: Option<PathBuf>,
}

/// Buffer sizes of the active session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    /// Current label.
    pub label: String,
    /// Samples waiting in the analysis window.
    pub window_len: usize,
    /// Samples archived since the last relabel.
    pub archive_len: usize,
    /// Window length that triggers a drain.
    pub threshold: usize,
}

/// Ingest front door: owns the active session and the result and archive sinks.
pub struct Pipeline {
    session: SharedSession,
    estimator: VitalsEstimator,
    suspect_band: SuspectBand,
    retake_policy: RetakePolicy,
    events: Arc<dyn EventSink>,
    archive: Arc<dyn ArchiveSink>,
}

impl Pipeline {
    /// Builds a pipeline with a fresh default-labeled session.
    pub fn new(
        config: &AppConfig,
        events: Arc<dyn EventSink>,
        archive: Arc<dyn ArchiveSink>,
    ) -> Self {
        let session = Arc::new(Mutex::new(Session::new(
            config.acquisition.window_threshold,
        )));
        Self::with_session(config, session, events, archive)
    }

    /// Builds a pipeline around an existing session handle.
    pub fn with_session(
        config: &AppConfig,
        session: SharedSession,
        events: Arc<dyn EventSink>,
        archive: Arc<dyn ArchiveSink>,
    ) -> Self {
        Self {
            session,
            estimator: VitalsEstimator::from_config(config),
            suspect_band: config.acquisition.suspect_band,
            retake_policy: config.acquisition.retake_policy,
            events,
            archive,
        }
    }

    /// Handle to the shared session.
    pub fn session(&self) -> SharedSession {
        Arc::clone(&self.session)
    }

    /// Snapshot of the label and buffer sizes.
    pub fn status(&self) -> SessionStatus {
        let session = self.session.lock();
        SessionStatus {
            label: session.label().to_string(),
            window_len: session.window_len(),
            archive_len: session.archive_len(),
            threshold: session.threshold(),
        }
    }

    /// Parses a raw transport payload and ingests it. Malformed payloads are logged
    /// and append nothing.
    pub fn ingest_json(&self, payload: &Value) -> IngestOutcome {
        match parse_batch(payload) {
            Ok(samples) => self.ingest(&samples),
            Err(e) => {
                warn!(error = %e, "Dropping malformed batch");
                IngestOutcome::default()
            }
        }
    }

    /// Appends `samples` and, if the threshold was crossed, estimates the drained window
    /// before returning.
    pub fn ingest(&self, samples: &[Sample]) -> IngestOutcome {
        let drained = {
            let mut session = self.session.lock();
            for sample in samples {
                session.append(sample.ir, sample.red);
            }
            if session.should_drain() {
                Some((session.label().to_string(), session.drain_window()))
            } else {
                None
            }
        };
        debug!(appended = samples.len(), "Batch ingested");

        IngestOutcome {
            appended: samples.len(),
            window: drained.map(|(label, window)| self.process_window(label, window)),
        }
    }

    fn process_window(&self, label: String, window: Vec<Sample>) -> WindowOutcome {
        info!(label = %label, samples = window.len(), "Processing analysis window");

        let suspect = count_suspect(&window, &self.suspect_band);
        let retake = (suspect > 0).then(|| RetakeNotice {
            label: label.clone(),
            suspect_samples: suspect,
            window_len: window.len(),
            band_low: self.suspect_band.low,
            band_high: self.suspect_band.high,
        });
        if let Some(notice) = &retake {
            info!(suspect_samples = suspect, "Retake requested");
            self.events.publish(PipelineEvent::Retake(notice.clone()));
        }

        let mut outcome = WindowOutcome {
            label,
            window_len: window.len(),
            retake,
            result: None,
            error: None,
        };
        if outcome.retake.is_some() && self.retake_policy == RetakePolicy::RejectWindow {
            debug!("Window rejected by retake policy");
            return outcome;
        }

        match self.estimator.estimate(&window) {
            Ok(result) => {
                self.events.publish(PipelineEvent::Result(result.clone()));
                outcome.result = Some(result);
            }
            Err(e) => {
                warn!(error = %e, "Estimation failed; window dropped");
                outcome.error = Some(e);
            }
        }
        outcome
    }

    /// Switches to `new_label`, flushing everything archived under the previous label.
    ///
    /// The session is reset atomically; the archive write happens afterwards so
    /// ingestion is never blocked on disk.
    pub async fn relabel(&self, new_label: impl Into<String>) -> RelabelOutcome {
        self.flush(Some(new_label.into())).await
    }

    /// Flushes the archive and clears the session, keeping the current label.
    pub async fn reset(&self) -> RelabelOutcome {
        self.flush(None).await
    }

    async fn flush(&self, new_label: Option<String>) -> RelabelOutcome {
        let (previous_label, snapshot, new_label) = {
            let mut session = self.session.lock();
            let new_label = new_label.unwrap_or_else(|| session.label().to_string());
            let (previous_label, snapshot) = session.relabel(new_label.clone());
            (previous_label, snapshot, new_label)
        };
        info!(
            previous = %previous_label,
            label = %new_label,
            archived = snapshot.len(),
            "Session relabeled"
        );

        let file = if snapshot.is_empty() {
            None
        } else {
            match self.archive.persist(&previous_label, &snapshot).await {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, label = %previous_label, "Archive flush failed");
                    None
                }
            }
        };

        RelabelOutcome {
            previous_label,
            label: new_label,
            archived_samples: snapshot.len(),
            file,
        }
    }
}

/// Collapses a relabel payload into a single label string.
///
/// Strings are used as-is, scalars are stringified, and objects become
/// `key-value` pairs joined by `_` in key order. `null` yields `None`.
pub fn collapse_label(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => Some(
            map.iter()
                .filter_map(|(k, v)| collapse_label(v).map(|v| format!("{k}-{v}")))
                .collect::<Vec<_>>()
                .join("_"),
        ),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(collapse_label)
                .collect::<Vec<_>>()
                .join("_"),
        ),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppResult, PpgError};
    use async_trait::async_trait;
    use serde_json::json;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<PipelineEvent>>,
    }

    impl EventSink for RecordingSink {
        fn publish(&self, event: PipelineEvent) {
            self.events.lock().push(event);
        }
    }

    #[derive(Default)]
    struct MemoryArchive {
        flushed: Mutex<Vec<(String, Vec<Sample>)>>,
    }

    #[async_trait]
    impl ArchiveSink for MemoryArchive {
        async fn persist(&self, label: &str, samples: &[Sample]) -> AppResult<PathBuf> {
            self.flushed.lock().push((label.to_string(), samples.to_vec()));
            Ok(PathBuf::from(format!("{label}.csv")))
        }
    }

    struct FailingArchive;

    #[async_trait]
    impl ArchiveSink for FailingArchive {
        async fn persist(&self, _label: &str, _samples: &[Sample]) -> AppResult<PathBuf> {
            Err(PpgError::Persistence("disk full".into()))
        }
    }

    fn pulse(len: usize, offset: i64) -> Vec<Sample> {
        (0..len)
            .map(|i| {
                let phase = (2.0 * std::f64::consts::PI * 1.2 * i as f64 / 50.0).sin();
                Sample::new(
                    offset + (200.0 * phase) as i64,
                    offset / 2 + (100.0 * phase) as i64,
                )
            })
            .collect()
    }

    fn pipeline_with(
        config: &AppConfig,
    ) -> (Pipeline, Arc<RecordingSink>, Arc<MemoryArchive>) {
        let sink = Arc::new(RecordingSink::default());
        let archive = Arc::new(MemoryArchive::default());
        let pipeline = Pipeline::new(config, sink.clone(), archive.clone());
        (pipeline, sink, archive)
    }

    /// Suspect band moved out of the way of the synthetic signal.
    fn quiet_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.acquisition.suspect_band = SuspectBand {
            low: 1_000_000,
            high: 2_000_000,
        };
        config
    }

    #[test]
    fn threshold_plus_one_emits_one_result() {
        let (pipeline, sink, _) = pipeline_with(&quiet_config());
        let samples = pulse(81, 20_000);

        let first = pipeline.ingest(&samples[..80]);
        assert_eq!(first.appended, 80);
        assert!(first.window.is_none());

        let second = pipeline.ingest(&samples[80..]);
        let window = second.window.unwrap();
        assert_eq!(window.window_len, 81);
        assert!(window.result.is_some());
        assert!(window.retake.is_none());

        let status = pipeline.status();
        assert_eq!(status.window_len, 0);
        assert_eq!(status.archive_len, 81);
        assert_eq!(sink.events.lock().len(), 1);
        assert!(matches!(sink.events.lock()[0], PipelineEvent::Result(_)));
    }

    #[test]
    fn default_band_flags_typical_readings_and_still_estimates() {
        let (pipeline, sink, _) = pipeline_with(&AppConfig::default());
        let outcome = pipeline.ingest(&pulse(81, 5000));
        let window = outcome.window.unwrap();

        // Readings inside 10..=10000 are what a working sensor produces, yet the
        // default band flags every one of them.
        assert_eq!(window.retake.as_ref().unwrap().suspect_samples, 81);
        assert!(window.result.is_some());

        let events = sink.events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], PipelineEvent::Retake(_)));
        assert!(matches!(events[1], PipelineEvent::Result(_)));
    }

    #[test]
    fn negative_readings_are_checked_by_magnitude() {
        let (pipeline, sink, _) = pipeline_with(&AppConfig::default());
        let mut window = pulse(81, 30_000);
        window[40] = Sample::new(30_000, -50);

        let outcome = pipeline.ingest(&window).window.unwrap();
        let notice = outcome.retake.unwrap();
        assert_eq!(notice.suspect_samples, 1);
        assert!(matches!(sink.events.lock()[0], PipelineEvent::Retake(_)));
    }

    #[test]
    fn reject_policy_skips_estimation() {
        let mut config = AppConfig::default();
        config.acquisition.retake_policy = RetakePolicy::RejectWindow;
        let (pipeline, sink, _) = pipeline_with(&config);

        let window = pipeline.ingest(&pulse(81, 5000)).window.unwrap();
        assert!(window.retake.is_some());
        assert!(window.result.is_none());
        assert!(window.error.is_none());
        assert_eq!(sink.events.lock().len(), 1);
    }

    #[test]
    fn malformed_json_appends_nothing() {
        let (pipeline, sink, _) = pipeline_with(&quiet_config());
        let outcome = pipeline.ingest_json(&json!({"red": [1, 2, 3]}));
        assert_eq!(outcome, IngestOutcome::default());
        assert_eq!(pipeline.status().archive_len, 0);
        assert!(sink.events.lock().is_empty());
    }

    #[test]
    fn degenerate_spo2_still_emits_result() {
        let (pipeline, sink, _) = pipeline_with(&quiet_config());

        // Flat zero channels: band-pass succeeds, SpO2 is degenerate, no peaks.
        let window = pipeline.ingest(&vec![Sample::new(0, 0); 81]).window.unwrap();
        let result = window.result.unwrap();
        assert_eq!(result.spo2_percent, None);
        assert_eq!(result.heart_rate_bpm, None);
        assert_eq!(sink.events.lock().len(), 1);
    }

    #[test]
    #[traced_test]
    fn insufficient_window_is_dropped_and_logged() {
        let mut config = quiet_config();
        config.acquisition.window_threshold = 10;
        let (pipeline, sink, _) = pipeline_with(&config);

        let window = pipeline.ingest(&pulse(11, 20_000)).window.unwrap();
        assert!(window.result.is_none());
        assert!(matches!(
            window.error,
            Some(EstimationError::InsufficientSamples { actual: 11, .. })
        ));
        assert!(sink.events.lock().is_empty());
        assert!(logs_contain("Estimation failed"));

        // The pipeline keeps accepting samples.
        assert_eq!(pipeline.ingest(&pulse(5, 20_000)).appended, 5);
        assert_eq!(pipeline.status().window_len, 5);
    }

    #[tokio::test]
    async fn relabel_flushes_under_previous_label() {
        let (pipeline, _, archive) = pipeline_with(&quiet_config());
        pipeline.ingest(&pulse(30, 20_000));

        let outcome = pipeline.relabel("subject-a").await;
        assert_eq!(outcome.previous_label, "default");
        assert_eq!(outcome.label, "subject-a");
        assert_eq!(outcome.archived_samples, 30);
        assert_eq!(outcome.file, Some(PathBuf::from("default.csv")));

        let flushed = archive.flushed.lock();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].0, "default");
        assert_eq!(flushed[0].1.len(), 30);

        let status = pipeline.status();
        assert_eq!(status.label, "subject-a");
        assert_eq!(status.archive_len, 0);
        assert_eq!(status.window_len, 0);
    }

    #[tokio::test]
    async fn reset_keeps_label_and_flushes() {
        let (pipeline, _, archive) = pipeline_with(&quiet_config());
        pipeline.relabel("walk").await;
        pipeline.ingest(&pulse(12, 20_000));

        let outcome = pipeline.reset().await;
        assert_eq!(outcome.previous_label, "walk");
        assert_eq!(outcome.label, "walk");
        assert_eq!(outcome.archived_samples, 12);
        assert_eq!(archive.flushed.lock()[0].0, "walk");

        let status = pipeline.status();
        assert_eq!(status.label, "walk");
        assert_eq!(status.archive_len, 0);
    }

    #[tokio::test]
    async fn relabel_with_empty_archive_writes_nothing() {
        let (pipeline, _, archive) = pipeline_with(&quiet_config());
        let outcome = pipeline.relabel("next").await;
        assert_eq!(outcome.archived_samples, 0);
        assert!(outcome.file.is_none());
        assert!(archive.flushed.lock().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_does_not_stop_ingest() {
        let config = quiet_config();
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Pipeline::new(&config, sink, Arc::new(FailingArchive));

        pipeline.ingest(&pulse(5, 20_000));
        let outcome = pipeline.relabel("b").await;
        assert_eq!(outcome.archived_samples, 5);
        assert!(outcome.file.is_none());

        assert_eq!(pipeline.ingest(&pulse(5, 20_000)).appended, 5);
        assert_eq!(pipeline.status().archive_len, 5);
    }

    #[test]
    fn collapses_structured_labels() {
        assert_eq!(collapse_label(&json!("rest")), Some("rest".to_string()));
        assert_eq!(
            collapse_label(&json!({"subject": "s1", "trial": 2})),
            Some("subject-s1_trial-2".to_string())
        );
        assert_eq!(collapse_label(&json!(7)), Some("7".to_string()));
        assert_eq!(collapse_label(&Value::Null), None);
    }

    #[test]
    fn concurrent_ingest_keeps_every_sample() {
        let (pipeline, _, _) = pipeline_with(&quiet_config());
        let pipeline = Arc::new(pipeline);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&pipeline);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        p.ingest(&pulse(3, 20_000));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        // 300 samples: three drains of at least 81 leave a short window behind.
        let status = pipeline.status();
        assert_eq!(status.archive_len, 300);
        assert!(status.window_len <= 80);
    }
}
