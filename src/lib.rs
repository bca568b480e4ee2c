//! # PPG Vitals Library
//!
//! Core library for the `ppg-vitals` service. It buffers bursts of raw
//! photoplethysmography samples `(ir, red)` into fixed-size analysis windows,
//! estimates heart rate and SpO2 for every drained window, streams the results
//! to live subscribers, and archives each labeled recording to CSV.
//!
//! ## Crate Structure
//!
//! - **`config`**: `AppConfig` loaded with figment from TOML plus `PPG_VITALS_` environment
//!   overrides, and validated before use.
//! - **`core`**: Shared data types (`Sample`, `EstimationResult`, `PipelineEvent`) and the
//!   `EventSink` / `ArchiveSink` seams.
//! - **`data`**: Signal processing (Butterworth filters, peak detection, SpO2) and CSV storage.
//! - **`error`**: `EstimationError` and the application-wide `PpgError`.
//! - **`ingress`**: Validation of incoming `{"ir": [...], "red": [...]}` batches.
//! - **`logging`**: tracing-subscriber setup.
//! - **`pipeline`**: Orchestration of ingest, window estimation, broadcast and relabel.
//! - **`server`**: axum HTTP ingest endpoint and WebSocket live feed.
//! - **`session`**: The single mutable session buffer.

pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod ingress;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod session;
