//! Signal processing and archive storage modules.
pub mod iir_filter;
pub mod peaks;
pub mod spo2;
pub mod storage;
pub mod vitals;
