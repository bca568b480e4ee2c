//! CSV archive writer for labeled raw samples.
//!
//! Each flush creates a new file named `<prefix>_<label>_<YYYYmmdd_HHMMSS>.csv` in the
//! configured directory, writes the `IR Value,Red Value` header once and then one row
//! per sample. Existing files are never reused: a name collision within the same
//! second gets a numeric suffix.
use crate::{
    config::StorageConfig,
    core::{ArchiveSink, Sample},
    error::{AppResult, PpgError},
};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Column header written at the top of every archive file.
pub const CSV_HEADER: [&str; 2] = ["IR Value", "Red Value"];

/// A writer for CSV archive files.
#[derive(Debug, Clone)]
pub struct CsvArchive {
    output_dir: PathBuf,
    file_prefix: String,
}

impl CsvArchive {
    /// Creates an archive writing `<file_prefix>_<label>_<timestamp>.csv` files under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, file_prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_prefix: file_prefix.into(),
        }
    }

    /// Archive described by the `[storage]` section.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.output_dir.clone(), config.file_prefix.clone())
    }

    /// Directory new files are created in.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn base_name(&self, label: &str) -> String {
        format!(
            "{}_{}_{}",
            self.file_prefix,
            sanitize_label(label),
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        )
    }

    /// Creates a fresh file, adding `_1`, `_2`, ... until the name is unused.
    fn create_unique(&self, base: &str) -> AppResult<(PathBuf, File)> {
        for attempt in 0u32.. {
            let name = if attempt == 0 {
                format!("{base}.csv")
            } else {
                format!("{base}_{attempt}.csv")
            };
            let path = self.output_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(PpgError::Persistence(format!(
                        "Failed to create CSV file '{}': {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Err(PpgError::Persistence(format!(
            "No free file name for '{base}'"
        )))
    }

    /// Blocking write of one archive file.
    pub fn write_blocking(&self, label: &str, samples: &[Sample]) -> AppResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            PpgError::Persistence(format!(
                "Failed to create directory '{}': {}",
                self.output_dir.display(),
                e
            ))
        })?;

        let (path, file) = self.create_unique(&self.base_name(label))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(CSV_HEADER)?;
        for sample in samples {
            writer.write_record(&[sample.ir.to_string(), sample.red.to_string()])?;
        }
        writer
            .flush()
            .map_err(|e| PpgError::Persistence(e.to_string()))?;

        tracing::info!(
            path = %path.display(),
            label,
            samples = samples.len(),
            "Archive written"
        );
        Ok(path)
    }
}

#[async_trait]
impl ArchiveSink for CsvArchive {
    async fn persist(&self, label: &str, samples: &[Sample]) -> AppResult<PathBuf> {
        let writer = self.clone();
        let label = label.to_string();
        let samples = samples.to_vec();
        tokio::task::spawn_blocking(move || writer.write_blocking(&label, &samples))
            .await
            .map_err(|e| PpgError::Persistence(format!("Archive task failed: {e}")))?
    }
}

/// Makes a label safe to embed in a file name.
///
/// ASCII alphanumerics, `-`, `_` and `.` are kept; anything else becomes `-`.
/// An empty result falls back to `unlabeled`.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "unlabeled".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let archive = CsvArchive::new(dir.path().join("csv"), "ppg_data");
        let path = archive
            .write_blocking("rest", &[Sample::new(1200, 900), Sample::new(1210, 905)])
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("ppg_data_rest_"));
        assert!(name.ends_with(".csv"));

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["IR Value", "Red Value"]);
        assert_eq!(rows[2], vec!["1210", "905"]);
    }

    #[test]
    fn repeated_flushes_never_overwrite() {
        let dir = tempdir().unwrap();
        let archive = CsvArchive::new(dir.path(), "ppg_data");
        let first = archive.write_blocking("a", &[Sample::new(1, 1)]).unwrap();
        let second = archive.write_blocking("a", &[Sample::new(2, 2)]).unwrap();
        assert_ne!(first, second);
        assert_eq!(read_rows(&first)[1], vec!["1", "1"]);
        assert_eq!(read_rows(&second)[1], vec!["2", "2"]);
    }

    #[test]
    fn sanitizes_labels() {
        assert_eq!(sanitize_label("subject 1/run:2"), "subject-1-run-2");
        assert_eq!(sanitize_label("  "), "unlabeled");
        assert_eq!(sanitize_label("../etc"), "-etc");
        assert_eq!(sanitize_label("ok_label-3"), "ok_label-3");
    }

    #[tokio::test]
    async fn persists_through_async_sink() {
        let dir = tempdir().unwrap();
        let archive = CsvArchive::new(dir.path(), "ppg_data");
        let path = archive
            .persist("default", &[Sample::new(5, 6)])
            .await
            .unwrap();
        assert!(path.exists());
    }
}
