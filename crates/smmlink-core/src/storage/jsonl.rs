//! JSON-lines measurement log
//!
//! One [`Measurement`] per line, appended and flushed on every insert.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{Measurement, MeasurementStore, StoreError};

/// Appends measurements to a JSON-lines file, one record per line
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    file: File,
}

impl JsonlStore {
    /// Open (creating if needed) the file at `path` for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "Measurement log opened");
        Ok(Self { path, file })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an already built measurement
    pub fn append(&mut self, measurement: &Measurement) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(measurement)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;
        Ok(())
    }

    /// Up to `limit` most recent measurements for a patient, newest first
    ///
    /// Lines that fail to parse are skipped.
    pub fn recent(&self, patient_id: &str, limit: usize) -> Result<Vec<Measurement>, StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut matches = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Measurement>(&line) {
                Ok(m) if m.patient_id == patient_id => matches.push(m),
                Ok(_) => {}
                Err(e) => warn!(line = index + 1, "Skipping malformed record: {}", e),
            }
        }

        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matches.truncate(limit);
        Ok(matches)
    }
}

impl MeasurementStore for JsonlStore {
    fn insert_measurement(
        &mut self,
        patient_id: &str,
        heart_rate: &str,
        spo2: &str,
        resp_rate: &str,
    ) -> Result<(), StoreError> {
        self.append(&Measurement::now(patient_id, heart_rate, spo2, resp_rate))
    }
}
