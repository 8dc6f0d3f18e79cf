use log::{debug, error, warn};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::OctalError;

/// Row-wise CSV writer for sweep results.
///
/// Rows are buffered and written every `flush_every` rows and when the
/// recorder is dropped. The header goes out with the first flush, truncating
/// any previous file at the same path.
#[derive(Debug)]
pub struct SweepRecorder {
    path: PathBuf,
    header: Vec<String>,
    buffer: VecDeque<Vec<f64>>,
    flush_every: usize,
    header_written: bool,
    rows_written: usize,
    flush_failures: usize,
    max_flush_failures: usize,
}

impl SweepRecorder {
    pub fn new<P: Into<PathBuf>, S: AsRef<str>>(path: P, header: &[S]) -> Self {
        let mut path = path.into();
        if path.extension().is_none() {
            path.set_extension("csv");
        }

        Self {
            path,
            header: header.iter().map(|h| h.as_ref().to_string()).collect(),
            buffer: VecDeque::new(),
            flush_every: 1,
            header_written: false,
            rows_written: 0,
            flush_failures: 0,
            max_flush_failures: 10,
        }
    }

    /// Rows to buffer before writing; 0 is treated as 1.
    pub fn with_flush_every(mut self, rows: usize) -> Self {
        self.flush_every = rows.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows that have reached the file.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn record(&mut self, row: &[f64]) -> Result<(), OctalError> {
        if row.len() != self.header.len() {
            return Err(OctalError::Parse(format!(
                "Row has {} values, header has {} columns",
                row.len(),
                self.header.len()
            )));
        }
        self.buffer.push_back(row.to_vec());

        if self.buffer.len() >= self.flush_every {
            self.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OctalError> {
        if self.buffer.is_empty() && self.header_written {
            return Ok(());
        }

        match self.write_buffer() {
            Ok(()) => {
                self.flush_failures = 0;
                debug!("Flushed {} rows to {}", self.rows_written, self.path.display());
                Ok(())
            }
            Err(e) => {
                self.flush_failures += 1;
                error!(
                    "Flush failure {}/{} for {}: {}",
                    self.flush_failures,
                    self.max_flush_failures,
                    self.path.display(),
                    e
                );

                if self.flush_failures % 3 == 0 {
                    warn!(
                        "Experiencing intermittent flush failures ({}/{})",
                        self.flush_failures, self.max_flush_failures
                    );
                }

                if self.flush_failures >= self.max_flush_failures {
                    return Err(OctalError::Io {
                        source: std::io::Error::other(e.to_string()),
                        context: format!(
                            "Too many consecutive flush failures ({}) for {}",
                            self.max_flush_failures,
                            self.path.display()
                        ),
                    });
                }

                // rows not yet on disk stay buffered for the next attempt
                Ok(())
            }
        }
    }

    fn write_buffer(&mut self) -> Result<(), OctalError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.header_written)
            .truncate(!self.header_written)
            .open(&self.path)
            .map_err(|e| OctalError::io(e, format!("Opening {}", self.path.display())))?;

        let mut writer = csv::Writer::from_writer(file);
        if !self.header_written {
            writer.write_record(&self.header)?;
            self.flush_writer(&mut writer)?;
            self.header_written = true;
        }
        // a row leaves the buffer only once it is on disk
        while let Some(row) = self.buffer.front() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
            self.flush_writer(&mut writer)?;
            self.buffer.pop_front();
            self.rows_written += 1;
        }
        Ok(())
    }

    fn flush_writer<W: std::io::Write>(
        &self,
        writer: &mut csv::Writer<W>,
    ) -> Result<(), OctalError> {
        writer
            .flush()
            .map_err(|e| OctalError::io(e, format!("Writing {}", self.path.display())))
    }
}

impl Drop for SweepRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("Final flush of {} failed: {}", self.path.display(), e);
        }
    }
}
