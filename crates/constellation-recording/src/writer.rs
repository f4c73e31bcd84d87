// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run-file writer behind the receiver's write callback.

use std::path::PathBuf;

use constellation::config::Configuration;
use constellation::data::RunWriter;
use constellation::protocol::CdtpMessage;
use constellation::{Error, Result};

use crate::format::{Record, RunFileStream};

/// Default file name pattern; `{run_number}` and `{date}` are substituted.
pub const DEFAULT_FILE_PATTERN: &str = "run_{run_number}_{date}.rundat";

/// Writes every received run message into one `.rundat` file per run.
///
/// File naming comes from the `file_name_pattern` configuration key; an
/// existing file is never overwritten (the `starting` transition fails
/// instead).
pub struct RunFileWriter {
    output_path: PathBuf,
    file_name_pattern: String,
    stream: Option<RunFileStream>,
    current_file: Option<PathBuf>,
}

impl Default for RunFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFileWriter {
    pub fn new() -> Self {
        RunFileWriter {
            output_path: PathBuf::from("data"),
            file_name_pattern: DEFAULT_FILE_PATTERN.to_string(),
            stream: None,
            current_file: None,
        }
    }

    /// Path of the file currently (or last) written.
    pub fn current_file(&self) -> Option<&PathBuf> {
        self.current_file.as_ref()
    }

    fn file_name(&self, run_id: &str) -> String {
        let date = chrono::Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        self.file_name_pattern
            .replace("{run_number}", run_id)
            .replace("{date}", &date)
    }
}

impl RunWriter for RunFileWriter {
    fn configure(&mut self, config: &mut Configuration) -> Result<()> {
        self.file_name_pattern =
            config.get_str_or("file_name_pattern", DEFAULT_FILE_PATTERN)?;
        self.output_path = PathBuf::from(config.get_str_or("output_path", "data")?);
        Ok(())
    }

    fn open(&mut self, run_id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.output_path)?;
        let path = self.output_path.join(self.file_name(run_id));
        if path.exists() {
            return Err(Error::Handler {
                reason: format!("file already exists: {}", path.display()),
            });
        }
        log::info!("[REC] creating {}", path.display());
        let stream = RunFileStream::create(&path).map_err(|e| Error::Handler {
            reason: format!("unable to open {}: {}", path.display(), e),
        })?;
        self.stream = Some(stream);
        self.current_file = Some(path);
        Ok(())
    }

    fn write(&mut self, msg: &CdtpMessage) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| Error::Handler {
            reason: "write without an open run file".into(),
        })?;
        let record = Record::from_message(msg).map_err(|e| Error::Handler {
            reason: e.to_string(),
        })?;
        stream.append(&record).map_err(|e| Error::Handler {
            reason: format!("record append failed: {}", e),
        })
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush().map_err(|e| Error::Handler {
                reason: format!("flush failed: {}", e),
            })?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let count = stream.finalize().map_err(|e| Error::Handler {
                reason: format!("finalize failed: {}", e),
            })?;
            log::info!("[REC] closed run file with {} messages", count);
        }
        Ok(())
    }
}
