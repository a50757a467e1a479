use crate::types::FieldValues;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
const OCTET_STREAM: &str = "application/octet-stream";

/// Content type from the file's magic bytes; only PDFs are recognised.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"%PDF-") {
        PDF_CONTENT_TYPE
    } else {
        OCTET_STREAM
    }
}

/// An uploaded document. The bytes are reference counted, so cloning a
/// file for a request never copies the content.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
    /// Where the file was read from; handed to the PDF viewer as the preview reference.
    pub source_path: Option<PathBuf>,
}

impl BatchFile {
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
            source_path: None,
        }
    }

    pub fn from_path(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|o| o.to_str())
            .unwrap_or("")
            .to_string();
        let content_type = sniff_content_type(&data);
        let mut file = Self::from_bytes(name, content_type, data);
        file.source_path = Some(path.to_path_buf());
        Ok(file)
    }

    /// Byte length of the content; always in step with `bytes`.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type.eq_ignore_ascii_case(PDF_CONTENT_TYPE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Error => "error",
        }
    }
}

/// One file's progress through parse + extract, plus its editable results.
///
/// `original_extracted_data` is written only when an attempt succeeds and is
/// the baseline for [`reset`](Self::reset) and [`is_modified`](Self::is_modified).
#[derive(Debug, Clone)]
pub struct BatchFileRecord {
    file: BatchFile,
    status: FileStatus,
    extracted_data: FieldValues,
    original_extracted_data: Option<FieldValues>,
    error: Option<String>,
    parse_start_time: Option<DateTime<Utc>>,
    parse_end_time: Option<DateTime<Utc>>,
    parse_duration: Option<Duration>,
    attempt: u64,
    started: Option<Instant>,
}

impl BatchFileRecord {
    pub fn new(file: BatchFile) -> Self {
        Self {
            file,
            status: FileStatus::Pending,
            extracted_data: FieldValues::new(),
            original_extracted_data: None,
            error: None,
            parse_start_time: None,
            parse_end_time: None,
            parse_duration: None,
            attempt: 0,
            started: None,
        }
    }

    pub fn file(&self) -> &BatchFile {
        &self.file
    }

    pub fn preview(&self) -> Option<&Path> {
        self.file.source_path.as_deref()
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn extracted_data(&self) -> &FieldValues {
        &self.extracted_data
    }

    pub fn original_extracted_data(&self) -> Option<&FieldValues> {
        self.original_extracted_data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn parse_start_time(&self) -> Option<DateTime<Utc>> {
        self.parse_start_time
    }

    pub fn parse_end_time(&self) -> Option<DateTime<Utc>> {
        self.parse_end_time
    }

    pub fn parse_duration(&self) -> Option<Duration> {
        self.parse_duration
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Enter `processing` and return the new attempt number.
    pub(crate) fn begin_attempt(&mut self) -> u64 {
        self.attempt += 1;
        self.status = FileStatus::Processing;
        self.parse_start_time = Some(Utc::now());
        self.parse_end_time = None;
        self.parse_duration = None;
        self.started = Some(Instant::now());
        self.attempt
    }

    fn stamp_end(&mut self) {
        self.parse_end_time = Some(Utc::now());
        self.parse_duration = self.started.take().map(|s| s.elapsed());
    }

    /// Record a successful attempt. Ignored (returns false) for any attempt but the current one.
    pub(crate) fn complete(&mut self, attempt: u64, fields: &FieldValues) -> bool {
        if attempt != self.attempt || self.status != FileStatus::Processing {
            return false;
        }
        self.status = FileStatus::Completed;
        self.extracted_data = fields.clone();
        self.original_extracted_data = Some(fields.clone());
        self.error = None;
        self.stamp_end();
        true
    }

    /// Record a failed attempt; previously extracted data stays.
    pub(crate) fn fail(&mut self, attempt: u64, message: String) -> bool {
        if attempt != self.attempt || self.status != FileStatus::Processing {
            return false;
        }
        self.status = FileStatus::Error;
        self.error = Some(message);
        self.stamp_end();
        true
    }

    /// Overwrite one displayed value. The snapshot is not touched.
    /// Only values from a successful attempt can be edited; returns false otherwise.
    pub fn set_field(&mut self, name: &str, value: Value) -> bool {
        if self.original_extracted_data.is_none() || self.status == FileStatus::Processing {
            return false;
        }
        self.extracted_data.insert(name.to_string(), value);
        true
    }

    pub fn is_modified(&self) -> bool {
        match &self.original_extracted_data {
            Some(original) => &self.extracted_data != original,
            None => !self.extracted_data.is_empty(),
        }
    }

    /// Restore the displayed values from the snapshot. No-op unless completed with a snapshot.
    pub fn reset(&mut self) -> bool {
        if self.status != FileStatus::Completed {
            return false;
        }
        match &self.original_extracted_data {
            Some(original) => {
                self.extracted_data = original.clone();
                true
            }
            None => false,
        }
    }
}
