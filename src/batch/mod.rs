//! Batch extraction controller: queued files, per-file status, single and bulk processing.
//!
//! All record mutation goes through `&mut self`, so there is exactly one
//! writer. `process_all` polls every attempt concurrently on the caller's
//! task and applies each completion to its own slot of the live record
//! list the moment it arrives.

mod record;

pub use record::{sniff_content_type, BatchFile, BatchFileRecord, FileStatus, PDF_CONTENT_TYPE};

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::error::{Error, ExtractionError, Result};
use crate::extract::Extractor;
use crate::fields::FieldList;
use crate::models::ExtractionSchema;
use crate::types::{FieldDefinition, FieldValues};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Emitted on every status transition of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEvent {
    pub index: usize,
    pub status: FileStatus,
}

/// Outcome counts of one `process_all` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

type AttemptOutcome = std::result::Result<FieldValues, ExtractionError>;

/// One parse + extract attempt, bounded by `limit`.
async fn run_attempt(
    extractor: Arc<dyn Extractor>,
    file: BatchFile,
    schema: Arc<ExtractionSchema>,
    limit: Duration,
) -> AttemptOutcome {
    match tokio::time::timeout(limit, extractor.extract_fields(&file, &schema)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ExtractionError::Timeout(limit)),
    }
}

fn emit(events: &broadcast::Sender<BatchEvent>, index: usize, status: FileStatus) {
    // No subscribers is fine.
    let _ = events.send(BatchEvent { index, status });
}

/// Attempts started on the live records and not yet settled.
///
/// Dropping it with attempts still outstanding (the caller dropped the
/// processing future) fails those attempts as cancelled, so no record is
/// left `processing`.
struct InFlight<'a> {
    records: &'a mut Vec<BatchFileRecord>,
    events: &'a broadcast::Sender<BatchEvent>,
    outstanding: Vec<(usize, u64)>,
}

impl<'a> InFlight<'a> {
    fn new(
        records: &'a mut Vec<BatchFileRecord>,
        events: &'a broadcast::Sender<BatchEvent>,
        outstanding: Vec<(usize, u64)>,
    ) -> Self {
        Self {
            records,
            events,
            outstanding,
        }
    }

    /// Apply an attempt's outcome to the record as it stands now.
    fn settle(&mut self, index: usize, attempt: u64, outcome: &AttemptOutcome) -> Option<FileStatus> {
        self.outstanding.retain(|&(i, a)| (i, a) != (index, attempt));
        let record = self.records.get_mut(index)?;
        let applied = match outcome {
            Ok(fields) => record.complete(attempt, fields),
            Err(e) => record.fail(attempt, e.to_string()),
        };
        if !applied {
            debug!(index, attempt, "discarding outcome of superseded attempt");
            return None;
        }
        let status = record.status();
        let duration_ms = record.parse_duration().map(|d| d.as_millis() as u64);
        match outcome {
            Ok(fields) => info!(index, file = %record.file().name, fields = fields.len(), ?duration_ms, "file completed"),
            Err(e) => warn!(index, file = %record.file().name, error = %e, "file failed"),
        }
        emit(self.events, index, status);
        Some(status)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        for (index, attempt) in std::mem::take(&mut self.outstanding) {
            if let Some(record) = self.records.get_mut(index) {
                if record.fail(attempt, ExtractionError::Cancelled.to_string()) {
                    warn!(index, attempt, file = %record.file().name, "attempt cancelled");
                    emit(self.events, index, FileStatus::Error);
                }
            }
        }
    }
}

pub struct BatchController {
    extractor: Arc<dyn Extractor>,
    fields: FieldList,
    records: Vec<BatchFileRecord>,
    selected: Option<usize>,
    attempt_timeout: Duration,
    events: broadcast::Sender<BatchEvent>,
}

impl BatchController {
    pub fn new(extractor: Arc<dyn Extractor>, fields: FieldList) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            extractor,
            fields,
            records: Vec::new(),
            selected: None,
            attempt_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            events,
        }
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = limit;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    pub fn user_fields(&self) -> &FieldList {
        &self.fields
    }

    pub fn set_user_fields(&mut self, fields: FieldList) {
        self.fields = fields;
    }

    /// Mandatory then user fields: the order used for the schema and for export columns.
    pub fn all_fields(&self) -> Vec<FieldDefinition> {
        self.fields.with_mandatory()
    }

    pub fn schema(&self) -> ExtractionSchema {
        ExtractionSchema::build(&self.all_fields())
    }

    pub fn records(&self) -> &[BatchFileRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&BatchFileRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Queue the PDF files among `files` as pending records, in order.
    /// Fails without touching the batch when none of them is a PDF.
    pub fn add_files(&mut self, files: Vec<BatchFile>) -> Result<usize> {
        let (pdfs, rejected): (Vec<BatchFile>, Vec<BatchFile>) =
            files.into_iter().partition(BatchFile::is_pdf);
        for f in &rejected {
            warn!(file = %f.name, content_type = %f.content_type, "skipping non-PDF file");
        }
        if pdfs.is_empty() {
            return Err(Error::validation("Please select a valid PDF file"));
        }
        let added = pdfs.len();
        for file in pdfs {
            debug!(file = %file.name, size = file.size(), "queued");
            self.records.push(BatchFileRecord::new(file));
        }
        info!(added, total = self.records.len(), "files added to batch");
        Ok(added)
    }

    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.records.len() {
            return Err(Error::validation(format!("No file at index {}.", index)));
        }
        self.selected = Some(index);
        Ok(())
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_record(&self) -> Option<&BatchFileRecord> {
        self.selected.and_then(|i| self.records.get(i))
    }

    /// Drop every record and the selection.
    pub fn clear(&mut self) {
        self.records.clear();
        self.selected = None;
    }

    /// Move a record into `processing`; returns its attempt number and a cheap handle on the file.
    /// A record left `processing` by an abandoned attempt simply starts a newer one.
    fn begin(&mut self, index: usize) -> Result<(u64, BatchFile)> {
        let record = self
            .records
            .get_mut(index)
            .ok_or_else(|| Error::validation(format!("No file at index {}.", index)))?;
        let attempt = record.begin_attempt();
        let file = record.file().clone();
        info!(index, file = %file.name, attempt, "processing file");
        emit(&self.events, index, FileStatus::Processing);
        Ok((attempt, file))
    }

    /// Process one record. The failure is recorded on the record and also returned.
    pub async fn process_one(&mut self, index: usize) -> Result<()> {
        let (attempt, file) = self.begin(index)?;
        let schema = Arc::new(self.schema());
        let extractor = Arc::clone(&self.extractor);
        let limit = self.attempt_timeout;

        let mut in_flight = InFlight::new(&mut self.records, &self.events, vec![(index, attempt)]);
        let outcome = run_attempt(extractor, file, schema, limit).await;
        in_flight.settle(index, attempt, &outcome);
        outcome.map(|_| ()).map_err(Error::from)
    }

    pub async fn process_selected(&mut self) -> Result<()> {
        let index = self
            .selected
            .ok_or_else(|| Error::validation("Please select a PDF file first"))?;
        self.process_one(index).await
    }

    /// Dispatch every record at once and wait for all of them to settle.
    /// One record failing never cancels or delays another.
    pub async fn process_all(&mut self) -> BatchSummary {
        let schema = Arc::new(self.schema());
        let mut started = Vec::with_capacity(self.records.len());
        let mut attempts = FuturesUnordered::new();
        for index in 0..self.records.len() {
            let (attempt, file) = match self.begin(index) {
                Ok(begun) => begun,
                Err(e) => {
                    warn!(index, error = %e, "not dispatched");
                    continue;
                }
            };
            started.push((index, attempt));
            let extractor = Arc::clone(&self.extractor);
            let schema = Arc::clone(&schema);
            let limit = self.attempt_timeout;
            attempts.push(async move {
                let outcome = run_attempt(extractor, file, schema, limit).await;
                (index, attempt, outcome)
            });
        }
        info!(dispatched = attempts.len(), "batch dispatched");

        let mut in_flight = InFlight::new(&mut self.records, &self.events, started);
        let mut summary = BatchSummary::default();
        while let Some((index, attempt, outcome)) = attempts.next().await {
            match in_flight.settle(index, attempt, &outcome) {
                Some(FileStatus::Completed) => summary.completed += 1,
                Some(_) => summary.failed += 1,
                None => {}
            }
        }
        info!(completed = summary.completed, failed = summary.failed, "batch settled");
        summary
    }

    /// Restore a completed record's values from its snapshot. Returns whether anything was restored.
    pub fn reset_one(&mut self, index: usize) -> bool {
        self.records.get_mut(index).map(|r| r.reset()).unwrap_or(false)
    }

    pub fn set_field(&mut self, index: usize, name: &str, value: Value) -> Result<()> {
        let record = self
            .records
            .get_mut(index)
            .ok_or_else(|| Error::validation(format!("No file at index {}.", index)))?;
        if !record.set_field(name, value) {
            return Err(Error::validation(format!(
                "{} has no extracted data to edit.",
                record.file().name
            )));
        }
        Ok(())
    }

    pub fn is_modified(&self, index: usize) -> bool {
        self.records.get(index).is_some_and(BatchFileRecord::is_modified)
    }
}
