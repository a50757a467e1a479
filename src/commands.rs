use crate::batch::{BatchController, BatchFile, BatchFileRecord, BatchSummary, FileStatus};
use crate::config::Settings;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::extract::{Extractor, LandingAiClient};
use crate::fields::{default_user_fields, is_mandatory, FieldList};
use crate::types::{FieldConfiguration, FieldDefinition, FieldValues};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct AppState {
    pub settings: Settings,
    pub db: Db,
}

impl AppState {
    pub fn open(settings: Settings) -> Result<Self> {
        let db = Db::new(&settings.db_path)?;
        Ok(Self { settings, db })
    }
}

/// Where the API key in effect came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Flag,
    Stored,
    Environment,
    Missing,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::Flag => "flag",
            KeySource::Stored => "stored",
            KeySource::Environment => "environment",
            KeySource::Missing => "not_configured",
        }
    }
}

/// Flag, then stored credential, then environment.
pub fn resolve_api_key(state: &AppState, flag: Option<&str>) -> Result<(Option<String>, KeySource)> {
    if let Some(k) = flag.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok((Some(k.to_string()), KeySource::Flag));
    }
    if let Some(k) = state.db.get_api_key()? {
        return Ok((Some(k), KeySource::Stored));
    }
    match state.settings.api_key.clone() {
        Some(k) => Ok((Some(k), KeySource::Environment)),
        None => Ok((None, KeySource::Missing)),
    }
}

/// User fields for a run: explicit fields win, then the named configuration,
/// then the most recently used one, then the defaults. Returns the configuration id when one was used.
pub fn resolve_fields(
    db: &Db,
    config_name: Option<&str>,
    explicit: Vec<FieldDefinition>,
) -> Result<(FieldList, Option<i64>)> {
    if !explicit.is_empty() {
        return Ok((build_field_list(explicit)?, None));
    }
    let config = match config_name {
        Some(name) => Some(
            db.get_configuration_by_name(name)?
                .ok_or_else(|| Error::Configuration(format!("No configuration named '{}'.", name)))?,
        ),
        None => db.most_recently_used()?,
    };
    match config {
        Some(cfg) => {
            info!(configuration = %cfg.name, fields = cfg.fields.len(), "using saved configuration");
            Ok((FieldList::new(cfg.fields), Some(cfg.id)))
        }
        None => Ok((FieldList::new(default_user_fields()), None)),
    }
}

/// Validate user-supplied fields through the same rules as the form editor.
fn build_field_list(fields: Vec<FieldDefinition>) -> Result<FieldList> {
    let mut list = FieldList::default();
    for field in fields {
        if is_mandatory(&field.name) {
            warn!(field = %field.name, "mandatory field is always extracted; ignoring duplicate");
            continue;
        }
        list.add(field)?;
    }
    Ok(list)
}

pub fn load_files(paths: &[PathBuf]) -> Result<Vec<BatchFile>> {
    paths
        .iter()
        .map(|p| {
            BatchFile::from_path(p)
                .map_err(|e| Error::validation(format!("Could not read {}: {}", p.display(), e)))
        })
        .collect()
}

/// Queue `files` and process them all against `fields`.
pub async fn run_batch(
    extractor: Arc<dyn Extractor>,
    fields: FieldList,
    files: Vec<BatchFile>,
    timeout: Duration,
) -> Result<(BatchController, BatchSummary)> {
    let mut controller = BatchController::new(extractor, fields).with_timeout(timeout);
    controller.add_files(files)?;
    let summary = controller.process_all().await;
    Ok((controller, summary))
}

pub struct ExtractOptions {
    pub files: Vec<PathBuf>,
    pub config: Option<String>,
    pub fields: Vec<FieldDefinition>,
    pub api_key: Option<String>,
}

pub struct ExtractionReport {
    pub controller: BatchController,
    pub summary: BatchSummary,
    pub configuration_id: Option<i64>,
}

pub async fn run_extraction(state: &AppState, opts: ExtractOptions) -> Result<ExtractionReport> {
    if opts.files.is_empty() {
        return Err(Error::validation("Please select a PDF file first"));
    }
    let (api_key, source) = resolve_api_key(state, opts.api_key.as_deref())?;
    info!(source = source.as_str(), "api key resolved");
    let settings = state.settings.clone().with_api_key(api_key);
    let client = LandingAiClient::new(&settings)?;

    let (fields, configuration_id) = resolve_fields(&state.db, opts.config.as_deref(), opts.fields)?;
    let files = load_files(&opts.files)?;
    let (controller, summary) =
        run_batch(Arc::new(client), fields, files, settings.request_timeout).await?;

    if let Some(id) = configuration_id {
        state.db.mark_configuration_as_used(id)?;
    }
    Ok(ExtractionReport {
        controller,
        summary,
        configuration_id,
    })
}

/// Per-file outcome as printed by `--json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordReport {
    pub filename: String,
    pub file_size_bytes: u64,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_duration_ms: Option<u64>,
    pub extracted_data: FieldValues,
}

impl From<&BatchFileRecord> for RecordReport {
    fn from(r: &BatchFileRecord) -> Self {
        Self {
            filename: r.file().name.clone(),
            file_size_bytes: r.file().size(),
            status: r.status(),
            error: r.error().map(String::from),
            parsed_at: r
                .parse_end_time()
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            parse_duration_ms: r.parse_duration().map(|d| d.as_millis() as u64),
            extracted_data: r.extracted_data().clone(),
        }
    }
}

pub fn record_reports(records: &[BatchFileRecord]) -> Vec<RecordReport> {
    records.iter().map(RecordReport::from).collect()
}

pub fn list_configurations(db: &Db) -> Result<Vec<FieldConfiguration>> {
    db.get_all_configurations()
}

pub fn show_configuration(db: &Db, name: &str) -> Result<FieldConfiguration> {
    db.get_configuration_by_name(name)?
        .ok_or_else(|| Error::Configuration(format!("No configuration named '{}'.", name)))
}

pub fn save_configuration(db: &Db, name: &str, fields: Vec<FieldDefinition>) -> Result<i64> {
    let list = build_field_list(fields)?;
    if list.is_empty() {
        return Err(Error::validation("At least one field is required."));
    }
    let id = db.save_configuration(name, list.as_slice())?;
    info!(id, name, fields = list.len(), "configuration saved");
    Ok(id)
}

pub fn delete_configuration(db: &Db, name: &str) -> Result<()> {
    let cfg = show_configuration(db, name)?;
    db.delete_configuration(cfg.id)?;
    info!(id = cfg.id, name, "configuration deleted");
    Ok(())
}

/// Make `name` the configuration picked up by default on the next run.
pub fn use_configuration(db: &Db, name: &str) -> Result<FieldConfiguration> {
    let cfg = show_configuration(db, name)?;
    db.mark_configuration_as_used(cfg.id)?;
    Ok(cfg)
}

pub fn set_api_key(db: &Db, key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::validation("API key is required"));
    }
    db.set_api_key(key)
}

pub fn clear_api_key(db: &Db) -> Result<()> {
    db.clear_api_key()
}

pub fn api_key_status(state: &AppState) -> Result<KeySource> {
    resolve_api_key(state, None).map(|(_, source)| source)
}
