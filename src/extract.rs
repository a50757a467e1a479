use crate::batch::BatchFile;
use crate::config::Settings;
use crate::error::{Error, ExtractionError, Stage};
use crate::models::ExtractionSchema;
use crate::types::FieldValues;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

/// Keys the parse endpoint has been seen to put the document text under, in probe order.
const PARSE_TEXT_KEYS: &[&str] = &["text", "content"];
/// Keys the extract endpoint has been seen to put field values under, in probe order.
const EXTRACT_FIELD_KEYS: &[&str] = &["extraction", "data", "fields"];

/// Turns one document into field values for a schema.
///
/// The controller only talks to this trait so tests and alternative
/// backends can stand in for the remote service.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_fields(
        &self,
        file: &BatchFile,
        schema: &ExtractionSchema,
    ) -> Result<FieldValues, ExtractionError>;
}

/// First key whose value is present and not null.
///
/// The remote API has shipped several response shapes over time; this
/// lookup is the compatibility shim that accepts all of them.
pub fn probe_keys<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| body.get(*k))
        .find(|v| !v.is_null())
}

/// Document text from a parse response: the first non-empty string under
/// a known key, otherwise the whole body serialized.
pub fn parsed_text(body: &Value) -> String {
    PARSE_TEXT_KEYS
        .iter()
        .filter_map(|k| body.get(*k).and_then(|v| v.as_str()))
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

/// Field values from an extract response: the first present known key,
/// otherwise the raw body. Must be a JSON object.
pub fn extracted_fields(body: Value) -> Result<FieldValues, ExtractionError> {
    let chosen = match probe_keys(&body, EXTRACT_FIELD_KEYS) {
        Some(v) => v.clone(),
        None => body,
    };
    match chosen {
        Value::Object(map) => Ok(map),
        other => Err(ExtractionError::InvalidResponse {
            stage: Stage::Extract,
            message: format!("expected an object of fields, got {}", other),
        }),
    }
}

fn transport_error(stage: Stage, e: reqwest::Error) -> ExtractionError {
    let message = if e.is_connect() || e.is_timeout() {
        "Check your internet connection and try again.".to_string()
    } else {
        format!("Network error: {}", e)
    };
    ExtractionError::Transport { stage, message }
}

/// Error body text; a body that could not be read is reported as such rather than as empty.
fn error_body<E: std::fmt::Display>(read: Result<String, E>) -> String {
    read.unwrap_or_else(|e| format!("<could not read response body: {}>", e))
}

/// Reads a non-success response body verbatim for the error, or the JSON body on success.
async fn read_json(stage: Stage, response: Response) -> Result<Value, ExtractionError> {
    let status = response.status();
    if !status.is_success() {
        let body = error_body(response.text().await);
        let status = status.as_u16();
        return Err(match stage {
            Stage::Parse => ExtractionError::Parse { status, body },
            Stage::Extract => ExtractionError::Extract { status, body },
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| ExtractionError::InvalidResponse {
            stage,
            message: format!("Invalid JSON: {}", e),
        })
}

/// Client for the hosted parse + extract API.
#[derive(Debug, Clone)]
pub struct LandingAiClient {
    http: Client,
    api_key: Option<String>,
    parse_url: String,
    extract_url: String,
    parse_model: String,
    extract_model: Option<String>,
}

impl LandingAiClient {
    pub fn new(settings: &Settings) -> Result<Self, Error> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Could not build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key: settings.api_key.clone(),
            parse_url: settings.parse_url.clone(),
            extract_url: settings.extract_url.clone(),
            parse_model: settings.parse_model.clone(),
            extract_model: settings.extract_model.clone(),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    fn api_key(&self) -> Result<&str, ExtractionError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ExtractionError::MissingApiKey)
    }

    /// Step 1: PDF bytes -> document text.
    pub async fn parse(&self, file: &BatchFile) -> Result<String, ExtractionError> {
        let key = self.api_key()?;
        let document = Part::stream_with_length(file.bytes.clone(), file.size())
            .file_name(file.name.clone())
            .mime_str(&file.content_type)
            .map_err(|e| transport_error(Stage::Parse, e))?;
        let form = Form::new()
            .part("document", document)
            .text("model", self.parse_model.clone());

        let started = Instant::now();
        let response = self
            .http
            .post(&self.parse_url)
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(Stage::Parse, e))?;
        let body = read_json(Stage::Parse, response).await?;
        let text = parsed_text(&body);
        debug!(
            file = %file.name,
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "parse response"
        );
        Ok(text)
    }

    /// Step 2: document text + schema -> field values.
    pub async fn extract(
        &self,
        markdown: &str,
        schema: &ExtractionSchema,
    ) -> Result<FieldValues, ExtractionError> {
        let key = self.api_key()?;
        let schema_json = schema
            .to_json_string()
            .map_err(|e| ExtractionError::InvalidResponse {
                stage: Stage::Extract,
                message: format!("Could not serialize schema: {}", e),
            })?;
        let markdown_part = Part::text(markdown.to_string())
            .file_name("document.md")
            .mime_str("text/markdown")
            .map_err(|e| transport_error(Stage::Extract, e))?;
        let mut form = Form::new()
            .part("markdown", markdown_part)
            .text("schema", schema_json);
        if let Some(model) = &self.extract_model {
            form = form.text("model", model.clone());
        }

        let started = Instant::now();
        let response = self
            .http
            .post(&self.extract_url)
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(Stage::Extract, e))?;
        let body = read_json(Stage::Extract, response).await?;
        debug!(
            fields = schema.required.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extract response"
        );
        extracted_fields(body)
    }
}

#[async_trait]
impl Extractor for LandingAiClient {
    async fn extract_fields(
        &self,
        file: &BatchFile,
        schema: &ExtractionSchema,
    ) -> Result<FieldValues, ExtractionError> {
        // Fail before the first request rather than between the two.
        self.api_key()?;
        let text = self.parse(file).await?;
        let fields = self.extract(&text, schema).await?;
        info!(file = %file.name, fields = fields.len(), "extraction finished");
        Ok(fields)
    }
}
