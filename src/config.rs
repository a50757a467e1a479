//! Runtime settings read from the environment (and `.env` files).
//!
//! | Variable | Default |
//! |---|---|
//! | `LANDING_AI_API_KEY` | unset |
//! | `PDF_EXTRACTOR_PARSE_URL` | `https://api.va.landing.ai/v1/ade/parse` |
//! | `PDF_EXTRACTOR_EXTRACT_URL` | `https://api.va.landing.ai/v1/ade/extract` |
//! | `PDF_EXTRACTOR_PARSE_MODEL` | `dpt-2-latest` |
//! | `PDF_EXTRACTOR_EXTRACT_MODEL` | `extract-latest` |
//! | `PDF_EXTRACTOR_TIMEOUT_SECS` | `120` |
//! | `PDF_EXTRACTOR_DB` | `<app data dir>/pdf_extractor.db` |

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PARSE_URL: &str = "https://api.va.landing.ai/v1/ade/parse";
pub const DEFAULT_EXTRACT_URL: &str = "https://api.va.landing.ai/v1/ade/extract";
pub const DEFAULT_PARSE_MODEL: &str = "dpt-2-latest";
pub const DEFAULT_EXTRACT_MODEL: &str = "extract-latest";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const APP_DIR_NAME: &str = "pdf-extractor";
const DB_FILE_NAME: &str = "pdf_extractor.db";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub parse_url: String,
    pub extract_url: String,
    pub parse_model: String,
    /// `None` leaves model selection to the service.
    pub extract_model: Option<String>,
    pub request_timeout: Duration,
    pub db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            parse_url: DEFAULT_PARSE_URL.to_string(),
            extract_url: DEFAULT_EXTRACT_URL.to_string(),
            parse_model: DEFAULT_PARSE_MODEL.to_string(),
            extract_model: Some(DEFAULT_EXTRACT_MODEL.to_string()),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            db_path: app_data_dir().join(DB_FILE_NAME),
        }
    }
}

/// Per-user data directory; falls back to the working directory when the platform has none.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Load `.env` from the working directory, then from the app data dir so
/// installed users can keep credentials next to the database.
pub fn load_env() {
    let _ = dotenvy::dotenv();
    let env_path = app_data_dir().join(".env");
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Settings {
    pub fn from_env() -> Self {
        load_env();
        Self::from_lookup(non_empty_var)
    }

    /// Build from an arbitrary key lookup; unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let request_timeout = lookup("PDF_EXTRACTOR_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        Self {
            api_key: lookup("LANDING_AI_API_KEY"),
            parse_url: lookup("PDF_EXTRACTOR_PARSE_URL").unwrap_or(defaults.parse_url),
            extract_url: lookup("PDF_EXTRACTOR_EXTRACT_URL").unwrap_or(defaults.extract_url),
            parse_model: lookup("PDF_EXTRACTOR_PARSE_MODEL").unwrap_or(defaults.parse_model),
            extract_model: lookup("PDF_EXTRACTOR_EXTRACT_MODEL").or(defaults.extract_model),
            request_timeout,
            db_path: lookup("PDF_EXTRACTOR_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        if let Some(k) = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
            self.api_key = Some(k);
        }
        self
    }

    pub fn with_db_path(mut self, path: impl AsRef<Path>) -> Self {
        self.db_path = path.as_ref().to_path_buf();
        self
    }
}
