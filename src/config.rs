use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::tasks::TaskQueueConfig;

/// Application-level constants
pub const APP_NAME: &str = "docia";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "docia=info,tower_http=info"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Cannot determine a data directory, set DATA_DIR")]
    NoDataDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_temperature: f32,
    pub ollama_url: String,
    pub ollama_model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub languages: String,
    pub tesseract_cmd: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub worker_concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub progress_retention_secs: u64,
}

impl TaskSettings {
    pub fn queue_config(&self) -> TaskQueueConfig {
        TaskQueueConfig {
            concurrency: self.worker_concurrency,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
        }
    }

    pub fn progress_retention(&self) -> Duration {
        Duration::from_secs(self.progress_retention_secs)
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub bind_addr: SocketAddr,
    /// `["*"]` allows any origin.
    pub allowed_origins: Vec<String>,
    pub max_upload_size_mb: usize,
    pub max_upload_files: usize,
}

impl HttpSettings {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Service configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub data_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub database_path: PathBuf,
    pub http: HttpSettings,
    pub ocr: OcrSettings,
    pub llm: LlmSettings,
    pub tasks: TaskSettings,
}

impl Settings {
    /// Read settings from the process environment. Call `dotenvy::dotenv()`
    /// first for `.env` support.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let data_dir = match get("DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|d| d.join(APP_NAME))
                .ok_or(ConfigError::NoDataDir)?,
        };
        let uploads_dir = get("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("uploads"));
        let database_path = get("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("docia.db"));

        let http = HttpSettings {
            bind_addr: parsed(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?,
            allowed_origins: text("ALLOWED_ORIGINS", "*")
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            max_upload_size_mb: positive(&get, "MAX_UPLOAD_SIZE_MB", 50)?,
            max_upload_files: positive(&get, "MAX_UPLOAD_FILES", 10)?,
        };

        let ocr = OcrSettings {
            languages: text("OCR_LANGUAGES", "fra+eng"),
            tesseract_cmd: text("TESSERACT_CMD", "tesseract"),
            timeout_secs: positive(&get, "OCR_TIMEOUT_SECS", 120)?,
        };

        let llm = LlmSettings {
            provider: parsed(&get, "LLM_PROVIDER", LlmProvider::Gemini)?,
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: text("GEMINI_MODEL", "gemini-pro"),
            gemini_temperature: parsed(&get, "GEMINI_TEMPERATURE", 0.1)?,
            ollama_url: text("OLLAMA_URL", "http://localhost:11434"),
            ollama_model: text("OLLAMA_MODEL", "llama3"),
            timeout_secs: positive(&get, "LLM_TIMEOUT_SECS", 120)?,
        };

        let tasks = TaskSettings {
            worker_concurrency: positive(&get, "WORKER_CONCURRENCY", 2)?,
            max_retries: parsed(&get, "TASK_MAX_RETRIES", 3)?,
            retry_backoff_secs: parsed(&get, "TASK_RETRY_BACKOFF_SECS", 60)?,
            progress_retention_secs: positive(&get, "PROGRESS_RETENTION_SECS", 3600)?,
        };

        Ok(Self {
            app_name: text("APP_NAME", APP_NAME),
            data_dir,
            uploads_dir,
            database_path,
            http,
            ocr,
            llm,
            tasks,
        })
    }
}

fn parsed<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn positive<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + Copy,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let value = parsed(get, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: get(key).unwrap_or_default(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}
