pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod storage;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::api::{build_router, cors_layer, start_server, ApiContext, UploadLimits};
use crate::config::{ConfigError, LlmProvider, LlmSettings, Settings};
use crate::db::{Database, DatabaseError};
use crate::pipeline::extraction::{
    DocumentTextReader, ExtractionError, OcrAdapter, PdfiumReader, TesseractEngine,
};
use crate::pipeline::processor::ExtractionOrchestrator;
use crate::pipeline::structuring::{
    GeminiClient, LlmClient, OllamaClient, StructuredExtractor, StructuringError,
};
use crate::pipeline::tasks::{DocumentTaskRunner, InMemoryProgressStore, TaskQueue};
use crate::storage::{StorageError, UploadStorage};

/// How often expired progress entries are purged.
const PROGRESS_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Upload storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("PDF engine unavailable: {0}")]
    Pdf(#[from] ExtractionError),

    #[error("Model client error: {0}")]
    Llm(#[from] StructuringError),

    #[error("Cannot start runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

pub fn run() -> Result<(), StartupError> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(
        app = %settings.app_name,
        version = config::APP_VERSION,
        data_dir = %settings.data_dir.display(),
        "Starting"
    );

    // Blocking HTTP clients are built, and finally dropped, outside the runtime.
    let llm = build_llm_client(&settings.llm)?;
    let pdf = Arc::new(PdfiumReader::new()?);
    let ocr = OcrAdapter::new(
        Box::new(TesseractEngine::new(
            &settings.ocr.tesseract_cmd,
            Duration::from_secs(settings.ocr.timeout_secs),
        )),
        &settings.ocr.languages,
    );
    let orchestrator = ExtractionOrchestrator::new(
        DocumentTextReader::new(pdf, ocr),
        StructuredExtractor::new(llm),
    );

    let db = Database::open(&settings.database_path)?;
    let storage = UploadStorage::new(&settings.uploads_dir)?;
    let progress = Arc::new(InMemoryProgressStore::new(settings.tasks.progress_retention()));
    let runner = Arc::new(DocumentTaskRunner::new(
        db.clone(),
        orchestrator,
        progress.clone(),
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;
    let result = runtime.block_on(serve(&settings, db, storage, progress, Arc::clone(&runner)));
    drop(runtime);
    drop(runner);

    tracing::info!("Stopped");
    result
}

fn build_llm_client(
    settings: &LlmSettings,
) -> Result<Box<dyn LlmClient + Send + Sync>, StructuringError> {
    match settings.provider {
        LlmProvider::Gemini => {
            let api_key = settings.gemini_api_key.clone().unwrap_or_else(|| {
                tracing::warn!("GEMINI_API_KEY is not set, extractions will fall back to empty payloads");
                String::new()
            });
            tracing::info!(model = %settings.gemini_model, "Using Gemini");
            Ok(Box::new(GeminiClient::new(
                &api_key,
                &settings.gemini_model,
                settings.gemini_temperature,
                settings.timeout_secs,
            )?))
        }
        LlmProvider::Ollama => {
            tracing::info!(url = %settings.ollama_url, model = %settings.ollama_model, "Using Ollama");
            Ok(Box::new(OllamaClient::new(
                &settings.ollama_url,
                &settings.ollama_model,
                settings.timeout_secs,
            )?))
        }
    }
}

/// Start the queue, the progress sweeper and the HTTP server, then wait for
/// a shutdown signal and stop them in reverse order.
async fn serve(
    settings: &Settings,
    db: Database,
    storage: UploadStorage,
    progress: Arc<InMemoryProgressStore>,
    runner: Arc<DocumentTaskRunner>,
) -> Result<(), StartupError> {
    let cancel = CancellationToken::new();
    let sweeper = Arc::clone(&progress).spawn_sweeper(PROGRESS_SWEEP_INTERVAL, cancel.clone());
    let queue = Arc::new(TaskQueue::start(
        runner,
        progress.clone(),
        settings.tasks.queue_config(),
    ));

    let ctx = ApiContext {
        db,
        storage,
        queue: Arc::clone(&queue),
        progress,
        limits: UploadLimits {
            max_files: settings.http.max_upload_files,
            max_file_bytes: settings.http.max_upload_bytes(),
        },
    };
    let app = build_router(ctx, cors_layer(&settings.http.allowed_origins));

    let addr = settings.http.bind_addr;
    let result = match start_server(addr, app).await {
        Ok(mut server) => {
            api::server::shutdown_signal().await;
            server.shutdown().await;
            Ok(())
        }
        Err(source) => Err(StartupError::Bind { addr, source }),
    };

    queue.shutdown().await;
    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Progress sweeper ended abnormally");
    }
    result
}
