use std::sync::Arc;
use std::sync::atomic::Ordering;

use lumen_worker::config::{StorageConfig, WorkerConfig};
use lumen_worker::extract::DocumentExtractor;
use lumen_worker::llm::create_provider;
use lumen_worker::logging;
use lumen_worker::pipeline::{ChatPipeline, ContentPipeline};
use lumen_worker::storage::create_blob_store;
use lumen_worker::store::{Database, LibSqlBackend};
use lumen_worker::worker::{Scheduler, spawn_scheduler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export GEMINI_API_KEY=... (or LUMEN_LLM_BACKEND=ollama)");
        std::process::exit(1);
    });

    let _log_guard = logging::init(config.log_dir.as_deref());

    eprintln!("📚 Lumen worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({:?})", config.llm.model, config.llm.backend);
    match &config.storage {
        StorageConfig::Supabase { url, bucket, .. } => {
            eprintln!("   Storage: {}/{}", url, bucket)
        }
        StorageConfig::Local { root } => eprintln!("   Storage: {}", root.display()),
    }
    eprintln!("   Tick: every {}s", config.tick_interval.as_secs_f64());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Collaborators ────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let blobs = create_blob_store(&config.storage)?;
    let extractor = Arc::new(DocumentExtractor::new());

    if !llm.supports_media() {
        eprintln!("   Note: {} cannot process audio; audio lectures will fail", llm.model_name());
    }

    // ── Pipelines ────────────────────────────────────────────────────────
    let ingest = Arc::new(ContentPipeline::new(
        Arc::clone(&db),
        blobs,
        llm.clone(),
        extractor,
        config.ingest.clone(),
    ));
    let chat = Arc::new(ChatPipeline::new(
        Arc::clone(&db),
        llm,
        config.chat.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(ingest, chat));

    let (handle, shutdown) = spawn_scheduler(scheduler, config.tick_interval);
    eprintln!("   Press Ctrl-C to stop.\n");

    tokio::signal::ctrl_c().await?;
    eprintln!("\nShutting down after the current tick...");
    shutdown.store(true, Ordering::Relaxed);
    handle.await?;

    Ok(())
}
