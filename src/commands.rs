use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::Result;
use crate::config::Config;
use crate::embeddings::Embedder;
use crate::embeddings::ollama::OllamaEmbedder;
use crate::embeddings::pool::EmbeddingPool;
use crate::generation::GenerationClient;
use crate::indexer::Indexer;
use crate::metrics::MetricsRecorder;
use crate::query::QueryEngine;
use crate::store::VectorStore;

/// Shared collaborators for one command invocation.
struct App {
    config: Config,
    pool: Arc<EmbeddingPool>,
    store: Arc<VectorStore>,
    metrics: Arc<MetricsRecorder>,
}

async fn build_app() -> Result<App> {
    let base_dir = Config::default_base_dir()?;
    let config = Config::load(&base_dir)?;
    let dimensions = config.ollama.embedding_dimension as usize;

    let ollama = config.ollama.clone();
    let pool = Arc::new(EmbeddingPool::new(
        dimensions,
        Arc::new(move || Ok(Box::new(OllamaEmbedder::new(&ollama)?) as Box<dyn Embedder>)),
    ));
    let store = Arc::new(VectorStore::open(&config.vector_store_path(), dimensions).await?);

    Ok(App {
        config,
        pool,
        store,
        metrics: Arc::new(MetricsRecorder::new()),
    })
}

/// Index the given files, replacing earlier records for each path.
#[inline]
pub async fn index_paths(paths: Vec<PathBuf>) -> Result<()> {
    let app = build_app().await?;
    let indexer = Indexer::new(
        Arc::clone(&app.pool),
        Arc::clone(&app.store),
        &app.config,
        Arc::clone(&app.metrics),
    );

    let outcomes = indexer.index_files(&paths).await;

    let mut total_chunks = 0;
    let mut failures = 0;
    for outcome in &outcomes {
        if outcome.success {
            total_chunks += outcome.chunks_created;
            println!("  indexed {} ({} chunks)", outcome.file_path, outcome.chunks_created);
        } else {
            failures += 1;
            println!(
                "  FAILED  {}: {}",
                outcome.file_path,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!(
        "Indexed {} of {} files, {} chunks total.",
        outcomes.len() - failures,
        outcomes.len(),
        total_chunks
    );

    for summary in app.metrics.snapshot() {
        info!(
            op = summary.operation.name(),
            count = summary.count,
            mean = ?summary.mean,
            p95 = ?summary.p95,
            "operation latency"
        );
    }

    Ok(())
}

/// Answer a question from the index, streaming the response.
#[inline]
pub async fn ask(question: &str) -> Result<()> {
    let app = build_app().await?;
    let generation = GenerationClient::new(&app.config.ollama)?;
    let engine = QueryEngine::new(
        Arc::clone(&app.pool),
        Arc::clone(&app.store),
        generation,
        &app.config,
        Arc::clone(&app.metrics),
    );

    let mut answer = engine.ask_stream(question).await?;
    let mut stdout = std::io::stdout();
    while let Some(fragment) = answer.receiver.recv().await {
        print!("{}", fragment?);
        stdout.flush()?;
    }
    println!();

    if !answer.sources.is_empty() {
        println!("\nSources:");
        for source in &answer.sources {
            println!("  {source}");
        }
    }

    Ok(())
}

/// Print index statistics.
#[inline]
pub async fn show_stats() -> Result<()> {
    let app = build_app().await?;
    let stats = app.store.stats().await?;

    println!("Index statistics:");
    println!("  Files:      {}", stats.total_files);
    println!("  Chunks:     {}", stats.total_chunks);
    println!("  Tokens:     ~{}", stats.total_tokens);
    println!("  Disk usage: {} bytes", stats.disk_size_bytes);
    match stats.last_indexed {
        Some(timestamp) => println!("  Last index: {timestamp}"),
        None => println!("  Last index: never"),
    }

    Ok(())
}

/// Remove all records for one file path.
#[inline]
pub async fn delete_path(path: &str) -> Result<()> {
    let app = build_app().await?;
    let removed = app.store.delete_file(path).await?;
    if removed == 0 {
        println!("No records found for {path}");
    } else {
        println!("Removed {removed} chunks for {path}");
    }
    Ok(())
}

/// Drop every record in the index.
#[inline]
pub async fn clear_index() -> Result<()> {
    let app = build_app().await?;
    app.store.clear().await?;
    println!("Index cleared.");
    Ok(())
}

/// Connectivity diagnostics against the configured Ollama server.
#[inline]
pub async fn show_status() -> Result<()> {
    let base_dir = Config::default_base_dir()?;
    let config = Config::load(&base_dir)?;
    let endpoint = config
        .ollama
        .endpoint_url()
        .context("Failed to build Ollama URL from config")?;
    let client = GenerationClient::new(&config.ollama)?;

    println!("Ollama endpoint: {endpoint}");

    let (reachable, models) = tokio::task::spawn_blocking(move || {
        let reachable = client.check_connection();
        let models = if reachable {
            client.list_models()
        } else {
            Vec::new()
        };
        (reachable, models)
    })
    .await
    .map_err(|error| crate::SemdexError::Generation(format!("Status probe: {error}")))?;

    if !reachable {
        println!("Server: unreachable");
        return Ok(());
    }
    println!("Server: reachable");

    for (label, model) in [
        ("Embedding model", &config.ollama.embedding_model),
        ("Generation model", &config.ollama.generation_model),
    ] {
        let available = models
            .iter()
            .any(|name| name == model || name.split(':').next() == Some(model.as_str()));
        println!(
            "{label}: {model} ({})",
            if available { "available" } else { "NOT INSTALLED" }
        );
    }

    Ok(())
}

/// Write the active configuration to disk, creating the file with defaults
/// when absent.
#[inline]
pub async fn init_config() -> Result<()> {
    let base_dir = Config::default_base_dir()?;
    let config = Config::load(&base_dir)?;
    config.save()?;

    println!("Wrote {}", base_dir.join("config.toml").display());
    println!("Edit the file to change models, chunking, or retrieval settings.");

    Ok(())
}

/// Print the active configuration as TOML.
#[inline]
pub async fn show_config() -> Result<()> {
    let base_dir = Config::default_base_dir()?;
    let config = Config::load(&base_dir)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;

    println!("Configuration ({}):", base_dir.join("config.toml").display());
    println!("{rendered}");

    Ok(())
}
