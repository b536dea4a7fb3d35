use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::VectorStore;
use crate::embeddings::ollama::OllamaClient;
use crate::engine::{QueryEngine, Readiness};
use crate::indexer::{build_index, initialize};
use crate::server::{AppState, run_server};

struct Runtime {
    config: Config,
    store: Arc<VectorStore>,
    client: Arc<OllamaClient>,
}

fn load_config() -> Result<Config> {
    let base_dir = Config::default_base_dir()?;
    let config = Config::load(base_dir)?;
    Ok(config)
}

async fn runtime() -> Result<Runtime> {
    let config = load_config()?;
    let store = VectorStore::new(
        &config.vectors_path(),
        config.ollama.embedding_dimension as usize,
    )
    .await
    .context("Failed to open vector store")?;
    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;

    Ok(Runtime {
        config,
        store: Arc::new(store),
        client: Arc::new(client),
    })
}

/// Check the Ollama server before starting a front end. A failure is
/// reported but not fatal; the background build will surface it properly.
async fn warn_if_unhealthy(client: &Arc<OllamaClient>) {
    let probe = OllamaClient::clone(client);
    match tokio::task::spawn_blocking(move || probe.health_check()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Ollama health check failed: {:#}", e),
        Err(e) => warn!("Ollama health check task panicked: {}", e),
    }
}

/// Build (or refresh) the index in the foreground, with a progress bar.
#[inline]
pub async fn run_index() -> Result<()> {
    let rt = runtime().await?;

    let probe = OllamaClient::clone(&rt.client);
    tokio::task::spawn_blocking(move || probe.health_check())
        .await
        .context("Health check task panicked")?
        .context("Ollama server is not available")?;

    let stats = build_index(&rt.config, &rt.store, &rt.client, true).await?;

    if stats.reused {
        println!("Index is already up to date ({} chunks).", stats.chunk_count);
    } else {
        println!("Indexed {} chunks.", stats.chunk_count);
    }
    Ok(())
}

/// Answer a single question from the command line.
#[inline]
pub async fn ask(question: String) -> Result<()> {
    let rt = runtime().await?;
    let readiness = Arc::new(Readiness::new());

    initialize(
        rt.config.clone(),
        Arc::clone(&rt.store),
        Arc::clone(&rt.client),
        Arc::clone(&readiness),
    )
    .await;

    let engine = QueryEngine::new(
        &rt.config,
        Arc::clone(&readiness),
        Arc::clone(&rt.store),
        Arc::clone(&rt.client),
    );

    let answer = engine.answer(&question).await?;

    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            let preview: String = source.content.chars().take(80).collect();
            println!("  [chunk {}] {}...", source.chunk_index, preview.trim_end());
        }
    }
    Ok(())
}

/// Start the HTTP API, building the index in the background.
#[inline]
pub async fn serve(port: u16) -> Result<()> {
    let rt = runtime().await?;
    warn_if_unhealthy(&rt.client).await;

    let readiness = Arc::new(Readiness::new());
    let engine = QueryEngine::new(
        &rt.config,
        Arc::clone(&readiness),
        Arc::clone(&rt.store),
        Arc::clone(&rt.client),
    );

    info!("Starting index build in the background");
    tokio::spawn(initialize(
        rt.config,
        rt.store,
        rt.client,
        readiness,
    ));

    run_server(
        port,
        AppState {
            engine: Arc::new(engine),
        },
    )
    .await?;
    Ok(())
}

/// Start the interactive chat, building the index in the background.
#[inline]
pub async fn chat() -> Result<()> {
    let rt = runtime().await?;
    warn_if_unhealthy(&rt.client).await;

    let readiness = Arc::new(Readiness::new());
    let engine = Arc::new(QueryEngine::new(
        &rt.config,
        Arc::clone(&readiness),
        Arc::clone(&rt.store),
        Arc::clone(&rt.client),
    ));

    tokio::spawn(initialize(
        rt.config,
        rt.store,
        rt.client,
        readiness,
    ));

    crate::chat::run_chat(engine).await?;
    Ok(())
}

/// Show the health of every component the pipeline depends on.
#[inline]
pub async fn show_status() -> Result<()> {
    let config = load_config()?;

    println!("📊 Libretto Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("📄 Knowledge File:");
    let document_path = &config.document.path;
    match std::fs::metadata(document_path) {
        Ok(meta) => println!(
            "   ✅ {} ({} bytes)",
            document_path.display(),
            meta.len()
        ),
        Err(e) => println!("   ❌ {}: {}", document_path.display(), e),
    }

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            let result = tokio::task::spawn_blocking(move || client.health_check())
                .await
                .context("Health check task panicked")?;
            match result {
                Ok(()) => {
                    println!(
                        "   ✅ Ollama: Connected ({}:{})",
                        config.ollama.host, config.ollama.port
                    );
                    println!("   📋 Embedding model: {}", config.ollama.embed_model);
                    println!("   📋 Generation model: {}", config.ollama.generate_model);
                }
                Err(e) => println!("   ⚠️  Ollama: Unhealthy - {:#}", e),
            }
        }
        Err(e) => println!("   ❌ Ollama: Failed to create client - {}", e),
    }

    println!("🔍 Vector Index Status:");
    match VectorStore::new(
        &config.vectors_path(),
        config.ollama.embedding_dimension as usize,
    )
    .await
    {
        Ok(store) => match store.count_chunks().await {
            Ok(0) => println!("   ⚠️  LanceDB: Connected, index is empty"),
            Ok(count) => println!("   ✅ LanceDB: Connected ({} chunks)", count),
            Err(e) => println!("   ❌ LanceDB: Failed to count chunks - {}", e),
        },
        Err(e) => println!("   ❌ LanceDB: Failed to connect - {}", e),
    }

    let manifest_path = config.manifest_path();
    if let Ok(content) = std::fs::read_to_string(&manifest_path) {
        if let Ok(manifest) = serde_json::from_str::<crate::indexer::IndexManifest>(&content) {
            println!("📦 Index Manifest:");
            println!("   Built: {}", manifest.built_at);
            println!("   Chunks: {}", manifest.chunk_count);
            println!("   Model: {}", manifest.embed_model);
        }
    }

    Ok(())
}

/// Print the active configuration.
#[inline]
pub fn show_config() -> Result<()> {
    let config = load_config()?;

    println!("📋 Current Configuration");
    println!();
    println!("Document:");
    println!("  Path: {}", config.document.path.display());
    println!("Chunking:");
    println!("  Max length: {}", config.chunking.max_length);
    println!("  Overlap: {}", config.chunking.overlap);
    println!("Retrieval:");
    println!("  Top K: {}", config.retrieval.top_k);
    println!("Generation:");
    println!("  Temperature: {}", config.generation.temperature);
    println!("Ollama:");
    println!("  Host: {}:{}", config.ollama.host, config.ollama.port);
    println!("  Embedding model: {}", config.ollama.embed_model);
    println!("  Generation model: {}", config.ollama.generate_model);
    println!("  Batch size: {}", config.ollama.batch_size);
    println!("  API key: {}", if config.ollama.api_key.is_some() { "set" } else { "not set" });
    println!();
    println!("Config file: {}", config.base_dir.join("config.toml").display());

    Ok(())
}

/// Write the default configuration file so it can be edited by hand.
#[inline]
pub fn init_config() -> Result<()> {
    let base_dir = Config::default_base_dir()?;
    let config_path = base_dir.join("config.toml");
    if config_path.exists() {
        println!("Configuration already exists at {}", config_path.display());
        return Ok(());
    }

    let config = Config {
        base_dir,
        ..Config::default()
    };
    config.save()?;
    println!("Wrote default configuration to {}", config_path.display());
    Ok(())
}
