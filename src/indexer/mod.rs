// Index construction: chunk the document, embed the chunks, and persist
// them, skipping the whole build when a valid cached index already exists.

#[cfg(test)]
mod tests;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::{ChunkRecord, VectorStore};
use crate::embeddings::chunking::{Chunk, split_document};
use crate::embeddings::ollama::OllamaClient;
use crate::engine::Readiness;
use crate::{LibrettoError, Result};

/// Records the exact inputs the persisted index was built from. Any
/// mismatch on a later run invalidates the index and forces a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub fingerprint: String,
    pub chunk_count: usize,
    pub embed_model: String,
    pub built_at: String,
}

/// Outcome of a build-or-load pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub chunk_count: usize,
    /// True when a valid cached index was reused without recomputation.
    pub reused: bool,
}

/// sha256 over the document bytes and every parameter that shapes the
/// index. Changing the document, the chunking parameters, or the embedding
/// model all produce a different fingerprint.
#[inline]
pub fn index_fingerprint(document: &str, config: &Config) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document.as_bytes());
    hasher.update(config.chunking.max_length.to_le_bytes());
    hasher.update(config.chunking.overlap.to_le_bytes());
    hasher.update(config.ollama.embed_model.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn load_manifest(path: &Path) -> Option<IndexManifest> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!("Ignoring unreadable index manifest: {}", e);
            None
        }
    }
}

fn write_manifest(path: &Path, manifest: &IndexManifest) -> Result<()> {
    let content = serde_json::to_string_pretty(manifest)
        .context("Failed to serialize index manifest")?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write index manifest: {}", path.display()))?;
    Ok(())
}

/// Build the index for the configured document, or load the cached one.
///
/// Idempotent: when the manifest fingerprint matches the current
/// (document, parameters, model) triple and the table is populated, the
/// build is skipped entirely. Otherwise the table is cleared and rebuilt,
/// which may take minutes for a large document.
#[inline]
pub async fn build_index(
    config: &Config,
    store: &VectorStore,
    client: &OllamaClient,
    show_progress: bool,
) -> Result<IndexStats> {
    let document_path = &config.document.path;
    let document = fs::read_to_string(document_path).map_err(|e| {
        LibrettoError::IndexBuild(format!(
            "failed to read knowledge file {}: {}",
            document_path.display(),
            e
        ))
    })?;

    let fingerprint = index_fingerprint(&document, config);
    let manifest_path = config.manifest_path();

    if let Some(manifest) = load_manifest(&manifest_path) {
        if manifest.fingerprint == fingerprint {
            let stored = store.count_chunks().await?;
            if stored > 0 && stored as usize == manifest.chunk_count {
                info!(
                    "Index is up to date ({} chunks); skipping rebuild",
                    stored
                );
                return Ok(IndexStats {
                    chunk_count: manifest.chunk_count,
                    reused: true,
                });
            }
            warn!(
                "Manifest matches but table holds {} of {} chunks; rebuilding",
                stored, manifest.chunk_count
            );
        } else {
            info!("Document or parameters changed; invalidating cached index");
        }
    }

    let chunks = split_document(&document, &config.chunking)?;
    if chunks.is_empty() {
        return Err(LibrettoError::IndexBuild(format!(
            "knowledge file {} is empty",
            document_path.display()
        )));
    }

    info!(
        "Building index: {} chunks from {}",
        chunks.len(),
        document_path.display()
    );

    store.clear().await?;

    let progress = if show_progress {
        let bar = ProgressBar::new(chunks.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding chunks")
                .expect("style template is valid"),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let batch_size = config.ollama.batch_size as usize;
    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

        let client = client.clone();
        let vectors = tokio::task::spawn_blocking(move || client.embed_batch(&texts))
            .await
            .map_err(|e| {
                LibrettoError::IndexBuild(format!("embedding task panicked: {}", e))
            })?
            .map_err(|e| {
                LibrettoError::IndexBuild(format!("embedding failed during build: {:#}", e))
            })?;

        let records: Vec<ChunkRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| chunk_record(chunk, vector))
            .collect();

        store.store_chunks_batch(&records).await?;
        progress.inc(batch.len() as u64);
    }

    progress.finish_and_clear();

    let manifest = IndexManifest {
        fingerprint,
        chunk_count: chunks.len(),
        embed_model: config.ollama.embed_model.clone(),
        built_at: Utc::now().to_rfc3339(),
    };
    write_manifest(&manifest_path, &manifest)?;

    info!("Index build complete: {} chunks", chunks.len());
    Ok(IndexStats {
        chunk_count: chunks.len(),
        reused: false,
    })
}

fn chunk_record(chunk: &Chunk, vector: Vec<f32>) -> ChunkRecord {
    ChunkRecord {
        id: Uuid::new_v4().to_string(),
        vector,
        content: chunk.content.clone(),
        start_offset: chunk.start_offset as u64,
        chunk_index: chunk.chunk_index as u32,
        created_at: Utc::now().to_rfc3339(),
    }
}

/// One-shot supervised initialization: build or load the index, then flip
/// the readiness cell. Runs off the request path so the front ends can
/// accept connections and report "initializing" while this works.
///
/// The cell always leaves `Initializing` when this returns: `Ready` on
/// success, `Failed` with the recorded cause otherwise.
#[inline]
pub async fn initialize(
    config: Config,
    store: Arc<VectorStore>,
    client: Arc<OllamaClient>,
    readiness: Arc<Readiness>,
) {
    match build_index(&config, &store, &client, false).await {
        Ok(stats) => {
            if stats.reused {
                info!("Knowledge base ready (cached index, {} chunks)", stats.chunk_count);
            } else {
                info!("Knowledge base ready ({} chunks indexed)", stats.chunk_count);
            }
            readiness.set_ready();
        }
        Err(e) => {
            error!("Knowledge base initialization failed: {}", e);
            readiness.set_failed(e.to_string());
        }
    }
}
