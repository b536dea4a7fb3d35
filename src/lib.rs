use thiserror::Error;

pub type Result<T> = std::result::Result<T, LibrettoError>;

#[derive(Error, Debug)]
pub enum LibrettoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Index build error: {0}")]
    IndexBuild(String),

    #[error("Knowledge base is still initializing")]
    NotReady,

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl LibrettoError {
    /// True for failures local to a single query which leave the engine
    /// usable for subsequent calls.
    #[inline]
    pub fn is_pipeline_error(&self) -> bool {
        matches!(
            self,
            Self::Embedding(_) | Self::Retrieval(_) | Self::Generation(_)
        )
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod engine;
pub mod indexer;
pub mod server;
