
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::{SearchResult, VectorStore};
use crate::embeddings::ollama::OllamaClient;
use crate::{LibrettoError, Result};

/// Fixed reply used when the retrieved context cannot answer the question.
/// Shared by the prompt contract, the zero-retrieval short-circuit, and the
/// tests that pin this behavior.
pub const NOT_FOUND_ANSWER: &str = "I cannot find the answer in the knowledge base.";

/// Lifecycle of the knowledge base within one process.
///
/// Created `Initializing`; moved exactly once to `Ready` or `Failed` by the
/// background initialization task. A restart is required to retry after
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Initializing,
    Ready,
    Failed,
}

const STATE_INITIALIZING: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_FAILED: u8 = 2;

/// Single-writer, multi-reader readiness cell.
///
/// The background task stores the terminal state with `Release` ordering and
/// every request handler loads it with `Acquire`, so the transition is
/// visible to all threads the moment it happens, without any locking on the
/// query path.
#[derive(Debug)]
pub struct Readiness {
    state: AtomicU8,
    failure: OnceLock<String>,
}

impl Readiness {
    #[inline]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_INITIALIZING),
            failure: OnceLock::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> ReadinessState {
        match self.state.load(Ordering::Acquire) {
            STATE_READY => ReadinessState::Ready,
            STATE_FAILED => ReadinessState::Failed,
            _ => ReadinessState::Initializing,
        }
    }

    /// Mark initialization complete. Terminal; later calls are ignored.
    #[inline]
    pub fn set_ready(&self) {
        if self
            .state
            .compare_exchange(
                STATE_INITIALIZING,
                STATE_READY,
                Ordering::Release,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!("Ignoring readiness transition: state is already terminal");
        }
    }

    /// Mark initialization failed, recording the cause for operators.
    /// Terminal; later calls are ignored.
    #[inline]
    pub fn set_failed(&self, cause: String) {
        let _ = self.failure.set(cause);
        if self
            .state
            .compare_exchange(
                STATE_INITIALIZING,
                STATE_FAILED,
                Ordering::Release,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!("Ignoring failure transition: state is already terminal");
        }
    }

    /// Cause recorded by `set_failed`, if any.
    #[inline]
    pub fn failure_cause(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }
}

impl Default for Readiness {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// A generated answer with the chunks used as grounding context.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SearchResult>,
}

/// Readiness-gated query engine: the single `answer` operation embeds the
/// question, retrieves the top-K chunks, and asks the generation model to
/// answer from that context alone.
pub struct QueryEngine {
    readiness: Arc<Readiness>,
    store: Arc<VectorStore>,
    client: Arc<OllamaClient>,
    top_k: usize,
    temperature: f32,
}

impl QueryEngine {
    #[inline]
    pub fn new(
        config: &Config,
        readiness: Arc<Readiness>,
        store: Arc<VectorStore>,
        client: Arc<OllamaClient>,
    ) -> Self {
        Self {
            readiness,
            store,
            client,
            top_k: config.retrieval.top_k,
            temperature: config.generation.temperature,
        }
    }

    #[inline]
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// The vector store this engine retrieves from.
    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Answer a natural-language question against the knowledge base.
    ///
    /// Fails immediately with `NotReady` while the index is still building
    /// (callers poll; this never blocks on readiness) and with `IndexBuild`
    /// once initialization has failed. Pipeline failures are local to the
    /// call: the engine stays `Ready` and concurrent queries are unaffected.
    #[inline]
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        match self.readiness.state() {
            ReadinessState::Ready => {}
            ReadinessState::Initializing => {
                debug!("Rejecting query: knowledge base still initializing");
                return Err(LibrettoError::NotReady);
            }
            ReadinessState::Failed => {
                let cause = self
                    .readiness
                    .failure_cause()
                    .unwrap_or("unknown cause")
                    .to_string();
                return Err(LibrettoError::IndexBuild(cause));
            }
        }

        info!("Answering query (length: {})", question.len());

        // The same embedding model indexed the chunks; the blocking client
        // runs on the blocking pool so the async front ends stay responsive.
        let client = Arc::clone(&self.client);
        let question_owned = question.to_string();
        let query_vector = tokio::task::spawn_blocking(move || client.embed(&question_owned))
            .await
            .map_err(|e| LibrettoError::Embedding(format!("embedding task panicked: {}", e)))?
            .map_err(|e| LibrettoError::Embedding(format!("{:#}", e)))?;

        let sources = self.store.search_similar(&query_vector, self.top_k).await?;

        if sources.is_empty() {
            // Nothing retrieved means nothing to ground an answer in; skip
            // the generation call entirely.
            warn!("Retrieval returned no chunks; answering with the not-found reply");
            return Ok(Answer {
                text: NOT_FOUND_ANSWER.to_string(),
                sources,
            });
        }

        debug!("Retrieved {} chunks for grounding", sources.len());

        let prompt = build_prompt(question, &sources);
        let client = Arc::clone(&self.client);
        let temperature = self.temperature;
        let text = tokio::task::spawn_blocking(move || client.generate(&prompt, temperature))
            .await
            .map_err(|e| LibrettoError::Generation(format!("generation task panicked: {}", e)))?
            .map_err(|e| {
                error!("Generation failed: {:#}", e);
                LibrettoError::Generation(format!("{:#}", e))
            })?;

        Ok(Answer {
            text: text.trim().to_string(),
            sources,
        })
    }
}

/// Assemble the grounding prompt: numbered context passages followed by the
/// question, with an instruction to refuse when the context is insufficient.
#[inline]
pub fn build_prompt(question: &str, sources: &[SearchResult]) -> String {
    let mut prompt = String::from(
        "You are answering questions about a book using only the context \
         passages below. Base your answer strictly on those passages. If \
         they do not contain the information needed to answer, reply with \
         exactly this sentence and nothing else: \"",
    );
    prompt.push_str(NOT_FOUND_ANSWER);
    prompt.push_str("\"\n\nContext passages:\n");

    for (i, source) in sources.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, source.content.trim()));
    }

    prompt.push_str("Question: ");
    prompt.push_str(question);
    prompt.push_str("\n\nAnswer:");
    prompt
}
