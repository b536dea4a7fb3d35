// Embedding pipeline: document chunking and the remote Ollama client.

pub mod chunking;
pub mod ollama;
