// LanceDB-backed persistence for (chunk, vector) pairs.

pub mod vector_store;

pub use vector_store::{ChunkRecord, SearchResult, VectorStore};
