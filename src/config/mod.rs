pub mod settings;

pub use settings::{
    Config, ConfigError, DocumentConfig, GenerationConfig, OllamaConfig, RetrievalConfig,
};
