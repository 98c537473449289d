use thiserror::Error;

pub type Result<T> = std::result::Result<T, SemdexError>;

#[derive(Error, Debug)]
pub enum SemdexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Worker exited: {0}")]
    WorkerExited(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chunking;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod extractor;
pub mod generation;
pub mod indexer;
pub mod metrics;
pub mod query;
pub mod store;
