use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkCacheError {
    // IO and system errors
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("SafeTensors error: {0}")]
    SafeTensorsError(#[from] safetensors::SafeTensorError),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    // Caller contract
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Declared sample count {declared} does not match the {discovered} image files found")]
    SampleCountMismatch { declared: usize, discovered: usize },

    #[error("No images found in the dataset")]
    EmptyDataset,

    // On-disk records
    #[error("Metadata record not found: {0}")]
    MetadataNotFound(PathBuf),

    #[error("Invalid dataset metadata: {0}")]
    InvalidMetadata(String),

    #[error("Chunk {index} of dataset '{name}' not found at {path}")]
    ChunkNotFound {
        name: String,
        index: usize,
        path: PathBuf,
    },

    #[error("Chunk {index} is corrupt: {reason}")]
    ChunkCorrupt { index: usize, reason: String },

    #[error("Shape mismatch in chunk {index}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Failed to transform {path}: {reason}")]
    TransformError { path: PathBuf, reason: String },

    // Prefetching
    #[error("Buffer slot {0} is lent to the prefetch worker")]
    SlotBusy(usize),

    #[error("Prefetch of chunk {index} failed: {source}")]
    PrefetchFailure {
        index: usize,
        source: Box<ChunkCacheError>,
    },

    #[error("Prefetch worker disconnected before completing its load")]
    WorkerDisconnected,
}

pub type Result<T> = std::result::Result<T, ChunkCacheError>;
