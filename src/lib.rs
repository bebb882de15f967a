//! Chunked on-disk image datasets and a double-buffered reader that prefetches
//! the next chunk while the current one is consumed.
//!
//! Offline, [`DatasetWriter`] walks a class-per-subdirectory tree and writes
//! fixed-size chunks plus metadata. Online, [`PrefetchingReader`] streams
//! `(sample, label)` pairs forever, cycling through the chunks.

pub mod dataloader;
pub mod prefetch;

pub use dataloader::batch::Batch;
pub use dataloader::codec::{ChunkCodec, ChunkSource, DecodedChunk, DiskChunkSource};
pub use dataloader::config::WriterConfig;
pub use dataloader::error::{ChunkCacheError, Result};
pub use dataloader::metadata::{partition_chunks, DatasetMetadata, LabelLookup};
pub use dataloader::transform::{ImageTransform, SampleTransform};
pub use dataloader::writer::DatasetWriter;
pub use prefetch::reader::{BatchStream, PrefetchingReader, Sample, SampleStream};
