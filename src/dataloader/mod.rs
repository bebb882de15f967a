pub mod batch;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod error;
pub mod info;
pub mod metadata;
pub mod transform;
pub mod writer;
