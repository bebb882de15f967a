use super::error::{ChunkCacheError, Result};

pub struct WriterConfig {
    pub chunk_capacity: usize,
    pub sample_shape: Vec<usize>,
    // Must equal the number of image files found when set
    pub expected_count: Option<usize>,
    // read_dir does not guarantee consistancy or sorting of any kind since filesystems
    // don't either.
    // Sorting makes label ids and sample order reproducible across systems.
    pub sort_classes: bool,
    // Off: every regular file is handed to the transform and a bad one aborts the write
    pub image_extensions_only: bool,
    pub threads: usize,
}

impl WriterConfig {
    pub fn build(self) -> Result<Self> {
        if self.chunk_capacity == 0 {
            return Err(ChunkCacheError::ConfigError(
                "chunk capacity must be greater than zero".into(),
            ));
        }
        check_sample_shape(&self.sample_shape)?;
        if self.threads == 0 {
            return Err(ChunkCacheError::ConfigError(
                "writer needs at least one thread".into(),
            ));
        }
        if self.expected_count == Some(0) {
            return Err(ChunkCacheError::EmptyDataset);
        }

        Ok(self)
    }

    pub fn sample_len(&self) -> usize {
        self.sample_shape.iter().product()
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: 1024,
            sample_shape: vec![3, 32, 32],
            expected_count: None,
            sort_classes: false,
            image_extensions_only: false,
            threads: num_cpus::get(),
        }
    }
}

pub(crate) fn check_sample_shape(shape: &[usize]) -> Result<()> {
    if shape.is_empty() || shape.contains(&0) {
        return Err(ChunkCacheError::ConfigError(format!(
            "sample shape {:?} must be non-empty with no zero dimensions",
            shape
        )));
    }
    Ok(())
}
