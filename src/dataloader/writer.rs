use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use rayon::slice::ParallelSliceMut;
use tracing::{debug, info};

use super::chunk::ImageChunk;
use super::codec::ChunkCodec;
use super::config::WriterConfig;
use super::error::{ChunkCacheError, Result};
use super::metadata::{DatasetMetadata, LabelLookup};
use super::transform::SampleTransform;

/// Builds a chunked dataset from a directory with one subdirectory per class.
pub struct DatasetWriter<T: SampleTransform> {
    root: PathBuf,
    transform: T,
    valid_extensions: HashSet<String>,
    config: WriterConfig,
}

/// Every image found under the root, in write order, with the lookup built while scanning.
pub struct SourceScan {
    pub entries: Vec<(PathBuf, i64)>,
    pub lookup: LabelLookup,
}

impl<T: SampleTransform> DatasetWriter<T> {
    pub fn new(root: impl AsRef<Path>, transform: T, config: WriterConfig) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ChunkCacheError::DirectoryNotFound(root.to_owned()));
        }

        let valid_extensions = image::ImageFormat::all()
            .flat_map(|format| format.extensions_str())
            .map(|ext| ext.to_string())
            .collect();

        Ok(DatasetWriter {
            root: root.to_owned(),
            transform,
            valid_extensions,
            config: config.build()?,
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn scan(&self) -> Result<SourceScan> {
        let mut classes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let path = entry.path();
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                classes.push((name, path));
            }
        }

        if self.config.sort_classes {
            classes.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        }

        let mut lookup = LabelLookup::new();
        let mut entries = Vec::new();
        for (name, dir) in classes {
            let label = lookup.push(name);
            let mut files = Vec::new();
            self.collect_images(&dir, &mut files)?;
            if self.config.sort_classes {
                files.sort_unstable();
            }
            entries.extend(files.into_iter().map(|path| (path, label)));
        }

        Ok(SourceScan { entries, lookup })
    }

    /// Writes every chunk and then the metadata. Any failure aborts the whole
    /// write; metadata is only written once all chunks are on disk.
    pub fn save(&self, out_dir: impl AsRef<Path>, name: &str) -> Result<DatasetMetadata> {
        let SourceScan { entries, lookup } = self.scan()?;

        if entries.is_empty() {
            return Err(ChunkCacheError::EmptyDataset);
        }
        if let Some(declared) = self.config.expected_count {
            if declared != entries.len() {
                return Err(ChunkCacheError::SampleCountMismatch {
                    declared,
                    discovered: entries.len(),
                });
            }
        }

        let metadata = DatasetMetadata::new(
            entries.len(),
            self.config.chunk_capacity,
            self.config.sample_shape.clone(),
        )?;

        info!(
            dataset = name,
            samples = metadata.total_count,
            chunks = metadata.num_chunks(),
            classes = lookup.len(),
            "writing chunked dataset"
        );

        fs::create_dir_all(out_dir.as_ref())?;
        let codec = ChunkCodec::new(out_dir, name);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
            .map_err(|e| ChunkCacheError::ConfigError(e.to_string()))?;

        let sample_len = metadata.sample_len();
        let mut cursor = 0;
        for (index, &size) in metadata.chunk_sizes.iter().enumerate() {
            let sources = &entries[cursor..cursor + size];
            let mut chunk = ImageChunk::new(index, size, sample_len);

            pool.install(|| self.fill_chunk(&mut chunk, sources))?;
            codec.encode_chunk(index, &chunk.data, &chunk.labels, &metadata.sample_shape)?;
            debug!(chunk = chunk.index, samples = chunk.len(), "flushed chunk");

            cursor += size;
        }

        codec.encode_metadata(&metadata, &lookup)?;
        info!(dataset = name, "dataset written");

        Ok(metadata)
    }

    fn fill_chunk(&self, chunk: &mut ImageChunk, sources: &[(PathBuf, i64)]) -> Result<()> {
        for (dst, (_, label)) in chunk.labels.iter_mut().zip(sources) {
            *dst = *label;
        }

        chunk
            .data
            .par_chunks_exact_mut(chunk.sample_len)
            .zip(sources.par_iter())
            .try_for_each(|(out, (path, _))| self.load_sample(path, out))
    }

    fn load_sample(&self, path: &Path, out: &mut [f32]) -> Result<()> {
        let failed = |reason: String| ChunkCacheError::TransformError {
            path: path.to_owned(),
            reason,
        };

        // Content sniffing, so files without an image extension still decode
        let img = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| failed(e.to_string()))?
            .decode()
            .map_err(|e| failed(e.to_string()))?;
        self.transform.apply(img, out).map_err(|e| failed(e.to_string()))
    }

    // Symlinked directories are not descended into; symlinked files are kept.
    fn collect_images(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                self.collect_images(&path, out)?;
                continue;
            }

            let is_file = file_type.is_file() || (file_type.is_symlink() && path.is_file());
            if is_file && (!self.config.image_extensions_only || self.is_valid_extension(&path)) {
                out.push(path);
            }
        }
        Ok(())
    }

    fn is_valid_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.valid_extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }
}
