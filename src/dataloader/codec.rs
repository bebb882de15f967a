use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use safetensors::serialize_to_file;
use tracing::debug;

use super::error::{ChunkCacheError, Result};
use super::metadata::{DatasetMetadata, LabelLookup};

const DATA_TENSOR: &str = "data";
const LABELS_TENSOR: &str = "labels";

/// One chunk as read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    pub index: usize,
    pub data: Vec<f32>,
    pub labels: Vec<i64>,
}

impl DecodedChunk {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Where the prefetching reader gets its chunks from.
pub trait ChunkSource: Send + Sync {
    fn metadata(&self) -> &DatasetMetadata;
    fn load_chunk(&self, index: usize) -> Result<DecodedChunk>;
    /// Error for a chunk index the source does not hold.
    fn chunk_not_found(&self, index: usize) -> ChunkCacheError;
}

/// Reads and writes the records of one named dataset inside a directory.
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    dir: PathBuf,
    name: String,
}

impl ChunkCodec {
    pub fn new(dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        ChunkCodec {
            dir: dir.as_ref().to_owned(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.{:03}.x.pt", self.name, index))
    }

    pub fn labels_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.{:03}.y.pt", self.name, index))
    }

    pub fn info_path(&self) -> PathBuf {
        self.dir.join(format!("{}.info.dat", self.name))
    }

    pub fn lut_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lut.dat", self.name))
    }

    pub fn encode_chunk(
        &self,
        index: usize,
        data: &[f32],
        labels: &[i64],
        sample_shape: &[usize],
    ) -> Result<()> {
        let sample_len: usize = sample_shape.iter().product();
        if data.len() != labels.len() * sample_len {
            return Err(ChunkCacheError::ShapeMismatch {
                index,
                expected: vec![labels.len() * sample_len],
                actual: vec![data.len()],
            });
        }

        let mut data_shape = Vec::with_capacity(sample_shape.len() + 1);
        data_shape.push(labels.len());
        data_shape.extend_from_slice(sample_shape);

        let data_bytes: Vec<u8> = data.iter().flat_map(|x| x.to_le_bytes()).collect();
        let label_bytes: Vec<u8> = labels.iter().flat_map(|y| y.to_le_bytes()).collect();

        let data_view = TensorView::new(Dtype::F32, data_shape, &data_bytes)?;
        let label_view = TensorView::new(Dtype::I64, vec![labels.len()], &label_bytes)?;

        serialize_to_file([(DATA_TENSOR, data_view)], &None, &self.data_path(index))?;
        serialize_to_file([(LABELS_TENSOR, label_view)], &None, &self.labels_path(index))?;

        debug!(chunk = index, samples = labels.len(), "encoded chunk");
        Ok(())
    }

    pub fn decode_chunk(&self, index: usize, metadata: &DatasetMetadata) -> Result<DecodedChunk> {
        let expected = metadata
            .chunk_shape(index)
            .ok_or_else(|| self.not_found(index, self.data_path(index)))?;

        let data_path = self.data_path(index);
        let labels_path = self.labels_path(index);
        let data_bytes = self.read_record(index, &data_path)?;
        let label_bytes = self.read_record(index, &labels_path)?;

        let data = decode_tensor(index, &data_bytes, DATA_TENSOR, Dtype::F32, &expected, |b| {
            f32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })?;
        let labels = decode_tensor(
            index,
            &label_bytes,
            LABELS_TENSOR,
            Dtype::I64,
            &expected[..1],
            |b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
        )?;

        Ok(DecodedChunk { index, data, labels })
    }

    pub fn encode_metadata(&self, metadata: &DatasetMetadata, lookup: &LabelLookup) -> Result<()> {
        write_json(&self.info_path(), metadata)?;
        write_json(&self.lut_path(), lookup)
    }

    pub fn decode_metadata(&self) -> Result<(DatasetMetadata, LabelLookup)> {
        let metadata: DatasetMetadata = read_json(&self.info_path())?;
        metadata.validate()?;
        let lookup: LabelLookup = read_json(&self.lut_path())?;
        lookup.validate()?;
        Ok((metadata, lookup))
    }

    fn read_record(&self, index: usize, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => self.not_found(index, path.to_owned()),
            _ => ChunkCacheError::IoError(e),
        })
    }

    fn not_found(&self, index: usize, path: PathBuf) -> ChunkCacheError {
        ChunkCacheError::ChunkNotFound {
            name: self.name.clone(),
            index,
            path,
        }
    }
}

/// Codec paired with the metadata it validates against.
pub struct DiskChunkSource {
    codec: ChunkCodec,
    metadata: DatasetMetadata,
}

impl DiskChunkSource {
    pub fn new(codec: ChunkCodec, metadata: DatasetMetadata) -> Self {
        DiskChunkSource { codec, metadata }
    }
}

impl ChunkSource for DiskChunkSource {
    fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    fn load_chunk(&self, index: usize) -> Result<DecodedChunk> {
        self.codec.decode_chunk(index, &self.metadata)
    }

    fn chunk_not_found(&self, index: usize) -> ChunkCacheError {
        self.codec.not_found(index, self.codec.data_path(index))
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ChunkCacheError::MetadataNotFound(path.to_owned()),
        _ => ChunkCacheError::IoError(e),
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn decode_tensor<T>(
    index: usize,
    bytes: &[u8],
    name: &str,
    dtype: Dtype,
    expected_shape: &[usize],
    from_le: impl Fn(&[u8]) -> T,
) -> Result<Vec<T>> {
    let corrupt = |reason: String| ChunkCacheError::ChunkCorrupt { index, reason };

    let tensors = SafeTensors::deserialize(bytes).map_err(|e| corrupt(e.to_string()))?;
    let view = tensors
        .tensor(name)
        .map_err(|_| corrupt(format!("record has no '{}' tensor", name)))?;

    if view.dtype() != dtype {
        return Err(corrupt(format!(
            "'{}' has dtype {:?}, expected {:?}",
            name,
            view.dtype(),
            dtype
        )));
    }
    if view.shape() != expected_shape {
        return Err(ChunkCacheError::ShapeMismatch {
            index,
            expected: expected_shape.to_vec(),
            actual: view.shape().to_vec(),
        });
    }

    let width = std::mem::size_of::<T>();
    Ok(view.data().chunks_exact(width).map(from_le).collect())
}
