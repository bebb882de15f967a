use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{ChunkCacheError, Result};

/// Describes how a dataset was partitioned on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub total_count: usize,
    pub chunk_sizes: Vec<usize>,
    pub sample_shape: Vec<usize>,
}

impl DatasetMetadata {
    pub fn new(
        total_count: usize,
        chunk_capacity: usize,
        sample_shape: Vec<usize>,
    ) -> Result<Self> {
        let metadata = DatasetMetadata {
            total_count,
            chunk_sizes: partition_chunks(total_count, chunk_capacity)?,
            sample_shape,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn num_chunks(&self) -> usize {
        self.chunk_sizes.len()
    }

    /// Size of chunk 0, which every other chunk fits into.
    pub fn representative_size(&self) -> usize {
        self.chunk_sizes[0]
    }

    pub fn sample_len(&self) -> usize {
        self.sample_shape.iter().product()
    }

    /// Full tensor shape of chunk `index`, `(chunk_sizes[index], *sample_shape)`.
    pub fn chunk_shape(&self, index: usize) -> Option<Vec<usize>> {
        let len = *self.chunk_sizes.get(index)?;
        let mut shape = Vec::with_capacity(self.sample_shape.len() + 1);
        shape.push(len);
        shape.extend_from_slice(&self.sample_shape);
        Some(shape)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(ChunkCacheError::InvalidMetadata(reason));

        if self.total_count == 0 || self.chunk_sizes.is_empty() {
            return invalid("dataset holds no samples".into());
        }
        if self.sample_shape.is_empty() || self.sample_shape.contains(&0) {
            return invalid(format!("degenerate sample shape {:?}", self.sample_shape));
        }

        let sum: usize = self.chunk_sizes.iter().sum();
        if sum != self.total_count {
            return invalid(format!(
                "chunk sizes sum to {} but total count is {}",
                sum, self.total_count
            ));
        }

        let capacity = self.chunk_sizes[0];
        let (last, body) = self.chunk_sizes.split_last().ok_or_else(|| {
            ChunkCacheError::InvalidMetadata("dataset holds no chunks".into())
        })?;
        if let Some(i) = body.iter().position(|&size| size != capacity) {
            return invalid(format!(
                "chunk {} has size {} but only the final chunk may differ from {}",
                i, body[i], capacity
            ));
        }
        if *last == 0 || *last > capacity {
            return invalid(format!(
                "final chunk size {} outside 1..={}",
                last, capacity
            ));
        }

        Ok(())
    }
}

/// Splits `total_count` samples into chunks of `chunk_capacity`, with a single
/// remainder chunk at the end. An exact multiple produces no trailing
/// zero-length chunk.
pub fn partition_chunks(total_count: usize, chunk_capacity: usize) -> Result<Vec<usize>> {
    if chunk_capacity == 0 {
        return Err(ChunkCacheError::ConfigError(
            "chunk capacity must be greater than zero".into(),
        ));
    }
    if total_count == 0 {
        return Err(ChunkCacheError::EmptyDataset);
    }

    let mut sizes = vec![chunk_capacity; total_count / chunk_capacity];
    let remainder = total_count % chunk_capacity;
    if remainder != 0 {
        sizes.push(remainder);
    }
    Ok(sizes)
}

/// Label id to class name. Ids are dense and handed out in first-seen order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct LabelLookup(BTreeMap<i64, String>);

impl LabelLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, class_name: impl Into<String>) -> i64 {
        let id = self.0.len() as i64;
        self.0.insert(id, class_name.into());
        id
    }

    pub fn name(&self, id: i64) -> Option<&str> {
        self.0.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.0.iter().map(|(&id, name)| (id, name.as_str()))
    }

    pub fn validate(&self) -> Result<()> {
        match self.0.keys().enumerate().find(|&(i, &id)| id != i as i64) {
            Some((i, id)) => Err(ChunkCacheError::InvalidMetadata(format!(
                "label ids are not dense: expected {} but found {}",
                i, id
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_sums_to_total() {
        for total in 1..200 {
            for capacity in 1..40 {
                let sizes = partition_chunks(total, capacity).unwrap();
                assert_eq!(sizes.iter().sum::<usize>(), total);
                let (last, body) = sizes.split_last().unwrap();
                assert!(body.iter().all(|&s| s == capacity));
                assert!(*last >= 1 && *last <= capacity);
            }
        }
    }

    #[test]
    fn partition_with_remainder() {
        assert_eq!(partition_chunks(10, 4).unwrap(), vec![4, 4, 2]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        assert_eq!(partition_chunks(12, 4).unwrap(), vec![4, 4, 4]);
        assert_eq!(partition_chunks(3, 5).unwrap(), vec![3]);
    }

    #[test]
    fn partition_rejects_degenerate_inputs() {
        assert!(matches!(partition_chunks(10, 0), Err(ChunkCacheError::ConfigError(_))));
        assert!(matches!(partition_chunks(0, 4), Err(ChunkCacheError::EmptyDataset)));
    }

    #[test]
    fn validate_catches_inconsistent_sizes() {
        let mut metadata = DatasetMetadata::new(10, 4, vec![1, 2, 2]).unwrap();
        assert_eq!(metadata.chunk_shape(2), Some(vec![2, 1, 2, 2]));
        assert_eq!(metadata.chunk_shape(3), None);

        metadata.chunk_sizes = vec![4, 3, 3];
        assert!(matches!(metadata.validate(), Err(ChunkCacheError::InvalidMetadata(_))));

        metadata.chunk_sizes = vec![4, 4, 2, 0];
        assert!(matches!(metadata.validate(), Err(ChunkCacheError::InvalidMetadata(_))));

        metadata.chunk_sizes = vec![4, 4, 3];
        assert!(matches!(metadata.validate(), Err(ChunkCacheError::InvalidMetadata(_))));
    }

    #[test]
    fn lookup_assigns_dense_ids() {
        let mut lookup = LabelLookup::new();
        assert_eq!(lookup.push("cats"), 0);
        assert_eq!(lookup.push("dogs"), 1);
        assert_eq!(lookup.name(1), Some("dogs"));
        assert_eq!(lookup.name(2), None);
        assert!(lookup.validate().is_ok());

        let json = serde_json::to_string(&lookup).unwrap();
        assert_eq!(json, r#"{"0":"cats","1":"dogs"}"#);
        let decoded: LabelLookup = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, lookup);

        let sparse: LabelLookup = serde_json::from_str(r#"{"0":"a","2":"b"}"#).unwrap();
        assert!(sparse.validate().is_err());
    }
}
