/// Samples collated back to back, in the order they were pulled.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub data: Vec<f32>,
    pub labels: Vec<i64>,
    pub sample_len: usize,
    pub batch_number: usize,
}

impl Batch {
    pub fn with_capacity(batch_number: usize, batch_size: usize, sample_len: usize) -> Batch {
        Batch {
            data: Vec::with_capacity(batch_size * sample_len),
            labels: Vec::with_capacity(batch_size),
            sample_len,
            batch_number,
        }
    }

    pub fn push(&mut self, sample: &[f32], label: i64) {
        debug_assert_eq!(sample.len(), self.sample_len);
        self.data.extend_from_slice(sample);
        self.labels.push(label);
    }

    pub fn samples_in_batch(&self) -> usize {
        self.labels.len()
    }

    pub fn sample(&self, i: usize) -> Option<(&[f32], i64)> {
        let label = *self.labels.get(i)?;
        let start = i * self.sample_len;
        Some((&self.data[start..start + self.sample_len], label))
    }
}
