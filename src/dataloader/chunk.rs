/// A chunk being filled by the writer.
pub struct ImageChunk {
    pub index: usize,
    pub data: Box<[f32]>,
    pub labels: Box<[i64]>,
    pub sample_len: usize,
}

impl ImageChunk {
    pub fn new(index: usize, samples: usize, sample_len: usize) -> ImageChunk {
        ImageChunk {
            index,
            data: vec![0f32; samples * sample_len].into_boxed_slice(),
            labels: vec![0i64; samples].into_boxed_slice(),
            sample_len,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
