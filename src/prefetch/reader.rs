use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::dataloader::batch::Batch;
use crate::dataloader::codec::{ChunkCodec, ChunkSource, DiskChunkSource};
use crate::dataloader::error::{ChunkCacheError, Result};
use crate::dataloader::metadata::{DatasetMetadata, LabelLookup};

use super::double_buffer::{DoubleBuffer, Slot};
use super::future::LoadFuture;
use super::worker::{decode_checked, PrefetchWorker};

/// One sample copied out of the active slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub data: Box<[f32]>,
    pub label: i64,
    /// Chunk the sample came from and its position inside that chunk.
    pub chunk: usize,
    pub offset: usize,
}

/// Streams a chunked dataset forever, loading the next chunk in the background
/// while the current one is consumed.
pub struct PrefetchingReader {
    source: Arc<dyn ChunkSource>,
    labels: LabelLookup,
    buffer: DoubleBuffer,
    pending: Option<(usize, LoadFuture)>,
    current_chunk: usize,
    cursor: usize,
    failed: bool,
    worker: PrefetchWorker,
}

impl PrefetchingReader {
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let codec = ChunkCodec::new(dir, name);
        let (metadata, labels) = codec.decode_metadata()?;
        info!(
            dataset = name,
            samples = metadata.total_count,
            chunks = metadata.num_chunks(),
            classes = labels.len(),
            "opened chunked dataset"
        );

        Self::with_source(Arc::new(DiskChunkSource::new(codec, metadata)), labels)
    }

    pub fn with_source(source: Arc<dyn ChunkSource>, labels: LabelLookup) -> Result<Self> {
        let metadata = source.metadata();
        metadata.validate()?;
        let buffer = DoubleBuffer::new(metadata.representative_size(), metadata.sample_len());
        let worker = PrefetchWorker::new(Arc::clone(&source))?;

        Ok(PrefetchingReader {
            source,
            labels,
            buffer,
            pending: None,
            current_chunk: 0,
            cursor: 0,
            failed: false,
            worker,
        })
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        self.source.metadata()
    }

    pub fn labels(&self) -> &LabelLookup {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.metadata().total_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_chunks(&self) -> usize {
        self.metadata().num_chunks()
    }

    /// Starts a new pass from chunk 0. Blocks while chunk 0 loads; the returned
    /// stream never ends on its own.
    pub fn iter(&mut self) -> Result<SampleStream<'_>> {
        self.start_session()?;
        Ok(SampleStream { reader: self })
    }

    fn start_session(&mut self) -> Result<()> {
        self.settle_pending();

        let chunk = decode_checked(self.source.as_ref(), 0)?;
        self.buffer.reset();
        let active = self.buffer.active();
        self.buffer.write(active, 0, &chunk.data, &chunk.labels, chunk.len())?;

        self.current_chunk = 0;
        self.cursor = 0;
        self.failed = false;
        self.launch_prefetch()
    }

    fn launch_prefetch(&mut self) -> Result<()> {
        let next = (self.current_chunk + 1) % self.num_chunks();
        let inactive = self.buffer.inactive();
        let slot = self.buffer.lend(inactive)?;
        self.pending = Some((inactive, self.worker.submit(next, slot)));
        Ok(())
    }

    /// Joins any load left over from an abandoned pass and takes its slot back.
    fn settle_pending(&mut self) {
        if let Some((slot_id, future)) = self.pending.take() {
            let slot = match future.wait() {
                Ok(outcome) => outcome.slot,
                Err(_) => self.fresh_slot(),
            };
            self.buffer.restore(slot_id, slot);
        }
    }

    /// Drained the active slot: wait for the prefetch, then expose it.
    fn advance(&mut self) -> Result<()> {
        let (slot_id, future) = self
            .pending
            .take()
            .ok_or(ChunkCacheError::WorkerDisconnected)?;
        let index = future.index;

        let outcome = match future.wait() {
            Ok(outcome) => outcome,
            Err(e) => {
                let slot = self.fresh_slot();
                self.buffer.restore(slot_id, slot);
                return Err(ChunkCacheError::PrefetchFailure {
                    index,
                    source: Box::new(e),
                });
            }
        };

        self.buffer.restore(slot_id, outcome.slot);
        outcome.result.map_err(|e| ChunkCacheError::PrefetchFailure {
            index,
            source: Box::new(e),
        })?;

        self.buffer.flip();
        self.current_chunk = index;
        self.cursor = 0;
        debug!(chunk = index, slot = self.buffer.active(), "switched to prefetched chunk");

        self.launch_prefetch()
    }

    fn next_sample(&mut self) -> Option<Result<Sample>> {
        if self.failed {
            return None;
        }

        loop {
            // Bounded by the chunk's declared size, never by slot capacity
            let declared = self.metadata().chunk_sizes[self.current_chunk];
            if self.cursor < declared {
                let active = self.buffer.active();
                let sample = self.buffer.read_range(active).and_then(|view| {
                    view.sample(self.cursor).map(|(data, label)| Sample {
                        data: data.into(),
                        label,
                        chunk: self.current_chunk,
                        offset: self.cursor,
                    })
                });

                return match sample {
                    Some(sample) => {
                        self.cursor += 1;
                        Some(Ok(sample))
                    }
                    None => {
                        self.failed = true;
                        Some(Err(ChunkCacheError::SlotBusy(active)))
                    }
                };
            }

            if let Err(e) = self.advance() {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }

    fn fresh_slot(&self) -> Slot {
        let metadata = self.metadata();
        Slot::new(metadata.representative_size(), metadata.sample_len())
    }
}

/// Infinite lazy sequence of samples over a [`PrefetchingReader`]. After an
/// error it yields `None`; call [`PrefetchingReader::iter`] to start over.
pub struct SampleStream<'a> {
    reader: &'a mut PrefetchingReader,
}

impl<'a> SampleStream<'a> {
    pub fn current_chunk(&self) -> usize {
        self.reader.current_chunk
    }

    pub fn labels(&self) -> &LabelLookup {
        &self.reader.labels
    }

    pub fn batches(self, batch_size: usize) -> Result<BatchStream<'a>> {
        if batch_size == 0 {
            return Err(ChunkCacheError::ConfigError(
                "batch size must be greater than zero".into(),
            ));
        }
        let sample_len = self.reader.metadata().sample_len();
        Ok(BatchStream {
            samples: self,
            batch_size,
            sample_len,
            next_batch: 0,
        })
    }
}

impl Iterator for SampleStream<'_> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_sample()
    }
}

/// Groups a [`SampleStream`] into fixed-size batches. Batches may straddle
/// chunk boundaries.
pub struct BatchStream<'a> {
    samples: SampleStream<'a>,
    batch_size: usize,
    sample_len: usize,
    next_batch: usize,
}

impl Iterator for BatchStream<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Batch::with_capacity(self.next_batch, self.batch_size, self.sample_len);
        for _ in 0..self.batch_size {
            match self.samples.next()? {
                Ok(sample) => batch.push(&sample.data, sample.label),
                Err(e) => return Some(Err(e)),
            }
        }
        self.next_batch += 1;
        Some(Ok(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataloader::codec::DecodedChunk;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    /// Sample `j` of chunk `i` is `[i, j]` with label `i * 100 + j`.
    struct Synthetic {
        metadata: DatasetMetadata,
        delay: Duration,
        fail_chunk: Option<usize>,
        loads: Mutex<Vec<usize>>,
    }

    impl Synthetic {
        fn new(total: usize, capacity: usize) -> Self {
            Synthetic {
                metadata: DatasetMetadata::new(total, capacity, vec![2]).unwrap(),
                delay: Duration::ZERO,
                fail_chunk: None,
                loads: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChunkSource for Synthetic {
        fn metadata(&self) -> &DatasetMetadata {
            &self.metadata
        }

        fn load_chunk(&self, index: usize) -> Result<DecodedChunk> {
            thread::sleep(self.delay);
            self.loads.lock().unwrap().push(index);
            if self.fail_chunk == Some(index) {
                return Err(ChunkCacheError::ChunkCorrupt {
                    index,
                    reason: "injected".into(),
                });
            }

            let len = self.metadata.chunk_sizes[index];
            let data = (0..len).flat_map(|j| [index as f32, j as f32]).collect();
            let labels = (0..len).map(|j| (index * 100 + j) as i64).collect();
            Ok(DecodedChunk { index, data, labels })
        }

        fn chunk_not_found(&self, index: usize) -> ChunkCacheError {
            ChunkCacheError::ChunkNotFound {
                name: "synthetic".into(),
                index,
                path: std::path::PathBuf::new(),
            }
        }
    }

    fn reader(source: Synthetic) -> PrefetchingReader {
        PrefetchingReader::with_source(Arc::new(source), LabelLookup::new()).unwrap()
    }

    #[test]
    fn visits_chunks_cyclically() {
        let mut reader = reader(Synthetic::new(10, 4));
        assert_eq!(reader.len(), 10);
        assert_eq!(reader.num_chunks(), 3);

        let visited: Vec<(usize, usize)> = reader
            .iter()
            .unwrap()
            .take(25)
            .map(|s| {
                let s = s.unwrap();
                (s.chunk, s.offset)
            })
            .collect();

        let one_pass: Vec<(usize, usize)> = (0..4)
            .map(|j| (0, j))
            .chain((0..4).map(|j| (1, j)))
            .chain((0..2).map(|j| (2, j)))
            .collect();
        let expected: Vec<(usize, usize)> = one_pass.iter().cycle().take(25).copied().collect();
        assert_eq!(visited, expected);
    }

    #[test]
    fn short_chunk_never_exposes_stale_samples() {
        // Chunk 2 (2 samples) lands in slot 0, which held the 4-sample chunk 0
        let mut reader = reader(Synthetic::new(10, 4));
        for sample in reader.iter().unwrap().take(30) {
            let sample = sample.unwrap();
            let declared = [4, 4, 2][sample.chunk];
            assert!(sample.offset < declared);
            assert_eq!(&*sample.data, &[sample.chunk as f32, sample.offset as f32]);
            assert_eq!(sample.label, (sample.chunk * 100 + sample.offset) as i64);
        }
    }

    #[test]
    fn single_chunk_dataset_repeats() {
        let mut reader = reader(Synthetic::new(3, 8));
        let labels: Vec<i64> = reader.iter().unwrap().take(7).map(|s| s.unwrap().label).collect();
        assert_eq!(labels, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn waits_for_in_flight_prefetch() {
        let source = Arc::new(Synthetic {
            delay: Duration::from_millis(300),
            ..Synthetic::new(4, 2)
        });
        let mut reader =
            PrefetchingReader::with_source(source.clone(), LabelLookup::new()).unwrap();
        let mut stream = reader.iter().unwrap();

        // Chunk 0 drains immediately while chunk 1 is still sleeping in the worker
        assert_eq!(stream.next().unwrap().unwrap().chunk, 0);
        assert_eq!(stream.next().unwrap().unwrap().chunk, 0);
        assert_eq!(*source.loads.lock().unwrap(), vec![0]);

        let first_of_next = stream.next().unwrap().unwrap();
        assert_eq!((first_of_next.chunk, first_of_next.offset), (1, 0));
        assert!(source.loads.lock().unwrap().contains(&1));
    }

    #[test]
    fn failed_prefetch_ends_the_pass() {
        let mut reader = reader(Synthetic {
            fail_chunk: Some(2),
            ..Synthetic::new(10, 4)
        });

        let results: Vec<Result<Sample>> = reader.iter().unwrap().take(20).collect();
        assert_eq!(results.len(), 9);
        assert!(results[..8].iter().all(|r| r.is_ok()));
        assert!(matches!(
            results[8],
            Err(ChunkCacheError::PrefetchFailure { index: 2, .. })
        ));

        // A fresh pass starts over from chunk 0
        let first = reader.iter().unwrap().next().unwrap().unwrap();
        assert_eq!((first.chunk, first.offset), (0, 0));
    }

    #[test]
    fn restart_after_partial_pass() {
        let mut reader = reader(Synthetic::new(10, 4));
        let _ = reader.iter().unwrap().take(6).count();

        let labels: Vec<i64> = reader.iter().unwrap().take(5).map(|s| s.unwrap().label).collect();
        assert_eq!(labels, vec![0, 1, 2, 3, 100]);
    }

    #[test]
    fn batches_straddle_chunks() {
        let mut reader = reader(Synthetic::new(10, 4));
        let batches: Vec<Batch> = reader
            .iter()
            .unwrap()
            .batches(3)
            .unwrap()
            .take(4)
            .map(|b| b.unwrap())
            .collect();

        assert_eq!(batches[0].labels, vec![0, 1, 2]);
        assert_eq!(batches[1].labels, vec![3, 100, 101]);
        assert_eq!(batches[2].labels, vec![102, 103, 200]);
        assert_eq!(batches[3].labels, vec![201, 0, 1]);
        assert_eq!(batches[3].batch_number, 3);
        assert_eq!(batches[1].sample(1), Some((&[1.0f32, 0.0][..], 100)));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut reader = reader(Synthetic::new(4, 2));
        let stream = reader.iter().unwrap();
        assert!(matches!(stream.batches(0), Err(ChunkCacheError::ConfigError(_))));
    }
}
