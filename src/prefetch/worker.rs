use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, SendError, Sender};
use tracing::{debug, warn};

use crate::dataloader::codec::{ChunkSource, DecodedChunk};
use crate::dataloader::error::{ChunkCacheError, Result};

use super::double_buffer::Slot;
use super::future::{LoadFuture, LoadOutcome, LoadPromise};

struct LoadJob {
    index: usize,
    slot: Slot,
    promise: LoadPromise,
}

/// The single background thread that fills the inactive slot.
pub struct PrefetchWorker {
    jobs: Option<Sender<LoadJob>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PrefetchWorker {
    pub fn new(source: Arc<dyn ChunkSource>) -> Result<PrefetchWorker> {
        // Capacity 1: the reader never has more than one load outstanding
        let (jobs, queue) = bounded::<LoadJob>(1);

        let thread = thread::Builder::new()
            .name("chunk-prefetch".into())
            .spawn(move || {
                for job in queue.iter() {
                    Self::process_work(source.as_ref(), job);
                }
            })?;

        Ok(PrefetchWorker {
            jobs: Some(jobs),
            thread: Some(thread),
        })
    }

    /// Hands `slot` to the worker to be filled with chunk `index`.
    pub fn submit(&self, index: usize, slot: Slot) -> LoadFuture {
        let (future, promise) = LoadFuture::new(index);
        let job = LoadJob { index, slot, promise };

        let sent = match &self.jobs {
            Some(jobs) => jobs.send(job),
            None => Err(SendError(job)),
        };

        if let Err(SendError(job)) = sent {
            job.promise.complete(LoadOutcome {
                index,
                slot: job.slot,
                result: Err(ChunkCacheError::WorkerDisconnected),
            });
        } else {
            debug!(chunk = index, "prefetch submitted");
        }

        future
    }

    fn process_work(source: &dyn ChunkSource, job: LoadJob) {
        let LoadJob { index, mut slot, promise } = job;
        let result = load_chunk_into(source, index, &mut slot);

        match &result {
            Ok(()) => debug!(chunk = index, samples = slot.valid_len(), "prefetch complete"),
            Err(e) => warn!(chunk = index, error = %e, "prefetch failed"),
        }

        promise.complete(LoadOutcome { index, slot, result });
    }
}

impl Drop for PrefetchWorker {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop once any in-flight load is done
        drop(self.jobs.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Loads chunk `index` and checks it against the size the metadata declares.
pub fn decode_checked(source: &dyn ChunkSource, index: usize) -> Result<DecodedChunk> {
    let metadata = source.metadata();
    let declared = *metadata
        .chunk_sizes
        .get(index)
        .ok_or_else(|| source.chunk_not_found(index))?;

    let chunk = source.load_chunk(index)?;
    if chunk.len() != declared || chunk.data.len() != declared * metadata.sample_len() {
        return Err(ChunkCacheError::ShapeMismatch {
            index,
            expected: vec![declared, metadata.sample_len()],
            actual: vec![chunk.len(), chunk.data.len() / metadata.sample_len()],
        });
    }

    Ok(chunk)
}

/// Decodes chunk `index` from `source` into the prefix of `slot`.
pub fn load_chunk_into(source: &dyn ChunkSource, index: usize, slot: &mut Slot) -> Result<()> {
    let chunk = decode_checked(source, index)?;
    slot.write(index, &chunk.data, &chunk.labels, chunk.len())
}
