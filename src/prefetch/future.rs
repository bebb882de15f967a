use crossbeam_channel::{bounded, Receiver, Sender};

use crate::dataloader::error::{ChunkCacheError, Result};

use super::double_buffer::Slot;

/// What a finished load hands back: the slot always comes home, whether or not
/// the chunk made it into it.
pub struct LoadOutcome {
    pub index: usize,
    pub slot: Slot,
    pub result: Result<()>,
}

/// Completion handle for one background load.
pub struct LoadFuture {
    pub index: usize,
    receiver: Receiver<LoadOutcome>,
}

/// Worker side of a [`LoadFuture`].
pub struct LoadPromise {
    sender: Sender<LoadOutcome>,
}

impl LoadFuture {
    pub fn new(index: usize) -> (LoadFuture, LoadPromise) {
        let (sender, receiver) = bounded(1);
        (LoadFuture { index, receiver }, LoadPromise { sender })
    }

    pub fn is_complete(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Blocks until the worker reports back. A worker that goes away without
    /// reporting takes the slot with it.
    pub fn wait(self) -> Result<LoadOutcome> {
        self.receiver
            .recv()
            .map_err(|_| ChunkCacheError::WorkerDisconnected)
    }
}

impl LoadPromise {
    pub fn complete(self, outcome: LoadOutcome) {
        // The future may already be gone if its reader was dropped mid-load.
        let _ = self.sender.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_complete() {
        let (future, promise) = LoadFuture::new(4);
        assert!(!future.is_complete());

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            promise.complete(LoadOutcome {
                index: 4,
                slot: Slot::new(1, 1),
                result: Ok(()),
            });
        });

        let outcome = future.wait().unwrap();
        assert_eq!(outcome.index, 4);
        assert!(outcome.result.is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn dropped_promise_disconnects() {
        let (future, promise) = LoadFuture::new(0);
        drop(promise);
        assert!(matches!(future.wait(), Err(ChunkCacheError::WorkerDisconnected)));
    }
}
