use crate::dataloader::error::{ChunkCacheError, Result};

/// One fixed-capacity sample buffer. Only the `[0, valid_len)` prefix holds the
/// current chunk; anything past it belongs to whichever chunk was there before.
#[derive(Debug)]
pub struct Slot {
    data: Box<[f32]>,
    labels: Box<[i64]>,
    sample_len: usize,
    valid_len: usize,
    chunk: Option<usize>,
}

/// Borrowed valid prefix of a slot.
#[derive(Debug, Clone, Copy)]
pub struct SlotView<'a> {
    pub data: &'a [f32],
    pub labels: &'a [i64],
    pub valid_len: usize,
    pub sample_len: usize,
    pub chunk: Option<usize>,
}

impl<'a> SlotView<'a> {
    pub fn sample(&self, offset: usize) -> Option<(&'a [f32], i64)> {
        if offset >= self.valid_len {
            return None;
        }
        let start = offset * self.sample_len;
        Some((&self.data[start..start + self.sample_len], self.labels[offset]))
    }
}

impl Slot {
    pub fn new(capacity: usize, sample_len: usize) -> Slot {
        Slot {
            data: vec![0f32; capacity * sample_len].into_boxed_slice(),
            labels: vec![0i64; capacity].into_boxed_slice(),
            sample_len,
            valid_len: 0,
            chunk: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.labels.len()
    }

    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    pub fn chunk(&self) -> Option<usize> {
        self.chunk
    }

    /// Overwrites the `[0, valid_len)` prefix with chunk `index`.
    pub fn write(
        &mut self,
        index: usize,
        data: &[f32],
        labels: &[i64],
        valid_len: usize,
    ) -> Result<()> {
        if valid_len > self.capacity()
            || labels.len() != valid_len
            || data.len() != valid_len * self.sample_len
        {
            return Err(ChunkCacheError::ShapeMismatch {
                index,
                expected: vec![valid_len.min(self.capacity()), self.sample_len],
                actual: vec![labels.len(), data.len() / self.sample_len.max(1)],
            });
        }

        self.data[..data.len()].copy_from_slice(data);
        self.labels[..valid_len].copy_from_slice(labels);
        self.valid_len = valid_len;
        self.chunk = Some(index);
        Ok(())
    }

    pub fn view(&self) -> SlotView<'_> {
        SlotView {
            data: &self.data[..self.valid_len * self.sample_len],
            labels: &self.labels[..self.valid_len],
            valid_len: self.valid_len,
            sample_len: self.sample_len,
            chunk: self.chunk,
        }
    }
}

/// Two identically shaped slots and the selector naming the one the consumer reads.
///
/// There is no locking here. A slot handed to the prefetch worker is moved out
/// with [`lend`](DoubleBuffer::lend) and comes back through
/// [`restore`](DoubleBuffer::restore), so the consumer can never observe a slot
/// while it is being written.
#[derive(Debug)]
pub struct DoubleBuffer {
    slots: [Option<Slot>; 2],
    active: usize,
}

impl DoubleBuffer {
    pub fn new(capacity: usize, sample_len: usize) -> DoubleBuffer {
        DoubleBuffer {
            slots: [
                Some(Slot::new(capacity, sample_len)),
                Some(Slot::new(capacity, sample_len)),
            ],
            active: 0,
        }
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn inactive(&self) -> usize {
        self.active ^ 1
    }

    pub fn flip(&mut self) {
        self.active ^= 1;
    }

    pub fn reset(&mut self) {
        self.active = 0;
    }

    pub fn write(
        &mut self,
        slot: usize,
        index: usize,
        data: &[f32],
        labels: &[i64],
        valid_len: usize,
    ) -> Result<()> {
        self.slots[slot]
            .as_mut()
            .ok_or(ChunkCacheError::SlotBusy(slot))?
            .write(index, data, labels, valid_len)
    }

    /// `None` while the slot is lent out.
    pub fn read_range(&self, slot: usize) -> Option<SlotView<'_>> {
        self.slots[slot].as_ref().map(Slot::view)
    }

    pub fn lend(&mut self, slot: usize) -> Result<Slot> {
        self.slots[slot].take().ok_or(ChunkCacheError::SlotBusy(slot))
    }

    pub fn restore(&mut self, slot: usize, buffer: Slot) {
        debug_assert!(self.slots[slot].is_none(), "slot {} restored twice", slot);
        self.slots[slot] = Some(buffer);
    }

    pub fn is_lent(&self, slot: usize) -> bool {
        self.slots[slot].is_none()
    }
}
