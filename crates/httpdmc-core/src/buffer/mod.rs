//! Shared buffer contract between the caller and the transfer engine.
//!
//! Downloads fill slots and the caller drains them; uploads are the mirror
//! image. Slots are owned values: every acquired slot must be handed back
//! exactly once through a commit or abandon call, which consumes it.

mod slots;
mod stream;

pub use slots::SlotBuffer;
pub use stream::{BufferReader, BufferWriter};

/// Generation-checked slot identifier.
///
/// The generation changes every time the slot is handed out, so a stale id
/// released twice is detected instead of corrupting another owner's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// One buffer slot on loan from a [`SharedBuffer`].
#[must_use = "a slot must be committed or abandoned"]
#[derive(Debug)]
pub struct Slot {
    id: SlotId,
    offset: u64,
    data: Vec<u8>,
    capacity: usize,
}

impl Slot {
    /// Slot holding `data` that belongs at object offset `offset`. For fill
    /// slots `data` starts empty and the offset is supplied on commit.
    pub fn new(id: SlotId, offset: u64, data: Vec<u8>, capacity: usize) -> Self {
        Self {
            id,
            offset,
            data,
            capacity,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Object offset of the first byte (drain slots).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Free space left in the slot.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    /// Copies as much of `bytes` as fits; returns the number copied.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Slot-based buffer shared by the engine and the application.
///
/// `acquire_*` calls may block until a slot is available; they return
/// `None` once the buffer is errored or the relevant side has ended.
pub trait SharedBuffer: Send + Sync {
    /// Capacity of every slot in bytes.
    fn slot_size(&self) -> usize;

    /// Empty slot to be filled. `None` when errored or no more data is wanted.
    fn acquire_for_fill(&self) -> Option<Slot>;
    /// Publishes the first `len` bytes of `slot` as the data at `offset`.
    fn commit_filled(&self, slot: Slot, len: usize, offset: u64);
    /// Returns an unfilled slot.
    fn abandon_fill(&self, slot: Slot);

    /// Filled slot to be consumed. `None` when errored, or when filling has
    /// ended and nothing filled is left.
    fn acquire_for_drain(&self) -> Option<Slot>;
    /// Marks the slot's data as consumed and frees the slot.
    fn commit_drained(&self, slot: Slot);
    /// Puts the slot back as filled so it is handed out again.
    fn abandon_drain(&self, slot: Slot);

    fn end_fill(&self);
    fn end_drain(&self);
    fn fill_ended(&self) -> bool;
    fn drain_ended(&self) -> bool;

    /// Puts the buffer in the errored state and wakes every waiter.
    fn mark_error(&self);
    fn has_error(&self) -> bool;
}
