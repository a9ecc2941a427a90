//! `std::io` adapters over a [`SharedBuffer`].
//!
//! [`BufferReader`] turns the drain side into a sequential byte stream (used
//! as a whole-body upload). [`BufferWriter`] places bytes at object offsets on
//! the fill side (used when delivering response bodies).

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{SharedBuffer, Slot};

/// Reads filled slots in offset order. Offsets must be contiguous from the
/// starting position; a gap is reported as `InvalidData`.
pub struct BufferReader {
    buffer: Arc<dyn SharedBuffer>,
    current: Option<Slot>,
    pos_in_slot: usize,
    next_offset: u64,
    consumed: Arc<AtomicU64>,
}

impl BufferReader {
    pub fn new(buffer: Arc<dyn SharedBuffer>) -> Self {
        Self {
            buffer,
            current: None,
            pos_in_slot: 0,
            next_offset: 0,
            consumed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of bytes handed to the consumer so far; stays valid after the
    /// reader is moved into a request body.
    pub fn consumed(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.consumed)
    }

    fn next_slot(&mut self) -> io::Result<bool> {
        loop {
            let Some(slot) = self.buffer.acquire_for_drain() else {
                if self.buffer.has_error() {
                    return Err(io::Error::new(io::ErrorKind::Other, "buffer errored"));
                }
                return Ok(false);
            };
            if slot.offset() != self.next_offset {
                let offset = slot.offset();
                self.buffer.abandon_drain(slot);
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "non-contiguous slot at offset {} (expected {})",
                        offset, self.next_offset
                    ),
                ));
            }
            if slot.is_empty() {
                self.buffer.commit_drained(slot);
                continue;
            }
            self.current = Some(slot);
            self.pos_in_slot = 0;
            return Ok(true);
        }
    }
}

impl Read for BufferReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(slot) = self.current.as_ref() {
                let available = &slot.as_bytes()[self.pos_in_slot..];
                if !available.is_empty() {
                    let n = available.len().min(out.len());
                    out[..n].copy_from_slice(&available[..n]);
                    self.pos_in_slot += n;
                    self.next_offset += n as u64;
                    self.consumed.fetch_add(n as u64, Ordering::Relaxed);
                    return Ok(n);
                }
                if let Some(done) = self.current.take() {
                    self.buffer.commit_drained(done);
                }
            }
            if !self.next_slot()? {
                return Ok(0);
            }
        }
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        if let Some(slot) = self.current.take() {
            if self.pos_in_slot >= slot.len() {
                self.buffer.commit_drained(slot);
            } else {
                self.buffer.abandon_drain(slot);
            }
        }
    }
}

/// Writes bytes at an object position into fill slots, committing each slot
/// at the offset of its first byte.
pub struct BufferWriter {
    buffer: Arc<dyn SharedBuffer>,
    slot: Option<Slot>,
    slot_start: u64,
    position: u64,
    committed: u64,
    progress: Option<Arc<AtomicU64>>,
}

impl BufferWriter {
    pub fn new(buffer: Arc<dyn SharedBuffer>, position: u64) -> Self {
        Self {
            buffer,
            slot: None,
            slot_start: position,
            position,
            committed: 0,
            progress: None,
        }
    }

    /// Writer that starts with an already acquired fill slot.
    pub fn with_slot(buffer: Arc<dyn SharedBuffer>, slot: Slot, position: u64) -> Self {
        let mut writer = Self::new(buffer, position);
        writer.slot = Some(slot);
        writer
    }

    /// Adds every committed byte count to `counter`.
    pub fn with_progress(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress = Some(counter);
        self
    }

    /// Moves the write position. A partly filled slot is committed first
    /// since slot contents must be contiguous.
    pub fn seek(&mut self, position: u64) {
        if position == self.position {
            return;
        }
        if self.slot.as_ref().is_some_and(|s| !s.is_empty()) {
            self.commit_current();
        }
        self.position = position;
        self.slot_start = position;
    }

    fn commit_current(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let len = slot.len();
        if len == 0 {
            self.buffer.abandon_fill(slot);
            return;
        }
        self.buffer.commit_filled(slot, len, self.slot_start);
        self.committed += len as u64;
        if let Some(counter) = &self.progress {
            counter.fetch_add(len as u64, Ordering::Relaxed);
        }
        self.slot_start = self.position;
    }

    /// Commits any partial slot and returns the total bytes committed.
    pub fn finish(mut self) -> u64 {
        self.commit_current();
        self.committed
    }
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.slot.is_none() {
            match self.buffer.acquire_for_fill() {
                Some(slot) => {
                    self.slot = Some(slot);
                    self.slot_start = self.position;
                }
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "buffer closed for filling",
                    ))
                }
            }
        }
        let Some(slot) = self.slot.as_mut() else {
            return Ok(0);
        };
        let n = slot.append(buf);
        self.position += n as u64;
        if slot.remaining() == 0 {
            self.commit_current();
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit_current();
        Ok(())
    }
}

impl Drop for BufferWriter {
    fn drop(&mut self) {
        self.commit_current();
    }
}
