//! In-process slot buffer (`Mutex` + `Condvar`).

use std::io::{self, Read};
use std::sync::{Condvar, Mutex, MutexGuard};

use super::{SharedBuffer, Slot, SlotId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Filling,
    Filled { offset: u64, len: usize },
    Draining,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    state: SlotState,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Inner {
    entries: Vec<Entry>,
    fill_ended: bool,
    drain_ended: bool,
    error: bool,
}

/// Fixed set of equally sized slots guarded by one lock.
///
/// Fill acquirers wait for a free slot, drain acquirers wait for the
/// lowest-offset filled slot. Both wake up on error and on end signals.
#[derive(Debug)]
pub struct SlotBuffer {
    slot_size: usize,
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl SlotBuffer {
    pub fn new(slot_size: usize, slots: usize) -> Self {
        let entries = (0..slots.max(1))
            .map(|_| Entry {
                generation: 0,
                state: SlotState::Free,
                data: Vec::new(),
            })
            .collect();
        Self {
            slot_size: slot_size.max(1),
            inner: Mutex::new(Inner {
                entries,
                fill_ended: false,
                drain_ended: false,
                error: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        self.changed.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    /// Looks up the entry behind `id` if it is still in `expected` state for
    /// the same generation.
    fn entry_for<'a>(
        inner: &'a mut Inner,
        id: SlotId,
        expected: fn(&SlotState) -> bool,
        op: &str,
    ) -> Option<&'a mut Entry> {
        match inner.entries.get_mut(id.index() as usize) {
            Some(entry) if entry.generation == id.generation() && expected(&entry.state) => {
                Some(entry)
            }
            _ => {
                tracing::warn!(
                    "stale slot {}#{} passed to {}",
                    id.index(),
                    id.generation(),
                    op
                );
                None
            }
        }
    }

    /// Application side of an upload: copies `reader` into consecutive slots
    /// starting at offset 0, then ends the fill side. Returns bytes filled.
    pub fn fill_from<R: Read>(&self, mut reader: R) -> io::Result<u64> {
        let mut offset = 0u64;
        loop {
            let Some(mut slot) = self.acquire_for_fill() else {
                break;
            };
            let mut chunk = vec![0u8; slot.remaining()];
            let mut got = 0;
            while got < chunk.len() {
                match reader.read(&mut chunk[got..]) {
                    Ok(0) => break,
                    Ok(n) => got += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.abandon_fill(slot);
                        self.mark_error();
                        return Err(e);
                    }
                }
            }
            if got == 0 {
                self.abandon_fill(slot);
                break;
            }
            slot.append(&chunk[..got]);
            self.commit_filled(slot, got, offset);
            offset += got as u64;
        }
        self.end_fill();
        Ok(offset)
    }

    /// Blocks until the engine has drained everything (upload finished).
    /// Returns false if the buffer errored instead.
    pub fn wait_drain_ended(&self) -> bool {
        let mut inner = self.lock();
        while !inner.drain_ended && !inner.error {
            inner = self.wait(inner);
        }
        !inner.error
    }

    /// Blocks until the fill side has ended (download finished).
    /// Returns false if the buffer errored instead.
    pub fn wait_fill_ended(&self) -> bool {
        let mut inner = self.lock();
        while !inner.fill_ended && !inner.error {
            inner = self.wait(inner);
        }
        !inner.error
    }

    /// Application side of a download: drains every slot into `out`, placing
    /// each at its offset, until the fill side ends. Returns bytes drained.
    pub fn drain_into(&self, out: &mut Vec<u8>) -> u64 {
        let mut total = 0u64;
        while let Some(slot) = self.acquire_for_drain() {
            let start = slot.offset() as usize;
            let end = start + slot.len();
            if out.len() < end {
                out.resize(end, 0);
            }
            out[start..end].copy_from_slice(slot.as_bytes());
            total += slot.len() as u64;
            self.commit_drained(slot);
        }
        self.end_drain();
        total
    }
}

impl SharedBuffer for SlotBuffer {
    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn acquire_for_fill(&self) -> Option<Slot> {
        let mut inner = self.lock();
        loop {
            if inner.error || inner.fill_ended || inner.drain_ended {
                return None;
            }
            if let Some(index) = inner
                .entries
                .iter()
                .position(|e| e.state == SlotState::Free)
            {
                let entry = &mut inner.entries[index];
                entry.generation = entry.generation.wrapping_add(1);
                entry.state = SlotState::Filling;
                let mut data = std::mem::take(&mut entry.data);
                data.clear();
                let id = SlotId::new(index as u32, entry.generation);
                return Some(Slot::new(id, 0, data, self.slot_size));
            }
            inner = self.wait(inner);
        }
    }

    fn commit_filled(&self, slot: Slot, len: usize, offset: u64) {
        let id = slot.id();
        let mut data = slot.into_data();
        data.truncate(len);
        let mut inner = self.lock();
        if let Some(entry) = Self::entry_for(
            &mut inner,
            id,
            |s| *s == SlotState::Filling,
            "commit_filled",
        ) {
            entry.state = if data.is_empty() {
                SlotState::Free
            } else {
                SlotState::Filled {
                    offset,
                    len: data.len(),
                }
            };
            entry.data = data;
        }
        self.changed.notify_all();
    }

    fn abandon_fill(&self, slot: Slot) {
        let id = slot.id();
        let data = slot.into_data();
        let mut inner = self.lock();
        if let Some(entry) = Self::entry_for(
            &mut inner,
            id,
            |s| *s == SlotState::Filling,
            "abandon_fill",
        ) {
            entry.state = SlotState::Free;
            entry.data = data;
        }
        self.changed.notify_all();
    }

    fn acquire_for_drain(&self) -> Option<Slot> {
        let mut inner = self.lock();
        loop {
            if inner.error {
                return None;
            }
            let lowest = inner
                .entries
                .iter()
                .enumerate()
                .filter_map(|(i, e)| match e.state {
                    SlotState::Filled { offset, len } => Some((offset, len, i)),
                    _ => None,
                })
                .min_by_key(|(offset, _, _)| *offset);
            if let Some((offset, len, index)) = lowest {
                let entry = &mut inner.entries[index];
                entry.generation = entry.generation.wrapping_add(1);
                entry.state = SlotState::Draining;
                let mut data = std::mem::take(&mut entry.data);
                data.truncate(len);
                let id = SlotId::new(index as u32, entry.generation);
                return Some(Slot::new(id, offset, data, self.slot_size));
            }
            if inner.fill_ended || inner.drain_ended {
                return None;
            }
            inner = self.wait(inner);
        }
    }

    fn commit_drained(&self, slot: Slot) {
        let id = slot.id();
        let data = slot.into_data();
        let mut inner = self.lock();
        if let Some(entry) = Self::entry_for(
            &mut inner,
            id,
            |s| *s == SlotState::Draining,
            "commit_drained",
        ) {
            entry.state = SlotState::Free;
            entry.data = data;
        }
        self.changed.notify_all();
    }

    fn abandon_drain(&self, slot: Slot) {
        let id = slot.id();
        let offset = slot.offset();
        let data = slot.into_data();
        let mut inner = self.lock();
        if let Some(entry) = Self::entry_for(
            &mut inner,
            id,
            |s| *s == SlotState::Draining,
            "abandon_drain",
        ) {
            entry.state = SlotState::Filled {
                offset,
                len: data.len(),
            };
            entry.data = data;
        }
        self.changed.notify_all();
    }

    fn end_fill(&self) {
        self.lock().fill_ended = true;
        self.changed.notify_all();
    }

    fn end_drain(&self) {
        self.lock().drain_ended = true;
        self.changed.notify_all();
    }

    fn fill_ended(&self) -> bool {
        self.lock().fill_ended
    }

    fn drain_ended(&self) -> bool {
        self.lock().drain_ended
    }

    fn mark_error(&self) {
        self.lock().error = true;
        self.changed.notify_all();
    }

    fn has_error(&self) -> bool {
        self.lock().error
    }
}
