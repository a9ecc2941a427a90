//! Unclaimed-range bookkeeping shared by all workers of a session.

use std::sync::{Mutex, MutexGuard};

use super::interval::{ByteRange, UNBOUNDED};

/// Tracks the byte intervals of one object that nobody owns and nobody has
/// delivered yet.
///
/// The set is kept sorted, non-overlapping and coalesced: no stored interval
/// is empty and no two stored intervals touch. The lock is held only across
/// the bookkeeping itself.
#[derive(Debug)]
pub struct RangeAllocator {
    unclaimed: Mutex<Vec<ByteRange>>,
}

impl RangeAllocator {
    /// New allocator covering `[0, size)`, or `[0, ∞)` when the size is unknown.
    pub fn new(size: Option<u64>) -> Self {
        let all = ByteRange {
            start: 0,
            end: size.unwrap_or(UNBOUNDED),
        };
        let unclaimed = if all.is_empty() { Vec::new() } else { vec![all] };
        Self {
            unclaimed: Mutex::new(unclaimed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ByteRange>> {
        self.unclaimed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes up to `max_len` bytes from the front of the lowest unclaimed
    /// interval. Returns `None` when nothing is left; never blocks.
    pub fn reserve(&self, max_len: u64) -> Option<ByteRange> {
        if max_len == 0 {
            return None;
        }
        let mut set = self.lock();
        let first = set.first_mut()?;
        if first.len() <= max_len {
            return Some(set.remove(0));
        }
        let taken = ByteRange::new(first.start, max_len);
        first.start = taken.end;
        Some(taken)
    }

    /// Removes every unclaimed byte inside `range` and returns exactly the
    /// pieces that were removed, in offset order. The caller owns them.
    pub fn claim(&self, range: ByteRange) -> Vec<ByteRange> {
        if range.is_empty() {
            return Vec::new();
        }
        let mut set = self.lock();
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(set.len() + 1);
        for interval in set.drain(..) {
            match interval.intersect(&range) {
                None => kept.push(interval),
                Some(cut) => {
                    if interval.start < cut.start {
                        kept.push(ByteRange {
                            start: interval.start,
                            end: cut.start,
                        });
                    }
                    if cut.end < interval.end {
                        kept.push(ByteRange {
                            start: cut.end,
                            end: interval.end,
                        });
                    }
                    removed.push(cut);
                }
            }
        }
        *set = kept;
        removed
    }

    /// Everything from `offset` onward is covered: the object ends there.
    pub fn claim_from(&self, offset: u64) -> Vec<ByteRange> {
        self.claim(ByteRange::unbounded(offset))
    }

    /// Returns `range` to the pending work, merging with overlapping and
    /// adjacent intervals.
    pub fn unclaim(&self, range: ByteRange) {
        if range.is_empty() {
            return;
        }
        let mut set = self.lock();
        let mut merged = range;
        let mut placed = false;
        let mut out = Vec::with_capacity(set.len() + 1);
        for interval in set.drain(..) {
            if interval.end < merged.start {
                out.push(interval);
            } else if interval.start > merged.end {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push(interval);
            } else {
                merged.start = merged.start.min(interval.start);
                merged.end = merged.end.max(interval.end);
            }
        }
        if !placed {
            out.push(merged);
        }
        *set = out;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the unclaimed intervals, in offset order.
    pub fn unclaimed(&self) -> Vec<ByteRange> {
        self.lock().clone()
    }

    /// Bytes still unclaimed (saturates for unbounded intervals).
    pub fn remaining(&self) -> u64 {
        self.lock()
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn r(start: u64, end: u64) -> ByteRange {
        ByteRange { start, end }
    }

    #[test]
    fn reserve_splits_front_interval() {
        let a = RangeAllocator::new(Some(10));
        assert_eq!(a.reserve(4), Some(r(0, 4)));
        assert_eq!(a.reserve(4), Some(r(4, 8)));
        assert_eq!(a.reserve(4), Some(r(8, 10)));
        assert_eq!(a.reserve(4), None);
        assert!(a.is_empty());
    }

    #[test]
    fn reserve_on_empty_returns_none() {
        let a = RangeAllocator::new(Some(0));
        assert!(a.is_empty());
        assert_eq!(a.reserve(1 << 20), None);
        assert_eq!(a.reserve(0), None);
    }

    #[test]
    fn unbounded_allocator_keeps_handing_out() {
        let a = RangeAllocator::new(None);
        assert_eq!(a.reserve(100), Some(r(0, 100)));
        assert_eq!(a.reserve(100), Some(r(100, 200)));
        a.claim_from(150);
        assert!(a.is_empty());
    }

    #[test]
    fn unclaim_then_reserve_round_trips() {
        let a = RangeAllocator::new(Some(1000));
        let got = a.reserve(300).unwrap();
        a.unclaim(got);
        assert_eq!(a.reserve(300), Some(got));
    }

    #[test]
    fn claim_spanning_three_intervals_leaves_nothing() {
        let a = RangeAllocator::new(Some(0));
        a.unclaim(r(0, 10));
        a.unclaim(r(20, 30));
        a.unclaim(r(40, 50));
        assert_eq!(a.unclaimed().len(), 3);
        let removed = a.claim(r(0, 50));
        assert_eq!(removed, vec![r(0, 10), r(20, 30), r(40, 50)]);
        assert!(a.unclaimed().is_empty());
    }

    #[test]
    fn claim_trims_and_splits() {
        let a = RangeAllocator::new(Some(100));
        assert_eq!(a.claim(r(10, 20)), vec![r(10, 20)]);
        assert_eq!(a.unclaimed(), vec![r(0, 10), r(20, 100)]);
        assert_eq!(a.claim(r(5, 25)), vec![r(5, 10), r(20, 25)]);
        assert_eq!(a.unclaimed(), vec![r(0, 5), r(25, 100)]);
        assert!(a.claim(r(5, 25)).is_empty());
        assert!(a.claim(r(7, 7)).is_empty());
    }

    #[test]
    fn unclaim_merges_overlapping_and_adjacent() {
        let a = RangeAllocator::new(Some(0));
        a.unclaim(r(10, 20));
        a.unclaim(r(15, 25));
        assert_eq!(a.unclaimed(), vec![r(10, 25)]);
        a.unclaim(r(25, 30));
        assert_eq!(a.unclaimed(), vec![r(10, 30)]);
        a.unclaim(r(40, 50));
        a.unclaim(r(0, 5));
        assert_eq!(a.unclaimed(), vec![r(0, 5), r(10, 30), r(40, 50)]);
        a.unclaim(r(5, 45));
        assert_eq!(a.unclaimed(), vec![r(0, 50)]);
        a.unclaim(r(3, 3));
        assert_eq!(a.unclaimed(), vec![r(0, 50)]);
    }

    #[test]
    fn concurrent_reserves_never_overlap() {
        let a = Arc::new(RangeAllocator::new(Some(64 * 1024)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let a = Arc::clone(&a);
                std::thread::spawn(move || {
                    let mut mine = Vec::new();
                    while let Some(got) = a.reserve(100) {
                        mine.push(got);
                    }
                    mine
                })
            })
            .collect();
        let mut all: Vec<ByteRange> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_by_key(|x| x.start);
        let mut next = 0;
        for got in all {
            assert_eq!(got.start, next, "gap or overlap at {}", next);
            next = got.end;
        }
        assert_eq!(next, 64 * 1024);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Reserve(u64),
        Claim(u64, u64),
        Unclaim(u64, u64),
    }

    #[derive(Clone, Debug)]
    struct OpSequence(Vec<Op>);

    const SIZE: u64 = 96;

    impl Arbitrary for OpSequence {
        fn arbitrary(g: &mut Gen) -> Self {
            let count = usize::arbitrary(g) % 60 + 1;
            let ops = (0..count)
                .map(|_| {
                    let a = u64::arbitrary(g) % (SIZE + 8);
                    let len = u64::arbitrary(g) % 40;
                    match u8::arbitrary(g) % 3 {
                        0 => Op::Reserve(len),
                        1 => Op::Claim(a, len),
                        _ => Op::Unclaim(a, len),
                    }
                })
                .collect();
            OpSequence(ops)
        }
    }

    fn model_set(model: &HashSet<u64>) -> Vec<ByteRange> {
        let mut bytes: Vec<u64> = model.iter().copied().collect();
        bytes.sort_unstable();
        let mut out: Vec<ByteRange> = Vec::new();
        for b in bytes {
            match out.last_mut() {
                Some(last) if last.end == b => last.end = b + 1,
                _ => out.push(r(b, b + 1)),
            }
        }
        out
    }

    #[quickcheck]
    fn prop_unclaimed_set_matches_byte_model(OpSequence(ops): OpSequence) {
        let a = RangeAllocator::new(Some(SIZE));
        let mut model: HashSet<u64> = (0..SIZE).collect();

        for op in ops {
            match op {
                Op::Reserve(len) => {
                    if let Some(got) = a.reserve(len) {
                        assert!(got.len() <= len && !got.is_empty());
                        for b in got.start..got.end {
                            assert!(model.remove(&b), "byte {} handed out twice", b);
                        }
                    } else {
                        assert!(len == 0 || model.is_empty());
                    }
                }
                Op::Claim(start, len) => {
                    let removed = a.claim(ByteRange::new(start, len));
                    let mut count = 0;
                    for piece in removed {
                        for b in piece.start..piece.end {
                            assert!(model.remove(&b), "claimed byte {} was not unclaimed", b);
                            count += 1;
                        }
                    }
                    let left_in_range = (start..start + len).filter(|b| model.contains(b)).count();
                    assert_eq!(left_in_range, 0, "claim left bytes behind (removed {})", count);
                }
                Op::Unclaim(start, len) => {
                    a.unclaim(ByteRange::new(start, len));
                    model.extend(start..start + len);
                }
            }

            let set = a.unclaimed();
            for w in set.windows(2) {
                assert!(w[0].end < w[1].start, "not coalesced: {:?}", set);
            }
            assert!(set.iter().all(|x| !x.is_empty()));
            assert_eq!(set, model_set(&model));
        }
    }
}
