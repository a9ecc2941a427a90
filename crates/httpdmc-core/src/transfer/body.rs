//! Delivery of a successful GET body into the shared buffer.
//!
//! Only bytes this worker owns are written: the reserved range plus whatever
//! unclaimed bytes the response additionally covers (claimed up front).
//! Owned bytes the body did not deliver go back to the allocator.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::buffer::{BufferWriter, Slot};
use crate::range::ByteRange;
use crate::wire::{Response, TransportError};

use super::Shared;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
pub(super) enum Delivery {
    /// Body fully read; every owned byte it carried is in the buffer.
    Complete,
    /// No fill slot could be obtained; the session is winding down.
    BufferClosed,
    /// The body stream broke off.
    Interrupted(TransportError),
}

/// Object span carried by `resp` and the object size it reveals.
fn body_span(resp: &Response, reserved: ByteRange) -> (ByteRange, Option<u64>, bool) {
    let headers = &resp.headers;
    if resp.status == 206 {
        let cr = headers.content_range;
        let start = cr
            .and_then(|c| c.range)
            .map_or(reserved.start, |r| r.start);
        let len = cr
            .and_then(|c| c.range)
            .map(|r| r.len())
            .or(headers.content_length)
            .or(resp.body.known_len());
        let total = cr.and_then(|c| c.total);
        let span = len.map_or(ByteRange::unbounded(start), |l| ByteRange::new(start, l));
        (span, total, len.is_some())
    } else {
        let len = headers.content_length.or(resp.body.known_len());
        let span = len.map_or(ByteRange::unbounded(0), |l| ByteRange::new(0, l));
        (span, len, len.is_some())
    }
}

/// Writes the owned part of `resp`'s body. `slot` is an already acquired
/// fill slot to start with, if any.
pub(super) fn deliver(
    shared: &Shared,
    reserved: ByteRange,
    resp: Response,
    slot: Option<Slot>,
) -> Delivery {
    let (span, total, length_known) = body_span(&resp, reserved);

    let mut owned: Vec<ByteRange> = Vec::new();
    if !reserved.is_empty() {
        owned.push(reserved);
    }
    owned.extend(shared.allocator.claim(span));
    if let Some(total) = total {
        shared.allocator.claim_from(total);
        owned = owned
            .into_iter()
            .map(|r| r.clip(total))
            .filter(|r| !r.is_empty())
            .collect();
    }
    owned.sort_by_key(|r| r.start);

    let buffer = Arc::clone(&shared.buffer);
    let mut writer = match slot {
        Some(slot) => BufferWriter::with_slot(buffer, slot, span.start),
        None => BufferWriter::new(buffer, span.start),
    }
    .with_progress(Arc::clone(&shared.delivered));

    let mut reader = resp.body.into_reader();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pos = span.start;
    let mut outcome = Delivery::Complete;

    'body: loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                outcome = Delivery::Interrupted(TransportError::new(e.to_string()));
                break;
            }
        };
        let got = ByteRange::new(pos, n as u64);
        for piece in owned.iter().filter_map(|r| r.intersect(&got)) {
            let from = (piece.start - pos) as usize;
            let to = (piece.end - pos) as usize;
            writer.seek(piece.start);
            if writer.write_all(&chunk[from..to]).is_err() {
                outcome = Delivery::BufferClosed;
                break 'body;
            }
        }
        pos += n as u64;
    }
    writer.finish();

    let covered = ByteRange {
        start: span.start,
        end: pos,
    };
    let mut object_end = None;
    if matches!(outcome, Delivery::Complete) {
        if pos == span.start && total.is_none() {
            // Empty success without a stated size: the object ends here.
            object_end = Some(pos);
        } else if length_known && pos < span.end {
            outcome = Delivery::Interrupted(TransportError::new(format!(
                "body ended at {} of {}",
                pos, span.end
            )));
        } else if !length_known {
            object_end = Some(pos);
        }
    }

    for r in &owned {
        let before = ByteRange {
            start: r.start,
            end: r.end.min(covered.start),
        };
        let after = ByteRange {
            start: r.start.max(covered.end),
            end: r.end,
        };
        shared.allocator.unclaim(before);
        if object_end.is_none() {
            shared.allocator.unclaim(after);
        }
    }
    if let Some(end) = object_end {
        tracing::debug!("object ends at {}", end);
        shared.allocator.claim_from(end);
    }
    outcome
}
