//! Ranged GET loop.

use crate::buffer::Slot;
use crate::error::DmcError;
use crate::range::ByteRange;
use crate::wire::{Method, Request};

use super::body::{deliver, Delivery};
use super::fallback;
use super::worker::Worker;

/// Reserves ranges and fetches them until nothing is left, the buffer
/// closes, partial reads are refused or a fatal error is recorded.
pub(super) fn run(worker: &mut Worker) {
    let shared = worker.shared.clone();
    let want = shared
        .settings
        .chunk_size
        .max(shared.buffer.slot_size() as u64)
        .max(1);
    loop {
        if !shared.partial_allowed() || shared.failed() {
            break;
        }
        let Some(slot) = shared.buffer.acquire_for_fill() else {
            break;
        };
        let Some(range) = shared.allocator.reserve(want) else {
            shared.buffer.abandon_fill(slot);
            break;
        };
        if !fetch_range(worker, range, slot) {
            break;
        }
    }
}

/// One ranged GET. Returns false when the worker should stop.
fn fetch_range(worker: &mut Worker, range: ByteRange, slot: Slot) -> bool {
    let shared = worker.shared.clone();
    let request = Request::new(Method::Get, worker.path()).with_range(range);
    let resp = match worker.send(request) {
        Ok(resp) => resp,
        Err(e) => {
            shared.buffer.abandon_fill(slot);
            shared.allocator.unclaim(range);
            if worker.retry_transport(&e) {
                return true;
            }
            shared.fail(e.into());
            return false;
        }
    };

    if resp.status == 416 {
        shared.buffer.abandon_fill(slot);
        let total = resp.headers.content_range.and_then(|c| c.total);
        let end = total.map_or(range.start, |t| t.min(range.start));
        if total.is_some() {
            shared.confirm();
        }
        shared.allocator.claim_from(end);
        worker.succeeded();
        return true;
    }

    if resp.is_redirect() {
        shared.buffer.abandon_fill(slot);
        shared.allocator.unclaim(range);
        return match worker.follow_redirect(&resp) {
            Ok(()) => true,
            Err(e) => {
                shared.fail(e);
                false
            }
        };
    }

    if resp.status == 501 {
        shared.buffer.abandon_fill(slot);
        shared.allocator.unclaim(range);
        tracing::info!("ranged GET rejected by {}, reading whole body", shared.location());
        shared.disable_partial();
        return false;
    }

    if !resp.is_success() {
        shared.buffer.abandon_fill(slot);
        shared.allocator.unclaim(range);
        if worker.retry_status(resp.status) {
            return true;
        }
        shared.fail(DmcError::status(resp.status, resp.reason));
        return false;
    }

    shared.confirm();
    match deliver(&shared, range, resp, Some(slot)) {
        Delivery::Complete => {
            worker.succeeded();
            true
        }
        Delivery::BufferClosed => false,
        Delivery::Interrupted(e) => {
            if worker.retry_transport(&e) {
                return true;
            }
            shared.fail(e.into());
            false
        }
    }
}

/// Runs on the last worker to finish: whole-body GET when ranged reads
/// never worked, then end-of-fill.
pub(super) fn finish(worker: &mut Worker) {
    let shared = worker.shared.clone();
    if !shared.failed() && !shared.buffer.has_error() {
        let confirmed = shared.confirmed();
        let leftover = !shared.partial_allowed() && !shared.allocator.is_empty();
        if !confirmed || leftover {
            if !confirmed {
                shared.allocator.unclaim(ByteRange::unbounded(0));
            }
            fallback::download(worker);
        }
    }
    shared.buffer.end_fill();
}
