//! Ranged PUT loop, driven by the drain side of the buffer.

use std::sync::atomic::Ordering;

use crate::buffer::Slot;
use crate::error::DmcError;
use crate::range::ByteRange;
use crate::wire::{Method, Request, RequestBody};

use super::fallback;
use super::worker::Worker;

enum Sent {
    All,
    Retry,
    Stop,
}

pub(super) fn run(worker: &mut Worker) {
    let shared = worker.shared.clone();
    loop {
        if !shared.partial_allowed() || shared.failed() {
            break;
        }
        let Some(slot) = shared.buffer.acquire_for_drain() else {
            break;
        };
        if !shared.partial_allowed() {
            shared.buffer.abandon_drain(slot);
            break;
        }
        if slot.is_empty() {
            shared.buffer.commit_drained(slot);
            continue;
        }
        let range = ByteRange::new(slot.offset(), slot.len() as u64);
        let owned = shared.allocator.claim(range);
        if owned.is_empty() {
            // Already sent by an earlier attempt.
            shared.buffer.commit_drained(slot);
            continue;
        }
        match send_pieces(worker, &slot, &owned) {
            Sent::All => {
                shared.buffer.commit_drained(slot);
                worker.succeeded();
            }
            Sent::Retry => shared.buffer.abandon_drain(slot),
            Sent::Stop => {
                shared.buffer.abandon_drain(slot);
                break;
            }
        }
    }
}

/// PUTs each owned piece of `slot`. On failure the pieces not yet sent are
/// returned to the allocator.
fn send_pieces(worker: &mut Worker, slot: &Slot, owned: &[ByteRange]) -> Sent {
    let shared = worker.shared.clone();
    let mut index = 0;
    while index < owned.len() {
        let piece = owned[index];
        let from = (piece.start - slot.offset()) as usize;
        let to = (piece.end - slot.offset()) as usize;
        let request = Request::new(Method::Put, worker.path())
            .with_range(piece)
            .with_total_size(shared.settings.size)
            .with_body(RequestBody::Bytes(slot.as_bytes()[from..to].to_vec()));
        let unsent = &owned[index..];

        let resp = match worker.send(request) {
            Ok(resp) => resp,
            Err(e) => {
                unsent.iter().for_each(|r| shared.allocator.unclaim(*r));
                if worker.retry_transport(&e) {
                    return Sent::Retry;
                }
                shared.fail(e.into());
                return Sent::Stop;
            }
        };
        if resp.is_success() {
            shared.confirm();
            shared.delivered.fetch_add(piece.len(), Ordering::Relaxed);
            index += 1;
            continue;
        }
        if resp.is_redirect() {
            if let Err(e) = worker.follow_redirect(&resp) {
                unsent.iter().for_each(|r| shared.allocator.unclaim(*r));
                shared.fail(e);
                return Sent::Stop;
            }
            continue;
        }
        unsent.iter().for_each(|r| shared.allocator.unclaim(*r));
        if matches!(resp.status, 405 | 501) {
            tracing::info!("ranged PUT rejected by {}, writing whole body", shared.location());
            shared.disable_partial();
            return Sent::Stop;
        }
        if worker.retry_status(resp.status) {
            return Sent::Retry;
        }
        shared.fail(DmcError::status(resp.status, resp.reason));
        return Sent::Stop;
    }
    Sent::All
}

/// Runs on the last worker to finish: whole-body PUT when ranged writes were
/// refused or never happened, then end-of-drain.
pub(super) fn finish(worker: &mut Worker) {
    let shared = worker.shared.clone();
    if !shared.failed() && !shared.buffer.has_error() {
        let partial = shared.partial_allowed();
        let confirmed = shared.confirmed();
        if !partial && confirmed {
            shared.fail(DmcError::Protocol(
                "ranged PUT refused after earlier ranged PUTs succeeded".into(),
            ));
        } else if !partial || !confirmed {
            fallback::upload(worker);
        }
    }
    shared.buffer.end_drain();
}
