//! Whole-body transfers used when ranged requests are unavailable.
//!
//! Both share the attempt budget of the worker that runs them.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::buffer::BufferReader;
use crate::error::DmcError;
use crate::range::ByteRange;
use crate::wire::{Method, Request, RequestBody};

use super::body::{deliver, Delivery};
use super::worker::Worker;

/// One unranged GET. The body is written at offset 0, restricted to bytes
/// that are still unclaimed.
pub(super) fn download(worker: &mut Worker) {
    let shared = worker.shared.clone();
    loop {
        if shared.buffer.has_error() {
            return;
        }
        let request = Request::new(Method::Get, worker.path());
        let resp = match worker.send(request) {
            Ok(resp) => resp,
            Err(e) => {
                if worker.retry_transport(&e) {
                    continue;
                }
                shared.fail(e.into());
                return;
            }
        };
        if resp.is_redirect() {
            if let Err(e) = worker.follow_redirect(&resp) {
                shared.fail(e);
                return;
            }
            continue;
        }
        if !resp.is_success() {
            if worker.retry_status(resp.status) {
                continue;
            }
            shared.fail(DmcError::status(resp.status, resp.reason));
            return;
        }
        shared.confirm();
        match deliver(&shared, ByteRange::new(0, 0), resp, None) {
            Delivery::Complete | Delivery::BufferClosed => return,
            Delivery::Interrupted(e) => {
                if worker.retry_transport(&e) {
                    continue;
                }
                shared.fail(e.into());
                return;
            }
        }
    }
}

/// One unranged PUT streaming every filled slot in offset order.
pub(super) fn upload(worker: &mut Worker) {
    let shared = worker.shared.clone();
    loop {
        if shared.buffer.has_error() {
            return;
        }
        let reader = BufferReader::new(Arc::clone(&shared.buffer));
        let consumed = reader.consumed();
        let request = Request::new(Method::Put, worker.path()).with_body(RequestBody::Stream {
            reader: Box::new(reader),
            len: shared.settings.size,
        });
        let result = worker.send(request);
        let sent = consumed.load(Ordering::Relaxed);
        shared.delivered.fetch_add(sent, Ordering::Relaxed);

        match result {
            Ok(resp) if resp.is_success() => {
                shared.confirm();
                return;
            }
            Ok(resp) if resp.is_redirect() => {
                if sent > 0 {
                    shared.fail(DmcError::Protocol(format!(
                        "redirected after {} body bytes were streamed",
                        sent
                    )));
                    return;
                }
                if let Err(e) = worker.follow_redirect(&resp) {
                    shared.fail(e);
                    return;
                }
            }
            Ok(resp) => {
                if sent == 0 && worker.retry_status(resp.status) {
                    continue;
                }
                shared.fail(DmcError::status(resp.status, resp.reason));
                return;
            }
            Err(e) => {
                if sent == 0 && worker.retry_transport(&e) {
                    continue;
                }
                shared.fail(e.into());
                return;
            }
        }
    }
}
