//! Integration tests: upload sessions against a scripted wire.
//!
//! The test thread plays the application: it fills the slot buffer from a
//! byte slice, waits for the engine to drain it and then stops the session.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use common::mock_wire::{payload, redirect, reply, MockConnector, Seen};
use httpdmc_core::wire::Method;
use httpdmc_core::{DmcConfig, DmcError, HttpDataPoint, Result, SlotBuffer, TransferOptions};

fn upload(dp: &mut HttpDataPoint, data: &[u8], slot_size: usize, slots: usize) -> Result<()> {
    let buf = Arc::new(SlotBuffer::new(slot_size, slots));
    dp.start_upload(buf.clone()).expect("start_upload");
    let filler = {
        let buf = Arc::clone(&buf);
        let data = data.to_vec();
        thread::spawn(move || buf.fill_from(&data[..]))
    };
    buf.wait_drain_ended();
    let result = dp.stop_upload();
    let _ = filler.join().expect("filler thread");
    result
}

/// Server that stores ranged and whole-body PUTs into one object.
fn storing_server(
    object: Arc<Mutex<Vec<u8>>>,
    ranged_status: u16,
) -> impl Fn(&Seen) -> common::mock_wire::Reply + Send + Sync + 'static {
    move |seen| {
        if seen.method != Method::Put {
            return Ok(reply(405));
        }
        let mut obj = object.lock().unwrap();
        match seen.range {
            Some(_) if ranged_status >= 300 => Ok(reply(ranged_status)),
            Some(range) => {
                let start = range.start as usize;
                let end = start + seen.body.len();
                assert_eq!(range.len() as usize, seen.body.len());
                if obj.len() < end {
                    obj.resize(end, 0);
                }
                obj[start..end].copy_from_slice(&seen.body);
                Ok(reply(ranged_status))
            }
            None => {
                *obj = seen.body.clone();
                Ok(reply(201))
            }
        }
    }
}

#[test]
fn empty_upload_sends_exactly_one_empty_put() {
    let object = Arc::new(Mutex::new(vec![1u8; 3]));
    let wire = MockConnector::new(storing_server(Arc::clone(&object), 204));
    let mut dp =
        HttpDataPoint::new("http://h.example/empty", wire.pool(), DmcConfig::default()).unwrap();

    upload(&mut dp, &[], 1024, 2).unwrap();
    let seen = wire.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::Put);
    assert_eq!(seen[0].range, None);
    assert!(seen[0].body.is_empty());
    assert!(object.lock().unwrap().is_empty());
}

#[test]
fn empty_upload_with_partial_put_still_sends_one_put() {
    let object = Arc::new(Mutex::new(Vec::new()));
    let wire = MockConnector::new(storing_server(Arc::clone(&object), 204));
    let mut dp = HttpDataPoint::new(
        "http://h.example;threads=3;httpputpartial=yes/empty",
        wire.pool(),
        DmcConfig::default(),
    )
    .unwrap();

    upload(&mut dp, &[], 1024, 4).unwrap();
    assert_eq!(wire.count(Method::Put), 1);
    assert_eq!(wire.requests()[0].range, None);
}

#[test]
fn ranged_uploads_cover_the_object() {
    let data = payload(100 * 1024 + 5);
    let object = Arc::new(Mutex::new(Vec::new()));
    let wire = MockConnector::new(storing_server(Arc::clone(&object), 204));
    let mut dp = HttpDataPoint::new(
        "http://h.example;threads=3;httpputpartial=yes/up.bin",
        wire.pool(),
        DmcConfig::default(),
    )
    .unwrap()
    .with_options(
        TransferOptions::default()
            .with_streams(3)
            .with_partial_put(true)
            .with_size_hint(Some(data.len() as u64)),
    );

    upload(&mut dp, &data, 8 * 1024, 6).unwrap();
    assert!(*object.lock().unwrap() == data);
    let seen = wire.requests();
    assert!(seen.iter().all(|s| s.range.is_some()));
    assert!(seen.iter().all(|s| s.total_size == Some(data.len() as u64)));
    assert_eq!(seen.len(), (data.len() + 8 * 1024 - 1) / (8 * 1024));
}

#[test]
fn first_ranged_put_501_falls_back_to_one_full_put() {
    let data = payload(40 * 1024);
    let object = Arc::new(Mutex::new(Vec::new()));
    let wire = MockConnector::new(storing_server(Arc::clone(&object), 501));
    let mut dp = HttpDataPoint::new(
        "http://h.example;threads=2;httpputpartial=yes/up.bin",
        wire.pool(),
        DmcConfig::default(),
    )
    .unwrap();

    upload(&mut dp, &data, 4 * 1024, 16).unwrap();
    let whole: Vec<_> = wire
        .requests()
        .into_iter()
        .filter(|s| s.range.is_none())
        .collect();
    assert_eq!(whole.len(), 1);
    assert!(whole[0].body == data, "no data duplicated or dropped");
    assert!(*object.lock().unwrap() == data);
}

#[test]
fn refusal_after_ranged_success_is_a_protocol_error() {
    let data = payload(12 * 1024);
    let puts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&puts);
    let wire = MockConnector::new(move |seen| {
        assert!(seen.range.is_some(), "no whole-body PUT after ranged success");
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(reply(204))
        } else {
            Ok(reply(501))
        }
    });
    let mut dp = HttpDataPoint::new(
        "http://h.example;threads=1;httpputpartial=yes/up.bin",
        wire.pool(),
        DmcConfig::default(),
    )
    .unwrap();

    let err = upload(&mut dp, &data, 4 * 1024, 8).unwrap_err();
    assert!(matches!(err, DmcError::Protocol(_)), "{err:?}");
}

#[test]
fn redirect_after_streamed_body_is_a_protocol_error() {
    let data = payload(9000);
    let object = Arc::new(Mutex::new(Vec::new()));
    let store = storing_server(Arc::clone(&object), 204);
    // The mock reads the whole streamed body before answering, so the
    // redirect arrives after the bytes have left the buffer.
    let wire = MockConnector::new(move |seen| {
        if seen.path == "/old" {
            return Ok(redirect(307, "/new"));
        }
        store(seen)
    });
    let mut dp =
        HttpDataPoint::new("http://h.example/old", wire.pool(), DmcConfig::default()).unwrap();

    let err = upload(&mut dp, &data, 4096, 4).unwrap_err();
    assert!(matches!(err, DmcError::Protocol(_)), "{err:?}");
    assert_eq!(wire.count(Method::Put), 1);
    assert!(object.lock().unwrap().is_empty());
}
