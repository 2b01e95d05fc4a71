//! UpdateChunk handling: storage offsets, ack cadence, selective acks and
//! rejection paths.

use devlink::coap::{CoapCode, CoapType};
use devlink::ota::UpdateFlags;
use devlink::{Error, HostError};

use crate::mock_host::*;

fn acks(h: &mut Harness) -> Vec<(u32, Vec<u32>)> {
    h.sent()
        .iter()
        .map(|m| m.as_update_ack().expect("expected an UpdateAck"))
        .collect()
}

#[test]
fn chunks_are_saved_at_their_offsets() {
    let mut h = Harness::new();
    h.start(2000);
    h.send_all(2000);
    assert_eq!(
        h.store().saves(),
        [
            (0, 512, 512),
            (512, 512, 1024),
            (1024, 512, 1536),
            (1536, 464, 2000)
        ]
    );
    assert_eq!(h.ota.partial_size(), Some(2000));
}

#[test]
fn duplicate_chunk_is_counted_not_saved() {
    let mut h = Harness::new();
    h.start(2000);
    h.chunk(1, 512).unwrap();
    h.chunk(1, 512).unwrap();
    assert_eq!(h.store().saves().len(), 1);
    assert_eq!(h.ota.stats().duplicate_chunks, 1);
}

#[test]
fn every_second_chunk_is_acked() {
    let mut h = Harness::new();
    h.start(2560);
    h.chunk(1, 512).unwrap();
    assert!(h.sent().is_empty());
    h.chunk(2, 512).unwrap();
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].token.is_empty());
    assert!(sent[0].payload.is_empty());
    assert_eq!(sent[0].as_update_ack(), Some((2, vec![])));
    h.chunk(3, 512).unwrap();
    assert!(h.sent().is_empty());
    h.chunk(4, 512).unwrap();
    assert_eq!(acks(&mut h), [(4, vec![])]);
}

#[test]
fn lone_chunk_is_acked_after_delay() {
    let mut h = Harness::new();
    h.start(2560);
    h.chunk(1, 512).unwrap();
    h.process().unwrap();
    assert!(h.sent().is_empty());
    h.advance(ACK_DELAY - 1);
    h.process().unwrap();
    assert!(h.sent().is_empty());
    h.advance(1);
    h.process().unwrap();
    assert_eq!(acks(&mut h), [(1, vec![])]);
    // Nothing further is pending.
    h.advance(ACK_DELAY);
    h.process().unwrap();
    assert!(h.sent().is_empty());
}

#[test]
fn last_chunk_is_acked_immediately() {
    let mut h = Harness::new();
    h.start(1536);
    h.chunk(1, 512).unwrap();
    h.chunk(2, 512).unwrap();
    h.sent();
    h.chunk(3, 512).unwrap();
    assert_eq!(acks(&mut h), [(3, vec![])]);
}

#[test]
fn gaps_are_reported_in_the_bitmap() {
    let mut h = Harness::new();
    h.start(2048);
    h.chunk(2, 512).unwrap();
    assert_eq!(acks(&mut h), [(0, vec![2])]);
    h.chunk(4, 512).unwrap();
    assert_eq!(acks(&mut h), [(0, vec![2, 4])]);
    assert_eq!(h.ota.stats().out_of_order_chunks, 2);
}

#[test]
fn every_chunk_is_acked_until_gap_is_filled() {
    let mut h = Harness::new();
    h.start(4096);
    h.chunk(2, 512).unwrap();
    assert_eq!(acks(&mut h), [(0, vec![2])]);
    h.chunk(3, 512).unwrap();
    assert_eq!(acks(&mut h), [(0, vec![2, 3])]);
    h.chunk(1, 512).unwrap();
    let sent = h.sent();
    assert_eq!(sent[0].as_update_ack(), Some((3, vec![])));
    assert!(sent[0].payload.is_empty());
    h.chunk(4, 512).unwrap();
    assert!(h.sent().is_empty());

    // Chunk 1 was saved with the partial size covering chunks 2 and 3.
    assert_eq!(h.store().saves()[2], (0, 512, 1536));
}

#[test]
fn duplicate_is_acked_again() {
    let mut h = Harness::new();
    h.start(2560);
    h.chunk(1, 512).unwrap();
    h.chunk(2, 512).unwrap();
    assert_eq!(acks(&mut h), [(2, vec![])]);
    h.chunk(2, 512).unwrap();
    assert_eq!(acks(&mut h), [(2, vec![])]);
}

#[test]
fn chunk_without_update_is_reset() {
    let mut h = Harness::new();
    let req = chunk_request(CoapType::Non, CoapCode::POST, 0x55, &[], Some(1), &[0; 512]);
    h.deliver(&req).unwrap();
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_rst(0x55));
}

#[test]
fn save_failure_resets_and_cancels() {
    let mut h = Harness::new();
    h.start(2000);
    h.store_mut().save_error = Some(HostError::new(-1));
    let req = chunk_request(CoapType::Non, CoapCode::POST, 0x56, &[], Some(1), &[0; 512]);
    h.deliver(&req).unwrap();
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_rst(0x56));
    assert!(!h.ota.is_running());
    assert_eq!(h.store().finishes(), [UpdateFlags::CANCEL]);
}

#[test]
fn confirmable_chunk_gets_piggybacked_error() {
    let mut h = Harness::new();
    h.start(2000);
    let req = chunk_request(CoapType::Con, CoapCode::POST, 0x57, &[], Some(1), &[0; 512]);
    h.deliver(&req).unwrap();
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ty, CoapType::Ack);
    assert_eq!(sent[0].id, 0x57);
    assert!(!sent[0].code.is_success());
    assert!(sent[0].token.is_empty());
    assert_eq!(sent[0].diagnostic()["code"], Error::Protocol.code());
    assert!(h.store().saves().is_empty());
}

#[test]
fn chunk_with_token_gets_non_error() {
    let mut h = Harness::new();
    h.start(2000);
    let req = chunk_request(CoapType::Non, CoapCode::POST, 0x58, b"tk", Some(1), &[0; 512]);
    h.deliver(&req).unwrap();
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ty, CoapType::Non);
    assert!(!sent[0].code.is_success());
    assert_eq!(sent[0].token, b"tk");
    assert!(sent[0].diagnostic()["message"].is_string());
}

#[test]
fn unexpected_method_is_ignored() {
    let mut h = Harness::new();
    h.start(2000);
    let req = chunk_request(CoapType::Non, CoapCode::PUT, 0x59, &[], Some(1), &[0; 512]);
    h.deliver(&req).unwrap();
    assert!(h.sent().is_empty());
    assert!(h.store().saves().is_empty());
}

#[test]
fn malformed_chunks_are_reset() {
    let cases: [(Option<u32>, usize); 5] = [
        (None, 512),
        (Some(0), 512),
        (Some(5), 512),
        (Some(1), 511),
        (Some(4), 512),
    ];
    for (index, len) in cases {
        let mut h = Harness::new();
        h.start(2000);
        let req = chunk_request(CoapType::Non, CoapCode::POST, 0x60, &[], index, &vec![0; len]);
        h.deliver(&req).unwrap();
        let sent = h.sent();
        assert_eq!(sent.len(), 1, "{index:?}/{len}");
        assert!(sent[0].is_rst(0x60), "{index:?}/{len}");
        assert!(h.store().saves().is_empty());
        assert!(h.ota.is_running());
    }
}

#[test]
fn chunk_beyond_window_is_reset() {
    let mut h = Harness::new();
    // 64 chunks fit in the window at 512 bytes per chunk.
    h.start(512 * 100);
    let req = chunk_request(CoapType::Non, CoapCode::POST, 0x61, &[], Some(65), &[0; 512]);
    h.deliver(&req).unwrap();
    assert!(h.sent()[0].is_rst(0x61));
    h.chunk(64, 512).unwrap();
    assert_eq!(acks(&mut h), [(0, vec![64])]);
}

#[test]
fn inactivity_cancels_once() {
    let scenarios: [fn(&mut Harness); 3] = [
        |_| {},
        |h| {
            h.chunk(1, 512).unwrap();
        },
        |h| h.send_all(2000),
    ];
    for scenario in scenarios {
        let mut h = Harness::new();
        h.start(2000);
        scenario(&mut h);
        h.advance(TIMEOUT);
        assert_eq!(h.process(), Err(Error::Timeout));
        assert!(!h.ota.is_running());
        assert_eq!(h.store().finishes(), [UpdateFlags::CANCEL]);
        h.advance(TIMEOUT);
        assert_eq!(h.process(), Ok(()));
        assert_eq!(h.store().finishes().len(), 1);
    }
}

#[test]
fn activity_defers_timeout() {
    let mut h = Harness::new();
    h.start(4096);
    h.advance(TIMEOUT - 1);
    h.chunk(1, 512).unwrap();
    h.advance(TIMEOUT - 1);
    h.process().unwrap();
    assert!(h.ota.is_running());
}
