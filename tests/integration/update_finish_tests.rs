//! UpdateFinish handling: validation, confirmation, cancellation.

use devlink::coap::{CoapCode, CoapType};
use devlink::ota::{MessageKind, UpdateFlags};
use devlink::{Error, HostError};

use crate::mock_host::*;

/// Run a complete 2000-byte transfer and drop the acks it produced.
fn transferred() -> Harness {
    let mut h = Harness::new();
    h.start(2000);
    h.send_all(2000);
    h.sent();
    h
}

/// Finish a complete transfer and return the id of the success response.
fn validated(h: &mut Harness) -> u16 {
    h.finish(false, false).unwrap();
    let sent = h.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].is_empty_ack(FINISH_ID));
    let resp = &sent[1];
    assert_eq!(resp.ty, CoapType::Con);
    assert_eq!(resp.code, CoapCode::CHANGED);
    assert_eq!(resp.token, TOKEN);
    assert!(resp.payload.is_empty());
    resp.id
}

#[test]
fn update_is_applied_once_response_is_confirmed() {
    let mut h = transferred();
    let id = validated(&mut h);
    assert_eq!(h.store().finishes(), [UpdateFlags::VALIDATE_ONLY]);
    assert!(h.ota.is_running());

    // An ACK for some other message changes nothing.
    h.deliver(&empty(CoapType::Ack, id.wrapping_add(1))).unwrap();
    assert!(h.ota.is_running());

    let kind = h.deliver(&empty(CoapType::Ack, id)).unwrap();
    assert_eq!(kind, MessageKind::EmptyAck);
    assert!(!h.ota.is_running());
    assert_eq!(
        h.store().finishes(),
        [UpdateFlags::VALIDATE_ONLY, UpdateFlags::empty()]
    );
    assert!(h.sent().is_empty());
}

#[test]
fn repeated_finish_is_not_validated_again() {
    let mut h = transferred();
    let first = validated(&mut h);
    let second = validated(&mut h);
    assert_ne!(first, second);
    assert_eq!(h.store().finishes(), [UpdateFlags::VALIDATE_ONLY]);

    // Only the latest response is awaited.
    h.deliver(&empty(CoapType::Ack, first)).unwrap();
    assert!(h.ota.is_running());
    h.deliver(&empty(CoapType::Ack, second)).unwrap();
    assert!(!h.ota.is_running());
}

#[test]
fn reset_of_response_cancels_update() {
    let mut h = transferred();
    let id = validated(&mut h);
    let kind = h.deliver(&empty(CoapType::Rst, id)).unwrap();
    assert_eq!(kind, MessageKind::Reset);
    assert!(!h.ota.is_running());
    assert_eq!(
        h.store().finishes(),
        [UpdateFlags::VALIDATE_ONLY, UpdateFlags::CANCEL]
    );
}

#[test]
fn apply_failure_is_returned() {
    let mut h = transferred();
    let id = validated(&mut h);
    h.store_mut().finish_error = Some(HostError::new(-1234));
    assert_eq!(
        h.deliver(&empty(CoapType::Ack, id)),
        Err(Error::Host(-1234))
    );
    assert!(!h.ota.is_running());
}

#[test]
fn incomplete_transfer_is_cancelled() {
    let mut h = Harness::new();
    h.start(2000);
    h.chunk(1, 512).unwrap();
    h.sent();
    h.finish(false, false).unwrap();

    let sent = h.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].is_empty_ack(FINISH_ID));
    assert_eq!(sent[1].ty, CoapType::Con);
    assert_eq!(sent[1].code, CoapCode::PRECONDITION_FAILED);
    assert_eq!(sent[1].token, TOKEN);
    assert_eq!(sent[1].diagnostic()["code"], Error::InvalidState.code());
    assert!(!h.ota.is_running());
    assert_eq!(h.store().finishes(), [UpdateFlags::CANCEL]);
}

#[test]
fn finish_without_update_is_rejected() {
    let mut h = Harness::new();
    h.finish(false, false).unwrap();
    let sent = h.sent();
    assert_eq!(sent[1].code, CoapCode::PRECONDITION_FAILED);
    assert_eq!(sent[1].diagnostic()["message"], "No update in progress");
}

#[test]
fn validation_failure_is_reported() {
    let mut h = transferred();
    h.store_mut().finish_error = Some(HostError::with_message(
        Error::BadData.code(),
        "Hash mismatch",
    ));
    h.finish(false, false).unwrap();

    let sent = h.sent();
    assert_eq!(sent.len(), 2);
    let resp = &sent[1];
    assert_eq!(resp.ty, CoapType::Con);
    assert_eq!(resp.code, CoapCode::BAD_REQUEST);
    let diag = resp.diagnostic();
    assert_eq!(diag["code"], Error::BadData.code());
    assert_eq!(diag["message"], "Hash mismatch");
    assert!(!h.ota.is_running());
    assert_eq!(
        h.store().finishes(),
        [UpdateFlags::VALIDATE_ONLY, UpdateFlags::CANCEL]
    );
}

#[test]
fn cancel_requests_are_honoured() {
    let cases = [
        (false, UpdateFlags::CANCEL),
        (true, UpdateFlags::CANCEL | UpdateFlags::DISCARD_DATA),
    ];
    for (discard, flags) in cases {
        let mut h = Harness::new();
        h.start(2000);
        h.chunk(1, 512).unwrap();
        h.sent();
        h.finish(true, discard).unwrap();

        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].is_empty_ack(FINISH_ID));
        assert_eq!(sent[1].code, CoapCode::CHANGED);
        assert_eq!(sent[1].token, TOKEN);
        assert!(!h.ota.is_running());
        assert_eq!(h.store().finishes(), [flags]);
    }
}

#[test]
fn cancel_of_complete_transfer_skips_validation() {
    let mut h = transferred();
    h.finish(true, false).unwrap();
    assert_eq!(h.sent()[1].code, CoapCode::CHANGED);
    assert_eq!(h.store().finishes(), [UpdateFlags::CANCEL]);
}

#[test]
fn cancel_failure_is_reported() {
    let mut h = Harness::new();
    h.start(2000);
    h.store_mut().finish_error = Some(HostError::new(Error::NotAllowed.code()));
    h.finish(true, false).unwrap();
    let sent = h.sent();
    assert_eq!(sent[1].code, CoapCode::FORBIDDEN);
    assert_eq!(sent[1].diagnostic()["code"], Error::NotAllowed.code());
    assert!(!h.ota.is_running());
}

#[test]
fn non_confirmable_finish_gets_non_error() {
    let mut h = transferred();
    let req = finish_request(CoapType::Non, CoapCode::POST, TOKEN, None, None);
    h.deliver(&req).unwrap();
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ty, CoapType::Non);
    assert_eq!(sent[0].token, TOKEN);
    assert!(!sent[0].code.is_success());
    assert!(h.ota.is_running());
    assert!(h.store().finishes().is_empty());
}

#[test]
fn unexpected_method_is_ignored() {
    let mut h = transferred();
    let req = finish_request(CoapType::Con, CoapCode::PUT, TOKEN, None, None);
    assert_eq!(h.deliver(&req), Ok(MessageKind::Other));
    assert!(h.sent().is_empty());
    assert!(h.ota.is_running());
}

#[test]
fn missing_token_gets_piggybacked_error() {
    let mut h = transferred();
    let req = finish_request(CoapType::Con, CoapCode::POST, &[], None, None);
    h.deliver(&req).unwrap();
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ty, CoapType::Ack);
    assert_eq!(sent[0].id, FINISH_ID);
    assert!(sent[0].token.is_empty());
    assert_eq!(sent[0].diagnostic()["code"], Error::Protocol.code());
    assert!(h.ota.is_running());
}

#[test]
fn flag_options_must_be_empty() {
    let cases: [(Option<&[u8]>, Option<&[u8]>); 2] = [(Some(&[1]), None), (None, Some(&[1]))];
    for (cancel, discard) in cases {
        let mut h = transferred();
        let req = finish_request(CoapType::Con, CoapCode::POST, TOKEN, cancel, discard);
        h.deliver(&req).unwrap();
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].ty, CoapType::Ack);
        assert_eq!(sent[0].id, FINISH_ID);
        assert_eq!(sent[0].token, TOKEN);
        assert_eq!(sent[0].code, CoapCode::BAD_REQUEST);
        assert_eq!(sent[0].diagnostic()["code"], Error::InvalidArgument.code());
        assert!(h.ota.is_running());
    }
}

#[test]
fn local_cancel_returns_host_failure() {
    let mut h = Harness::new();
    assert_eq!(h.ota.cancel(), Ok(()));
    assert!(h.store().finishes().is_empty());

    h.start(2000);
    h.chunk(1, 512).unwrap();
    h.store_mut().finish_error = Some(HostError::new(-5));
    assert_eq!(h.ota.cancel(), Err(HostError::new(-5)));
    assert!(!h.ota.is_running());
    assert_eq!(h.store().finishes(), [UpdateFlags::CANCEL]);

    // Idle again, so a second cancel never reaches the host.
    assert_eq!(h.ota.cancel(), Ok(()));
    assert_eq!(h.store().finishes(), [UpdateFlags::CANCEL]);
}
