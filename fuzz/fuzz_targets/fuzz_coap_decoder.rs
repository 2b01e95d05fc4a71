//! Fuzz target: `CoapMessageDecoder::decode`
//!
//! Arbitrary datagrams must never panic the decoder, every option and the
//! payload it yields must lie inside the input, and option numbers must
//! never decrease.
//!
//! cargo fuzz run fuzz_coap_decoder

#![no_main]

use devlink::coap::CoapMessageDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(msg) = CoapMessageDecoder::decode(data) else {
        return;
    };
    assert_eq!(msg.size(), data.len());
    assert!(msg.token().len() <= 8);
    assert!(msg.payload().len() < data.len());

    let mut prev = 0;
    for opt in msg.options() {
        assert!(opt.number >= prev, "option numbers went backwards");
        assert!(opt.size() < data.len());
        prev = opt.number;
    }
});
