//! Fuzz target: `FirmwareUpdate::handle_message`
//!
//! Splits the input into length-prefixed datagrams and feeds them to an
//! engine backed by the in-memory store, advancing the clock between
//! messages. The engine must never panic and must always return to idle
//! after `cancel`.
//!
//! cargo fuzz run fuzz_ota_engine

#![no_main]

use devlink::adapters::memory_store::MemoryStore;
use devlink::adapters::time::ManualClock;
use devlink::channel::QueueChannel;
use devlink::ota::FirmwareUpdate;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let clock = ManualClock::new();
    let mut ota = FirmwareUpdate::with_defaults(MemoryStore::new(64 * 1024), &clock);
    let mut ch = QueueChannel::new();

    let mut rest = data;
    while let [len, tick, tail @ ..] = rest {
        let n = usize::from(*len).min(tail.len());
        let (msg, next) = tail.split_at(n);
        let _ = ota.handle_message(&mut ch, msg);
        clock.advance(u64::from(*tick) * 10);
        let _ = ota.process(&mut ch);
        ch.clear();
        rest = next;
    }

    let _ = ota.cancel();
    assert!(!ota.is_running());
});
