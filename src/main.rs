//! devlink-sim — drives a complete firmware transfer against the update
//! engine through a lossy, reordering in-memory link.
//!
//! The server side lives here: it sends UpdateStart, streams chunks inside
//! the advertised window, retransmits whatever the acks (and their
//! selective bitmaps) do not cover, then finishes and confirms the update.
//! Time is simulated, so a run is fully deterministic.

use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::{bail, ensure, Context};
use clap::Parser;
use log::{debug, info, warn};

use devlink::adapters::memory_store::MemoryStore;
use devlink::adapters::time::ManualClock;
use devlink::channel::QueueChannel;
use devlink::coap::{self, CoapCode, CoapMessageDecoder, CoapMessageEncoder, CoapType};
use devlink::config::OtaConfig;
use devlink::ota::{option, path, FirmwareUpdate, SHA256_SIZE};

/// Simulated firmware transfer over an unreliable link
#[derive(Parser, Debug)]
#[command(name = "devlink-sim", version, long_about = None)]
struct Args {
    /// Size of the generated firmware image in bytes
    #[arg(long, default_value_t = 100_000)]
    file_size: usize,

    /// Chunk size requested by the server
    #[arg(long, default_value_t = 512)]
    chunk_size: usize,

    /// Drop every Nth chunk datagram (0 = no loss)
    #[arg(long, default_value_t = 7)]
    drop_every: u64,

    /// Deliver every Nth chunk datagram twice (0 = never)
    #[arg(long, default_value_t = 11)]
    duplicate_every: u64,

    /// Swap adjacent chunk datagrams
    #[arg(long, default_value_t = false)]
    reorder: bool,

    /// Send without a SHA-256, making the transfer non-resumable
    #[arg(long, default_value_t = false)]
    no_hash: bool,

    /// Interrupt the first session after this many chunks and resume
    #[arg(long)]
    interrupt_after: Option<u32>,

    /// JSON file with an OtaConfig
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let config = match &args.config {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("reading {}", p.display()))?;
            serde_json::from_str::<OtaConfig>(&text)
                .with_context(|| format!("parsing {}", p.display()))?
        }
        None => OtaConfig::default(),
    };

    let image: Vec<u8> = (0..args.file_size)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
        .collect();
    let hash = (!args.no_hash).then(|| hmac_sha256::Hash::hash(&image));

    let clock = ManualClock::new();
    let mut device = FirmwareUpdate::new(MemoryStore::default(), &clock, config.clone())?;
    let mut uplink = QueueChannel::new();
    let mut link = LossyLink::new(&args);
    let mut server = Server::new(&image, hash, args.chunk_size);

    let mut budget = args.interrupt_after;
    loop {
        server.start(&mut device, &mut uplink)?;
        match server.stream(&mut device, &mut uplink, &mut link, &clock, &config, budget)? {
            Streamed::Complete => break,
            Streamed::Interrupted => {
                warn!("SIM: link lost after {} chunks, reconnecting", server.sent);
                device
                    .cancel()
                    .context("cancelling the interrupted session")?;
                budget = None;
            }
        }
    }
    server.finish(&mut device, &mut uplink)?;

    let stats = device.stats();
    info!("SIM: transfer stats {}", serde_json::to_string(&stats)?);
    info!(
        "SIM: {} datagrams sent, {} dropped, {} duplicated",
        server.sent, link.dropped, link.duplicated
    );
    match device.store().applied() {
        Some(applied) if applied == image.as_slice() => {
            info!("SIM: image of {} bytes applied and verified", applied.len());
            Ok(())
        }
        Some(_) => bail!("applied image differs from the source"),
        None => bail!("no image was applied"),
    }
}

// ── Link model ────────────────────────────────────────────────

/// Server → device path with deterministic loss, duplication and
/// reordering.
struct LossyLink {
    drop_every: u64,
    duplicate_every: u64,
    reorder: bool,
    held: Option<Vec<u8>>,
    seq: u64,
    dropped: u64,
    duplicated: u64,
}

impl LossyLink {
    fn new(args: &Args) -> Self {
        Self {
            drop_every: args.drop_every,
            duplicate_every: args.duplicate_every,
            reorder: args.reorder,
            held: None,
            seq: 0,
            dropped: 0,
            duplicated: 0,
        }
    }

    /// Datagrams actually delivered for one sent datagram.
    fn transmit(&mut self, datagram: Vec<u8>, out: &mut VecDeque<Vec<u8>>) {
        self.seq += 1;
        if self.drop_every > 0 && self.seq % self.drop_every == 0 {
            self.dropped += 1;
            return;
        }
        if self.duplicate_every > 0 && self.seq % self.duplicate_every == 0 {
            self.duplicated += 1;
            out.push_back(datagram.clone());
        }
        if !self.reorder {
            out.push_back(datagram);
            return;
        }
        match self.held.take() {
            Some(prev) => {
                out.push_back(datagram);
                out.push_back(prev);
            }
            None => self.held = Some(datagram),
        }
    }

    fn flush(&mut self, out: &mut VecDeque<Vec<u8>>) {
        if let Some(prev) = self.held.take() {
            out.push_back(prev);
        }
    }
}

// ── Server ────────────────────────────────────────────────────

type Device<'c> = FirmwareUpdate<MemoryStore, &'c ManualClock>;

enum Streamed {
    Complete,
    Interrupted,
}

struct Server<'a> {
    image: &'a [u8],
    hash: Option<[u8; SHA256_SIZE]>,
    chunk_size: usize,
    chunk_count: u32,
    window: u32,
    acked: Vec<bool>,
    ack_base: u32,
    next_id: u16,
    sent: u64,
}

impl<'a> Server<'a> {
    fn new(image: &'a [u8], hash: Option<[u8; SHA256_SIZE]>, chunk_size: usize) -> Self {
        let chunk_count = image.len().div_ceil(chunk_size) as u32;
        Self {
            image,
            hash,
            chunk_size,
            chunk_count,
            window: 1,
            acked: vec![false; chunk_count as usize + 1],
            ack_base: 0,
            next_id: 0x4000,
            sent: 0,
        }
    }

    fn id(&mut self) -> u16 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    fn start(&mut self, device: &mut Device<'_>, uplink: &mut QueueChannel) -> anyhow::Result<()> {
        let id = self.id();
        let hash = self.hash;
        let msg = encode(|e| {
            e.message_type(CoapType::Con)
                .code(CoapCode::POST)
                .id(id)
                .token(b"start")
                .option_str(coap::option::URI_PATH, path::START)
                .option_uint(option::FILE_SIZE, self.image.len() as u32);
            if let Some(h) = &hash {
                e.option(option::FILE_SHA256, h);
            }
            e.option_uint(option::CHUNK_SIZE, self.chunk_size as u32);
        })?;
        device.handle_message(uplink, &msg)?;

        expect_empty_ack(uplink, id)?;
        let resp = uplink.pop().context("no UpdateStart response")?;
        let d = resp.decode()?;
        ensure!(
            d.code() == CoapCode::CREATED,
            "UpdateStart failed: {} {}",
            d.code(),
            String::from_utf8_lossy(d.payload())
        );
        self.window = d
            .find_option(option::WINDOW_SIZE)
            .map_or(1, |o| o.to_uint().max(1));
        let partial = d.find_option(option::FILE_SIZE).map_or(0, |o| o.to_uint()) as usize;
        self.ack_base = (partial / self.chunk_size) as u32;
        for i in 1..=self.chunk_count {
            self.acked[i as usize] = i <= self.ack_base;
        }
        info!(
            "SIM: session open, window {} chunks, device holds {} bytes",
            self.window, partial
        );
        Ok(())
    }

    fn stream(
        &mut self,
        device: &mut Device<'_>,
        uplink: &mut QueueChannel,
        link: &mut LossyLink,
        clock: &ManualClock,
        config: &OtaConfig,
        mut budget: Option<u32>,
    ) -> anyhow::Result<Streamed> {
        let mut rounds = 0;
        while self.ack_base < self.chunk_count {
            rounds += 1;
            ensure!(rounds < 10_000, "transfer did not converge");

            let mut inflight = VecDeque::new();
            let mut interrupted = false;
            let last = (self.ack_base + self.window).min(self.chunk_count);
            for index in self.ack_base + 1..=last {
                if self.acked[index as usize] {
                    continue;
                }
                if let Some(left) = budget.as_mut() {
                    if *left == 0 {
                        interrupted = true;
                        break;
                    }
                    *left -= 1;
                }
                let datagram = self.chunk(index)?;
                self.sent += 1;
                link.transmit(datagram, &mut inflight);
            }
            link.flush(&mut inflight);

            // Whatever left before the link dropped still reaches the device.
            for datagram in inflight {
                device.handle_message(uplink, &datagram)?;
                self.drain_acks(uplink)?;
            }
            if interrupted {
                return Ok(Streamed::Interrupted);
            }
            clock.advance(config.chunk_ack_delay_ms);
            device.process(uplink)?;
            self.drain_acks(uplink)?;
        }
        Ok(Streamed::Complete)
    }

    fn chunk(&mut self, index: u32) -> anyhow::Result<Vec<u8>> {
        let start = (index as usize - 1) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.image.len());
        let id = self.id();
        let data = &self.image[start..end];
        encode(|e| {
            e.message_type(CoapType::Non)
                .code(CoapCode::POST)
                .id(id)
                .option_str(coap::option::URI_PATH, path::CHUNK)
                .option_uint(option::CHUNK_INDEX, index)
                .payload(data);
        })
    }

    fn drain_acks(&mut self, uplink: &mut QueueChannel) -> anyhow::Result<()> {
        while let Some(msg) = uplink.pop() {
            let d = msg.decode()?;
            let is_ack = d
                .options()
                .any(|o| o.number == coap::option::URI_PATH && o.data == path::ACK.as_bytes());
            if !is_ack {
                warn!("SIM: unexpected message from device: {:?}", msg);
                continue;
            }
            let base = d.find_option(option::CHUNK_INDEX).map_or(0, |o| o.to_uint());
            for i in self.ack_base + 1..=base.min(self.chunk_count) {
                self.acked[i as usize] = true;
            }
            self.ack_base = self.ack_base.max(base);
            for (w, word) in d.payload().chunks_exact(4).enumerate() {
                let bits = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                for k in 0..32 {
                    let index = base + 32 * w as u32 + k + 1;
                    if bits & (1 << k) != 0 && index <= self.chunk_count {
                        self.acked[index as usize] = true;
                    }
                }
            }
            debug!("SIM: ack {} ({} sack bytes)", base, d.payload().len());
        }
        Ok(())
    }

    fn finish(&mut self, device: &mut Device<'_>, uplink: &mut QueueChannel) -> anyhow::Result<()> {
        let id = self.id();
        let msg = encode(|e| {
            e.message_type(CoapType::Con)
                .code(CoapCode::POST)
                .id(id)
                .token(b"finish")
                .option_str(coap::option::URI_PATH, path::FINISH);
        })?;
        device.handle_message(uplink, &msg)?;
        expect_empty_ack(uplink, id)?;

        let resp = uplink.pop().context("no UpdateFinish response")?;
        let d = resp.decode()?;
        ensure!(
            d.code().is_success(),
            "UpdateFinish failed: {} {}",
            d.code(),
            String::from_utf8_lossy(d.payload())
        );
        let ack = encode(|e| {
            e.message_type(CoapType::Ack).code(CoapCode::EMPTY).id(d.id());
        })?;
        device.handle_message(uplink, &ack)?;
        ensure!(!device.is_running(), "device still running after confirmation");
        Ok(())
    }
}

fn encode(f: impl FnOnce(&mut CoapMessageEncoder<'_>)) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0u8; coap::message::MAX_MESSAGE_SIZE];
    let mut e = CoapMessageEncoder::new(&mut buf);
    f(&mut e);
    let n = e.encode()?;
    ensure!(n <= buf.len(), "message of {} bytes does not fit", n);
    buf.truncate(n);
    Ok(buf)
}

fn expect_empty_ack(uplink: &mut QueueChannel, id: u16) -> anyhow::Result<()> {
    let msg = uplink.pop().context("no ACK from device")?;
    let d: CoapMessageDecoder<'_> = msg.decode()?;
    ensure!(
        d.message_type() == CoapType::Ack && d.code().is_empty() && d.id() == id,
        "expected empty ACK for {}, got {:?}",
        id,
        msg
    );
    Ok(())
}
