//! The per-channel transmit worker (spec §4.2): owns the device, runs the
//! CSMA/persistence channel-access algorithm around `dwcore::tq`'s pure
//! decision function, keys PTT for txdelay/txtail, and grants LM-SEIZE
//! requests back to the DLQ worker once the channel is clear. Grounded on
//! the teacher's `spawn_writer` thread, which owns the `Tnc` half that
//! writes bytes and is the only place wall-clock/PTT actually happens.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use dwcore::dlsm::DlsmAction;
use dwcore::frame::Control;
use dwcore::kiss::{KissCommand, KissDecoder, KissEvent};
use dwcore::tq::{should_transmit, CsmaParams, TxQueue};

use crate::channel_io::ChannelIo;
use crate::dlq::{DlqSender, LinkKey};
use crate::kiss_tcp::MonitorRegistry;

/// Indications and confirms bound for whatever owns the client connection
/// (AGW server, logging) rather than the wire. Kept distinct from
/// `DlsmAction` so the TX/KISS layers never need to know about timers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Link {
        key: LinkKey,
        action: DlsmAction,
    },
}

/// Sent in one PTT key-up before forcing a re-acquisition of the channel,
/// matching spec §4.2's "bundle cap" (this TNC has no un-bundlable frame
/// kinds of its own — no APRS digipeating, speech, Morse or DTMF modes —
/// so only the cap ever ends a bundle early).
const MAX_BUNDLE_FRAMES: usize = 16;
const MAX_BUNDLE_BYTES: usize = 2048;

/// Assumed channel bit rate for the transmit-wrapper timing check (spec
/// §4.2's "bit-rate" term), matching the usual 1200 baud VHF packet rate.
const BIT_RATE_BPS: u64 = 1200;

/// Everything the DLQ worker needs to hand a channel's outbound traffic to
/// its TX worker, and to tell callers what happened to non-wire actions.
pub struct ChannelOutbound {
    tx_queue: Arc<Mutex<TxQueue<Vec<u8>>>>,
    seize_queue: Arc<Mutex<VecDeque<LinkKey>>>,
    params: Arc<Mutex<CsmaParams>>,
    client_events: Sender<ClientEvent>,
    /// Shared across every channel riding the same physical audio device
    /// (spec §4.2 step 1, §9 "Shared resources"); held for the entire
    /// PTT-on duration.
    device_lock: Arc<Mutex<()>>,
}

impl ChannelOutbound {
    pub fn new(params: CsmaParams, client_events: Sender<ClientEvent>, device_lock: Arc<Mutex<()>>) -> Self {
        Self {
            tx_queue: Arc::new(Mutex::new(TxQueue::new())),
            seize_queue: Arc::new(Mutex::new(VecDeque::new())),
            params: Arc::new(Mutex::new(params)),
            client_events,
            device_lock,
        }
    }

    fn current_params(&self) -> CsmaParams {
        *self.params.lock().unwrap()
    }

    pub fn update_params(&self, f: impl FnOnce(&mut CsmaParams)) {
        f(&mut self.params.lock().unwrap())
    }

    /// A client handed us an already-built AX.25 frame via the KISS Data
    /// command (the classic non-connected KISS use case); queue it as-is.
    pub fn queue_raw(&self, bytes: Vec<u8>) {
        self.tx_queue.lock().unwrap().push_lo(bytes);
    }

    /// Total bytes currently queued, for the KISS SetHardware "TXBUF" query.
    pub fn queued_bytes(&self) -> usize {
        self.tx_queue.lock().unwrap().queued_bytes()
    }

    pub fn handle_actions(&self, actions: Vec<(LinkKey, DlsmAction)>) {
        for (key, action) in actions {
            match action {
                DlsmAction::Transmit(packet) => {
                    let bytes = packet.encode();
                    let mut q = self.tx_queue.lock().unwrap();
                    match packet.control {
                        Control::I { .. } => q.push_lo(bytes),
                        Control::S { .. } | Control::U { .. } => q.push_hi(bytes),
                    }
                }
                DlsmAction::RequestSeize => {
                    self.seize_queue.lock().unwrap().push_back(key);
                }
                DlsmAction::StartTimer(_) | DlsmAction::StopTimer(_) => {
                    // Already forwarded to the timer wheel by `LinkSet::dispatch`.
                }
                other => {
                    let _ = self.client_events.send(ClientEvent::Link { key, action: other });
                }
            }
        }
    }
}

/// Runs forever, alternating between granting pending seize requests and
/// draining queued bytes onto the wire. `io` should already be the
/// writer-half clone handed to this thread, per the teacher's
/// reader/writer split.
pub fn run_tx_worker<T: ChannelIo>(
    mut io: T,
    channel: u8,
    outbound: Arc<ChannelOutbound>,
    dlq: DlqSender,
) {
    loop {
        let params = outbound.current_params();

        // Grant any links waiting for the channel before transmitting
        // queued bytes, mirroring LM-SEIZE-REQUEST preceding actual data.
        let next_seize = outbound.seize_queue.lock().unwrap().pop_front();
        if let Some(key) = next_seize {
            if wait_for_clear_channel(&mut io, &params) {
                if dlq.seize_confirm(key).is_err() {
                    return;
                }
            }
            continue;
        }

        let queued = outbound.tx_queue.lock().unwrap().pop();
        let Some(mut bytes) = queued else {
            thread::sleep(Duration::from_millis(20));
            continue;
        };

        if !wait_for_clear_channel(&mut io, &params) {
            // Channel access abandoned; drop the frame rather than spin
            // forever, matching the spec's 60s channel-access timeout.
            log::warn!("channel {channel}: giving up on {} byte frame, no clear channel", bytes.len());
            continue;
        }

        // Held for the whole PTT-on duration so a sibling channel on the
        // same physical device can't key up at the same time.
        let _device_guard = outbound.device_lock.lock().unwrap();

        if let Err(e) = io.ptt(true) {
            log::error!("channel {channel}: PTT assert failed: {e}");
            continue;
        }
        let key_up_at = Instant::now();
        thread::sleep(Duration::from_millis(params.txdelay as u64 * 10));

        let mut bundled_bytes = 0usize;
        let mut bundled_frames = 0usize;
        loop {
            if let Err(e) = io.write_all(&bytes) {
                log::error!("channel {channel}: write failed: {e}");
                break;
            }
            bundled_bytes += bytes.len();
            bundled_frames += 1;
            if bundled_frames >= MAX_BUNDLE_FRAMES || bundled_bytes >= MAX_BUNDLE_BYTES {
                break;
            }
            match outbound.tx_queue.lock().unwrap().pop() {
                Some(next) => bytes = next,
                None => break,
            }
        }

        thread::sleep(Duration::from_millis(params.txtail as u64 * 10));
        if let Err(e) = io.ptt(false) {
            log::error!("channel {channel}: PTT deassert failed: {e}");
        }

        let expected = bundle_bit_time(&params, bundled_bytes);
        let elapsed = key_up_at.elapsed();
        if elapsed > expected + Duration::from_millis(100) {
            log::warn!(
                "channel {channel}: PTT held {}ms, expected ~{}ms for a {bundled_bytes}-byte, {bundled_frames}-frame burst",
                elapsed.as_millis(),
                expected.as_millis(),
            );
        }
    }
}

/// TX-delay + data bit-time + TX-tail for a bundle of `total_bytes`, used
/// only to sanity-check the measured PTT-on duration (spec §4.2's
/// transmit-wrapper timing warning).
fn bundle_bit_time(params: &CsmaParams, total_bytes: usize) -> Duration {
    let txdelay = Duration::from_millis(params.txdelay as u64 * 10);
    let txtail = Duration::from_millis(params.txtail as u64 * 10);
    let data_bits = total_bytes as u64 * 8;
    let data_time = Duration::from_millis(data_bits * 1000 / BIT_RATE_BPS);
    txdelay + data_time + txtail
}

/// Busy-waits for a clear channel, then the slottime/persistence dice roll
/// of spec §4.2 steps 3-5, returning false if the channel never clears
/// within a generous bound (60s, matching `TncError::ChannelAccessTimeout`).
/// The post-carrier dwell (step 4) fires once per clear-channel
/// acquisition, reapplied if carrier reappears mid persistence-loop.
fn wait_for_clear_channel<T: ChannelIo>(io: &mut T, params: &CsmaParams) -> bool {
    if params.full_duplex {
        return true;
    }
    let deadline = Duration::from_secs(60);
    let mut waited = Duration::ZERO;
    let mut dwait_done = false;
    loop {
        if io.dcd() {
            dwait_done = false;
        } else {
            if !dwait_done {
                if params.dwait > 0 {
                    thread::sleep(Duration::from_millis(params.dwait as u64 * 10));
                }
                dwait_done = true;
            }
            if should_transmit(params, false, random_byte()) {
                return true;
            }
        }
        let step = Duration::from_millis(params.slottime as u64 * 10);
        thread::sleep(step);
        waited += step;
        if waited >= deadline {
            return false;
        }
    }
}

/// Cheap, non-cryptographic byte source for the persistence dice roll;
/// nothing here needs to resist prediction, only to be roughly uniform.
fn random_byte() -> u8 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos & 0xff) as u8
}

/// Reads raw bytes off the channel's other `ChannelIo` clone, decodes the
/// KISS framing the modem speaks, and forwards each Data command both to
/// the DLQ (for DLSM processing) and to every subscribed KISS client (for
/// monitoring). Mirrors the teacher's `spawn_reader` half.
pub fn run_channel_reader<T: ChannelIo>(mut io: T, channel: u8, dlq: DlqSender, monitors: MonitorRegistry) {
    let mut decoder = KissDecoder::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = match io.read(&mut buf) {
            Ok(0) => {
                log::info!("channel {channel}: reader got EOF, stopping");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                log::error!("channel {channel}: read error: {e}");
                return;
            }
        };
        for &byte in &buf[..n] {
            if let Some(KissEvent::Frame(frame)) = decoder.feed(byte) {
                if let KissCommand::Data(bytes) = frame.command {
                    monitors.publish(&bytes);
                    if dlq.raw_frame(channel, bytes).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
