//! The data link event queue (spec §4.3): a single MPSC channel carrying
//! every DL/LM primitive and timer expiry into the one DLSM worker thread
//! that owns all `DlsmLink`s. Mirrors the teacher's `event_tx:
//! mpsc::SyncSender<TncControlEvent>` pattern in `M17App`.

use std::sync::mpsc::{self, Receiver, SyncSender};

use dwcore::address::Address;
use dwcore::dlsm::{LinkEvent, TimerKind};

use crate::error::TncError;

/// Identifies one connected-mode link: which channel it rides on and the
/// (local, peer) callsign-SSID pair. Digipeater path is carried on the
/// `IncomingFrame`/`ConnectRequest` events themselves, not in the key,
/// since AX.25 treats the link as between the two end stations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub channel: u8,
    pub local: Address,
    pub peer: Address,
}

/// Everything that can arrive on the DLQ.
#[derive(Debug, Clone)]
pub enum DlqEvent {
    Link {
        key: LinkKey,
        digipeater_count: u8,
        event: LinkEvent,
    },
    /// DL-REGISTER-CALLSIGN: a client claims a callsign on a channel so
    /// inbound SABM/SABME addressed to it are accepted rather than ignored.
    RegisterCallsign { channel: u8, callsign: Address },
    /// DL-UNREGISTER-CALLSIGN.
    UnregisterCallsign { channel: u8, callsign: Address },
    /// DL-CLIENT-CLEANUP: a KISS/AGW client disconnected; tear down any
    /// links it owns on this channel that have no remaining outstanding
    /// work, per spec §4.3.
    ClientCleanup { channel: u8 },
    /// Raw AX.25 bytes pulled off a channel's KISS Data command, not yet
    /// decoded since that requires knowing the link's negotiated modulus
    /// (tracked only by the `LinkSet` the worker owns).
    RawFrame { channel: u8, bytes: Vec<u8> },
}

/// Cloneable producer handle. Every reader thread (KISS/AGW servers, the TX
/// worker, the timer wheel) gets one of these rather than touching a
/// `LinkSet` directly.
#[derive(Clone)]
pub struct DlqSender(SyncSender<DlqEvent>);

impl DlqSender {
    pub fn send(&self, event: DlqEvent) -> Result<(), TncError> {
        self.0
            .send(event)
            .map_err(|_| TncError::Io(std::io::Error::other("DLQ worker has shut down")))
    }

    pub fn link_event(
        &self,
        key: LinkKey,
        digipeater_count: u8,
        event: LinkEvent,
    ) -> Result<(), TncError> {
        self.send(DlqEvent::Link {
            key,
            digipeater_count,
            event,
        })
    }

    pub fn timer_expiry(
        &self,
        key: LinkKey,
        kind: TimerKind,
    ) -> Result<(), TncError> {
        self.link_event(key, 0, LinkEvent::TimerExpiry(kind))
    }

    pub fn channel_busy(&self, key: LinkKey, busy: bool) -> Result<(), TncError> {
        self.link_event(key, 0, LinkEvent::ChannelBusy(busy))
    }

    pub fn seize_confirm(&self, key: LinkKey) -> Result<(), TncError> {
        self.link_event(key, 0, LinkEvent::SeizeConfirm)
    }

    pub fn raw_frame(&self, channel: u8, bytes: Vec<u8>) -> Result<(), TncError> {
        self.send(DlqEvent::RawFrame { channel, bytes })
    }
}

/// Bounded at 256 so a wedged worker applies backpressure to readers
/// instead of growing memory without limit.
const DLQ_CAPACITY: usize = 256;

pub fn channel() -> (DlqSender, Receiver<DlqEvent>) {
    let (tx, rx) = mpsc::sync_channel(DLQ_CAPACITY);
    (DlqSender(tx), rx)
}
