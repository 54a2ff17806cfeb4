//! Handling shared by any host-facing KISS client (TCP or a local serial
//! terminal session): feed bytes through `KissDecoder`, dispatch commands,
//! and turn a KISS Data command into a raw frame headed for the channel.

use dwcore::kiss::{KissCommand, KissDecoder, KissEvent, KissFrame};

use crate::dlq::DlqSender;
use crate::txworker::ChannelOutbound;

/// Parameters a KISS client can change at runtime (spec §4.1 command
/// dispatch table 1-5); applied to the channel's CSMA params in place.
#[derive(Debug, Clone, Copy)]
pub enum ParamUpdate {
    TxDelay(u8),
    Persistence(u8),
    SlotTime(u8),
    TxTail(u8),
    FullDuplex(bool),
}

pub enum ClientAction {
    /// A raw AX.25 frame ready to be queued for transmission as-is.
    QueueRaw(Vec<u8>),
    Param(ParamUpdate),
    /// The KISS "return to command mode" request; the caller should drop
    /// this client's connection.
    Return,
    /// Two bare FENDs, sent back to a confused terminal-mode client.
    RespondRestart,
    RespondCmdPrompt,
    /// A SetHardware command with a query key ("TNC", "TXBUF", ...);
    /// answered only to the client that asked, never broadcast.
    HardwareQuery(Vec<u8>),
}

/// Feeds a single inbound byte through the decoder, returning any action
/// the resulting event implies. Multiple bytes may need draining in a loop
/// by the caller since one byte can close a frame and open another.
pub fn feed_byte(decoder: &mut KissDecoder, byte: u8) -> Option<ClientAction> {
    match decoder.feed(byte)? {
        KissEvent::Frame(KissFrame { command, .. }) => Some(match command {
            KissCommand::Data(bytes) => ClientAction::QueueRaw(bytes),
            KissCommand::TxDelay(v) => ClientAction::Param(ParamUpdate::TxDelay(v)),
            KissCommand::Persistence(v) => ClientAction::Param(ParamUpdate::Persistence(v)),
            KissCommand::SlotTime(v) => ClientAction::Param(ParamUpdate::SlotTime(v)),
            KissCommand::TxTail(v) => ClientAction::Param(ParamUpdate::TxTail(v)),
            KissCommand::FullDuplex(v) => ClientAction::Param(ParamUpdate::FullDuplex(v)),
            KissCommand::SetHardware(payload) => ClientAction::HardwareQuery(payload),
            KissCommand::Return => ClientAction::Return,
        }),
        KissEvent::RespondRestart => Some(ClientAction::RespondRestart),
        KissEvent::RespondCmdPrompt => Some(ClientAction::RespondCmdPrompt),
    }
}

/// Dispatch an inbound raw frame discovered on the radio side of a channel
/// into the DLQ for decoding and DLSM processing.
pub fn report_inbound_frame(dlq: &DlqSender, channel: u8, bytes: Vec<u8>) {
    if let Err(e) = dlq.raw_frame(channel, bytes) {
        log::warn!("channel {channel}: failed to enqueue inbound frame: {e}");
    }
}

/// Builds the SetHardware reply for a recognised query key (spec §4.1:
/// "TNC" gets a version string, "TXBUF" gets the current queued byte
/// count), or `None` if the key is something this TNC doesn't implement.
pub fn hardware_reply(channel: u8, payload: &[u8], queued_bytes: usize) -> Option<KissFrame> {
    let text = String::from_utf8_lossy(payload);
    let key = text.split(':').next().unwrap_or("").trim();
    let reply = match key {
        "TNC" => format!("TNC:dwtnc {}", env!("CARGO_PKG_VERSION")),
        "TXBUF" => format!("TXBUF:{queued_bytes}"),
        _ => return None,
    };
    Some(KissFrame {
        channel,
        command: KissCommand::SetHardware(reply.into_bytes()),
    })
}

pub fn apply_param_update(outbound: &ChannelOutbound, update: ParamUpdate) {
    outbound.update_params(|p| match update {
        ParamUpdate::TxDelay(v) => p.txdelay = v,
        ParamUpdate::Persistence(v) => p.persistence = v,
        ParamUpdate::SlotTime(v) => p.slottime = v,
        ParamUpdate::TxTail(v) => p.txtail = v,
        ParamUpdate::FullDuplex(v) => p.full_duplex = v,
    });
}
