//! Protocol error taxonomy (spec §7): the classic AX.25 lettered error list.
//! These are logged and drive recovery action; they never abort a link by
//! themselves except where the recovery action itself is "terminate".

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// A: F=1 received but P=1 was not outstanding.
    UnexpectedFinal,
    /// B: unexpected DM with F=1 in Connected/TimerRecovery/AwaitingV22Connection.
    UnexpectedDm,
    /// C: unexpected UA in Connected/TimerRecovery/AwaitingV22Connection.
    UnexpectedUa,
    /// D: UA received without F=1 when SABM(E) or DISC was sent with P=1.
    UaWithoutFinal,
    /// E: DM received in Connected/TimerRecovery/AwaitingV22Connection.
    DmInConnectedState,
    /// F: SABM(E) received while already Connected/TimerRecovery/AwaitingV22Connection; link reset.
    DataLinkReset,
    /// G: N2 timeouts waiting for acknowledgement of outstanding data.
    AckTimeout,
    /// H: N2 timeouts waiting for a response to SABM(E).
    SetupTimeout,
    /// I: N2 timeouts waiting for a response to DISC.
    DiscTimeout,
    /// J: N(R) sequence error - value outside [V(A), V(S)].
    BadNr,
    /// K: FRMR received from the peer.
    FrmrReceived,
    /// L: control field invalid or not implemented.
    InvalidControl,
    /// M: information field present on a frame type that may not carry one.
    UnexpectedInfo,
    /// N: frame length incorrect for its frame type.
    BadFrameLength,
    /// O: I-frame information field exceeded the maximum allowed length.
    InfoTooLong,
    /// P: N(S) fell outside the current receive window.
    BadNs,
    /// Q: command/response bit did not match what this frame type requires.
    BadCommandResponse,
    /// T: N2 timeouts waiting for a response to an enquiry (RR/RNR poll).
    EnquiryTimeout,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProtocolError::UnexpectedFinal => "F=1 received but P=1 not outstanding",
            ProtocolError::UnexpectedDm => "unexpected DM with F=1",
            ProtocolError::UnexpectedUa => "unexpected UA",
            ProtocolError::UaWithoutFinal => "UA received without F=1",
            ProtocolError::DmInConnectedState => "DM received while connected",
            ProtocolError::DataLinkReset => "SABM(E) received while connected, link reset",
            ProtocolError::AckTimeout => "N2 timeouts waiting for acknowledgement",
            ProtocolError::SetupTimeout => "N2 timeouts waiting for SABM(E) response",
            ProtocolError::DiscTimeout => "N2 timeouts waiting for DISC response",
            ProtocolError::BadNr => "N(R) sequence error",
            ProtocolError::FrmrReceived => "FRMR received from peer",
            ProtocolError::InvalidControl => "invalid or unimplemented control field",
            ProtocolError::UnexpectedInfo => "information field on a frame type that forbids one",
            ProtocolError::BadFrameLength => "frame length incorrect for its type",
            ProtocolError::InfoTooLong => "information field exceeded maximum length",
            ProtocolError::BadNs => "N(S) outside the receive window",
            ProtocolError::BadCommandResponse => "command/response bit mismatch",
            ProtocolError::EnquiryTimeout => "N2 timeouts waiting for enquiry response",
        };
        write!(f, "{text}")
    }
}
