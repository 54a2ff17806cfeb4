//! AX.25 frame codec: address list, control field (modulo-8 or modulo-128),
//! optional PID, and information field. HDLC bit-stuffing, the frame check
//! sequence, and the physical/modem layer are external collaborators (spec
//! §1 Non-goals) — this module only speaks the already-deframed byte
//! stream the HDLC layer would hand us.

use crate::address::AddressList;
use crate::cdata::{CData, CDataError, MAX_INFO_LEN};
use crate::seq::{Modulus, SeqNo};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("address field truncated")]
    Truncated,
    #[error("more than 8 digipeater addresses")]
    TooManyAddresses,
    #[error("control field truncated")]
    ControlTruncated,
    #[error("unrecognised U-frame modifier bits")]
    UnknownUFrame,
    #[error("information field present on a frame type that may not carry one")]
    UnexpectedInfo,
    #[error("information field missing on a frame type that requires one")]
    MissingInfo,
    #[error("information field too long: {0} bytes")]
    InfoTooLong(usize),
}

impl From<CDataError> for FrameError {
    fn from(e: CDataError) -> Self {
        match e {
            CDataError::TooLarge(n) => FrameError::InfoTooLong(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SKind {
    RR,
    RNR,
    REJ,
    SREJ,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UKind {
    SABM,
    SABME,
    DISC,
    DM,
    UA,
    FRMR,
    UI,
    XID,
    TEST,
}

impl UKind {
    /// (m3, m2) five-bit U-frame modifier, split around the P/F bit, per the
    /// classic AX.25 control-field table.
    fn modifier_bits(self) -> (u8, u8) {
        match self {
            UKind::UI => (0b000, 0b00),
            UKind::DM => (0b000, 0b11),
            UKind::SABM => (0b001, 0b11),
            UKind::DISC => (0b010, 0b11),
            UKind::UA => (0b011, 0b00),
            UKind::SABME => (0b011, 0b11),
            UKind::FRMR => (0b100, 0b01),
            UKind::XID => (0b101, 0b11),
            UKind::TEST => (0b111, 0b00),
        }
    }

    fn from_modifier_bits(m3: u8, m2: u8) -> Option<Self> {
        Some(match (m3, m2) {
            (0b000, 0b00) => UKind::UI,
            (0b000, 0b11) => UKind::DM,
            (0b001, 0b11) => UKind::SABM,
            (0b010, 0b11) => UKind::DISC,
            (0b011, 0b00) => UKind::UA,
            (0b011, 0b11) => UKind::SABME,
            (0b100, 0b01) => UKind::FRMR,
            (0b101, 0b11) => UKind::XID,
            (0b111, 0b00) => UKind::TEST,
            _ => return None,
        })
    }

    /// Whether this U-frame type carries PID + information (only UI and XID
    /// do in practice; FRMR carries a fixed diagnostic info field too).
    pub fn carries_info(self) -> bool {
        matches!(self, UKind::UI | UKind::XID | UKind::FRMR)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    I { ns: SeqNo, nr: SeqNo, pf: bool },
    S { kind: SKind, nr: SeqNo, pf: bool },
    U { kind: UKind, pf: bool },
}

impl Control {
    pub fn decode(data: &[u8], modulus: Modulus) -> Result<(Control, usize), FrameError> {
        if data.is_empty() {
            return Err(FrameError::ControlTruncated);
        }
        let b0 = data[0];
        if b0 & 0x03 == 0x03 {
            let m3 = (b0 >> 5) & 0x07;
            let pf = (b0 >> 4) & 0x01 != 0;
            let m2 = (b0 >> 2) & 0x03;
            let kind = UKind::from_modifier_bits(m3, m2).ok_or(FrameError::UnknownUFrame)?;
            return Ok((Control::U { kind, pf }, 1));
        }
        match modulus {
            Modulus::Mod8 => {
                if b0 & 0x01 == 0 {
                    let ns = SeqNo::new((b0 >> 1) & 0x07, modulus);
                    let pf = (b0 >> 4) & 0x01 != 0;
                    let nr = SeqNo::new((b0 >> 5) & 0x07, modulus);
                    Ok((Control::I { ns, nr, pf }, 1))
                } else {
                    let kind = match (b0 >> 2) & 0x03 {
                        0b00 => SKind::RR,
                        0b01 => SKind::RNR,
                        0b10 => SKind::REJ,
                        0b11 => SKind::SREJ,
                        _ => unreachable!(),
                    };
                    let pf = (b0 >> 4) & 0x01 != 0;
                    let nr = SeqNo::new((b0 >> 5) & 0x07, modulus);
                    Ok((Control::S { kind, nr, pf }, 1))
                }
            }
            Modulus::Mod128 => {
                if data.len() < 2 {
                    return Err(FrameError::ControlTruncated);
                }
                let b1 = data[1];
                if b0 & 0x01 == 0 {
                    let ns = SeqNo::new(b0 >> 1, modulus);
                    let pf = b1 & 0x01 != 0;
                    let nr = SeqNo::new(b1 >> 1, modulus);
                    Ok((Control::I { ns, nr, pf }, 2))
                } else {
                    let kind = match (b0 >> 2) & 0x03 {
                        0b00 => SKind::RR,
                        0b01 => SKind::RNR,
                        0b10 => SKind::REJ,
                        0b11 => SKind::SREJ,
                        _ => unreachable!(),
                    };
                    let pf = b1 & 0x01 != 0;
                    let nr = SeqNo::new(b1 >> 1, modulus);
                    Ok((Control::S { kind, nr, pf }, 2))
                }
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Control::I { ns, nr, pf } => match ns.modulus {
                Modulus::Mod8 => {
                    vec![(nr.value << 5) | ((*pf as u8) << 4) | (ns.value << 1)]
                }
                Modulus::Mod128 => {
                    vec![ns.value << 1, (nr.value << 1) | (*pf as u8)]
                }
            },
            Control::S { kind, nr, pf } => {
                let ss = match kind {
                    SKind::RR => 0b00,
                    SKind::RNR => 0b01,
                    SKind::REJ => 0b10,
                    SKind::SREJ => 0b11,
                };
                match nr.modulus {
                    Modulus::Mod8 => {
                        vec![(nr.value << 5) | ((*pf as u8) << 4) | (ss << 2) | 0b01]
                    }
                    Modulus::Mod128 => {
                        vec![(ss << 2) | 0b01, (nr.value << 1) | (*pf as u8)]
                    }
                }
            }
            Control::U { kind, pf } => {
                let (m3, m2) = kind.modifier_bits();
                vec![(m3 << 5) | ((*pf as u8) << 4) | (m2 << 2) | 0b11]
            }
        }
    }

    pub fn poll_final(&self) -> bool {
        match self {
            Control::I { pf, .. } | Control::S { pf, .. } | Control::U { pf, .. } => *pf,
        }
    }
}

/// Coarse classification used by the DLSM dispatch table (spec §4.4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    I,
    RR,
    RNR,
    REJ,
    SREJ,
    SABM,
    SABME,
    DISC,
    DM,
    UA,
    FRMR,
    UI,
    XID,
    TEST,
}

impl Control {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Control::I { .. } => FrameType::I,
            Control::S { kind, .. } => match kind {
                SKind::RR => FrameType::RR,
                SKind::RNR => FrameType::RNR,
                SKind::REJ => FrameType::REJ,
                SKind::SREJ => FrameType::SREJ,
            },
            Control::U { kind, .. } => match kind {
                UKind::SABM => FrameType::SABM,
                UKind::SABME => FrameType::SABME,
                UKind::DISC => FrameType::DISC,
                UKind::DM => FrameType::DM,
                UKind::UA => FrameType::UA,
                UKind::FRMR => FrameType::FRMR,
                UKind::UI => FrameType::UI,
                UKind::XID => FrameType::XID,
                UKind::TEST => FrameType::TEST,
            },
        }
    }
}

impl FrameType {
    /// Whether AX.25 v2.2 §6.1 mandates this frame type to be a command,
    /// a response, or permits either, used for the protocol-error-logged
    /// sanity check in spec §4.4.2.
    pub fn expected_command_response(self) -> Option<bool> {
        match self {
            FrameType::I | FrameType::SABM | FrameType::SABME | FrameType::DISC | FrameType::UI => {
                Some(true)
            }
            FrameType::SREJ | FrameType::DM | FrameType::UA | FrameType::FRMR => Some(false),
            FrameType::RR | FrameType::RNR | FrameType::REJ | FrameType::XID | FrameType::TEST => {
                None
            }
        }
    }
}

/// Whether a control field's PID+info trailer is required, forbidden, or
/// present only sometimes (multi-SREJ's fill-in sequence list).
enum InfoRule {
    Mandatory,
    Optional,
    Forbidden,
}

fn info_rule(control: &Control) -> InfoRule {
    match control {
        Control::I { .. } => InfoRule::Mandatory,
        Control::U { kind, .. } => {
            if kind.carries_info() {
                InfoRule::Mandatory
            } else {
                InfoRule::Forbidden
            }
        }
        // A lone SREJ carries no info; a multi-SREJ fill-in request appends
        // the additional missing N(S) values as a PID+info trailer (spec
        // §4.4.2's "additional sequences for ..." case).
        Control::S { kind: SKind::SREJ, .. } => InfoRule::Optional,
        Control::S { .. } => InfoRule::Forbidden,
    }
}

/// A fully decoded AX.25 frame, owned exclusively by whichever queue
/// currently holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub addresses: AddressList,
    pub control: Control,
    pub pid: Option<u8>,
    pub info: Option<CData>,
}

/// Reserved for segmentation, spec §6.
pub const PID_SEGMENTATION: u8 = 0x08;
/// "No layer 3" PID, used by APRS and most UI traffic.
pub const PID_NO_LAYER3: u8 = 0xF0;

impl Packet {
    pub fn decode(data: &[u8], modulus: Modulus) -> Result<Packet, FrameError> {
        let (addresses, consumed) = AddressList::decode(data)?;
        let rest = &data[consumed..];
        let (control, ctrl_len) = Control::decode(rest, modulus)?;
        let rest = &rest[ctrl_len..];
        let (pid, info) = match info_rule(&control) {
            InfoRule::Mandatory => {
                if rest.is_empty() {
                    return Err(FrameError::MissingInfo);
                }
                let pid = rest[0];
                let payload = &rest[1..];
                if payload.len() > MAX_INFO_LEN {
                    return Err(FrameError::InfoTooLong(payload.len()));
                }
                (Some(pid), Some(CData::new(pid, payload)?))
            }
            InfoRule::Optional if !rest.is_empty() => {
                let pid = rest[0];
                let payload = &rest[1..];
                if payload.len() > MAX_INFO_LEN {
                    return Err(FrameError::InfoTooLong(payload.len()));
                }
                (Some(pid), Some(CData::new(pid, payload)?))
            }
            InfoRule::Optional => (None, None),
            InfoRule::Forbidden => {
                if !rest.is_empty() {
                    return Err(FrameError::UnexpectedInfo);
                }
                (None, None)
            }
        };
        Ok(Packet {
            addresses,
            control,
            pid,
            info,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.addresses.encode();
        out.extend(self.control.encode());
        if let Some(pid) = self.pid {
            out.push(pid);
            if let Some(info) = &self.info {
                out.extend_from_slice(info.as_slice());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, Callsign};

    fn addrs() -> AddressList {
        AddressList::new(
            Address::new(Callsign::new("DEST").unwrap(), 0, true),
            Address::new(Callsign::new("SRC").unwrap(), 0, false),
        )
    }

    #[test]
    fn i_frame_mod8_roundtrip() {
        let ctrl = Control::I {
            ns: SeqNo::new(3, Modulus::Mod8),
            nr: SeqNo::new(5, Modulus::Mod8),
            pf: true,
        };
        let encoded = ctrl.encode();
        assert_eq!(encoded.len(), 1);
        let (decoded, len) = Control::decode(&encoded, Modulus::Mod8).unwrap();
        assert_eq!(decoded, ctrl);
        assert_eq!(len, 1);
    }

    #[test]
    fn i_frame_mod128_roundtrip() {
        let ctrl = Control::I {
            ns: SeqNo::new(100, Modulus::Mod128),
            nr: SeqNo::new(42, Modulus::Mod128),
            pf: false,
        };
        let encoded = ctrl.encode();
        assert_eq!(encoded.len(), 2);
        let (decoded, len) = Control::decode(&encoded, Modulus::Mod128).unwrap();
        assert_eq!(decoded, ctrl);
        assert_eq!(len, 2);
    }

    #[test]
    fn u_frame_values_match_ax25_table() {
        let cases = [
            (UKind::SABM, 0x2Fu8),
            (UKind::SABME, 0x6F),
            (UKind::DISC, 0x43),
            (UKind::DM, 0x0F),
            (UKind::UA, 0x63),
            (UKind::FRMR, 0x87),
            (UKind::UI, 0x03),
            (UKind::XID, 0xAF),
            (UKind::TEST, 0xE3),
        ];
        for (kind, byte) in cases {
            let ctrl = Control::U { kind, pf: false };
            assert_eq!(ctrl.encode(), vec![byte], "{:?}", kind);
            let (decoded, len) = Control::decode(&[byte], Modulus::Mod8).unwrap();
            assert_eq!(decoded, ctrl);
            assert_eq!(len, 1);
        }
    }

    #[test]
    fn packet_roundtrip_with_info() {
        let p = Packet {
            addresses: addrs(),
            control: Control::I {
                ns: SeqNo::zero(Modulus::Mod8),
                nr: SeqNo::zero(Modulus::Mod8),
                pf: false,
            },
            pid: Some(PID_NO_LAYER3),
            info: Some(CData::new(PID_NO_LAYER3, b"hello").unwrap()),
        };
        let bytes = p.encode();
        let decoded = Packet::decode(&bytes, Modulus::Mod8).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn s_frame_rejects_info_field() {
        let mut bytes = addrs().encode();
        bytes.extend(Control::S {
            kind: SKind::RR,
            nr: SeqNo::zero(Modulus::Mod8),
            pf: false,
        }.encode());
        bytes.push(0xAA); // spurious trailing byte
        assert_eq!(
            Packet::decode(&bytes, Modulus::Mod8),
            Err(FrameError::UnexpectedInfo)
        );
    }
}
