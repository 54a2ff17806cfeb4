//! XID parameter-negotiation information field (spec §6): format-identifier
//! 0x82, group-identifier 0x80, 16-bit group-length, then a sequence of
//! (parameter-id, parameter-length, parameter-value) tuples.

use crate::seq::Modulus;

const FI: u8 = 0x82;
const GI: u8 = 0x80;

const PI_CLASSES_OF_PROCEDURE: u8 = 2;
const PI_HDLC_OPTIONS: u8 = 3;
const PI_I_FIELD_LEN_RX: u8 = 6;
const PI_WINDOW_SIZE_RX: u8 = 8;
const PI_ACK_TIMER: u8 = 9;
const PI_RETRIES: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SrejEnable {
    None,
    Single,
    Multi,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum XidError {
    #[error("XID info field too short")]
    Truncated,
    #[error("XID format identifier or group identifier mismatch")]
    BadHeader,
    #[error("XID parameter length field overruns the buffer")]
    ParamOverrun,
}

/// Parameters as explicitly present in a received XID — fields absent from
/// the wire data are `None` and default to the local station's own value
/// during negotiation (spec §4.4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XidFields {
    pub full_duplex: Option<bool>,
    pub modulo: Option<Modulus>,
    pub srej_enable: Option<SrejEnable>,
    pub n1_paclen: Option<u16>,
    pub window_size: Option<u8>,
    pub ack_timer_ms: Option<u16>,
    pub retries: Option<u8>,
}

/// Fully resolved parameter set, either this station's local capability or
/// the outcome of negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XidParams {
    pub full_duplex: bool,
    pub modulo: Modulus,
    pub srej_enable: SrejEnable,
    pub n1_paclen: u16,
    pub window_size: u8,
    pub ack_timer_ms: u16,
    pub retries: u8,
}

impl XidFields {
    pub fn decode(data: &[u8]) -> Result<XidFields, XidError> {
        if data.len() < 4 {
            return Err(XidError::Truncated);
        }
        if data[0] != FI || data[1] != GI {
            return Err(XidError::BadHeader);
        }
        let group_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        let mut rest = &data[4..];
        if rest.len() < group_len {
            return Err(XidError::ParamOverrun);
        }
        rest = &rest[..group_len];

        let mut fields = XidFields::default();
        let mut i = 0;
        while i + 2 <= rest.len() {
            let pi = rest[i];
            let pl = rest[i + 1] as usize;
            if i + 2 + pl > rest.len() {
                return Err(XidError::ParamOverrun);
            }
            let pv = &rest[i + 2..i + 2 + pl];
            match pi {
                PI_CLASSES_OF_PROCEDURE if pl >= 2 => {
                    let v = u16::from_be_bytes([pv[0], pv[1]]);
                    fields.full_duplex = Some(v & 0x0001 != 0);
                }
                PI_HDLC_OPTIONS if pl >= 3 => {
                    let v = u32::from_be_bytes([0, pv[0], pv[1], pv[2]]);
                    fields.modulo = Some(if v & 0x0020 != 0 {
                        Modulus::Mod128
                    } else {
                        Modulus::Mod8
                    });
                    let rej = v & 0x0002 != 0;
                    let srej = v & 0x0004 != 0;
                    fields.srej_enable = Some(match (srej, rej) {
                        (false, _) => SrejEnable::None,
                        (true, true) => SrejEnable::Multi,
                        (true, false) => SrejEnable::Single,
                    });
                }
                PI_I_FIELD_LEN_RX if pl >= 2 => {
                    let bits = u16::from_be_bytes([pv[0], pv[1]]);
                    fields.n1_paclen = Some(bits / 8);
                }
                PI_WINDOW_SIZE_RX if pl >= 1 => {
                    fields.window_size = Some(pv[0]);
                }
                PI_ACK_TIMER if pl >= 2 => {
                    fields.ack_timer_ms = Some(u16::from_be_bytes([pv[0], pv[1]]));
                }
                PI_RETRIES if pl >= 1 => {
                    fields.retries = Some(pv[0]);
                }
                _ => {}
            }
            i += 2 + pl;
        }
        Ok(fields)
    }
}

impl XidParams {
    pub fn encode(&self) -> Vec<u8> {
        let mut params = Vec::new();

        let cop: u16 = if self.full_duplex { 0x0001 } else { 0x0000 };
        params.push(PI_CLASSES_OF_PROCEDURE);
        params.push(2);
        params.extend_from_slice(&cop.to_be_bytes());

        let mut hdlc: u32 = 0;
        if self.modulo == Modulus::Mod128 {
            hdlc |= 0x0020;
        }
        match self.srej_enable {
            SrejEnable::None => {}
            SrejEnable::Single => hdlc |= 0x0004,
            SrejEnable::Multi => hdlc |= 0x0004 | 0x0002,
        }
        let hdlc_bytes = hdlc.to_be_bytes();
        params.push(PI_HDLC_OPTIONS);
        params.push(3);
        params.extend_from_slice(&hdlc_bytes[1..4]);

        params.push(PI_I_FIELD_LEN_RX);
        params.push(2);
        params.extend_from_slice(&(self.n1_paclen * 8).to_be_bytes());

        params.push(PI_WINDOW_SIZE_RX);
        params.push(1);
        params.push(self.window_size);

        params.push(PI_ACK_TIMER);
        params.push(2);
        params.extend_from_slice(&self.ack_timer_ms.to_be_bytes());

        params.push(PI_RETRIES);
        params.push(1);
        params.push(self.retries);

        let mut out = Vec::with_capacity(4 + params.len());
        out.push(FI);
        out.push(GI);
        out.extend_from_slice(&(params.len() as u16).to_be_bytes());
        out.extend_from_slice(&params);
        out
    }

    /// Per-field minimum of proposed vs local capability, except ack-timer
    /// and retry count which take the maximum (spec §4.4.2). Parameters the
    /// peer did not specify default to this station's own value.
    pub fn negotiate(&self, proposed: &XidFields) -> XidParams {
        XidParams {
            full_duplex: proposed.full_duplex.unwrap_or(self.full_duplex) && self.full_duplex,
            modulo: match proposed.modulo {
                Some(Modulus::Mod8) => Modulus::Mod8,
                _ => self.modulo,
            },
            srej_enable: proposed
                .srej_enable
                .map(|p| p.min(self.srej_enable))
                .unwrap_or(self.srej_enable),
            n1_paclen: proposed
                .n1_paclen
                .map(|p| p.min(self.n1_paclen))
                .unwrap_or(self.n1_paclen),
            window_size: proposed
                .window_size
                .map(|p| p.min(self.window_size))
                .unwrap_or(self.window_size),
            ack_timer_ms: proposed
                .ack_timer_ms
                .map(|p| p.max(self.ack_timer_ms))
                .unwrap_or(self.ack_timer_ms),
            retries: proposed
                .retries
                .map(|p| p.max(self.retries))
                .unwrap_or(self.retries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> XidParams {
        XidParams {
            full_duplex: false,
            modulo: Modulus::Mod128,
            srej_enable: SrejEnable::Multi,
            n1_paclen: 256,
            window_size: 7,
            ack_timer_ms: 3000,
            retries: 10,
        }
    }

    #[test]
    fn roundtrip_encode_decode() {
        let params = local();
        let encoded = params.encode();
        let fields = XidFields::decode(&encoded).unwrap();
        assert_eq!(fields.full_duplex, Some(false));
        assert_eq!(fields.modulo, Some(Modulus::Mod128));
        assert_eq!(fields.srej_enable, Some(SrejEnable::Multi));
        assert_eq!(fields.n1_paclen, Some(256));
        assert_eq!(fields.window_size, Some(7));
        assert_eq!(fields.ack_timer_ms, Some(3000));
        assert_eq!(fields.retries, Some(10));
    }

    #[test]
    fn negotiate_takes_minimum_except_timer_and_retries() {
        let local = local();
        let proposed = XidFields {
            window_size: Some(3),
            n1_paclen: Some(512),
            ack_timer_ms: Some(5000),
            retries: Some(5),
            srej_enable: Some(SrejEnable::Single),
            modulo: Some(Modulus::Mod8),
            full_duplex: Some(true),
        };
        let merged = local.negotiate(&proposed);
        assert_eq!(merged.window_size, 3); // min(7,3)
        assert_eq!(merged.n1_paclen, 256); // min(256,512)
        assert_eq!(merged.ack_timer_ms, 5000); // max(3000,5000)
        assert_eq!(merged.retries, 10); // max(10,5)
        assert_eq!(merged.srej_enable, SrejEnable::Single); // min(Multi,Single)
        assert_eq!(merged.modulo, Modulus::Mod8);
        assert!(!merged.full_duplex); // local doesn't support it
    }

    #[test]
    fn negotiate_defaults_unspecified_to_local() {
        let local = local();
        let proposed = XidFields::default();
        let merged = local.negotiate(&proposed);
        assert_eq!(merged, local);
    }
}
