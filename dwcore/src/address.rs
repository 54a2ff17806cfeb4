//! AX.25 address field encoding: callsign + SSID + repeated/command bits.
//!
//! Each address occupies 7 bytes on the wire: 6 bytes of callsign shifted
//! left one bit, then an SSID byte carrying the extension bit (low, set only
//! on the last address of the list), the SSID itself, two reserved bits
//! (conventionally both 1), and the high bit which is either the
//! command/response bit (destination and source) or the has-been-repeated
//! flag (digipeater addresses).

use core::fmt;

/// A single AX.25 callsign, always 6 ASCII characters, space-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Callsign(pub [u8; 6]);

impl Callsign {
    pub fn new(raw: &str) -> Option<Self> {
        let bytes = raw.as_bytes();
        if bytes.is_empty() || bytes.len() > 6 {
            return None;
        }
        let mut out = [b' '; 6];
        for (i, b) in bytes.iter().enumerate() {
            let b = b.to_ascii_uppercase();
            if !(b.is_ascii_alphanumeric()) {
                return None;
            }
            out[i] = b;
        }
        Some(Callsign(out))
    }

    pub fn as_str_trimmed(&self) -> String {
        self.0
            .iter()
            .map(|b| *b as char)
            .collect::<String>()
            .trim_end()
            .to_string()
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_trimmed())
    }
}

/// One address in an AX.25 address field: callsign, SSID, and the bit whose
/// meaning depends on position (C-bit for dest/source, repeated flag for a
/// digipeater hop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub callsign: Callsign,
    pub ssid: u8,
    /// Command/response bit for destination and source; has-been-repeated
    /// flag for digipeater hops.
    pub high_bit: bool,
}

impl Address {
    pub fn new(callsign: Callsign, ssid: u8, high_bit: bool) -> Self {
        Self {
            callsign,
            ssid: ssid & 0x0f,
            high_bit,
        }
    }

    /// Address compared ignoring the SSID-ignore / repeated-flag bit, used to
    /// match link identities regardless of whether a digipeater hop has been
    /// marked used.
    pub fn same_station(&self, other: &Address) -> bool {
        self.callsign == other.callsign && self.ssid == other.ssid
    }

    /// Parses the usual human-readable "CALL-SSID" form (SSID optional,
    /// defaults to 0). `high_bit` is left to the caller since its meaning
    /// depends on where the address ends up in a frame.
    pub fn parse(text: &str, high_bit: bool) -> Option<Self> {
        let (call, ssid) = match text.split_once('-') {
            Some((c, s)) => (c, s.parse().ok()?),
            None => (text, 0u8),
        };
        Some(Self::new(Callsign::new(call)?, ssid, high_bit))
    }

    pub fn decode(raw: &[u8; 7]) -> (Self, bool) {
        let mut callsign = [0u8; 6];
        for i in 0..6 {
            callsign[i] = raw[i] >> 1;
        }
        let ssid_byte = raw[6];
        let extension = ssid_byte & 0x01 != 0;
        let ssid = (ssid_byte >> 1) & 0x0f;
        let high_bit = ssid_byte & 0x80 != 0;
        (
            Address {
                callsign: Callsign(callsign),
                ssid,
                high_bit,
            },
            extension,
        )
    }

    pub fn encode(&self, is_last: bool) -> [u8; 7] {
        let mut out = [0u8; 7];
        for i in 0..6 {
            out[i] = self.callsign.0[i] << 1;
        }
        let mut ssid_byte = 0x60; // reserved bits conventionally 1,1
        ssid_byte |= (self.ssid & 0x0f) << 1;
        if self.high_bit {
            ssid_byte |= 0x80;
        }
        if is_last {
            ssid_byte |= 0x01;
        }
        out[6] = ssid_byte;
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.callsign)
        } else {
            write!(f, "{}-{}", self.callsign, self.ssid)
        }
    }
}

/// Command/response determination from the dest and source C-bits (AX.25
/// v2.2 6.1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResponse {
    Command,
    Response,
    /// Both C-bits equal: either a legacy v1 station or a malformed frame.
    Unknown,
}

/// The full address list of a frame: destination, source, then up to 8
/// digipeater hops, in on-wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressList {
    pub destination: Address,
    pub source: Address,
    pub digipeaters: Vec<Address>,
}

impl AddressList {
    pub fn new(destination: Address, source: Address) -> Self {
        Self {
            destination,
            source,
            digipeaters: Vec::new(),
        }
    }

    pub fn command_response(&self) -> CommandResponse {
        match (self.destination.high_bit, self.source.high_bit) {
            (true, false) => CommandResponse::Command,
            (false, true) => CommandResponse::Response,
            _ => CommandResponse::Unknown,
        }
    }

    pub fn digipeater_count(&self) -> usize {
        self.digipeaters.len()
    }

    /// True if any digipeater hop is already marked as having been repeated.
    /// Used by the KISS dispatch rule (send such frames high priority since
    /// they are mid-relay and shouldn't wait behind fresh traffic).
    pub fn has_used_digipeater(&self) -> bool {
        self.digipeaters.iter().any(|d| d.high_bit)
    }

    /// Returns a copy with source and destination swapped, used to build the
    /// link identity that matches an incoming frame against our own outgoing
    /// link record.
    pub fn swapped(&self) -> AddressList {
        AddressList {
            destination: self.source,
            source: self.destination,
            digipeaters: self.digipeaters.clone(),
        }
    }

    pub fn decode(data: &[u8]) -> Result<(AddressList, usize), super::frame::FrameError> {
        use super::frame::FrameError;
        if data.len() < 14 {
            return Err(FrameError::Truncated);
        }
        let mut addrs = Vec::new();
        let mut idx = 0;
        loop {
            if idx + 7 > data.len() {
                return Err(FrameError::Truncated);
            }
            let raw: [u8; 7] = data[idx..idx + 7].try_into().unwrap();
            let (addr, is_last) = Address::decode(&raw);
            addrs.push(addr);
            idx += 7;
            if is_last {
                break;
            }
            if addrs.len() >= 10 {
                return Err(FrameError::TooManyAddresses);
            }
        }
        if addrs.len() < 2 {
            return Err(FrameError::Truncated);
        }
        let destination = addrs[0];
        let source = addrs[1];
        let digipeaters = addrs[2..].to_vec();
        Ok((
            AddressList {
                destination,
                source,
                digipeaters,
            },
            idx,
        ))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7 * (2 + self.digipeaters.len()));
        let last_idx = 1 + self.digipeaters.len();
        out.extend_from_slice(&self.destination.encode(last_idx == 0));
        out.extend_from_slice(&self.source.encode(last_idx == 1));
        for (i, d) in self.digipeaters.iter().enumerate() {
            out.extend_from_slice(&d.encode(i + 2 == last_idx));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let a = Address::new(Callsign::new("VK7XT").unwrap(), 5, true);
        let raw = a.encode(true);
        let (decoded, last) = Address::decode(&raw);
        assert_eq!(decoded, a);
        assert!(last);
    }

    #[test]
    fn address_list_roundtrip() {
        let dest = Address::new(Callsign::new("APRS").unwrap(), 0, true);
        let src = Address::new(Callsign::new("VK7XT").unwrap(), 1, false);
        let mut list = AddressList::new(dest, src);
        list.digipeaters
            .push(Address::new(Callsign::new("WIDE1").unwrap(), 1, true));
        let encoded = list.encode();
        let (decoded, consumed) = AddressList::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, list);
        assert!(decoded.has_used_digipeater());
    }

    #[test]
    fn command_response_detection() {
        let dest = Address::new(Callsign::new("DEST").unwrap(), 0, true);
        let src = Address::new(Callsign::new("SRC").unwrap(), 0, false);
        let list = AddressList::new(dest, src);
        assert_eq!(list.command_response(), CommandResponse::Command);
        assert_eq!(list.swapped().command_response(), CommandResponse::Response);
    }

    #[test]
    fn callsign_display_trims_padding() {
        let c = Callsign::new("N0CALL").unwrap();
        assert_eq!(c.as_str_trimmed(), "N0CALL");
        let c = Callsign::new("AB1CD").unwrap();
        assert_eq!(format!("{}", c), "AB1CD");
    }
}
