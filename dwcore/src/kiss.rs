//! KISS framing: FEND/FESC/TFEND/TFESC byte-stream encapsulation, plus the
//! per-client decoder state machine and command dispatch table (spec §4.1,
//! §6). Mirrors the split in the teacher between `m17core::kiss` (pure
//! framing functions and a streaming `KissBuffer`) and the command dispatch
//! that lives one layer up.

pub const FEND: u8 = 0xC0;
pub const FESC: u8 = 0xDB;
pub const TFEND: u8 = 0xDC;
pub const TFESC: u8 = 0xDD;

/// Maximum decoded KISS frame payload (spec §6).
pub const MAX_FRAME_LEN: usize = 2048;

/// Encapsulate a typed KISS frame (header byte + payload) with FEND framing
/// and FESC escaping. Worst case output is `2*n + 2`.
pub fn encapsulate(typed_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(typed_bytes.len() * 2 + 2);
    out.push(FEND);
    for &b in typed_bytes {
        match b {
            FEND => {
                out.push(FESC);
                out.push(TFEND);
            }
            FESC => {
                out.push(FESC);
                out.push(TFESC);
            }
            other => out.push(other),
        }
    }
    out.push(FEND);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KissUnwrapError;

/// Strip the optional leading FEND and required trailing FEND, translate
/// escapes. A FESC not followed by TFEND/TFESC is a framing error: the bad
/// escape byte is discarded and decoding continues, matching spec §4.1's
/// instruction not to abort the whole frame over it.
pub fn unwrap(framed: &[u8]) -> Result<Vec<u8>, KissUnwrapError> {
    let mut data = framed;
    if data.first() == Some(&FEND) {
        data = &data[1..];
    }
    let Some((&FEND, body)) = data.split_last() else {
        return Err(KissUnwrapError);
    };
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] == FESC {
            match body.get(i + 1) {
                Some(&TFEND) => {
                    out.push(FEND);
                    i += 2;
                }
                Some(&TFESC) => {
                    out.push(FESC);
                    i += 2;
                }
                Some(_) => {
                    log::warn!("KISS: FESC followed by an unexpected byte, discarding escape");
                    i += 1;
                }
                None => {
                    log::warn!("KISS: FESC at end of frame, discarding escape");
                    i += 1;
                }
            }
        } else {
            out.push(body[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Client→TNC KISS commands (spec §4.1 dispatch table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KissCommand {
    Data(Vec<u8>),
    TxDelay(u8),
    Persistence(u8),
    SlotTime(u8),
    TxTail(u8),
    FullDuplex(bool),
    SetHardware(Vec<u8>),
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KissFrame {
    pub channel: u8,
    pub command: KissCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KissDispatchError {
    #[error("command {0} requires at least one payload byte")]
    MissingPayload(u8),
    #[error("unrecognised KISS command code {0}")]
    UnknownCommand(u8),
}

impl KissFrame {
    fn decode(channel_cmd: u8, payload: Vec<u8>) -> Result<KissFrame, KissDispatchError> {
        let channel = channel_cmd >> 4;
        let cmd = channel_cmd & 0x0f;
        let needs_payload = matches!(cmd, 1..=6);
        if needs_payload && payload.is_empty() {
            return Err(KissDispatchError::MissingPayload(cmd));
        }
        let command = match cmd {
            0 => KissCommand::Data(payload),
            1 => KissCommand::TxDelay(payload[0]),
            2 => KissCommand::Persistence(payload[0]),
            3 => KissCommand::SlotTime(payload[0]),
            4 => KissCommand::TxTail(payload[0]),
            5 => KissCommand::FullDuplex(payload[0] != 0),
            6 => KissCommand::SetHardware(payload),
            15 => KissCommand::Return,
            other => return Err(KissDispatchError::UnknownCommand(other)),
        };
        Ok(KissFrame { channel, command })
    }

    pub fn encode(&self) -> Vec<u8> {
        let cmd_code: u8 = match &self.command {
            KissCommand::Data(_) => 0,
            KissCommand::TxDelay(_) => 1,
            KissCommand::Persistence(_) => 2,
            KissCommand::SlotTime(_) => 3,
            KissCommand::TxTail(_) => 4,
            KissCommand::FullDuplex(_) => 5,
            KissCommand::SetHardware(_) => 6,
            KissCommand::Return => 15,
        };
        let header = (self.channel << 4) | cmd_code;
        let mut typed = vec![header];
        match &self.command {
            KissCommand::Data(d) | KissCommand::SetHardware(d) => typed.extend_from_slice(d),
            KissCommand::TxDelay(v)
            | KissCommand::Persistence(v)
            | KissCommand::SlotTime(v)
            | KissCommand::TxTail(v) => typed.push(*v),
            KissCommand::FullDuplex(b) => typed.push(*b as u8),
            KissCommand::Return => {}
        }
        encapsulate(&typed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Searching,
    Collecting,
}

/// A decoded event from the byte-level KISS decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KissEvent {
    /// A complete, valid frame was dispatched.
    Frame(KissFrame),
    /// A terminal app is stuck typing commands at a KISS port; respond with
    /// two raw FENDs to help it notice this is not a terminal (spec §4.1).
    RespondRestart,
    /// Any other noise line; nudge the terminal with a command prompt.
    RespondCmdPrompt,
}

/// Per-client byte decoder: frames the KISS byte stream and separates
/// "noise" (non-KISS bytes sent by a terminal-mode app) from real frames.
pub struct KissDecoder {
    state: DecoderState,
    frame_buf: Vec<u8>,
    noise_buf: Vec<u8>,
}

impl KissDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Searching,
            frame_buf: Vec::new(),
            noise_buf: Vec::new(),
        }
    }

    /// Feed one byte, returning any events it produced (normally 0 or 1, but
    /// a bare FEND can both close a noise line's preceding frame state and
    /// open a new collection, so callers should drain with a loop).
    pub fn feed(&mut self, byte: u8) -> Option<KissEvent> {
        match self.state {
            DecoderState::Searching => {
                if byte == FEND {
                    self.state = DecoderState::Collecting;
                    self.frame_buf.clear();
                    None
                } else if byte == b'\r' {
                    let line = self.noise_buf.clone();
                    self.noise_buf.clear();
                    let text = String::from_utf8_lossy(&line).to_ascii_lowercase();
                    let text = text.trim();
                    if text == "restart" || text == "reset" {
                        Some(KissEvent::RespondRestart)
                    } else {
                        Some(KissEvent::RespondCmdPrompt)
                    }
                } else {
                    self.noise_buf.push(byte);
                    None
                }
            }
            DecoderState::Collecting => {
                if byte == FEND {
                    if self.frame_buf.is_empty() {
                        // Leading/duplicate FEND, stay collecting.
                        return None;
                    }
                    let mut complete = Vec::with_capacity(self.frame_buf.len() + 2);
                    complete.push(FEND);
                    complete.extend_from_slice(&self.frame_buf);
                    complete.push(FEND);
                    self.frame_buf.clear();
                    self.state = DecoderState::Searching;
                    match unwrap(&complete) {
                        Ok(typed) if !typed.is_empty() => {
                            let mut typed = typed;
                            let header = typed.remove(0);
                            match KissFrame::decode(header, typed) {
                                Ok(frame) => Some(KissEvent::Frame(frame)),
                                Err(e) => {
                                    log::warn!("KISS: rejecting frame: {e}");
                                    None
                                }
                            }
                        }
                        Ok(_) => None,
                        Err(_) => {
                            log::warn!("KISS: malformed frame discarded");
                            None
                        }
                    }
                } else {
                    if self.frame_buf.len() < MAX_FRAME_LEN * 2 + 2 {
                        self.frame_buf.push(byte);
                    } else {
                        log::warn!("KISS: frame exceeded maximum length, truncating");
                    }
                    None
                }
            }
        }
    }
}

impl Default for KissDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulate_escapes_fend_and_fesc() {
        let out = encapsulate(&[0x00, 0xC0, 0xDB, 0x42]);
        assert_eq!(
            out,
            vec![0xC0, 0x00, 0xDB, 0xDC, 0xDB, 0xDD, 0x42, 0xC0]
        );
    }

    #[test]
    fn unwrap_reverses_encapsulate() {
        let original = [0x00u8, 0xC0, 0xDB, 0x42, 0xFF, 0x01];
        let framed = encapsulate(&original);
        let recovered = unwrap(&framed).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn unwrap_roundtrip_all_byte_values() {
        let original: Vec<u8> = (0..=255u8).collect();
        let framed = encapsulate(&original);
        let recovered = unwrap(&framed).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn decoder_parses_data_frame() {
        let mut decoder = KissDecoder::new();
        let frame = encapsulate(&[0x00, 1, 2, 3]);
        let mut events = vec![];
        for b in frame {
            if let Some(ev) = decoder.feed(b) {
                events.push(ev);
            }
        }
        assert_eq!(
            events,
            vec![KissEvent::Frame(KissFrame {
                channel: 0,
                command: KissCommand::Data(vec![1, 2, 3])
            })]
        );
    }

    #[test]
    fn decoder_rejects_txdelay_without_payload() {
        let mut decoder = KissDecoder::new();
        let frame = encapsulate(&[0x01]);
        let mut events = vec![];
        for b in frame {
            if let Some(ev) = decoder.feed(b) {
                events.push(ev);
            }
        }
        assert!(events.is_empty());
    }

    #[test]
    fn decoder_recognises_restart_noise_line() {
        let mut decoder = KissDecoder::new();
        let mut events = vec![];
        for b in b"restart\r" {
            if let Some(ev) = decoder.feed(*b) {
                events.push(ev);
            }
        }
        assert_eq!(events, vec![KissEvent::RespondRestart]);
    }

    #[test]
    fn decoder_prompts_on_other_noise() {
        let mut decoder = KissDecoder::new();
        let mut events = vec![];
        for b in b"hello there\r" {
            if let Some(ev) = decoder.feed(*b) {
                events.push(ev);
            }
        }
        assert_eq!(events, vec![KissEvent::RespondCmdPrompt]);
    }
}
