//! Segmentation and reassembly of outgoing payloads larger than N1 (spec
//! §4.4.3), extended (modulo-128) mode only. PID 0x08 is reserved for
//! segmentation fragments.

use crate::cdata::CData;
use crate::frame::PID_SEGMENTATION;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("segmentation fragment shorter than its header")]
    Truncated,
    #[error("continuation fragment received with no first segment in progress")]
    NoActiveReassembly,
}

/// Split `payload` into segmentation fragments no larger than `n1_paclen`
/// bytes of AX.25 information field each (including the 1-byte segment
/// header). Returns ready-to-send `CData` buffers tagged with PID 0x08.
///
/// Segment count is `ceil((payload.len() + 1) / (n1_paclen - 1))`: the `+1`
/// accounts for `original_pid` riding along in the first segment's data
/// unit, and `n1_paclen - 1` is the space left in each fragment after its
/// 1-byte segment-number header.
pub fn segment_payload(payload: &[u8], n1_paclen: usize, original_pid: u8) -> Vec<CData> {
    assert!(n1_paclen >= 2, "n1_paclen must leave room for a data byte");
    let chunk_size = n1_paclen - 1;
    let mut data_with_pid = Vec::with_capacity(payload.len() + 1);
    data_with_pid.push(original_pid);
    data_with_pid.extend_from_slice(payload);

    let num_segments = data_with_pid.len().div_ceil(chunk_size);
    let mut out = Vec::with_capacity(num_segments);
    for (i, chunk) in data_with_pid.chunks(chunk_size).enumerate() {
        let n_following = (num_segments - 1 - i) as u8;
        let header = if i == 0 { 0x80 | n_following } else { n_following };
        let mut frag = Vec::with_capacity(chunk.len() + 1);
        frag.push(header);
        frag.extend_from_slice(chunk);
        out.push(CData::new(PID_SEGMENTATION, &frag).expect("fragment within MAX_INFO_LEN"));
    }
    out
}

struct InProgress {
    pid: u8,
    buffer: Vec<u8>,
}

/// Holds at most one active first-segment reassembly in progress (spec §3).
/// A fresh first segment always replaces any incomplete one — the sender
/// would only start a new segmented transmission once the previous one
/// finished or timed out upstream.
#[derive(Default)]
pub struct Reassembler {
    active: Option<InProgress>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Feed one segmentation-fragment information field. Returns the
    /// reassembled `(original_pid, payload)` once the final fragment
    /// arrives.
    pub fn feed(&mut self, info: &[u8]) -> Result<Option<(u8, Vec<u8>)>, SegmentError> {
        if info.is_empty() {
            return Err(SegmentError::Truncated);
        }
        let header = info[0];
        let is_first = header & 0x80 != 0;
        let n_following = header & 0x7f;

        if is_first {
            if info.len() < 2 {
                return Err(SegmentError::Truncated);
            }
            let pid = info[1];
            let data = &info[2..];
            if n_following == 0 {
                self.active = None;
                return Ok(Some((pid, data.to_vec())));
            }
            self.active = Some(InProgress {
                pid,
                buffer: data.to_vec(),
            });
            Ok(None)
        } else {
            let Some(active) = self.active.as_mut() else {
                return Err(SegmentError::NoActiveReassembly);
            };
            active.buffer.extend_from_slice(&info[1..]);
            if n_following == 0 {
                let finished = self.active.take().unwrap();
                Ok(Some((finished.pid, finished.buffer)))
            } else {
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_and_reassemble_roundtrip() {
        let payload: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        let n1 = 64;
        let pid = 0xF0;
        let segments = segment_payload(&payload, n1, pid);

        let expected_count = (payload.len() + 1).div_ceil(n1 - 1);
        assert_eq!(segments.len(), expected_count);

        let mut reassembler = Reassembler::new();
        let mut result = None;
        for seg in &segments {
            result = reassembler.feed(seg.as_slice()).unwrap();
        }
        let (out_pid, out_payload) = result.unwrap();
        assert_eq!(out_pid, pid);
        assert_eq!(out_payload, payload);
    }

    #[test]
    fn single_segment_when_small() {
        let payload = b"short";
        let segments = segment_payload(payload, 64, 0xF0);
        assert_eq!(segments.len(), 1);
        let mut reassembler = Reassembler::new();
        let (pid, data) = reassembler.feed(segments[0].as_slice()).unwrap().unwrap();
        assert_eq!(pid, 0xF0);
        assert_eq!(data, payload);
    }

    #[test]
    fn continuation_without_first_is_an_error() {
        let mut reassembler = Reassembler::new();
        assert_eq!(
            reassembler.feed(&[0x00, 1, 2, 3]),
            Err(SegmentError::NoActiveReassembly)
        );
    }

    #[test]
    fn new_first_segment_replaces_stale_one() {
        let mut reassembler = Reassembler::new();
        reassembler.feed(&[0x81, 0xF0, 1, 2]).unwrap(); // expects 1 more, never arrives
        let segments = segment_payload(b"fresh", 64, 0xCC);
        let (pid, data) = reassembler.feed(segments[0].as_slice()).unwrap().unwrap();
        assert_eq!(pid, 0xCC);
        assert_eq!(data, b"fresh");
    }
}
