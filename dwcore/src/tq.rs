//! Transmit queue and CSMA channel-access decision (spec §4.2). This module
//! is pure: the two-priority FIFO just holds frames, and the CSMA function
//! is a single stateless decision taking carrier-detect state and a
//! caller-supplied random roll — the actual busy-wait/sleep loop around it
//! lives in the imperative shell next to the real clock and RNG.

use std::collections::VecDeque;

/// Per-channel transmit parameters (spec §6 KISS parameter block).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsmaParams {
    /// TXDELAY, in 10ms units.
    pub txdelay: u8,
    /// P-persistence threshold, 1-255.
    pub persistence: u8,
    /// Slot time, in 10ms units.
    pub slottime: u8,
    /// TXTAIL, in 10ms units.
    pub txtail: u8,
    pub full_duplex: bool,
    /// Optional post-carrier dwell before the persistence loop starts, in
    /// 10ms units (spec §4.2 step 4).
    pub dwait: u8,
}

impl Default for CsmaParams {
    fn default() -> Self {
        Self {
            txdelay: 50,
            persistence: 63,
            slottime: 10,
            txtail: 5,
            full_duplex: false,
            dwait: 0,
        }
    }
}

/// One CSMA decision point: should this station key up now?
///
/// In full duplex, always yes. In half duplex: if the channel is currently
/// busy, no (the caller should wait one slot time and ask again). If the
/// channel is clear, roll an 8-bit die against `persistence` — transmit only
/// if the roll is less than or equal to the threshold, otherwise wait one
/// slot time and re-roll (spec §4.2, the standard AX.25 p-persistence
/// algorithm).
pub fn should_transmit(params: &CsmaParams, channel_busy: bool, roll: u8) -> bool {
    if params.full_duplex {
        return true;
    }
    if channel_busy {
        return false;
    }
    roll <= params.persistence
}

/// Two-priority FIFO of outbound frames for one channel. Higher-priority
/// frames (acknowledgements, control frames) always drain ahead of
/// lower-priority ones (bulk I-frame data), matching Dire Wolf's own
/// behaviour of getting ACKs out promptly under load.
#[derive(Debug, Default)]
pub struct TxQueue<T> {
    hi: VecDeque<T>,
    lo: VecDeque<T>,
}

impl<T> TxQueue<T> {
    pub fn new() -> Self {
        Self {
            hi: VecDeque::new(),
            lo: VecDeque::new(),
        }
    }

    pub fn push_hi(&mut self, item: T) {
        self.hi.push_back(item);
    }

    pub fn push_lo(&mut self, item: T) {
        self.lo.push_back(item);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.hi.pop_front().or_else(|| self.lo.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        self.hi.is_empty() && self.lo.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hi.len() + self.lo.len()
    }

    pub fn clear(&mut self) {
        self.hi.clear();
        self.lo.clear();
    }
}

impl<T: AsRef<[u8]>> TxQueue<T> {
    /// Total bytes currently queued across both priorities, reported to
    /// KISS clients via the SetHardware "TXBUF" query (spec §4.1).
    pub fn queued_bytes(&self) -> usize {
        self.hi.iter().chain(self.lo.iter()).map(|item| item.as_ref().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_duplex_always_transmits() {
        let params = CsmaParams {
            full_duplex: true,
            ..Default::default()
        };
        assert!(should_transmit(&params, true, 255));
    }

    #[test]
    fn busy_channel_never_transmits_half_duplex() {
        let params = CsmaParams::default();
        assert!(!should_transmit(&params, true, 0));
    }

    #[test]
    fn persistence_gates_on_roll() {
        let params = CsmaParams {
            persistence: 100,
            ..Default::default()
        };
        assert!(should_transmit(&params, false, 100));
        assert!(should_transmit(&params, false, 0));
        assert!(!should_transmit(&params, false, 101));
    }

    #[test]
    fn hi_priority_drains_first() {
        let mut q: TxQueue<u8> = TxQueue::new();
        q.push_lo(1);
        q.push_hi(2);
        q.push_lo(3);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }
}
