//! The channel transport seam (spec §6, Design Notes §9: "function pointers
//! for how to send"). A channel is a radio port: raw HDLC/KISS bytes go out
//! through `Write`, come in through `Read`, and PTT/DCD are separate
//! signalling methods since they are not part of the byte stream.
//!
//! Mirrors the shape of the teacher's `Tnc: Read + Write` trait, extended
//! with the PTT/DCD methods this protocol actually needs.

use std::io::{Read, Write};

use crate::error::TncError;

/// One physical or virtual radio channel. Implementations must support
/// `try_clone` so the reader and writer can run on separate threads exactly
/// as the teacher's `Tnc` trait requires.
pub trait ChannelIo: Read + Write + Send + 'static {
    fn try_clone(&mut self) -> Result<Self, TncError>
    where
        Self: Sized;

    /// Assert or deassert this channel's PTT line.
    fn ptt(&mut self, on: bool) -> Result<(), TncError>;

    /// Current carrier-detect state, sampled by the TX worker's busy-wait.
    fn dcd(&self) -> bool;
}

/// A channel with no physical backing: reads never produce data, writes are
/// discarded, DCD is always clear. Used for tests and the `--null-channel`
/// demo mode, grounded on the teacher's `NullTnc`.
#[derive(Clone, Default)]
pub struct NullChannelIo;

impl Read for NullChannelIo {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Write for NullChannelIo {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ChannelIo for NullChannelIo {
    fn try_clone(&mut self) -> Result<Self, TncError> {
        Ok(self.clone())
    }

    fn ptt(&mut self, _on: bool) -> Result<(), TncError> {
        Ok(())
    }

    fn dcd(&self) -> bool {
        false
    }
}
