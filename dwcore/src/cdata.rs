//! Reference-counted variable-length payload buffers tagged with a PID.
//!
//! Mirrors the role of the `Arc<[u8]>` payloads handed out of
//! `m17core`/`m17app`'s KISS reader threads: cheap to clone, owned
//! exclusively by whichever queue currently holds a reference, and never
//! mutated after construction.

use std::sync::Arc;

/// Maximum information field length accepted anywhere in this crate (spec
/// §6: "Maximum decoded frame 2048 bytes").
pub const MAX_INFO_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CData {
    pub pid: u8,
    bytes: Arc<[u8]>,
}

impl CData {
    pub fn new(pid: u8, bytes: &[u8]) -> Result<Self, CDataError> {
        if bytes.len() > MAX_INFO_LEN {
            return Err(CDataError::TooLarge(bytes.len()));
        }
        Ok(Self {
            pid,
            bytes: Arc::from(bytes),
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CDataError {
    #[error("payload of {0} bytes exceeds the 2048 byte maximum information field length")]
    TooLarge(usize),
}

/// Facade over CDATA allocation. Every buffer in this crate is allocated
/// through here so that an out-of-memory condition (spec §7: "CDATA or DLSM
/// allocation failure is fatal") has one place to be logged before the
/// process aborts, instead of a panic at an arbitrary `Arc::from` call site.
pub struct CDataPool;

impl CDataPool {
    pub fn alloc(pid: u8, bytes: &[u8]) -> CData {
        match CData::new(pid, bytes) {
            Ok(c) => c,
            Err(e) => {
                log::error!("CDATA allocation failure, aborting: {e}");
                std::process::abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_payload() {
        let big = vec![0u8; MAX_INFO_LEN + 1];
        assert_eq!(CData::new(0xF0, &big), Err(CDataError::TooLarge(2049)));
    }

    #[test]
    fn clone_is_cheap_reference() {
        let c = CData::new(0xF0, &[1, 2, 3]).unwrap();
        let c2 = c.clone();
        assert_eq!(c.as_slice(), c2.as_slice());
    }
}
