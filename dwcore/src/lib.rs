//! Pure AX.25 v2.0/v2.2 connected-mode protocol logic: frame codec, KISS
//! framing, XID negotiation, segmentation, timers, transmit-queue/CSMA
//! primitives and the data link state machine itself. Nothing in this
//! crate touches a thread, socket, clock or random number generator — it
//! is driven entirely by values passed in and read back out. The
//! concurrency substrate that wires this up to real I/O lives in `dwapp`.

pub mod address;
pub mod cdata;
pub mod dlsm;
pub mod error;
pub mod frame;
pub mod kiss;
pub mod seq;
pub mod segment;
pub mod timer;
pub mod tq;
pub mod xid;
