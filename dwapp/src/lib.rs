//! The concurrency substrate around `dwcore`'s pure DLSM: the DLQ worker
//! thread that owns every link, the per-channel TX worker and channel
//! reader threads, the timer wheel, the KISS TCP/serial transports, the
//! AGW server, and configuration loading.

pub mod agw;
pub mod channel_io;
pub mod config;
pub mod dlq;
pub mod error;
pub mod kiss_client;
pub mod kiss_serial;
pub mod kiss_tcp;
pub mod linkset;
pub mod timerthread;
pub mod txworker;
