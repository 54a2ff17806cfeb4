//! The host-facing KISS TCP server (spec §6: default port 8001, default
//! capacity of 3 simultaneous clients). Accepts connections, spawns a
//! reader/writer thread pair per client exactly like the teacher spawns a
//! reader/writer pair per `Tnc`, and fans inbound channel traffic out to
//! every attached client for monitoring.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;

use dwcore::kiss::{KissCommand, KissDecoder, KissFrame};

use crate::dlq::DlqSender;
use crate::kiss_client::{apply_param_update, feed_byte, hardware_reply, ClientAction};
use crate::txworker::ChannelOutbound;

/// Fan-out of raw bytes seen on a channel to every attached KISS client, so
/// each one sees inbound traffic for monitoring just as a real KISS TNC
/// would echo it. Dead subscribers (client disconnected) are pruned on the
/// next publish rather than tracked explicitly.
#[derive(Clone, Default)]
pub struct MonitorRegistry(Arc<std::sync::Mutex<Vec<Sender<Vec<u8>>>>>);

impl MonitorRegistry {
    pub fn subscribe(&self) -> Receiver<Vec<u8>> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.0.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap()
            .retain(|tx| tx.send(bytes.to_vec()).is_ok());
    }
}

/// Runs the accept loop for one channel's KISS TCP port until the listener
/// errors out (caller is expected to run this on its own thread).
pub fn run_kiss_tcp_server(
    listener: TcpListener,
    channel: u8,
    max_clients: usize,
    outbound: Arc<ChannelOutbound>,
    dlq: DlqSender,
    monitors: MonitorRegistry,
) {
    let active = Arc::new(AtomicUsize::new(0));
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("channel {channel}: KISS TCP accept failed: {e}");
                continue;
            }
        };
        if active.load(Ordering::SeqCst) >= max_clients {
            log::warn!("channel {channel}: KISS TCP client rejected, at capacity ({max_clients})");
            drop(stream);
            continue;
        }
        active.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&active);
        let outbound = Arc::clone(&outbound);
        let dlq = dlq.clone();
        let monitor = monitors.subscribe();
        thread::spawn(move || {
            run_client(stream, channel, outbound, dlq, monitor);
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

fn run_client(
    mut stream: TcpStream,
    channel: u8,
    outbound: Arc<ChannelOutbound>,
    dlq: DlqSender,
    monitor: Receiver<Vec<u8>>,
) {
    let mut write_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::error!("channel {channel}: could not clone client socket: {e}");
            return;
        }
    };
    thread::spawn(move || {
        for bytes in monitor {
            let frame = KissFrame {
                channel,
                command: KissCommand::Data(bytes),
            };
            if write_stream.write_all(&frame.encode()).is_err() {
                return;
            }
        }
    });

    let mut decoder = KissDecoder::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::debug!("channel {channel}: KISS client read error: {e}");
                break;
            }
        };
        for &byte in &buf[..n] {
            match feed_byte(&mut decoder, byte) {
                Some(ClientAction::QueueRaw(bytes)) => outbound.queue_raw(bytes),
                Some(ClientAction::Param(update)) => apply_param_update(&outbound, update),
                Some(ClientAction::Return) => return,
                Some(ClientAction::RespondRestart) => {
                    let _ = stream.write_all(&[0xC0, 0xC0]);
                }
                Some(ClientAction::RespondCmdPrompt) => {
                    let _ = stream.write_all(b"\r\ncmd: ");
                }
                Some(ClientAction::HardwareQuery(payload)) => {
                    if let Some(frame) = hardware_reply(channel, &payload, outbound.queued_bytes()) {
                        let _ = stream.write_all(&frame.encode());
                    }
                }
                None => {}
            }
        }
    }
    let _ = dlq.send(crate::dlq::DlqEvent::ClientCleanup { channel });
}
