//! A minimal AGWPE-style server (not part of the distilled spec's KISS
//! surface, but the natural way connected-mode clients reach this TNC in
//! practice, so it is carried as a supplement — see DESIGN.md). Only the
//! handful of frame kinds this DLSM actually needs are implemented: 'C'
//! connect, 'd' disconnect, 'D' connected data, 'y' outstanding frames,
//! 'X' register callsign. Anything else is logged and dropped.

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::thread;

use dwcore::address::{Address, Callsign};
use dwcore::dlsm::{DisconnectReason, DlsmAction, LinkEvent};

use crate::dlq::{DlqEvent, DlqSender, LinkKey};

const HEADER_LEN: usize = 36;

/// Fixed 36-byte AGW frame header, little-endian, ASCII callsigns
/// null-padded to 10 bytes.
struct AgwHeader {
    port: u8,
    kind: u8,
    pid: u8,
    call_from: [u8; 10],
    call_to: [u8; 10],
    data_len: u32,
}

impl AgwHeader {
    fn parse(raw: &[u8; HEADER_LEN]) -> Self {
        let mut call_from = [0u8; 10];
        call_from.copy_from_slice(&raw[8..18]);
        let mut call_to = [0u8; 10];
        call_to.copy_from_slice(&raw[18..28]);
        Self {
            port: raw[0],
            kind: raw[4],
            pid: raw[6],
            call_from,
            call_to,
            data_len: u32::from_le_bytes(raw[28..32].try_into().unwrap()),
        }
    }

    fn write(
        out: &mut Vec<u8>,
        port: u8,
        kind: u8,
        call_from: &str,
        call_to: &str,
        payload: &[u8],
    ) {
        let mut header = [0u8; HEADER_LEN];
        header[0] = port;
        header[4] = kind;
        write_padded_call(&mut header[8..18], call_from);
        write_padded_call(&mut header[18..28], call_to);
        header[28..32].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(payload);
    }

    fn call_from_address(&self) -> Option<Address> {
        parse_call(&self.call_from)
    }

    fn call_to_address(&self) -> Option<Address> {
        parse_call(&self.call_to)
    }
}

fn write_padded_call(dst: &mut [u8], call: &str) {
    let bytes = call.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

/// Parses "N0CALL-5" style text into an `Address`, command bit set since
/// these only ever appear as endpoints of a connection we are a party to.
fn parse_call(raw: &[u8; 10]) -> Option<Address> {
    let text = raw
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect::<String>();
    Address::parse(&text, true)
}

pub fn run_agw_server(listener: TcpListener, channel: u8, dlq: DlqSender) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let dlq = dlq.clone();
                thread::spawn(move || run_client(stream, channel, dlq));
            }
            Err(e) => log::warn!("AGW: accept failed: {e}"),
        }
    }
}

fn run_client(mut stream: TcpStream, channel: u8, dlq: DlqSender) {
    let mut header_buf = [0u8; HEADER_LEN];
    loop {
        if stream.read_exact(&mut header_buf).is_err() {
            break;
        }
        let header = AgwHeader::parse(&header_buf);
        let mut payload = vec![0u8; header.data_len as usize];
        if !payload.is_empty() && stream.read_exact(&mut payload).is_err() {
            break;
        }

        let (Some(local), Some(peer)) = (header.call_from_address(), header.call_to_address())
        else {
            continue;
        };
        let key = LinkKey { channel, local, peer };

        let event = match header.kind {
            b'C' => Some(LinkEvent::ConnectRequest),
            b'd' => Some(LinkEvent::DisconnectRequest),
            b'D' => Some(LinkEvent::DataRequest {
                pid: header.pid,
                data: payload,
            }),
            b'y' => Some(LinkEvent::OutstandingFramesRequest),
            b'X' => {
                let _ = dlq.send(DlqEvent::RegisterCallsign {
                    channel,
                    callsign: local,
                });
                None
            }
            _ => {
                log::debug!("AGW: unsupported frame kind {:#x}", header.kind);
                None
            }
        };
        if let Some(event) = event {
            if dlq.link_event(key, 0, event).is_err() {
                break;
            }
        }
    }
    log::debug!("channel {channel}: AGW client disconnected");
}

/// Renders a `DlsmAction` the DLQ worker produced as an AGW frame for the
/// client that owns this link, if it is one this surface represents.
pub fn action_to_agw_frame(channel: u8, key: &LinkKey, action: &DlsmAction) -> Option<Vec<u8>> {
    let from = key.local.callsign.as_str_trimmed();
    let to = key.peer.callsign.as_str_trimmed();
    let mut out = Vec::new();
    match action {
        DlsmAction::ConnectIndication | DlsmAction::ConnectConfirm => {
            AgwHeader::write(&mut out, channel, b'C', &from, &to, b"*** CONNECTED");
        }
        DlsmAction::DisconnectIndication(reason) => {
            let text = match reason {
                DisconnectReason::LocalRequest => "*** DISCONNECTED",
                DisconnectReason::PeerDisconnected => "*** DISCONNECTED by peer",
                DisconnectReason::RetriesExhausted => "*** DISCONNECTED, retries exhausted",
                DisconnectReason::FrmrReset => "*** DISCONNECTED, frame reject",
            };
            AgwHeader::write(&mut out, channel, b'd', &from, &to, text.as_bytes());
        }
        DlsmAction::DataIndication { data, .. } => {
            AgwHeader::write(&mut out, channel, b'D', &from, &to, data);
        }
        DlsmAction::OutstandingFramesConfirm(n) => {
            AgwHeader::write(&mut out, channel, b'y', &from, &to, &(*n as u32).to_le_bytes());
        }
        _ => return None,
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_confirm_renders_as_agw_c_frame() {
        let key = LinkKey {
            channel: 0,
            local: Address::new(Callsign::new("N0CALL").unwrap(), 1, true),
            peer: Address::new(Callsign::new("N0CALL").unwrap(), 2, true),
        };
        let frame = action_to_agw_frame(0, &key, &DlsmAction::ConnectConfirm).unwrap();
        assert_eq!(frame[4], b'C');
        let data_len = u32::from_le_bytes(frame[28..32].try_into().unwrap());
        assert_eq!(frame.len(), HEADER_LEN + data_len as usize);
    }

    #[test]
    fn parses_callsign_with_ssid() {
        let mut raw = [0u8; 10];
        raw[..8].copy_from_slice(b"N0CALL-5");
        let addr = parse_call(&raw).unwrap();
        assert_eq!(addr.ssid, 5);
        assert_eq!(addr.callsign.as_str_trimmed(), "N0CALL");
    }
}
