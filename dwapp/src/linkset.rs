//! Owns every `DlsmLink` and is the sole thread that ever calls
//! `handle_event`/`poll_action` on one, per spec §4.3's "single multi-
//! producer single-consumer queue... into the single DLSM worker". Grounded
//! on the teacher's `spawn_reader`/`spawn_writer` thread-pair pattern in
//! `m17app::app`, collapsed here to one worker since the DLQ is already the
//! serialization point.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use dwcore::address::{Address, AddressList};
use dwcore::dlsm::{DlsmAction, DlsmLink, LinkConfig, LinkEvent};
use dwcore::frame::Packet;
use dwcore::seq::Modulus;

use crate::dlq::{DlqEvent, LinkKey};
use crate::timerthread::TimerSender;
use crate::txworker::ChannelOutbound;

/// All state the DLQ worker owns outright.
pub struct LinkSet {
    links: HashMap<LinkKey, DlsmLink>,
    registered: HashMap<u8, HashSet<Address>>,
    default_config: LinkConfig,
}

impl LinkSet {
    pub fn new(default_config: LinkConfig) -> Self {
        Self {
            links: HashMap::new(),
            registered: HashMap::new(),
            default_config,
        }
    }

    fn is_registered(&self, channel: u8, callsign: &Address) -> bool {
        self.registered
            .get(&channel)
            .is_some_and(|set| set.contains(callsign))
    }

    pub fn register(&mut self, channel: u8, callsign: Address) {
        self.registered.entry(channel).or_default().insert(callsign);
    }

    pub fn unregister(&mut self, channel: u8, callsign: Address) {
        if let Some(set) = self.registered.get_mut(&channel) {
            set.remove(&callsign);
        }
    }

    /// Drop links on this channel that are disconnected and idle, per
    /// DL-CLIENT-CLEANUP (spec §4.3).
    pub fn cleanup_channel(&mut self, channel: u8) {
        self.links.retain(|key, link| {
            !(key.channel == channel
                && link.state() == dwcore::dlsm::LinkState::Disconnected)
        });
    }

    fn link_mut(&mut self, key: &LinkKey, digipeater_count: u8) -> &mut DlsmLink {
        self.links.entry(key.clone()).or_insert_with(|| {
            DlsmLink::new(key.local, key.peer, digipeater_count, self.default_config)
        })
    }

    /// Route a decoded AX.25 frame to the link it belongs to. Unregistered
    /// inbound connection attempts are silently dropped rather than
    /// spawning a link, matching the spec's "Registered callsign" gate.
    pub fn key_for_incoming(&self, channel: u8, packet: &Packet) -> Option<LinkKey> {
        let local = packet.addresses.destination;
        let peer = packet.addresses.source;
        if !self.is_registered(channel, &local) {
            return None;
        }
        Some(LinkKey { channel, local, peer })
    }

    /// Decode a raw AX.25 frame pulled off a channel's KISS Data command.
    /// U-frame control bytes are one byte regardless of modulus, so the
    /// only case that needs the right modulus is an I/S frame for a link
    /// we already know about; anything else defaults to mod-8, matching a
    /// fresh v2.0 SABM.
    pub fn decode_incoming(&self, channel: u8, bytes: &[u8]) -> Option<(LinkKey, Packet)> {
        let (addresses, _) = AddressList::decode(bytes).ok()?;
        let local = addresses.destination;
        let peer = addresses.source;
        if !self.is_registered(channel, &local) {
            return None;
        }
        let key = LinkKey { channel, local, peer };
        let modulus = self
            .links
            .get(&key)
            .map(|link| link.modulus())
            .unwrap_or(Modulus::Mod8);
        match Packet::decode(bytes, modulus) {
            Ok(packet) => Some((key, packet)),
            Err(e) => {
                log::warn!("channel {channel}: dropping undecodable frame: {e}");
                None
            }
        }
    }

    /// Feed one DLQ event, returning every action the affected link
    /// produced so the caller can dispatch transmits/indications. Timer
    /// start/stop actions are forwarded to the timer wheel immediately,
    /// since only here do we still hold the link to read its current
    /// timer duration (T1 shifts with every SRT sample).
    pub fn dispatch(
        &mut self,
        key: LinkKey,
        digipeater_count: u8,
        event: LinkEvent,
        timers: &TimerSender,
    ) -> Vec<DlsmAction> {
        let link = self.link_mut(&key, digipeater_count);
        link.handle_event(event);
        let mut actions = Vec::new();
        while let Some(action) = link.poll_action() {
            match &action {
                DlsmAction::StartTimer(kind) => {
                    timers.start(key.clone(), *kind, link.timer_duration(*kind));
                }
                DlsmAction::StopTimer(kind) => {
                    timers.stop(key.clone(), *kind);
                }
                _ => {}
            }
            actions.push(action);
        }
        actions
    }
}

/// Runs the DLQ worker loop until the sender side is dropped. `outbound`
/// maps channel number to the queue/sink the TX worker and KISS servers for
/// that channel read from.
pub fn run_dlq_worker(
    receiver: Receiver<DlqEvent>,
    mut links: LinkSet,
    outbound: Mutex<HashMap<u8, Arc<ChannelOutbound>>>,
    timers: TimerSender,
) {
    while let Ok(event) = receiver.recv() {
        match event {
            DlqEvent::Link {
                key,
                digipeater_count,
                event,
            } => {
                let channel = key.channel;
                let actions = links.dispatch(key.clone(), digipeater_count, event, &timers);
                if let Some(chan) = outbound.lock().unwrap().get(&channel) {
                    let actions = actions.into_iter().map(|a| (key.clone(), a)).collect();
                    chan.handle_actions(actions);
                } else {
                    log::warn!("DLQ: actions produced for unknown channel {channel}");
                }
            }
            DlqEvent::RegisterCallsign { channel, callsign } => {
                links.register(channel, callsign);
            }
            DlqEvent::UnregisterCallsign { channel, callsign } => {
                links.unregister(channel, callsign);
            }
            DlqEvent::ClientCleanup { channel } => {
                links.cleanup_channel(channel);
            }
            DlqEvent::RawFrame { channel, bytes } => {
                let Some((key, packet)) = links.decode_incoming(channel, &bytes) else {
                    continue;
                };
                let digipeater_count = packet.addresses.digipeater_count() as u8;
                let event = LinkEvent::IncomingFrame(packet);
                let actions = links.dispatch(key.clone(), digipeater_count, event, &timers);
                if let Some(chan) = outbound.lock().unwrap().get(&channel) {
                    let actions = actions.into_iter().map(|a| (key.clone(), a)).collect();
                    chan.handle_actions(actions);
                }
            }
        }
    }
    log::info!("DLQ worker shutting down: all senders dropped");
}
