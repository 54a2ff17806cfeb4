//! The connected-mode data link state machine (spec §4.4): the functional
//! core of this crate. `DlsmLink` is mutated only through `handle_event`,
//! which produces `DlsmAction`s into an internal queue drained by
//! `poll_action`. No thread, socket, clock or RNG is touched here — the
//! imperative shell (the `dwapp` crate) owns all of that and drives this
//! type with real events and real time.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::address::{Address, AddressList, CommandResponse};
use crate::cdata::{CData, CDataPool};
use crate::error::ProtocolError;
use crate::frame::{Control, FrameType, Packet, SKind, UKind, PID_SEGMENTATION};
use crate::seq::{in_srej_window, is_good_nr, Modulus, SeqNo};
use crate::segment::{segment_payload, Reassembler};
use crate::timer::{LinkTimer, SrtEstimator};
use crate::xid::{SrejEnable, XidFields, XidParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    AwaitingConnection,
    AwaitingRelease,
    Connected,
    TimerRecovery,
    AwaitingV22Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    T1,
    T3,
    Tm201,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LocalRequest,
    PeerDisconnected,
    RetriesExhausted,
    FrmrReset,
}

/// Static configuration for a link, fixed at creation (spec §3, §4.4.4).
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Base ack-timer component; t1v = frack * (2*digis + 1).
    pub frack: Duration,
    /// Max retry count before the link is abandoned.
    pub n2: u8,
    /// Max SABME attempts before falling back to v2.0.
    pub maxv22: u8,
    pub window_mod8: u8,
    pub window_mod128: u8,
    pub n1_paclen: u16,
    pub srej_enable: SrejEnable,
    pub full_duplex: bool,
    pub try_v22: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            frack: Duration::from_millis(3000),
            n2: 10,
            maxv22: 3,
            window_mod8: 4,
            window_mod128: 32,
            n1_paclen: 256,
            srej_enable: SrejEnable::Multi,
            full_duplex: false,
            try_v22: true,
        }
    }
}

impl LinkConfig {
    fn local_xid(&self) -> XidParams {
        XidParams {
            full_duplex: self.full_duplex,
            modulo: Modulus::Mod128,
            srej_enable: self.srej_enable,
            n1_paclen: self.n1_paclen,
            window_size: self.window_mod128,
            ack_timer_ms: self.frack.as_millis() as u16,
            retries: self.n2,
        }
    }
}

/// Input events fed into `handle_event`, mirroring the DLQ entry kinds of
/// spec §4.3.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    ConnectRequest,
    DisconnectRequest,
    DataRequest { pid: u8, data: Vec<u8> },
    IncomingFrame(Packet),
    SeizeConfirm,
    ChannelBusy(bool),
    TimerExpiry(TimerKind),
    OutstandingFramesRequest,
}

/// Output produced by `handle_event`, drained one at a time by the shell.
#[derive(Debug, Clone)]
pub enum DlsmAction {
    Transmit(Packet),
    ConnectIndication,
    ConnectConfirm,
    DisconnectIndication(DisconnectReason),
    DataIndication { pid: u8, data: Vec<u8> },
    OutstandingFramesConfirm(usize),
    StartTimer(TimerKind),
    StopTimer(TimerKind),
    RequestSeize,
    ProtocolErrorLogged(ProtocolError),
}

/// One connected-mode link, identified externally by (channel, own-addr,
/// peer-addr, client) — that tuple lives in the owning `LinkSet`, not here.
pub struct DlsmLink {
    state: LinkState,
    config: LinkConfig,
    local: Address,
    peer: Address,
    digipeater_count: u8,

    modulus: Modulus,
    k: u8,
    vs: SeqNo,
    va: SeqNo,
    vr: SeqNo,

    rc: u8,
    peer_busy: bool,
    own_busy: bool,
    reject_exception: bool,
    ack_pending: bool,
    layer3_initiated: bool,

    srej_enable: SrejEnable,
    n1_paclen: u16,

    srt: SrtEstimator,
    t1v: Duration,
    t1: LinkTimer,
    t3: LinkTimer,
    tm201: LinkTimer,
    t1_had_expired: bool,
    channel_busy: bool,

    tx_by_ns: HashMap<u8, CData>,
    rx_by_ns: HashMap<u8, CData>,
    i_frame_queue: VecDeque<CData>,
    reassembler: Reassembler,

    pending_actions: VecDeque<DlsmAction>,
}

impl DlsmLink {
    pub fn new(local: Address, peer: Address, digipeater_count: u8, config: LinkConfig) -> Self {
        let t1v = initial_t1v(config.frack, digipeater_count);
        Self {
            state: LinkState::Disconnected,
            modulus: Modulus::Mod8,
            k: config.window_mod8,
            vs: SeqNo::zero(Modulus::Mod8),
            va: SeqNo::zero(Modulus::Mod8),
            vr: SeqNo::zero(Modulus::Mod8),
            rc: 0,
            peer_busy: false,
            own_busy: false,
            reject_exception: false,
            ack_pending: false,
            layer3_initiated: false,
            srej_enable: SrejEnable::None,
            n1_paclen: config.n1_paclen,
            srt: SrtEstimator::new(t1v / 2),
            t1v,
            t1: LinkTimer::new(t1v),
            t3: LinkTimer::new(Duration::from_secs(300)),
            tm201: LinkTimer::new(Duration::from_secs(20)),
            t1_had_expired: false,
            channel_busy: false,
            tx_by_ns: HashMap::new(),
            rx_by_ns: HashMap::new(),
            i_frame_queue: VecDeque::new(),
            reassembler: Reassembler::new(),
            pending_actions: VecDeque::new(),
            local,
            peer,
            digipeater_count,
            config,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Current control-field modulus, needed by the shell to know how wide
    /// to parse I/S frame control fields for an already-established link.
    pub fn modulus(&self) -> Modulus {
        self.modulus
    }

    /// Whether the current connection attempt was initiated by this
    /// station's client (vs. an incoming SABM/SABME) — see the Design
    /// Notes open question on retransmit-from-AwaitingConnection behaviour.
    pub fn layer3_initiated(&self) -> bool {
        self.layer3_initiated
    }

    pub fn poll_action(&mut self) -> Option<DlsmAction> {
        self.pending_actions.pop_front()
    }

    /// Current duration for a timer kind, read by the shell whenever it
    /// sees a `StartTimer` action — T1 shifts with every SRT adaptation so
    /// the shell cannot cache this across calls.
    pub fn timer_duration(&self, kind: TimerKind) -> Duration {
        match kind {
            TimerKind::T1 => self.t1v,
            TimerKind::T3 => self.t3.duration(),
            TimerKind::Tm201 => self.tm201.duration(),
        }
    }

    fn emit(&mut self, action: DlsmAction) {
        self.pending_actions.push_back(action);
    }

    fn addresses(&self, command: bool) -> AddressList {
        let (dest, src) = if command {
            (self.peer, self.local)
        } else {
            (self.local, self.peer)
        };
        let mut dest = dest;
        let mut src = src;
        dest.high_bit = command;
        src.high_bit = !command;
        AddressList::new(dest, src)
    }

    fn send_u(&mut self, kind: UKind, command: bool, pf: bool) {
        let packet = Packet {
            addresses: self.addresses(command),
            control: Control::U { kind, pf },
            pid: None,
            info: None,
        };
        self.emit(DlsmAction::Transmit(packet));
    }

    fn send_u_with_info(&mut self, kind: UKind, command: bool, pf: bool, pid: u8, info: &[u8]) {
        let packet = Packet {
            addresses: self.addresses(command),
            control: Control::U { kind, pf },
            pid: Some(pid),
            info: Some(CDataPool::alloc(pid, info)),
        };
        self.emit(DlsmAction::Transmit(packet));
    }

    fn send_s(&mut self, kind: SKind, command: bool, pf: bool) {
        let nr = self.vr;
        let packet = Packet {
            addresses: self.addresses(command),
            control: Control::S { kind, nr, pf },
            pid: None,
            info: None,
        };
        self.emit(DlsmAction::Transmit(packet));
    }

    fn send_s_nr(&mut self, kind: SKind, command: bool, pf: bool, nr: SeqNo) {
        let packet = Packet {
            addresses: self.addresses(command),
            control: Control::S { kind, nr, pf },
            pid: None,
            info: None,
        };
        self.emit(DlsmAction::Transmit(packet));
    }

    fn send_rr_or_rnr(&mut self, command: bool, pf: bool) {
        let kind = if self.own_busy { SKind::RNR } else { SKind::RR };
        self.send_s(kind, command, pf);
    }

    fn restart_t1(&mut self) {
        self.t1.set_duration(self.t1v);
        self.t1.start();
        self.emit(DlsmAction::StartTimer(TimerKind::T1));
    }

    fn stop_t1(&mut self) {
        if self.t1.is_running() {
            self.t1.stop();
            self.emit(DlsmAction::StopTimer(TimerKind::T1));
        }
    }

    fn start_t3(&mut self) {
        self.t3.start();
        self.emit(DlsmAction::StartTimer(TimerKind::T3));
    }

    fn stop_t3(&mut self) {
        if self.t3.is_running() {
            self.t3.stop();
            self.emit(DlsmAction::StopTimer(TimerKind::T3));
        }
    }

    fn enter_connected(&mut self) {
        self.state = LinkState::Connected;
        self.rc = 0;
        self.stop_t1();
        self.start_t3();
    }

    fn reset_sequencing(&mut self) {
        self.vs = SeqNo::zero(self.modulus);
        self.va = SeqNo::zero(self.modulus);
        self.vr = SeqNo::zero(self.modulus);
        self.tx_by_ns.clear();
        self.rx_by_ns.clear();
        self.reassembler = Reassembler::new();
        self.peer_busy = false;
        self.own_busy = false;
        self.reject_exception = false;
        self.ack_pending = false;
    }

    fn set_modulus(&mut self, modulus: Modulus) {
        self.modulus = modulus;
        self.k = match modulus {
            Modulus::Mod8 => self.config.window_mod8,
            Modulus::Mod128 => self.config.window_mod128,
        };
        if modulus == Modulus::Mod8 {
            self.srej_enable = SrejEnable::None;
        }
    }

    fn matches(&self, addresses: &AddressList) -> bool {
        addresses.destination.same_station(&self.local) && addresses.source.same_station(&self.peer)
    }

    // ---- public driver ----

    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::ConnectRequest => self.on_connect_request(),
            LinkEvent::DisconnectRequest => self.on_disconnect_request(),
            LinkEvent::DataRequest { pid, data } => self.on_data_request(pid, data),
            LinkEvent::IncomingFrame(packet) => self.on_incoming_frame(packet),
            LinkEvent::SeizeConfirm => self.i_frame_pop(),
            LinkEvent::ChannelBusy(busy) => self.on_channel_busy(busy),
            LinkEvent::TimerExpiry(kind) => self.on_timer_expiry(kind),
            LinkEvent::OutstandingFramesRequest => self.on_outstanding_frames_request(),
        }
    }

    fn on_outstanding_frames_request(&mut self) {
        let count = self.i_frame_queue.len() + self.tx_by_ns.len();
        self.emit(DlsmAction::OutstandingFramesConfirm(count));
    }

    fn on_channel_busy(&mut self, busy: bool) {
        if busy == self.channel_busy {
            return;
        }
        self.channel_busy = busy;
        if busy {
            self.t1.pause(Duration::ZERO);
            self.tm201.pause(Duration::ZERO);
        } else {
            self.t1.resume();
            self.tm201.resume();
        }
    }

    fn on_connect_request(&mut self) {
        self.layer3_initiated = true;
        self.rc = 0;
        self.reset_sequencing();
        if self.config.try_v22 {
            self.set_modulus(Modulus::Mod128);
            self.state = LinkState::AwaitingV22Connection;
            self.send_u(UKind::SABME, true, true);
        } else {
            self.set_modulus(Modulus::Mod8);
            self.state = LinkState::AwaitingConnection;
            self.send_u(UKind::SABM, true, true);
        }
        self.restart_t1();
    }

    fn on_disconnect_request(&mut self) {
        match self.state {
            LinkState::Disconnected => {}
            LinkState::AwaitingConnection | LinkState::AwaitingV22Connection => {
                self.send_u(UKind::DISC, true, true);
                self.state = LinkState::Disconnected;
                self.stop_t1();
                self.stop_t3();
                self.emit(DlsmAction::DisconnectIndication(DisconnectReason::LocalRequest));
            }
            _ => {
                self.i_frame_queue.clear();
                self.rc = 0;
                self.state = LinkState::AwaitingRelease;
                self.send_u(UKind::DISC, true, true);
                self.restart_t1();
            }
        }
    }

    fn on_data_request(&mut self, pid: u8, data: Vec<u8>) {
        if data.len() <= self.n1_paclen as usize {
            self.i_frame_queue.push_back(CDataPool::alloc(pid, &data));
        } else if self.modulus == Modulus::Mod8 {
            for chunk in data.chunks(self.n1_paclen as usize) {
                self.i_frame_queue.push_back(CDataPool::alloc(pid, chunk));
            }
        } else {
            for seg in segment_payload(&data, self.n1_paclen as usize, pid) {
                self.i_frame_queue.push_back(seg);
            }
        }
    }

    /// Pop queued payloads into I-frames while the window and peer-busy
    /// status allow it (spec §4.4.3).
    fn i_frame_pop(&mut self) {
        if !matches!(self.state, LinkState::Connected | LinkState::TimerRecovery) {
            return;
        }
        while !self.peer_busy && self.vs.rotate_minus(self.va) < self.k {
            let Some(payload) = self.i_frame_queue.pop_front() else {
                break;
            };
            let ns = self.vs;
            let packet = Packet {
                addresses: self.addresses(true),
                control: Control::I { ns, nr: self.vr, pf: false },
                pid: Some(payload.pid),
                info: Some(payload.clone()),
            };
            self.emit(DlsmAction::Transmit(packet));
            self.tx_by_ns.insert(ns.value, payload);
            self.vs = self.vs.next();
            self.ack_pending = false;
            if !self.t1.is_running() {
                self.restart_t1();
            }
            self.stop_t3();
        }
    }

    // ---- inbound frame dispatch ----

    fn on_incoming_frame(&mut self, packet: Packet) {
        if !self.matches(&packet.addresses) {
            return;
        }
        self.sanity_check_command_response(&packet);
        let frame_type = packet.control.frame_type();
        match frame_type {
            FrameType::I => self.on_i_frame(packet),
            FrameType::RR | FrameType::RNR => self.on_rr_rnr(packet),
            FrameType::REJ => self.on_rej(packet),
            FrameType::SREJ => self.on_srej(packet),
            FrameType::SABM => self.on_sabm(packet, Modulus::Mod8),
            FrameType::SABME => self.on_sabm(packet, Modulus::Mod128),
            FrameType::DISC => self.on_disc(packet),
            FrameType::UA => self.on_ua(packet),
            FrameType::DM => self.on_dm(packet),
            FrameType::FRMR => self.on_frmr(packet),
            FrameType::XID => self.on_xid(packet),
            FrameType::UI => {}
            FrameType::TEST => self.on_test(packet),
        }
    }

    fn sanity_check_command_response(&mut self, packet: &Packet) {
        let cr = packet.addresses.command_response();
        let Some(expect_command) = packet.control.frame_type().expected_command_response() else {
            return;
        };
        let actual = match cr {
            CommandResponse::Command => true,
            CommandResponse::Response => false,
            CommandResponse::Unknown => return,
        };
        if actual != expect_command {
            self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::BadCommandResponse));
        }
    }

    fn on_i_frame(&mut self, packet: Packet) {
        if !matches!(self.state, LinkState::Connected | LinkState::TimerRecovery) {
            return;
        }
        let Control::I { ns, nr, pf } = packet.control else { unreachable!() };
        self.handle_nr_update(nr);

        if ns.rotate_minus(self.vr) == 0 {
            self.vr = self.vr.next();
            if let Some(info) = packet.info {
                self.deliver_or_reassemble(packet.pid.unwrap_or(0), info);
            }
            // Drain any stashed in-order frames.
            while let Some(stashed) = self.rx_by_ns.remove(&self.vr.value) {
                self.vr = self.vr.next();
                self.deliver_or_reassemble(stashed.pid, stashed);
            }
            self.reject_exception = false;
            if pf {
                self.send_rr_or_rnr(false, true);
            } else {
                self.ack_pending = true;
                self.emit(DlsmAction::RequestSeize);
            }
        } else if self.srej_enable == SrejEnable::None {
            if !self.reject_exception {
                self.reject_exception = true;
                self.send_s_nr(SKind::REJ, false, pf, self.vr);
            }
        } else if in_srej_window(ns, self.vr, self.k) {
            if let Some(info) = packet.info.clone() {
                self.rx_by_ns.insert(ns.value, info);
            }
            self.emit_srej_fill_ins(pf, ns);
        }
    }

    fn deliver_or_reassemble(&mut self, pid: u8, data: CData) {
        if pid == PID_SEGMENTATION {
            match self.reassembler.feed(data.as_slice()) {
                Ok(Some((orig_pid, payload))) => {
                    self.emit(DlsmAction::DataIndication { pid: orig_pid, data: payload });
                }
                Ok(None) => {}
                Err(_) => {
                    log::warn!("dlsm: discarding malformed segmentation fragment");
                }
            }
        } else {
            self.emit(DlsmAction::DataIndication { pid, data: data.as_slice().to_vec() });
        }
    }

    /// Emit SREJ responses for every sequence number missing between
    /// `V(R)` (inclusive) and the newly stashed frame `ns` (exclusive), per
    /// spec §4.4.2. Already-stashed frames within that range are skipped
    /// rather than stopping the scan, so a later out-of-order arrival still
    /// reports the real gap behind it. The oldest carries the peer's poll
    /// bit as final.
    fn emit_srej_fill_ins(&mut self, pf: bool, ns: SeqNo) {
        let mut missing = Vec::new();
        let mut probe = self.vr;
        while probe.value != ns.value {
            if !self.rx_by_ns.contains_key(&probe.value) {
                missing.push(probe);
            }
            probe = probe.next();
            if missing.len() as u16 >= self.modulus.value() {
                break;
            }
        }
        if missing.is_empty() {
            return;
        }
        match self.srej_enable {
            SrejEnable::Multi if missing.len() > 1 => {
                let mut info = Vec::with_capacity(missing.len() - 1);
                for extra in &missing[1..] {
                    info.push(extra.value << 1);
                }
                let packet = Packet {
                    addresses: self.addresses(false),
                    control: Control::S { kind: SKind::SREJ, nr: missing[0], pf },
                    pid: Some(PID_NO_LAYER3_PLACEHOLDER),
                    info: Some(CDataPool::alloc(PID_NO_LAYER3_PLACEHOLDER, &info)),
                };
                self.emit(DlsmAction::Transmit(packet));
            }
            _ => {
                for (i, nr) in missing.iter().enumerate() {
                    self.send_s_nr(SKind::SREJ, false, pf && i == 0, *nr);
                }
            }
        }
    }

    fn handle_nr_update(&mut self, nr: SeqNo) {
        if is_good_nr(nr, self.va, self.vs) {
            while self.va.value != nr.value {
                self.tx_by_ns.remove(&self.va.value);
                self.va = self.va.next();
            }
        } else {
            self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::BadNr));
        }
    }

    fn on_rr_rnr(&mut self, packet: Packet) {
        let Control::S { kind, nr, pf } = packet.control else { unreachable!() };
        self.peer_busy = kind == SKind::RNR;
        if !matches!(self.state, LinkState::Connected | LinkState::TimerRecovery) {
            return;
        }
        if !is_good_nr(nr, self.va, self.vs) {
            self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::BadNr));
            self.establish_data_link();
            return;
        }
        self.advance_va(nr);
        if self.state == LinkState::TimerRecovery && pf {
            if self.va.value == self.vs.value {
                self.stop_t1();
                self.start_t3();
                self.rc = 0;
                self.state = LinkState::Connected;
            } else {
                self.retransmit_from(self.va);
                self.restart_t1();
            }
        } else if !self.peer_busy {
            self.i_frame_pop();
        }
    }

    fn advance_va(&mut self, nr: SeqNo) {
        while self.va.value != nr.value {
            self.tx_by_ns.remove(&self.va.value);
            self.va = self.va.next();
        }
    }

    fn on_rej(&mut self, packet: Packet) {
        let Control::S { nr, pf, .. } = packet.control else { unreachable!() };
        if !matches!(self.state, LinkState::Connected | LinkState::TimerRecovery) {
            return;
        }
        if !is_good_nr(nr, self.va, self.vs) {
            self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::BadNr));
            return;
        }
        self.advance_va(nr);
        self.retransmit_from(nr);
        if pf && self.state == LinkState::TimerRecovery && self.va.value == self.vs.value {
            self.stop_t1();
            self.start_t3();
            self.rc = 0;
            self.state = LinkState::Connected;
        } else {
            self.restart_t1();
        }
    }

    fn on_srej(&mut self, packet: Packet) {
        let Control::S { nr, pf, .. } = packet.control else { unreachable!() };
        if !matches!(self.state, LinkState::Connected | LinkState::TimerRecovery) {
            return;
        }
        self.retransmit_one(nr);
        if let Some(info) = &packet.info {
            for &byte in info.as_slice() {
                let extra = SeqNo::new(byte >> 1, self.modulus);
                self.retransmit_one(extra);
            }
        }
        if pf {
            self.advance_va(nr);
        }
        self.restart_t1();
    }

    fn retransmit_one(&mut self, ns: SeqNo) {
        if let Some(payload) = self.tx_by_ns.get(&ns.value).cloned() {
            let packet = Packet {
                addresses: self.addresses(true),
                control: Control::I { ns, nr: self.vr, pf: false },
                pid: Some(payload.pid),
                info: Some(payload),
            };
            self.emit(DlsmAction::Transmit(packet));
        }
    }

    fn retransmit_from(&mut self, from: SeqNo) {
        let mut cursor = from;
        while cursor.value != self.vs.value {
            self.retransmit_one(cursor);
            cursor = cursor.next();
        }
    }

    fn on_sabm(&mut self, packet: Packet, modulus: Modulus) {
        let pf = packet.control.poll_final();
        self.set_modulus(modulus);
        self.reset_sequencing();
        self.rc = 0;
        self.send_u(UKind::UA, false, pf);
        self.enter_connected();
        self.emit(DlsmAction::ConnectIndication);
    }

    fn on_disc(&mut self, packet: Packet) {
        let pf = packet.control.poll_final();
        self.send_u(UKind::UA, false, pf);
        let was_connected = self.state != LinkState::Disconnected;
        self.state = LinkState::Disconnected;
        self.stop_t1();
        self.stop_t3();
        self.i_frame_queue.clear();
        if was_connected {
            self.emit(DlsmAction::DisconnectIndication(DisconnectReason::PeerDisconnected));
        }
    }

    fn on_ua(&mut self, packet: Packet) {
        if !packet.control.poll_final() {
            self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::UaWithoutFinal));
        }
        match self.state {
            LinkState::AwaitingConnection => {
                self.emit(DlsmAction::ConnectConfirm);
                self.enter_connected();
            }
            LinkState::AwaitingV22Connection => {
                self.emit(DlsmAction::ConnectConfirm);
                self.enter_connected();
                self.begin_xid_negotiation();
            }
            LinkState::AwaitingRelease => {
                self.emit(DlsmAction::DisconnectIndication(DisconnectReason::LocalRequest));
                self.state = LinkState::Disconnected;
                self.stop_t1();
            }
            LinkState::Connected | LinkState::TimerRecovery | LinkState::Disconnected => {
                self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::UnexpectedUa));
            }
        }
    }

    fn on_dm(&mut self, packet: Packet) {
        if !packet.control.poll_final() {
            // Still treated as a DM for state purposes per spec, but note it.
        }
        match self.state {
            LinkState::AwaitingV22Connection => {
                self.config.try_v22 = false;
                self.set_modulus(Modulus::Mod8);
                self.state = LinkState::AwaitingConnection;
                self.send_u(UKind::SABM, true, true);
                self.restart_t1();
            }
            LinkState::AwaitingConnection | LinkState::AwaitingRelease => {
                self.state = LinkState::Disconnected;
                self.stop_t1();
                self.emit(DlsmAction::DisconnectIndication(DisconnectReason::PeerDisconnected));
            }
            LinkState::Connected | LinkState::TimerRecovery => {
                self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::DmInConnectedState));
                self.state = LinkState::Disconnected;
                self.stop_t1();
                self.stop_t3();
                self.emit(DlsmAction::DisconnectIndication(DisconnectReason::PeerDisconnected));
            }
            LinkState::Disconnected => {}
        }
    }

    fn on_frmr(&mut self, _packet: Packet) {
        self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::FrmrReceived));
        self.establish_data_link_v20();
    }

    fn establish_data_link(&mut self) {
        self.rc = 0;
        self.reset_sequencing();
        self.state = LinkState::AwaitingConnection;
        self.send_u(UKind::SABM, true, true);
        self.restart_t1();
    }

    fn establish_data_link_v20(&mut self) {
        self.config.try_v22 = false;
        self.set_modulus(Modulus::Mod8);
        self.establish_data_link();
    }

    fn begin_xid_negotiation(&mut self) {
        let local = self.config.local_xid();
        self.send_u_with_info(UKind::XID, true, true, 0, &local.encode());
        self.tm201.start();
        self.emit(DlsmAction::StartTimer(TimerKind::Tm201));
    }

    fn on_xid(&mut self, packet: Packet) {
        let Some(info) = packet.info.as_ref() else { return };
        let Ok(fields) = XidFields::decode(info.as_slice()) else {
            log::warn!("dlsm: malformed XID info field");
            return;
        };
        let command = packet.addresses.command_response() == CommandResponse::Command;
        let local = self.config.local_xid();
        if command {
            let merged = local.negotiate(&fields);
            self.apply_negotiated(merged);
            self.send_u_with_info(UKind::XID, false, true, 0, &merged.encode());
        } else {
            self.tm201.stop();
            self.emit(DlsmAction::StopTimer(TimerKind::Tm201));
            let merged = local.negotiate(&fields);
            self.apply_negotiated(merged);
        }
    }

    fn apply_negotiated(&mut self, params: XidParams) {
        self.k = params.window_size;
        self.srej_enable = params.srej_enable;
        self.n1_paclen = params.n1_paclen;
        self.t1v = Duration::from_millis(params.ack_timer_ms as u64);
        self.config.n2 = params.retries;
    }

    fn on_test(&mut self, packet: Packet) {
        let pf = packet.control.poll_final();
        let info = packet.info.as_ref().map(|c| c.as_slice().to_vec()).unwrap_or_default();
        let pid = packet.pid.unwrap_or(0);
        self.send_u_with_info(UKind::TEST, false, pf, pid, &info);
    }

    // ---- timer expiry ----

    fn on_timer_expiry(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::T1 => self.on_t1_expiry(),
            TimerKind::T3 => self.on_t3_expiry(),
            TimerKind::Tm201 => self.on_tm201_expiry(),
        }
    }

    fn on_t1_expiry(&mut self) {
        match self.state {
            LinkState::AwaitingV22Connection if self.rc >= self.config.maxv22 => {
                self.config.try_v22 = false;
                self.set_modulus(Modulus::Mod8);
                self.state = LinkState::AwaitingConnection;
                self.rc = 0;
                self.send_u(UKind::SABM, true, true);
                self.restart_t1();
            }
            LinkState::AwaitingConnection | LinkState::AwaitingV22Connection => {
                if self.rc >= self.config.n2 {
                    self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::SetupTimeout));
                    self.i_frame_queue.clear();
                    self.state = LinkState::Disconnected;
                    self.emit(DlsmAction::DisconnectIndication(DisconnectReason::RetriesExhausted));
                } else {
                    self.rc += 1;
                    let kind = if self.modulus == Modulus::Mod128 { UKind::SABME } else { UKind::SABM };
                    self.send_u(kind, true, true);
                    self.restart_t1();
                }
            }
            LinkState::AwaitingRelease => {
                if self.rc >= self.config.n2 {
                    self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::DiscTimeout));
                    self.state = LinkState::Disconnected;
                    self.emit(DlsmAction::DisconnectIndication(DisconnectReason::RetriesExhausted));
                } else {
                    self.rc += 1;
                    self.send_u(UKind::DISC, true, true);
                    self.restart_t1();
                }
            }
            LinkState::Connected => {
                self.rc = 1;
                self.send_rr_or_rnr(true, true);
                self.state = LinkState::TimerRecovery;
                self.restart_t1();
            }
            LinkState::TimerRecovery => {
                if self.rc >= self.config.n2 {
                    self.emit(DlsmAction::ProtocolErrorLogged(ProtocolError::AckTimeout));
                    self.state = LinkState::Disconnected;
                    self.stop_t3();
                    self.send_u(UKind::DM, false, false);
                    self.emit(DlsmAction::DisconnectIndication(DisconnectReason::RetriesExhausted));
                } else {
                    self.rc += 1;
                    self.send_rr_or_rnr(true, true);
                    self.restart_t1();
                }
            }
            LinkState::Disconnected => {}
        }
        self.adapt_srt_on_expiry();
    }

    fn on_t3_expiry(&mut self) {
        if self.state != LinkState::Connected {
            return;
        }
        self.rc = 1;
        self.send_rr_or_rnr(true, true);
        self.state = LinkState::TimerRecovery;
        self.restart_t1();
    }

    fn on_tm201_expiry(&mut self) {
        if self.rc >= self.config.n2 {
            log::warn!("dlsm: XID negotiation abandoned after {} retries", self.rc);
            self.rc = 0;
            self.tm201.stop();
            return;
        }
        self.rc += 1;
        let local = self.config.local_xid();
        self.send_u_with_info(UKind::XID, true, true, 0, &local.encode());
        self.tm201.start();
        self.emit(DlsmAction::StartTimer(TimerKind::Tm201));
    }

    /// T1 expired this round; bump t1v per spec §4.4.4's linear growth.
    fn adapt_srt_on_expiry(&mut self) {
        self.t1_had_expired = true;
        let grown = self.t1v.as_secs_f64().max(
            self.rc as f64 * 0.25 + 2.0 * self.srt.t1_timeout().as_secs_f64(),
        );
        let initial = initial_t1v(self.config.frack, self.digipeater_count);
        let bounded = grown.clamp(0.25, 2.0 * initial.as_secs_f64());
        self.t1v = Duration::from_secs_f64(bounded);
    }

    /// Called by the shell when T1 stops normally (an expected reply
    /// arrived before expiry) with the duration it actually ran.
    pub fn note_t1_stopped_normally(&mut self, ran_for: Duration) {
        if self.rc != 0 || self.t1_had_expired {
            self.t1_had_expired = false;
            return;
        }
        self.srt.sample(ran_for);
        let floor = Duration::from_secs(1 + 2 * self.digipeater_count as u64);
        let new_srt = self.srt.t1_timeout().max(floor);
        self.t1v = new_srt * 2;
    }
}

fn initial_t1v(frack: Duration, digipeater_count: u8) -> Duration {
    frack * (2 * digipeater_count as u32 + 1)
}

// XID/SREJ-fill-in info frames carry no layer-3 payload of their own; reuse
// the "no layer 3" PID rather than inventing a new constant.
const PID_NO_LAYER3_PLACEHOLDER: u8 = crate::frame::PID_NO_LAYER3;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Callsign;

    fn addr(call: &str, ssid: u8) -> Address {
        Address::new(Callsign::new(call).unwrap(), ssid, false)
    }

    fn link() -> DlsmLink {
        let mut cfg = LinkConfig::default();
        cfg.try_v22 = false;
        DlsmLink::new(addr("N0CALL", 0), addr("REMOTE", 0), 0, cfg)
    }

    fn drain(link: &mut DlsmLink) -> Vec<DlsmAction> {
        let mut out = Vec::new();
        while let Some(a) = link.poll_action() {
            out.push(a);
        }
        out
    }

    #[test]
    fn plain_v20_handshake() {
        let mut link = link();
        link.handle_event(LinkEvent::ConnectRequest);
        let actions = drain(&mut link);
        assert!(matches!(
            actions[0],
            DlsmAction::Transmit(Packet { control: Control::U { kind: UKind::SABM, pf: true }, .. })
        ));
        assert_eq!(link.state(), LinkState::AwaitingConnection);

        let ua = Packet {
            addresses: link.addresses(true).swapped(),
            control: Control::U { kind: UKind::UA, pf: true },
            pid: None,
            info: None,
        };
        link.handle_event(LinkEvent::IncomingFrame(ua));
        let actions = drain(&mut link);
        assert!(matches!(actions[0], DlsmAction::ConnectConfirm));
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.vs.value, 0);
        assert_eq!(link.va.value, 0);
        assert_eq!(link.vr.value, 0);
    }

    #[test]
    fn v22_upgrade_falls_back_to_v20_on_dm() {
        let mut cfg = LinkConfig::default();
        cfg.try_v22 = true;
        let mut link = DlsmLink::new(addr("N0CALL", 0), addr("REMOTE", 0), 0, cfg);
        link.handle_event(LinkEvent::ConnectRequest);
        drain(&mut link);
        assert_eq!(link.state(), LinkState::AwaitingV22Connection);

        let dm = Packet {
            addresses: link.addresses(true).swapped(),
            control: Control::U { kind: UKind::DM, pf: true },
            pid: None,
            info: None,
        };
        link.handle_event(LinkEvent::IncomingFrame(dm));
        let actions = drain(&mut link);
        assert!(matches!(
            actions[0],
            DlsmAction::Transmit(Packet { control: Control::U { kind: UKind::SABM, .. }, .. })
        ));
        assert_eq!(link.state(), LinkState::AwaitingConnection);
        assert_eq!(link.modulus, Modulus::Mod8);

        let ua = Packet {
            addresses: link.addresses(true).swapped(),
            control: Control::U { kind: UKind::UA, pf: true },
            pid: None,
            info: None,
        };
        link.handle_event(LinkEvent::IncomingFrame(ua));
        let actions = drain(&mut link);
        assert!(matches!(actions[0], DlsmAction::ConnectConfirm));
        assert_eq!(link.state(), LinkState::Connected);
    }

    fn connected_link() -> DlsmLink {
        let mut link = link();
        link.handle_event(LinkEvent::ConnectRequest);
        drain(&mut link);
        let ua = Packet {
            addresses: link.addresses(true).swapped(),
            control: Control::U { kind: UKind::UA, pf: true },
            pid: None,
            info: None,
        };
        link.handle_event(LinkEvent::IncomingFrame(ua));
        drain(&mut link);
        link
    }

    #[test]
    fn lost_i_frame_triggers_rej_recovery() {
        let mut link = connected_link();
        for i in 0..3u8 {
            link.handle_event(LinkEvent::DataRequest { pid: 0xF0, data: vec![i] });
        }
        link.handle_event(LinkEvent::SeizeConfirm);
        let sent: Vec<_> = drain(&mut link)
            .into_iter()
            .filter(|a| matches!(a, DlsmAction::Transmit(Packet { control: Control::I { .. }, .. })))
            .collect();
        assert_eq!(sent.len(), 3);
        assert_eq!(link.vs.value, 3);

        // Receiver (peer) got ns=0 and ns=2 but dropped ns=1; it replies REJ N(R)=1.
        let rej = Packet {
            addresses: link.addresses(true).swapped(),
            control: Control::S {
                kind: SKind::REJ,
                nr: SeqNo::new(1, Modulus::Mod8),
                pf: false,
            },
            pid: None,
            info: None,
        };
        link.handle_event(LinkEvent::IncomingFrame(rej));
        let actions = drain(&mut link);
        let retransmitted: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                DlsmAction::Transmit(Packet { control: Control::I { ns, .. }, .. }) => Some(ns.value),
                _ => None,
            })
            .collect();
        assert_eq!(retransmitted, vec![1, 2]);
        assert!(link.tx_by_ns.contains_key(&1));
        assert!(link.tx_by_ns.contains_key(&2));

        let rr = Packet {
            addresses: link.addresses(true).swapped(),
            control: Control::S {
                kind: SKind::RR,
                nr: SeqNo::new(3, Modulus::Mod8),
                pf: false,
            },
            pid: None,
            info: None,
        };
        link.handle_event(LinkEvent::IncomingFrame(rr));
        drain(&mut link);
        assert_eq!(link.va.value, 3);
        assert!(link.tx_by_ns.is_empty());
    }

    #[test]
    fn selective_reject_mod128_stashes_and_requests_fill_ins() {
        let mut cfg = LinkConfig::default();
        cfg.try_v22 = false;
        let mut link = DlsmLink::new(addr("N0CALL", 0), addr("REMOTE", 0), 0, cfg);
        link.set_modulus(Modulus::Mod128);
        link.srej_enable = SrejEnable::Multi;
        link.state = LinkState::Connected;
        link.vr = SeqNo::new(1, Modulus::Mod128);

        let make_i = |ns: u8| Packet {
            addresses: link.addresses(true).swapped(),
            control: Control::I {
                ns: SeqNo::new(ns, Modulus::Mod128),
                nr: SeqNo::zero(Modulus::Mod128),
                pf: false,
            },
            pid: Some(0xF0),
            info: Some(CData::new(0xF0, &[ns]).unwrap()),
        };

        link.handle_event(LinkEvent::IncomingFrame(make_i(3)));
        drain(&mut link);
        link.handle_event(LinkEvent::IncomingFrame(make_i(7)));
        let actions = drain(&mut link);
        let (nr, info) = actions
            .iter()
            .find_map(|a| match a {
                DlsmAction::Transmit(Packet {
                    control: Control::S { kind: SKind::SREJ, nr, .. },
                    info,
                    ..
                }) => Some((nr.value, info.clone())),
                _ => None,
            })
            .expect("expected a multi-SREJ fill-in request");
        let mut requested = vec![nr];
        requested.extend(info.expect("multi-SREJ carries extra sequences").as_slice().iter().map(|b| b >> 1));
        requested.sort_unstable();
        assert_eq!(requested, vec![1, 2, 4, 5, 6]);
        assert!(link.rx_by_ns.contains_key(&3));
        assert!(link.rx_by_ns.contains_key(&7));

        for ns in [1u8, 2, 4, 5, 6] {
            link.handle_event(LinkEvent::IncomingFrame(Packet {
                info: Some(CData::new(0xF0, &[ns]).unwrap()),
                ..make_i(ns)
            }));
            drain(&mut link);
        }
        assert_eq!(link.vr.value, 8);
        assert!(link.rx_by_ns.is_empty());
    }

    #[test]
    fn disconnect_request_sends_disc_and_waits_for_ua() {
        let mut link = connected_link();
        link.handle_event(LinkEvent::DisconnectRequest);
        let actions = drain(&mut link);
        assert!(matches!(
            actions[0],
            DlsmAction::Transmit(Packet { control: Control::U { kind: UKind::DISC, .. }, .. })
        ));
        assert_eq!(link.state(), LinkState::AwaitingRelease);

        let ua = Packet {
            addresses: link.addresses(true).swapped(),
            control: Control::U { kind: UKind::UA, pf: true },
            pid: None,
            info: None,
        };
        link.handle_event(LinkEvent::IncomingFrame(ua));
        let actions = drain(&mut link);
        assert!(matches!(actions[0], DlsmAction::DisconnectIndication(DisconnectReason::LocalRequest)));
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn outstanding_frames_counts_queue_and_unacked() {
        let mut link = connected_link();
        link.handle_event(LinkEvent::DataRequest { pid: 0xF0, data: vec![1] });
        link.handle_event(LinkEvent::DataRequest { pid: 0xF0, data: vec![2] });
        link.handle_event(LinkEvent::SeizeConfirm);
        drain(&mut link);
        link.handle_event(LinkEvent::DataRequest { pid: 0xF0, data: vec![3] });
        link.handle_event(LinkEvent::OutstandingFramesRequest);
        let actions = drain(&mut link);
        assert!(matches!(actions.last(), Some(DlsmAction::OutstandingFramesConfirm(3))));
    }
}
