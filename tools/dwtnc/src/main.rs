use std::collections::HashMap;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use clap::Parser;

use dwapp::channel_io::{ChannelIo, NullChannelIo};
use dwapp::config::TncConfig;
use dwapp::dlq::{self, DlqSender};
use dwapp::kiss_serial::{PttPin, SerialChannel};
use dwapp::kiss_tcp::{self, MonitorRegistry};
use dwapp::linkset::{self, LinkSet};
use dwapp::timerthread;
use dwapp::txworker::{self, ChannelOutbound};
use dwcore::address::Address;
use dwcore::dlsm::LinkConfig;
use dwcore::tq::CsmaParams;

#[derive(Parser)]
struct Args {
    #[arg(short = 'c', long, help = "Path to a TOML config file")]
    config: Option<PathBuf>,
    #[arg(
        long,
        help = "Back every channel with a null device instead of a serial port, for smoke testing"
    )]
    null_channel: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TncConfig::load(path).unwrap_or_else(|e| {
            log::error!("failed to load config: {e}");
            std::process::exit(1);
        }),
        None => TncConfig::default(),
    };

    let (dlq_tx, dlq_rx) = dlq::channel();
    let (timer_tx, timer_rx) = timerthread::channel();

    let mut outbound_map: HashMap<u8, Arc<ChannelOutbound>> = HashMap::new();
    let mut device_locks: HashMap<String, Arc<Mutex<()>>> = HashMap::new();

    for chan_cfg in &config.channels {
        let params = CsmaParams {
            txdelay: chan_cfg.txdelay,
            persistence: chan_cfg.persistence,
            slottime: chan_cfg.slottime,
            txtail: chan_cfg.txtail,
            full_duplex: chan_cfg.full_duplex,
            dwait: chan_cfg.dwait,
        };
        let (client_events_tx, client_events_rx) = std::sync::mpsc::channel();
        let device_key = chan_cfg
            .audio_device
            .clone()
            .unwrap_or_else(|| format!("channel-{}", chan_cfg.channel));
        let device_lock = device_locks
            .entry(device_key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let outbound = Arc::new(ChannelOutbound::new(params, client_events_tx, device_lock));
        outbound_map.insert(chan_cfg.channel, Arc::clone(&outbound));

        thread::spawn(move || {
            for evt in client_events_rx {
                log::debug!("{evt:?}");
            }
        });

        for call in &chan_cfg.callsigns {
            match Address::parse(call, false) {
                Some(addr) => {
                    if dlq_tx
                        .send(dwapp::dlq::DlqEvent::RegisterCallsign {
                            channel: chan_cfg.channel,
                            callsign: addr,
                        })
                        .is_err()
                    {
                        log::error!("DLQ worker gone before startup finished");
                    }
                }
                None => log::error!("channel {}: invalid callsign {call:?}", chan_cfg.channel),
            }
        }

        let monitors = MonitorRegistry::default();

        if args.null_channel || chan_cfg.serial_port.is_none() {
            spawn_channel_threads(
                NullChannelIo,
                chan_cfg.channel,
                Arc::clone(&outbound),
                dlq_tx.clone(),
                monitors.clone(),
            );
        } else {
            let path = chan_cfg.serial_port.clone().unwrap();
            match SerialChannel::open(&path, 9600, PttPin::Rts) {
                Ok(io) => spawn_channel_threads(
                    io,
                    chan_cfg.channel,
                    Arc::clone(&outbound),
                    dlq_tx.clone(),
                    monitors.clone(),
                ),
                Err(e) => {
                    log::error!("channel {}: could not open {path}: {e}", chan_cfg.channel);
                    continue;
                }
            }
        }

        let tcp_port = config.kiss_tcp_port + chan_cfg.channel as u16;
        match TcpListener::bind(("0.0.0.0", tcp_port)) {
            Ok(listener) => {
                let channel = chan_cfg.channel;
                let max_clients = config.kiss_tcp_clients;
                let outbound = Arc::clone(&outbound);
                let dlq_tx = dlq_tx.clone();
                thread::spawn(move || {
                    kiss_tcp::run_kiss_tcp_server(
                        listener,
                        channel,
                        max_clients,
                        outbound,
                        dlq_tx,
                        monitors,
                    )
                });
                log::info!("channel {channel}: KISS TCP listening on :{tcp_port}");
            }
            Err(e) => log::error!(
                "channel {}: could not bind KISS TCP port {tcp_port}: {e}",
                chan_cfg.channel
            ),
        }
    }

    let default_link_config = LinkConfig {
        frack: std::time::Duration::from_millis(config.frack_ms),
        n2: config.n2,
        ..LinkConfig::default()
    };
    {
        let dlq_rx = dlq_rx;
        let outbound_map = Mutex::new(outbound_map);
        let timer_tx = timer_tx.clone();
        thread::spawn(move || {
            linkset::run_dlq_worker(
                dlq_rx,
                LinkSet::new(default_link_config),
                outbound_map,
                timer_tx,
            );
        });
    }

    {
        let dlq_tx = dlq_tx.clone();
        thread::spawn(move || timerthread::run_timer_wheel(timer_rx, dlq_tx));
    }

    if let Some(agw_port) = config.agw_tcp_port {
        match TcpListener::bind(("0.0.0.0", agw_port)) {
            Ok(listener) => {
                let dlq_tx = dlq_tx.clone();
                thread::spawn(move || dwapp::agw::run_agw_server(listener, 0, dlq_tx));
                log::info!("AGW server listening on :{agw_port}");
            }
            Err(e) => log::error!("could not bind AGW port {agw_port}: {e}"),
        }
    }

    loop {
        thread::park();
    }
}

fn spawn_channel_threads<T: ChannelIo>(
    mut io: T,
    channel: u8,
    outbound: Arc<ChannelOutbound>,
    dlq_tx: DlqSender,
    monitors: MonitorRegistry,
) {
    let reader_io = match io.try_clone() {
        Ok(clone) => clone,
        Err(e) => {
            log::error!("channel {channel}: could not clone device for reader thread: {e}");
            return;
        }
    };
    let reader_dlq = dlq_tx.clone();
    thread::spawn(move || txworker::run_channel_reader(reader_io, channel, reader_dlq, monitors));
    thread::spawn(move || txworker::run_tx_worker(io, channel, outbound, dlq_tx));
}
