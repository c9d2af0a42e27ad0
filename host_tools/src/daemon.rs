//! Threaded gateway daemon running against a simulated radio link.
//!
//! The gateway radio beacons a sequence counter; a simulated remote node on
//! the other end of the link logs what it hears and answers periodically.
//! Stops cleanly on SIGINT/SIGTERM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;

use lora_gateway::config::protocol::RADIO_PACKET_SIZE;
use lora_gateway::daemon::{Daemon, DaemonConfig, DataSource, SharedState, SimRadio, StdDelay};
use lora_gateway::lora::{AddressPair, RadioConfig, RadioTransport, ReceiveOutcome};

#[derive(Parser)]
#[command(name = "gateway-daemon")]
#[command(about = "Threaded LoRa gateway daemon (simulated radio link)")]
struct Args {
    /// Receive worker poll interval in milliseconds
    #[arg(long, default_value = "100")]
    rx_poll_ms: u64,

    /// Transmit worker period in milliseconds
    #[arg(long, default_value = "1000")]
    tx_period_ms: u64,

    /// Auxiliary worker period in milliseconds
    #[arg(long, default_value = "1000")]
    aux_period_ms: u64,

    /// How often the simulated remote node answers, in milliseconds
    #[arg(long, default_value = "2500")]
    remote_period_ms: u64,
}

/// Beacon payload: an incrementing sequence number
struct SequenceSource {
    next: u32,
}

impl DataSource for SequenceSource {
    fn produce(&mut self, out: &mut [u8]) -> usize {
        let text = format!("seq={}", self.next);
        self.next = self.next.wrapping_add(1);
        let n = text.len().min(out.len());
        out[..n].copy_from_slice(&text.as_bytes()[..n]);
        n
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = DaemonConfig {
        rx_poll_interval: Duration::from_millis(args.rx_poll_ms),
        tx_period: Duration::from_millis(args.tx_period_ms),
        aux_period: Duration::from_millis(args.aux_period_ms),
    };

    let (gateway_radio, remote_radio) = SimRadio::pair();
    let irq = gateway_radio.irq();
    let shutdown = Arc::new(AtomicBool::new(false));

    println!("{}", "LoRa gateway daemon".bold());
    let daemon = Daemon::start(
        RadioTransport::new(gateway_radio, StdDelay),
        irq,
        SequenceSource { next: 0 },
        config,
        Arc::clone(&shutdown),
    )
    .map_err(|e| anyhow::anyhow!("Daemon failed to start: {:?}", e))?;

    let remote = {
        let shutdown = Arc::clone(&shutdown);
        let period = Duration::from_millis(args.remote_period_ms);
        thread::Builder::new()
            .name("remote-node".into())
            .spawn(move || remote_node(remote_radio, &shutdown, period))?
    };

    let shared = Arc::clone(daemon.shared());
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(supervise(&shared))?;

    println!("{}", "Shutting down...".yellow());
    shared.request_shutdown();
    daemon
        .shutdown()
        .map_err(|e| anyhow::anyhow!("Shutdown failed: {:?}", e))?;
    if remote.join().is_err() {
        anyhow::bail!("Remote node panicked");
    }
    println!("{}", "All workers joined".green());

    Ok(())
}

/// Print RX buffer updates until a termination signal arrives
async fn supervise(shared: &SharedState) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut seen = shared.rx.generation();
    let mut buf = [0u8; RADIO_PACKET_SIZE];

    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        #[cfg(unix)]
        let stop = async {
            tokio::select! {
                r = tokio::signal::ctrl_c() => r,
                _ = terminate.recv() => Ok(()),
            }
        };
        #[cfg(not(unix))]
        let stop = tokio::signal::ctrl_c();

        tokio::select! {
            r = stop => return r.map_err(Into::into),
            _ = ticker.tick() => {
                let generation = shared.rx.generation();
                if generation != seen {
                    seen = generation;
                    let n = shared.rx.load(&mut buf);
                    println!(
                        "{} {:?} (status {:?})",
                        "RX".green().bold(),
                        String::from_utf8_lossy(&buf[..n]),
                        shared.status.get()
                    );
                }
            }
        }
    }
}

/// Far end of the simulated link
fn remote_node(radio: SimRadio, shutdown: &AtomicBool, period: Duration) {
    let gateway = AddressPair::default();
    let mut transport = RadioTransport::new(radio, StdDelay);
    if let Err(e) = transport.initialize(
        RadioConfig::default(),
        AddressPair::new(gateway.peer_id, gateway.local_id),
    ) {
        log::error!("Remote node: init failed ({:?})", e);
        return;
    }

    let mut last_reply = Instant::now();
    let mut count = 0u32;

    while !shutdown.load(Ordering::Acquire) {
        if let ReceiveOutcome::Frame(frame) = transport.poll_receive() {
            if let Some((status, body)) = frame.payload.split_first() {
                log::info!(
                    "Remote node heard {:?} (gateway status {:#04x})",
                    String::from_utf8_lossy(body),
                    status
                );
            }
        }

        if last_reply.elapsed() >= period {
            last_reply = Instant::now();
            count += 1;
            if let Err(e) = transport.transmit(format!("ack {}", count).as_bytes()) {
                log::warn!("Remote node: transmit failed ({:?})", e);
            }
        }

        thread::sleep(Duration::from_millis(10));
    }
}
