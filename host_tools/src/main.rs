//! Integration tests for the LoRa serial gateway.
//!
//! Run against a flashed gateway. Pass `--peer-port` with a second gateway
//! in range to also exercise the radio link.

mod device;
mod tests;

use clap::Parser;
use colored::Colorize;

use device::{resolve_port, DeviceClient};
use lora_gateway::config::serial::BAUD_RATE;
use tests::{print_results, run_all_tests, run_link_tests};

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Integration tests for the LoRa serial gateway")]
struct Args {
    /// Serial port for the gateway (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Serial port of a second gateway for link tests
    #[arg(long)]
    peer_port: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value_t = BAUD_RATE)]
    baud: u32,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    // Resolve port (auto-detect if "auto")
    let port = resolve_port(&args.port, args.baud)?;

    println!("{}", "LoRa Gateway Integration Tests".bold());
    println!("Port: {}", port);
    println!("Baud: {}", args.baud);
    println!();

    println!("Connecting to gateway...");
    let mut device = DeviceClient::new(&port, args.baud)?;

    // Let the startup announcement arrive, then drop it
    std::thread::sleep(std::time::Duration::from_secs(1));
    device.drain()?;
    println!("{}", "Connected!".green());

    println!("\nRunning tests...\n");

    let mut results = run_all_tests(&mut device);

    if let Some(peer_port) = &args.peer_port {
        println!("\nRunning link tests against {}...\n", peer_port);
        let mut peer = DeviceClient::new(peer_port, args.baud)?;
        std::thread::sleep(std::time::Duration::from_secs(1));
        peer.drain()?;
        results.extend(run_link_tests(&mut device, &mut peer));
    }

    print_results(&results);

    // Exit with error code if any tests failed
    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
