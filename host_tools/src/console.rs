//! Command-line console for a LoRa gateway.
//!
//! Sends one command per invocation and prints the decoded reply.

mod device;

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use colored::Colorize;

use device::{resolve_port, DeviceClient};
use lora_gateway::commands::{ErrorCode, HostFrame, Instruction, StatusCode};
use lora_gateway::config::serial::BAUD_RATE;
use lora_gateway::lora::{LastPacketStats, RadioConfig};
use lora_gateway::protocol::config_record;

#[derive(Parser)]
#[command(name = "lora-console")]
#[command(about = "Drive a LoRa serial gateway from the command line")]
struct Args {
    /// Serial port for the gateway (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = BAUD_RATE)]
    baud: u32,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Re-initialise the radio with its current configuration
    Init,
    /// Put the radio in standby
    Idle,
    /// Put the radio to sleep
    Sleep,
    /// Replace the radio configuration (unset fields keep their defaults)
    Set {
        #[arg(long)]
        frequency: Option<u32>,
        #[arg(long, allow_hyphen_values = true)]
        power: Option<i16>,
        #[arg(long)]
        spreading_factor: Option<u16>,
        #[arg(long)]
        bandwidth: Option<u32>,
        /// Coding rate denominator (5..=8)
        #[arg(long)]
        coding_rate: Option<u16>,
        #[arg(long)]
        preamble: Option<u32>,
        #[arg(long, value_parser = parse_u16)]
        sync_word: Option<u16>,
        #[arg(long)]
        async_send: bool,
    },
    /// Transmit a message
    Send {
        message: String,
        /// Treat the message as hex bytes
        #[arg(long)]
        hex: bool,
    },
    /// Show signal quality of the last received packet
    Stats,
    /// Set local and peer device ids
    Address {
        #[arg(value_parser = parse_u8)]
        local: u8,
        #[arg(value_parser = parse_u8)]
        peer: u8,
    },
    /// Print receptions as they arrive
    Listen {
        /// Stop after this many seconds (0 = forever)
        #[arg(short, long, default_value = "0")]
        seconds: u64,
    },
}

fn parse_u8(s: &str) -> Result<u8, String> {
    parse_u16(s).and_then(|v| u8::try_from(v).map_err(|e| e.to_string()))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| e.to_string())
}

fn parse_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        anyhow::bail!("Odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(anyhow::Error::from))
        .collect()
}

/// One-line description of a reply frame.
fn describe(frame: &HostFrame) -> String {
    let status = match frame.status() {
        Some(StatusCode::Init) => "INIT".cyan().bold(),
        Some(StatusCode::Ok) => "OK".green().bold(),
        Some(StatusCode::Err) => "ERR".red().bold(),
        Some(StatusCode::Warning) => "WARNING".yellow().bold(),
        None => format!("?{:#04x}", frame.as_bytes()[0]).red(),
    };

    // Used part of the padded payload
    let used = frame
        .payload()
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);

    match frame.error() {
        Some(code) if frame.status() != Some(StatusCode::Ok) || code == ErrorCode::NoError => {
            format!("{} {:?} {:02x?}", status, code, &frame.payload()[..used])
        }
        _ => {
            // OK with a length byte: a received packet
            let len = frame.code() as usize;
            let payload = &frame.payload()[..len.min(frame.payload().len())];
            format!("{} {} bytes {:?}", status, len, String::from_utf8_lossy(payload))
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let port = resolve_port(&args.port, args.baud)?;
    let mut device = DeviceClient::new(&port, args.baud)?;

    match args.command {
        Cmd::Init => print_reply(device.send(Instruction::InitRadio, &[])?),
        Cmd::Idle => print_reply(device.send(Instruction::IdleRadio, &[])?),
        Cmd::Sleep => print_reply(device.send(Instruction::SleepRadio, &[])?),
        Cmd::Set {
            frequency,
            power,
            spreading_factor,
            bandwidth,
            coding_rate,
            preamble,
            sync_word,
            async_send,
        } => {
            let defaults = RadioConfig::default();
            let config = RadioConfig {
                frequency_hz: frequency.unwrap_or(defaults.frequency_hz),
                tx_power_dbm: power.unwrap_or(defaults.tx_power_dbm),
                spreading_factor: spreading_factor.unwrap_or(defaults.spreading_factor),
                bandwidth_hz: bandwidth.unwrap_or(defaults.bandwidth_hz),
                coding_rate: coding_rate.unwrap_or(defaults.coding_rate),
                preamble_length: preamble.unwrap_or(defaults.preamble_length),
                sync_word: sync_word.unwrap_or(defaults.sync_word),
                async_send,
                implicit_header: defaults.implicit_header,
            };
            print_reply(device.send(Instruction::SetRadioConfig, &config_record::encode(&config))?);
        }
        Cmd::Send { message, hex } => {
            let data = if hex { parse_hex(&message)? } else { message.into_bytes() };
            print_reply(device.send(Instruction::Send, &data)?);
        }
        Cmd::Stats => {
            let reply = device.send(Instruction::GetStats, &[])?;
            if reply.status() == Some(StatusCode::Ok) {
                let mut raw = [0u8; 10];
                raw.copy_from_slice(&reply.payload()[..10]);
                let stats = LastPacketStats::from_bytes(&raw);
                println!(
                    "RSSI: {} dBm, SNR: {:.2} dB, frequency error: {} Hz",
                    stats.rssi, stats.snr, stats.frequency_error
                );
            } else {
                print_reply(reply);
            }
        }
        Cmd::Address { local, peer } => {
            print_reply(device.send(Instruction::SetAddress, &[local, peer])?)
        }
        Cmd::Listen { seconds } => {
            println!("Listening on {} (Ctrl-C to stop)", port);
            let start = Instant::now();
            while seconds == 0 || start.elapsed() < Duration::from_secs(seconds) {
                if let Some(frame) = device.try_read_frame(Duration::from_millis(500))? {
                    println!("{}", describe(&frame));
                }
            }
        }
    }

    Ok(())
}

fn print_reply(frame: HostFrame) {
    println!("{}", describe(&frame));
}
