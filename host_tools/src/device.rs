//! Gateway communication client.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use lora_gateway::commands::{encode_command, HostFrame, Instruction, StatusCode};
use lora_gateway::config::protocol::SERIAL_PACKET_SIZE;
use serialport::SerialPort;

/// Find gateways by scanning serial devices and probing with GET_STATS.
pub fn find_gateway_ports(baud_rate: u32) -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    let mut gateways = Vec::new();

    for port_info in ports {
        let name = &port_info.port_name;
        if !(name.contains("ttyACM") || name.contains("ttyUSB")) {
            continue;
        }

        if let Ok(mut client) = DeviceClient::new(name, baud_rate) {
            // Set short timeout for probing
            client.set_timeout(Duration::from_millis(500));
            if let Ok(reply) = client.send(Instruction::GetStats, &[]) {
                if reply.status() == Some(StatusCode::Ok) {
                    gateways.push(name.clone());
                }
            }
        }
    }

    Ok(gateways)
}

/// Resolve a port argument - returns the port path if not "auto", otherwise auto-detects.
pub fn resolve_port(port_arg: &str, baud_rate: u32) -> Result<String> {
    if port_arg != "auto" {
        return Ok(port_arg.to_string());
    }

    match find_gateway_ports(baud_rate)?.into_iter().next() {
        Some(port) => Ok(port),
        None => anyhow::bail!("No gateway found - ensure device is connected"),
    }
}

/// Client for talking to a gateway over its host link.
pub struct DeviceClient {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl DeviceClient {
    /// Open the gateway's serial port.
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(Self {
            port,
            timeout: Duration::from_secs(2),
        })
    }

    /// Set the reply timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Drop anything buffered in either direction.
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    /// Read and discard frames until the line goes quiet.
    pub fn drain(&mut self) -> Result<usize> {
        let mut drained = 0;
        while self.try_read_frame(Duration::from_millis(200))?.is_some() {
            drained += 1;
        }
        self.clear_buffer()?;
        Ok(drained)
    }

    /// Send a command and wait for its reply.
    pub fn send(&mut self, instruction: Instruction, payload: &[u8]) -> Result<HostFrame> {
        self.send_raw(instruction as u8, payload)
    }

    /// Send a command with an arbitrary opcode (for testing invalid commands).
    pub fn send_raw(&mut self, opcode: u8, payload: &[u8]) -> Result<HostFrame> {
        let burst = encode_command(opcode, payload);
        self.port.write_all(&burst)?;
        self.port.flush()?;

        let timeout = self.timeout;
        match self.try_read_frame(timeout)? {
            Some(frame) => Ok(frame),
            None => anyhow::bail!("Timeout waiting for reply to opcode {:#04x}", opcode),
        }
    }

    /// Read one fixed-size frame, or `None` if nothing starts arriving within `timeout`.
    pub fn try_read_frame(&mut self, timeout: Duration) -> Result<Option<HostFrame>> {
        let mut data = [0u8; SERIAL_PACKET_SIZE];
        let mut filled = 0;
        let start = Instant::now();

        while filled < SERIAL_PACKET_SIZE {
            // Once a frame has started, give the rest of it the full timeout
            if filled == 0 && start.elapsed() >= timeout {
                return Ok(None);
            }
            if filled > 0 && start.elapsed() >= timeout * 2 {
                anyhow::bail!(
                    "Truncated frame, got {} bytes: {:02x?}",
                    filled,
                    &data[..filled]
                );
            }

            match self.port.read(&mut data[filled..]) {
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }

        HostFrame::decode(&data)
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Bad frame: {:?}", e))
    }

    /// Wait for an unsolicited reception frame.
    pub fn wait_for_frame(&mut self, timeout: Duration) -> Result<HostFrame> {
        match self.try_read_frame(timeout)? {
            Some(frame) => Ok(frame),
            None => anyhow::bail!("Timeout waiting for reception"),
        }
    }
}
