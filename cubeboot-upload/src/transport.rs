// SPDX-License-Identifier: MIT

//! Serial transport to the bootloader's debug UART.

use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serialport::SerialPort;

/// Default timeout for serial operations in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// The debug line runs 115200 8-N-1.
pub const BAUD_RATE: u32 = 115_200;

/// Raw byte transport over the debug serial line.
pub struct Transport {
    port: Box<dyn SerialPort>,
}

impl Transport {
    /// Open the port with the default timeout.
    pub fn new(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;

        Ok(Self { port })
    }

    pub fn port_name(&self) -> String {
        self.port.name().unwrap_or_else(|| "?".to_string())
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all(bytes)
            .context("Failed to write to serial port")?;
        self.port.flush()?;
        Ok(())
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_all(&[byte])
    }

    /// Read one byte within the port timeout.
    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(1) => return Ok(byte[0]),
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    bail!("Timeout waiting for the bootloader")
                }
                Err(e) => bail!("Serial read error: {}", e),
            }
        }
    }

    /// Skip device chatter until `wanted` shows up.
    pub fn wait_for(&mut self, wanted: u8) -> Result<()> {
        loop {
            if self.read_byte()? == wanted {
                return Ok(());
            }
        }
    }

    /// Collect everything the device prints until the line goes quiet.
    pub fn read_until_quiet(&mut self) -> Vec<u8> {
        let mut collected = Vec::new();
        let mut buf = [0u8; 64];

        let old_timeout = self.port.timeout();
        let _ = self.port.set_timeout(Duration::from_millis(300));

        loop {
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }

        let _ = self.port.set_timeout(old_timeout);
        collected
    }

    /// Drop any stale bytes sitting in the receive buffer.
    pub fn drain(&mut self) {
        let mut buf = [0u8; 64];
        let old_timeout = self.port.timeout();
        let _ = self.port.set_timeout(Duration::from_millis(10));
        while self.port.read(&mut buf).unwrap_or(0) > 0 {}
        let _ = self.port.set_timeout(old_timeout);
    }

    /// Temporarily change the read timeout for slow operations (erase of a
    /// 512 KiB slot takes a while).
    pub fn with_timeout<T>(
        &mut self,
        timeout_ms: u64,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let old_timeout = self.port.timeout();
        self.port
            .set_timeout(Duration::from_millis(timeout_ms))
            .context("Failed to set timeout")?;

        let result = body(self);

        let _ = self.port.set_timeout(old_timeout);
        result
    }
}
