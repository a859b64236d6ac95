// SPDX-License-Identifier: MIT

//! Sender side of XMODEM-CRC.
//!
//! The bootloader solicits with `C`; each frame is SOH, sequence, inverted
//! sequence, 128 data bytes and a big-endian CRC-16/XMODEM. NAK means
//! resend, ACK advances, EOT closes. The checksum here comes from the `crc`
//! crate as an implementation independent of the receiver's hand-rolled
//! routine; the two are bit-identical.

use anyhow::{bail, Result};
use crc::{Crc, CRC_16_XMODEM};
use indicatif::ProgressBar;

use crate::transport::Transport;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub const SOH: u8 = 0x01;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const NCG: u8 = b'C';

pub const DATA_SIZE: usize = 128;

/// Resends tolerated per packet before giving up.
const MAX_RETRIES: u32 = 10;

/// Stream `image` to the receiver. The final block is padded with 0xFF,
/// which reads as erased flash on the other end.
pub fn send(transport: &mut Transport, image: &[u8], progress: &ProgressBar) -> Result<()> {
    // The receiver erases the target region first and only then starts
    // soliciting, so allow plenty of quiet time here.
    transport.with_timeout(60_000, |t| t.wait_for(NCG))?;

    let mut sequence: u32 = 1;

    for chunk in image.chunks(DATA_SIZE) {
        let mut block = [0xFFu8; DATA_SIZE];
        block[..chunk.len()].copy_from_slice(chunk);

        send_block(transport, (sequence % 256) as u8, &block)?;

        sequence += 1;
        progress.set_position(((sequence - 1) as usize * DATA_SIZE).min(image.len()) as u64);
    }

    transport.write_byte(EOT)?;
    match transport.read_byte()? {
        ACK => Ok(()),
        other => bail!("EOT not acknowledged (got 0x{:02X})", other),
    }
}

fn send_block(transport: &mut Transport, sequence: u8, block: &[u8; DATA_SIZE]) -> Result<()> {
    let crc = CRC16.checksum(block);

    let mut frame = Vec::with_capacity(DATA_SIZE + 5);
    frame.push(SOH);
    frame.push(sequence);
    frame.push(255 - sequence);
    frame.extend_from_slice(block);
    frame.push((crc >> 8) as u8);
    frame.push((crc & 0xFF) as u8);

    for _ in 0..MAX_RETRIES {
        transport.write_all(&frame)?;

        match transport.read_byte()? {
            ACK => return Ok(()),
            NAK => continue,
            other => bail!(
                "Unexpected reply 0x{:02X} to packet {}",
                other,
                sequence
            ),
        }
    }

    bail!("Packet {} rejected {} times", sequence, MAX_RETRIES)
}
