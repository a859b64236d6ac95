// SPDX-License-Identifier: MIT

//! Command implementations for the operator shell.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use cubeboot_common::crc::crc16;
use cubeboot_common::layout::BOOT_TABLE_SIZE;

use crate::transport::Transport;
use crate::xmodem;

fn progress_bar(total: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn print_response(transport: &mut Transport) {
    let text = transport.read_until_quiet();
    print!("{}", String::from_utf8_lossy(&text));
    println!();
}

/// Upload an application image into a boot slot.
pub fn upload(transport: &mut Transport, file: &Path, slot: u8, description: &str) -> Result<()> {
    if slot == 0 || slot > BOOT_TABLE_SIZE {
        bail!("Slot must be 1..={} (slot 0 is the safe-mode image)", BOOT_TABLE_SIZE);
    }

    let firmware =
        fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    println!(
        "Firmware: {} ({} bytes, CRC16: 0x{:04X})",
        file.display(),
        firmware.len(),
        crc16(&firmware)
    );
    println!("Target:   slot {}", slot);
    println!();

    transport.drain();
    transport.write_byte(b'x')?;
    transport.write_byte(b'0' + slot)?;

    let pb = progress_bar(firmware.len() as u64)?;
    if let Err(e) = xmodem::send(transport, &firmware, &pb) {
        pb.abandon();
        return Err(e);
    }
    pb.finish_with_message("Upload complete");

    // The bootloader now asks for the entry description.
    transport.write_all(description.as_bytes())?;
    transport.write_byte(b'\n')?;

    print_response(transport);

    println!("Image uploaded; boot index now points at slot {}.", slot);
    println!(
        "Use 'cubeboot-upload --port {} boot' to continue booting.",
        transport.port_name()
    );

    Ok(())
}

/// Upload the safe-mode image into EEPROM.
pub fn upload_safe_mode(transport: &mut Transport, file: &Path) -> Result<()> {
    let firmware =
        fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    println!(
        "Safe-mode image: {} ({} bytes)",
        file.display(),
        firmware.len()
    );

    transport.drain();
    transport.write_byte(b'z')?;

    let pb = progress_bar(firmware.len() as u64)?;
    if let Err(e) = xmodem::send(transport, &firmware, &pb) {
        pb.abandon();
        return Err(e);
    }
    pb.finish_with_message("Upload complete");

    print_response(transport);
    Ok(())
}

/// Enumerate the boot table.
pub fn list(transport: &mut Transport) -> Result<()> {
    transport.drain();
    transport.write_byte(b'l')?;
    print_response(transport);
    Ok(())
}

/// Set primary and failsafe slot masks.
pub fn set_slots(transport: &mut Transport, primary: &str, failsafe: &str) -> Result<()> {
    for (name, digits) in [("primary", primary), ("failsafe", failsafe)] {
        if digits.len() != 3 || !digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            bail!("{} selection must be three digits 0..7, e.g. 012", name);
        }
    }

    transport.drain();
    transport.write_byte(b's')?;
    transport.write_all(primary.as_bytes())?;
    transport.write_all(failsafe.as_bytes())?;

    print_response(transport);
    Ok(())
}

/// Point the primary selection at the safe-mode image.
pub fn set_safe_mode(transport: &mut Transport) -> Result<()> {
    transport.drain();
    transport.write_all(b"sm")?;
    print_response(transport);
    Ok(())
}

/// Point the primary selection at the upper half.
pub fn set_upper(transport: &mut Transport) -> Result<()> {
    transport.drain();
    transport.write_all(b"su")?;
    print_response(transport);
    Ok(())
}

/// Dump the current boot settings.
pub fn show_settings(transport: &mut Transport) -> Result<()> {
    transport.drain();
    transport.write_byte(b'C')?;
    print_response(transport);
    Ok(())
}

/// Run the bootloader's environment check.
pub fn check(transport: &mut Transport) -> Result<()> {
    transport.drain();
    transport.write_byte(b'c')?;
    print_response(transport);
    Ok(())
}

/// Erase one boot table entry.
pub fn erase(transport: &mut Transport, slot: u8) -> Result<()> {
    if slot == 0 || slot > BOOT_TABLE_SIZE {
        bail!("Slot must be 1..={}", BOOT_TABLE_SIZE);
    }

    println!("Erasing slot {}...", slot);

    transport.drain();
    transport.write_byte(b'e')?;
    // A 512 KiB region takes its time to erase.
    transport.with_timeout(60_000, |t| {
        t.write_byte(b'0' + slot)?;
        Ok(())
    })?;

    print_response(transport);
    Ok(())
}

/// Let the bootloader continue booting.
pub fn boot(transport: &mut Transport) -> Result<()> {
    transport.drain();
    transport.write_byte(b'b')?;
    print_response(transport);
    Ok(())
}

/// Request a hardware reset.
pub fn reset(transport: &mut Transport) -> Result<()> {
    transport.drain();
    transport.write_byte(b'r')?;
    println!("Reset requested.");
    Ok(())
}
