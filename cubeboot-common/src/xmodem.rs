// SPDX-License-Identifier: MIT

//! XMODEM-CRC receiver for firmware upload over the debug serial line.
//!
//! Fixed 133-byte frames: SOH, sequence number, its complement, 128 data
//! bytes and a big-endian CRC-16/CCITT over the data. The receiver solicits
//! the sender with `C`, NAKs malformed frames without advancing, ACKs good
//! ones into the upload target at `(seq - 1) * 128`, and ACKs EOT. Sequence
//! numbers start at 1 and wrap modulo 256; the internal packet count keeps
//! running, so transfers longer than 32 KiB land at the right offsets.

use defmt_or_log::{debug, info};

use crate::boot_table::{BootTable, BootTableError};
use crate::eeprom::{Eeprom, MemoryBus};
use crate::flash::FlashDriver;

pub const SOH: u8 = 0x01;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CAN: u8 = 0x18;
/// `C`: solicit a CRC-mode transfer.
pub const NCG: u8 = 0x43;

/// Payload bytes per packet.
pub const DATA_SIZE: usize = 128;

/// Polls between re-emissions of the initial `C`.
pub const NCG_POLL_BUDGET: u32 = 10_000_000;

/// Byte source/sink for the debug serial line.
///
/// Reception is interrupt-fed on the target; `poll_byte` drains the receive
/// ring and `idle` may drop the core into a low-power wait until the next
/// interrupt.
pub trait SerialLink {
    fn poll_byte(&mut self) -> Option<u8>;

    fn write_byte(&mut self, byte: u8);

    /// Low-power wait permitted between polls.
    fn idle(&mut self) {}

    fn read_byte(&mut self) -> u8 {
        loop {
            if let Some(byte) = self.poll_byte() {
                return byte;
            }
            self.idle();
        }
    }

    fn write_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_byte(byte);
        }
    }
}

impl<S: SerialLink + ?Sized> SerialLink for &mut S {
    fn poll_byte(&mut self) -> Option<u8> {
        (**self).poll_byte()
    }

    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte)
    }

    fn idle(&mut self) {
        (**self).idle()
    }
}

/// Where received packets land: a boot table slot or the safe-mode EEPROM.
pub trait UploadTarget {
    /// Prepare the region (erase for NOR targets).
    fn begin(&mut self) -> Result<(), BootTableError>;

    fn write_block(&mut self, offset: u32, block: &[u8; DATA_SIZE]) -> Result<(), BootTableError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XmodemError {
    /// Leading byte was neither SOH nor EOT.
    Aborted,
    Target(BootTableError),
}

impl From<BootTableError> for XmodemError {
    fn from(err: BootTableError) -> Self {
        XmodemError::Target(err)
    }
}

/// One wire frame after the header byte.
struct Packet {
    number: u8,
    number_complement: u8,
    data: [u8; DATA_SIZE],
    crc: u16,
}

impl Packet {
    fn read_from<S: SerialLink>(serial: &mut S) -> Self {
        let number = serial.read_byte();
        let number_complement = serial.read_byte();

        let mut data = [0u8; DATA_SIZE];
        for slot in data.iter_mut() {
            *slot = serial.read_byte();
        }

        let crc_high = serial.read_byte();
        let crc_low = serial.read_byte();

        Self {
            number,
            number_complement,
            data,
            crc: u16::from(crc_high) << 8 | u16::from(crc_low),
        }
    }

    /// Sequence-number integrity, expected number, and data CRC.
    fn verify(&self, expected: u8) -> bool {
        if u16::from(self.number) + u16::from(self.number_complement) != 255 {
            return false;
        }
        if self.number != expected {
            return false;
        }
        crate::crc::crc16(&self.data) == self.crc
    }
}

/// Receive one XMODEM-CRC transfer into `target`.
///
/// Returns the received length, `lastAckedSeq * 128`. A transfer the sender
/// opens with anything other than SOH is aborted; the target region is
/// already erased by then and stays unpublished.
pub fn receive<S: SerialLink, T: UploadTarget>(
    serial: &mut S,
    target: &mut T,
) -> Result<u32, XmodemError> {
    target.begin()?;

    // Solicit the sender until the first byte of the first frame shows up.
    let mut header = 'sync: loop {
        serial.write_byte(NCG);
        for _ in 0..NCG_POLL_BUDGET {
            if let Some(byte) = serial.poll_byte() {
                break 'sync byte;
            }
        }
    };

    // Packets are counted from 1 across the whole transfer; only the wire
    // sequence byte wraps.
    let mut sequence: u32 = 1;

    loop {
        if header == EOT {
            serial.write_byte(ACK);
            info!("xmodem: transfer complete");
            break;
        }

        if header != SOH {
            debug!("xmodem: unexpected header, aborting");
            return Err(XmodemError::Aborted);
        }

        let packet = Packet::read_from(serial);

        if !packet.verify((sequence % 256) as u8) {
            serial.write_byte(NAK);
            header = serial.read_byte();
            continue;
        }

        target.write_block((sequence - 1) * DATA_SIZE as u32, &packet.data)?;

        sequence += 1;
        serial.write_byte(ACK);
        header = serial.read_byte();
    }

    Ok((sequence - 1) * DATA_SIZE as u32)
}

/// Upload target for slots 1..=7: a boot table entry in external flash.
pub struct FlashEntryTarget<'a, F> {
    table: &'a mut BootTable<F>,
    slot: u8,
}

impl<'a, F: FlashDriver> FlashEntryTarget<'a, F> {
    pub fn new(table: &'a mut BootTable<F>, slot: u8) -> Self {
        Self { table, slot }
    }
}

impl<F: FlashDriver> UploadTarget for FlashEntryTarget<'_, F> {
    fn begin(&mut self) -> Result<(), BootTableError> {
        self.table.erase_entry(self.slot)
    }

    fn write_block(&mut self, offset: u32, block: &[u8; DATA_SIZE]) -> Result<(), BootTableError> {
        self.table.program_entry(self.slot, offset, block)
    }
}

/// Upload target for slot 0: the safe-mode image in EEPROM.
pub struct SafeModeTarget<'a, B> {
    eeprom: &'a mut Eeprom<B>,
}

impl<'a, B: MemoryBus> SafeModeTarget<'a, B> {
    pub fn new(eeprom: &'a mut Eeprom<B>) -> Self {
        Self { eeprom }
    }
}

impl<B: MemoryBus> UploadTarget for SafeModeTarget<'_, B> {
    fn begin(&mut self) -> Result<(), BootTableError> {
        // EEPROM cells are rewritable in place; nothing to erase.
        Ok(())
    }

    fn write_block(&mut self, offset: u32, block: &[u8; DATA_SIZE]) -> Result<(), BootTableError> {
        self.eeprom.write(offset, block);
        Ok(())
    }
}
