// SPDX-License-Identifier: MIT

//! Typed view over the boot table in external NOR flash.
//!
//! Seven 512 KiB slots, each holding a program image plus its metadata
//! (length, CRC, valid flag, description), a region of redundant bootloader
//! copies, and the boot index byte. The metadata write order on upload is
//! length, CRC, description and finally the valid flag, so a crash at any
//! point leaves the slot readable as "not valid" rather than "valid with a
//! wrong CRC".

use heapless::Vec;

use crate::crc::Crc16;
use crate::flash::{erase_region, FlashDriver, FlashStatus};
use crate::layout::{
    ChipVariant, OffsetTable, BOOTLOADER_COPIES, BOOTLOADER_COPY_SIZE, BOOT_TABLE_SIZE,
    DESCRIPTION_SIZE, ENTRY_OFFSET_CRC, ENTRY_OFFSET_DESCRIPTION, ENTRY_OFFSET_LENGTH,
    ENTRY_OFFSET_PROGRAM, ENTRY_OFFSET_VALID, ENTRY_SIZE, ENTRY_VALID,
};

/// Program bytes one slot can hold.
pub const ENTRY_CAPACITY: u32 = ENTRY_SIZE - ENTRY_OFFSET_PROGRAM;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootTableError {
    /// Slot outside 1..=7.
    InvalidSlot,
    /// Bootloader copy index outside the copy region.
    InvalidCopy,
    /// Program image larger than a slot.
    ProgramTooLong,
    Flash(FlashStatus),
}

impl From<FlashStatus> for BootTableError {
    fn from(status: FlashStatus) -> Self {
        BootTableError::Flash(status)
    }
}

/// The boot table over a flash driver. Offsets are picked from the chip
/// variant at construction.
pub struct BootTable<F> {
    flash: F,
    variant: ChipVariant,
}

impl<F: FlashDriver> BootTable<F> {
    /// Probe the device and bind the matching offset table.
    pub fn new(mut flash: F) -> Self {
        flash.wait_idle(0);
        let variant = ChipVariant::from_device_id(flash.device_id());
        Self { flash, variant }
    }

    pub fn variant(&self) -> ChipVariant {
        self.variant
    }

    fn offsets(&self) -> &'static OffsetTable {
        self.variant.offsets()
    }

    /// View of the entry for `slot` (1..=7).
    pub fn entry(&self, slot: u8) -> Result<Entry<'_, F>, BootTableError> {
        if slot == 0 || slot > BOOT_TABLE_SIZE {
            return Err(BootTableError::InvalidSlot);
        }
        Ok(Entry { table: self, slot })
    }

    /// View of bootloader copy `index` (0..5).
    pub fn bootloader_copy(&self, index: u8) -> Result<BootloaderCopy<'_, F>, BootTableError> {
        if index >= BOOTLOADER_COPIES {
            return Err(BootTableError::InvalidCopy);
        }
        Ok(BootloaderCopy { table: self, index })
    }

    /// Boot index byte: 0 requests safe mode, 1..=7 a table slot.
    pub fn boot_index(&self) -> u8 {
        self.flash.read_byte(self.offsets().boot_index)
    }

    pub fn set_boot_index(&mut self, index: u8) -> Result<(), BootTableError> {
        let offset = self.offsets().boot_index;
        self.flash.erase_sector(offset).ok()?;
        self.flash.program_byte(offset, index).ok()?;
        Ok(())
    }

    /// Erase the whole region of `slot`.
    pub fn erase_entry(&mut self, slot: u8) -> Result<(), BootTableError> {
        if slot == 0 || slot > BOOT_TABLE_SIZE {
            return Err(BootTableError::InvalidSlot);
        }
        let base = self.offsets().entry_offset(slot);
        erase_region(&mut self.flash, base, ENTRY_SIZE).ok()?;
        Ok(())
    }

    /// Program image bytes at `offset` into the program area of `slot`.
    /// The region must have been erased first.
    pub fn program_entry(&mut self, slot: u8, offset: u32, data: &[u8]) -> Result<(), BootTableError> {
        if slot == 0 || slot > BOOT_TABLE_SIZE {
            return Err(BootTableError::InvalidSlot);
        }
        if offset + data.len() as u32 > ENTRY_CAPACITY {
            return Err(BootTableError::ProgramTooLong);
        }
        let base = self.offsets().entry_offset(slot) + ENTRY_OFFSET_PROGRAM;
        self.flash.program(base + offset, data).ok()?;
        Ok(())
    }

    /// Write entry metadata after the program bytes are in place, in the
    /// crash-safe order: length, CRC, description, valid flag. The CRC is
    /// computed from what the flash actually holds. Returns the stored CRC.
    pub fn finalize_entry(
        &mut self,
        slot: u8,
        length: u32,
        description: &[u8],
    ) -> Result<u16, BootTableError> {
        let crc = self.entry(slot)?.crc_over(length);
        let base = self.offsets().entry_offset(slot);

        self.flash
            .program(base + ENTRY_OFFSET_LENGTH, &length.to_le_bytes())
            .ok()?;
        self.flash
            .program(base + ENTRY_OFFSET_CRC, &crc.to_le_bytes())
            .ok()?;
        self.program_description(slot, description)?;
        self.flash
            .program_byte(base + ENTRY_OFFSET_VALID, ENTRY_VALID)
            .ok()?;

        Ok(crc)
    }

    /// Erase the slot, stream a whole program image in and publish its
    /// metadata.
    pub fn write_entry(
        &mut self,
        slot: u8,
        program: &[u8],
        description: &[u8],
    ) -> Result<u16, BootTableError> {
        if program.len() as u32 > ENTRY_CAPACITY {
            return Err(BootTableError::ProgramTooLong);
        }
        self.erase_entry(slot)?;
        self.program_entry(slot, 0, program)?;
        self.finalize_entry(slot, program.len() as u32, description)
    }

    /// Program the description field, up to and including the terminating
    /// `\n`, at most [`DESCRIPTION_SIZE`] bytes.
    fn program_description(&mut self, slot: u8, description: &[u8]) -> Result<(), BootTableError> {
        let base = self.offsets().entry_offset(slot) + ENTRY_OFFSET_DESCRIPTION;

        for (i, &byte) in description.iter().take(DESCRIPTION_SIZE).enumerate() {
            self.flash.program_byte(base + i as u32, byte).ok()?;
            if byte == b'\n' {
                break;
            }
        }

        Ok(())
    }

    /// Refresh every redundant bootloader copy from `image`: erase the copy
    /// region, then program the image into each copy slot.
    pub fn write_bootloader_copies(&mut self, image: &[u8]) -> Result<(), BootTableError> {
        if image.len() as u32 > BOOTLOADER_COPY_SIZE {
            return Err(BootTableError::ProgramTooLong);
        }

        let offsets = self.offsets();
        let region = BOOTLOADER_COPY_SIZE * BOOTLOADER_COPIES as u32;
        erase_region(&mut self.flash, offsets.copy_base, region).ok()?;

        for index in 0..BOOTLOADER_COPIES {
            let base = offsets.copy_offset(index);
            self.flash.program(base, image).ok()?;
        }

        Ok(())
    }

    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }
}

/// Read-only view of one boot table entry.
pub struct Entry<'a, F> {
    table: &'a BootTable<F>,
    slot: u8,
}

impl<F: FlashDriver> Entry<'_, F> {
    pub fn slot(&self) -> u8 {
        self.slot
    }

    fn base(&self) -> u32 {
        self.table.offsets().entry_offset(self.slot)
    }

    /// Absolute flash offset of the program bytes.
    pub fn program_base(&self) -> u32 {
        self.base() + ENTRY_OFFSET_PROGRAM
    }

    pub fn is_valid(&self) -> bool {
        self.table.flash.read_byte(self.base() + ENTRY_OFFSET_VALID) == ENTRY_VALID
    }

    pub fn length(&self) -> u32 {
        let mut raw = [0u8; 4];
        self.table.flash.read(self.base() + ENTRY_OFFSET_LENGTH, &mut raw);
        u32::from_le_bytes(raw)
    }

    /// CRC recorded in the metadata.
    pub fn crc(&self) -> u16 {
        let mut raw = [0u8; 2];
        self.table.flash.read(self.base() + ENTRY_OFFSET_CRC, &mut raw);
        u16::from_le_bytes(raw)
    }

    /// Description up to the terminating `\n` (exclusive).
    pub fn description(&self) -> Vec<u8, DESCRIPTION_SIZE> {
        let mut out = Vec::new();
        let base = self.base() + ENTRY_OFFSET_DESCRIPTION;

        for i in 0..DESCRIPTION_SIZE as u32 {
            let byte = self.table.flash.read_byte(base + i);
            if byte == b'\n' || byte == 0xFF {
                break;
            }
            let _ = out.push(byte);
        }

        out
    }

    /// CRC over the first `length()` program bytes as the flash holds them.
    /// This, not the valid flag, is the authority at boot time.
    pub fn calculate_crc(&self) -> u16 {
        self.crc_over(self.length())
    }

    fn crc_over(&self, length: u32) -> u16 {
        // An erased length field reads 0xFFFF_FFFF; never walk past the slot.
        let length = length.min(ENTRY_CAPACITY);
        let base = self.program_base();

        let mut crc = Crc16::new();
        for i in 0..length {
            crc.update(self.table.flash.read_byte(base + i));
        }
        crc.finish()
    }
}

/// Read-only view of one redundant bootloader copy.
pub struct BootloaderCopy<'a, F> {
    table: &'a BootTable<F>,
    index: u8,
}

impl<F: FlashDriver> BootloaderCopy<'_, F> {
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn base(&self) -> u32 {
        self.table.offsets().copy_offset(self.index)
    }

    /// CRC over the whole copy region.
    pub fn calculate_crc(&self) -> u16 {
        let base = self.base();
        let mut crc = Crc16::new();
        for i in 0..BOOTLOADER_COPY_SIZE {
            crc.update(self.table.flash.read_byte(base + i));
        }
        crc.finish()
    }
}
