// SPDX-License-Identifier: MIT

//! Memory layout of the boot environment.
//!
//! The external NOR flash holds the boot table (seven 512 KiB program slots),
//! a redundant-bootloader-copy region, and a handful of single-byte records
//! (boot index, legacy boot counter, scratch areas). Where those records sit
//! depends on whether the fitted part is a top-boot or bottom-boot variant;
//! [`ChipVariant`] selects the offset table from the device ID probed at
//! init. All higher-level code refers to offsets through [`OffsetTable`] and
//! the entry helpers here, never by raw number.

// --- Boot table geometry ---

/// Number of program slots in the boot table. Slots are numbered 1..=7;
/// slot 0 is the safe-mode image in EEPROM.
pub const BOOT_TABLE_SIZE: u8 = 7;

/// Space reserved for one boot table entry.
pub const ENTRY_SIZE: u32 = 512 * 1024;

/// Erase unit of the external flash.
pub const FLASH_SECTOR_SIZE: u32 = 64 * 1024;

/// The first large sector is split into eight sub-sectors on both chip
/// variants and must be erased as eight operations.
pub const FLASH_SUBSECTOR_SIZE: u32 = 8 * 1024;

// Entry-relative metadata offsets.
pub const ENTRY_OFFSET_LENGTH: u32 = 0;
pub const ENTRY_OFFSET_CRC: u32 = 32;
pub const ENTRY_OFFSET_VALID: u32 = 64;
pub const ENTRY_OFFSET_DESCRIPTION: u32 = 128;
pub const ENTRY_OFFSET_PROGRAM: u32 = 1024;

/// Value of the valid flag marking an entry as bootable. Anything else,
/// including erased flash (0xFF), reads as "not valid".
pub const ENTRY_VALID: u8 = 0xAA;

/// Size of the entry description field, `\n`-terminated.
pub const DESCRIPTION_SIZE: usize = 64;

// --- Redundant bootloader copies ---

/// Number of identical bootloader images kept in external flash.
pub const BOOTLOADER_COPIES: u8 = 5;

/// Size of one bootloader copy.
pub const BOOTLOADER_COPY_SIZE: u32 = 32 * 1024;

// --- Internal MCU flash ---

/// Base of the application region in internal MCU flash.
pub const APPLICATION_BASE: u32 = 0x0008_0000;

/// Size of the application region.
pub const APPLICATION_SIZE: u32 = 512 * 1024;

/// Page size of internal MCU flash; the copy step programs one page at a
/// time.
pub const INT_FLASH_PAGE_SIZE: u32 = 4096;

/// Entry point handed off to when booting the application region.
pub const APPLICATION_ENTRY_POINT: u32 = APPLICATION_BASE;

/// Entry point of the safe-mode image (EEPROM mapped for code fetch).
pub const SAFE_MODE_ENTRY_POINT: u32 = 0x1200_0000;

// --- Boot settings (FRAM) ---

/// FRAM address of the boot settings block, identical on all three chips.
pub const SETTINGS_BASE: u32 = 0x0000;

/// Size of one settings copy.
pub const SETTINGS_SIZE: usize = 14;

pub const SETTINGS_OFFSET_MAGIC: u32 = 0;
pub const SETTINGS_OFFSET_BOOT_SLOTS: u32 = 4;
pub const SETTINGS_OFFSET_FAILSAFE_SLOTS: u32 = 5;
pub const SETTINGS_OFFSET_BOOT_COUNTER: u32 = 6;
pub const SETTINGS_OFFSET_LAST_CONFIRMED: u32 = 10;

/// Tag marking the settings block as initialized.
pub const SETTINGS_MAGIC: u32 = 0xB007_5E77;

/// Primary-slots sentinel: boot the safe-mode image from EEPROM.
pub const SAFE_MODE_MARK: u8 = 0b0100_0000;

/// Primary-slots sentinel: boot whatever is in the application region
/// without verification or reload.
pub const UPPER_MARK: u8 = 0b1000_0000;

/// Reset value of the boot retry budget.
pub const DEFAULT_BOOT_COUNTER: u32 = 3;

// --- Persisted parameters (RAM) ---

/// Fixed RAM address of the persisted-parameter block the bootloader fills
/// in immediately before handoff.
pub const BOOT_PARAMS_ADDR: u32 = 0x2001_FFE0;

// --- Chip variants ---

/// Offsets into external flash that differ between top-boot and bottom-boot
/// parts. All are relative to the boot table base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetTable {
    /// Base of boot table entry 1.
    pub entry_base: u32,
    /// Boot index byte.
    pub boot_index: u32,
    /// Legacy boot counter byte (the engine's budget lives in FRAM).
    pub boot_counter: u32,
    /// CRC workspace.
    pub crc_scratch: u32,
    /// Flash self-test scratch space.
    pub test_scratch: u32,
    /// Base of the redundant bootloader copies.
    pub copy_base: u32,
}

/// The small-sector region sits at the top of top-boot parts and at the
/// bottom of bottom-boot parts; the single-byte records live in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipVariant {
    TopBoot,
    BottomBoot,
}

const TOP_BOOT_OFFSETS: OffsetTable = OffsetTable {
    entry_base: 0x00_0000,
    boot_index: 0x3F_0000,
    boot_counter: 0x3F_2000,
    crc_scratch: 0x3F_4000,
    test_scratch: 0x3F_E000,
    copy_base: 0x38_0000,
};

const BOTTOM_BOOT_OFFSETS: OffsetTable = OffsetTable {
    entry_base: 0x08_0000,
    boot_index: 0x00_0000,
    boot_counter: 0x00_2000,
    crc_scratch: 0x00_4000,
    test_scratch: 0x00_E000,
    copy_base: 0x40_0000,
};

/// Device-ID tag of the top-boot part, after masking with
/// [`DEVICE_ID_MASK`].
pub const TOP_BOOT_DEVICE_ID: u32 = 0x0056_0000;

/// Device-ID tag of the bottom-boot part.
pub const BOTTOM_BOOT_DEVICE_ID: u32 = 0x0057_0000;

/// Only the model byte of the probed device ID is significant.
pub const DEVICE_ID_MASK: u32 = 0x00FF_0000;

impl ChipVariant {
    /// Select the variant from the device ID probed at driver init.
    /// Unknown parts are treated as bottom-boot.
    pub fn from_device_id(device_id: u32) -> Self {
        if device_id & DEVICE_ID_MASK == TOP_BOOT_DEVICE_ID {
            ChipVariant::TopBoot
        } else {
            ChipVariant::BottomBoot
        }
    }

    pub const fn offsets(self) -> &'static OffsetTable {
        match self {
            ChipVariant::TopBoot => &TOP_BOOT_OFFSETS,
            ChipVariant::BottomBoot => &BOTTOM_BOOT_OFFSETS,
        }
    }
}

impl OffsetTable {
    /// Offset of the entry for `slot` (1..=[`BOOT_TABLE_SIZE`]).
    pub const fn entry_offset(&self, slot: u8) -> u32 {
        self.entry_base + ENTRY_SIZE * (slot as u32 - 1)
    }

    /// Offset of the bootloader copy `index` (0..[`BOOTLOADER_COPIES`]).
    pub const fn copy_offset(&self, index: u8) -> u32 {
        self.copy_base + BOOTLOADER_COPY_SIZE * index as u32
    }
}

// Seven 512 KiB entries plus the copy region must fit without colliding
// with the small-sector records.
const _: () = assert!(ENTRY_SIZE % FLASH_SECTOR_SIZE == 0);
const _: () = assert!(FLASH_SECTOR_SIZE == 8 * FLASH_SUBSECTOR_SIZE);
const _: () = assert!(
    TOP_BOOT_OFFSETS.entry_base + ENTRY_SIZE * BOOT_TABLE_SIZE as u32 <= TOP_BOOT_OFFSETS.copy_base
);
const _: () = assert!(
    TOP_BOOT_OFFSETS.copy_base + BOOTLOADER_COPY_SIZE * BOOTLOADER_COPIES as u32
        <= TOP_BOOT_OFFSETS.boot_index
);
