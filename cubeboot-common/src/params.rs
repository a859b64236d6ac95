// SPDX-License-Identifier: MIT

//! Persisted-parameter channel between bootloader and application.
//!
//! A small block at a fixed RAM address, written exactly once immediately
//! before handoff and read exactly once by the application early in its own
//! init. Process-wide mutable state by construction; there is no concurrent
//! access because the writer has already ceased to exist when the reader
//! runs.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Magic asserted in the block when the bootloader transfers control.
pub const BOOTLOADER_MARK: u32 = 0xB007_10AD;

/// Why this boot path was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BootReason {
    /// The selected slot booted (or was deliberately safe mode / upper).
    SelectedIndex = 0,
    /// Settings magic missing or boot index out of range.
    InvalidBootIndex = 1,
    /// Retry budget exhausted.
    CounterExpired = 2,
    /// Reload from external flash failed.
    DownloadError = 3,
}

/// Runlevel requested from the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Runlevel {
    Runlevel1 = 1,
    Runlevel2 = 2,
    Runlevel3 = 3,
}

impl Default for Runlevel {
    fn default() -> Self {
        Runlevel::Runlevel3
    }
}

/// The parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PersistedParameters {
    pub magic_number: u32,
    pub boot_reason: BootReason,
    pub boot_index: u8,
    pub requested_runlevel: Runlevel,
    pub clear_state_on_startup: bool,
}

/// Size of the packed block in RAM.
pub const PARAMS_SIZE: usize = 8;

impl PersistedParameters {
    pub fn new(boot_reason: BootReason, boot_index: u8) -> Self {
        Self {
            magic_number: BOOTLOADER_MARK,
            boot_reason,
            boot_index,
            requested_runlevel: Runlevel::default(),
            clear_state_on_startup: false,
        }
    }

    pub fn to_bytes(&self) -> [u8; PARAMS_SIZE] {
        let magic = self.magic_number.to_le_bytes();
        [
            magic[0],
            magic[1],
            magic[2],
            magic[3],
            self.boot_reason.into(),
            self.boot_index,
            self.requested_runlevel.into(),
            self.clear_state_on_startup as u8,
        ]
    }

    /// Decode a block, rejecting a missing magic or unknown enum values.
    pub fn from_bytes(raw: &[u8; PARAMS_SIZE]) -> Option<Self> {
        let magic_number = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if magic_number != BOOTLOADER_MARK {
            return None;
        }

        Some(Self {
            magic_number,
            boot_reason: BootReason::try_from(raw[4]).ok()?,
            boot_index: raw[5],
            requested_runlevel: Runlevel::try_from(raw[6]).ok()?,
            clear_state_on_startup: raw[7] != 0,
        })
    }

    /// Store the block at its fixed RAM address.
    ///
    /// # Safety
    /// `address` must point to writable RAM of at least [`PARAMS_SIZE`]
    /// bytes that nothing else is using.
    #[cfg(feature = "embedded")]
    pub unsafe fn store(&self, address: u32) {
        let bytes = self.to_bytes();
        let ptr = address as *mut u8;
        for (i, &byte) in bytes.iter().enumerate() {
            ptr.add(i).write_volatile(byte);
        }
    }

    /// Load the block from its fixed RAM address; the application side of
    /// the channel.
    ///
    /// # Safety
    /// `address` must point to readable RAM of at least [`PARAMS_SIZE`]
    /// bytes.
    #[cfg(feature = "embedded")]
    pub unsafe fn load(address: u32) -> Option<Self> {
        let ptr = address as *const u8;
        let mut raw = [0u8; PARAMS_SIZE];
        for (i, slot) in raw.iter_mut().enumerate() {
            *slot = ptr.add(i).read_volatile();
        }
        Self::from_bytes(&raw)
    }
}
