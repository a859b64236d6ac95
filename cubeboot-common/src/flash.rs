// SPDX-License-Identifier: MIT

//! External NOR flash capability.
//!
//! The low-level command sequences (erase-sector, program-byte, status-poll)
//! belong to the board support layer; the boot table only needs the
//! operations of [`FlashDriver`]. Program semantics follow NOR rules: bits
//! can only be cleared, so every write path erases first, and a multi-byte
//! program stops at the first failing byte.

use crate::layout::{FLASH_SECTOR_SIZE, FLASH_SUBSECTOR_SIZE};

/// Outcome of a flash program or erase operation.
///
/// `Busy` means the device never reported ready; device-specific error codes
/// are surfaced as opaque values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashStatus {
    NotBusy,
    Busy,
    Error(u16),
}

impl FlashStatus {
    pub fn is_ok(self) -> bool {
        self == FlashStatus::NotBusy
    }

    /// Fold a status into a `Result` for `?`-propagation.
    pub fn ok(self) -> Result<(), FlashStatus> {
        match self {
            FlashStatus::NotBusy => Ok(()),
            other => Err(other),
        }
    }
}

/// Byte-granular view of the external NOR flash.
pub trait FlashDriver {
    /// Device ID probed at init; selects the chip-variant offset table.
    fn device_id(&self) -> u32;

    /// Boot-config word of the part (top-boot vs. bottom-boot strapping).
    fn boot_config(&self) -> u32;

    fn read_byte(&self, offset: u32) -> u8;

    fn read(&self, offset: u32, buf: &mut [u8]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.read_byte(offset + i as u32);
        }
    }

    /// Erase the sector containing `offset`.
    fn erase_sector(&mut self, offset: u32) -> FlashStatus;

    fn program_byte(&mut self, offset: u32, value: u8) -> FlashStatus;

    /// Program a span, stopping at the first failing byte.
    fn program(&mut self, offset: u32, data: &[u8]) -> FlashStatus {
        for (i, &byte) in data.iter().enumerate() {
            let status = self.program_byte(offset + i as u32, byte);
            if !status.is_ok() {
                return status;
            }
        }
        FlashStatus::NotBusy
    }

    /// Poll device status until not-busy. Returns false on a fatal device
    /// error.
    fn wait_idle(&mut self, offset: u32) -> bool;
}

impl<F: FlashDriver + ?Sized> FlashDriver for &mut F {
    fn device_id(&self) -> u32 {
        (**self).device_id()
    }

    fn boot_config(&self) -> u32 {
        (**self).boot_config()
    }

    fn read_byte(&self, offset: u32) -> u8 {
        (**self).read_byte(offset)
    }

    fn erase_sector(&mut self, offset: u32) -> FlashStatus {
        (**self).erase_sector(offset)
    }

    fn program_byte(&mut self, offset: u32, value: u8) -> FlashStatus {
        (**self).program_byte(offset, value)
    }

    fn wait_idle(&mut self, offset: u32) -> bool {
        (**self).wait_idle(offset)
    }
}

/// Erase every sector overlapping `[base, base + len)`.
///
/// The first large sector of the device is split into eight sub-sectors and
/// must be erased as eight operations; this helper hides that quirk from the
/// boot table.
pub fn erase_region<F: FlashDriver>(flash: &mut F, base: u32, len: u32) -> FlashStatus {
    let mut offset = base;
    let end = base + len;

    while offset < end {
        if offset < FLASH_SECTOR_SIZE {
            let status = flash.erase_sector(offset);
            if !status.is_ok() {
                return status;
            }
            offset += FLASH_SUBSECTOR_SIZE;
        } else {
            let status = flash.erase_sector(offset);
            if !status.is_ok() {
                return status;
            }
            offset += FLASH_SECTOR_SIZE;
        }
    }

    FlashStatus::NotBusy
}

/// Advisory lock around a flash driver.
///
/// Before handoff the bootloader is the only user and every acquisition
/// succeeds immediately; the running application shares the same driver
/// between tasks and takes the lock for real. Higher layers acquire a view
/// before touching the device so the call sites are already correct for the
/// application phase.
pub struct SharedFlash<F> {
    driver: F,
}

impl<F: FlashDriver> SharedFlash<F> {
    pub fn new(driver: F) -> Self {
        Self { driver }
    }

    /// Try to acquire the driver within `_timeout_ms`. Single-threaded
    /// boot-time use never contends, so acquisition always succeeds; the
    /// guard unlocks on drop.
    pub fn try_lock(&mut self, _timeout_ms: u32) -> Option<FlashGuard<'_, F>> {
        Some(FlashGuard { driver: &mut self.driver })
    }
}

/// Exclusive view of the flash driver; dropping it releases the lock.
pub struct FlashGuard<'a, F> {
    driver: &'a mut F,
}

impl<F: FlashDriver> core::ops::Deref for FlashGuard<'_, F> {
    type Target = F;

    fn deref(&self) -> &F {
        self.driver
    }
}

impl<F: FlashDriver> core::ops::DerefMut for FlashGuard<'_, F> {
    fn deref_mut(&mut self) -> &mut F {
        self.driver
    }
}
