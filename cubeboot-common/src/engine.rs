// SPDX-License-Identifier: MIT

//! Boot decision engine.
//!
//! The state machine that runs after every reset: validate the FRAM
//! settings, burn one retry, verify the application region against the
//! chosen slot's CRC, silently reload the image from external flash on
//! mismatch, and fall back to safe mode when the primary path cannot be
//! served. The terminal step — writing the persisted parameters and handing
//! off — is split out into [`BootOutcome::into_request`] so the whole
//! decision path runs on the host in tests.

use defmt_or_log::{error, info, warn};

use crate::boot_table::{BootTable, ENTRY_CAPACITY};
use crate::crc::Crc16;
use crate::flash::{FlashDriver, FlashStatus};
use crate::fram::FramChip;
use crate::layout::{
    APPLICATION_ENTRY_POINT, BOOT_TABLE_SIZE, INT_FLASH_PAGE_SIZE, SAFE_MODE_ENTRY_POINT,
};
use crate::params::{BootReason, PersistedParameters};
use crate::settings::{BootSettings, SlotSelection};

/// Internal MCU flash application region.
///
/// The engine is the only writer of this region, and only ever after the
/// source entry's CRC has been verified in external flash.
pub trait ApplicationFlash {
    /// Erase the whole region.
    fn erase(&mut self) -> Result<(), FlashStatus>;

    /// Program one page-aligned span. The region must be erased.
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashStatus>;

    fn read_byte(&self, offset: u32) -> u8;
}

/// Result of one attempt to load a boot table entry into the application
/// region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DownloadResult {
    Successful,
    /// Chosen slot is 0 or beyond the table.
    IndexNotValid,
    /// Slot's valid byte is not 0xAA.
    EntryNotValid,
    /// Slot is marked valid but its program bytes no longer match the
    /// recorded CRC.
    EntryCrcMismatch,
    /// The copy landed, but the CRC over the internal copy still differs.
    DownloadCrcMismatch,
    /// Flash driver fault along the way.
    DeviceError,
}

/// Where the machine ended up and why; everything needed for the terminal
/// write-params-and-jump step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootOutcome {
    pub base_address: u32,
    pub reason: BootReason,
    pub index: u8,
}

impl BootOutcome {
    pub fn safe_mode(reason: BootReason) -> Self {
        Self {
            base_address: SAFE_MODE_ENTRY_POINT,
            reason,
            index: 0,
        }
    }

    pub fn application(reason: BootReason, index: u8) -> Self {
        Self {
            base_address: APPLICATION_ENTRY_POINT,
            reason,
            index,
        }
    }

    /// Parameter block to persist immediately before the jump.
    pub fn into_request(self) -> (u32, PersistedParameters) {
        (
            self.base_address,
            PersistedParameters::new(self.reason, self.index),
        )
    }
}

/// The engine borrows the three stores for the duration of one decision.
pub struct BootDecisionEngine<'a, F, R, A> {
    table: &'a mut BootTable<F>,
    settings: &'a mut BootSettings<R>,
    app: &'a mut A,
}

impl<'a, F, R, A> BootDecisionEngine<'a, F, R, A>
where
    F: FlashDriver,
    R: FramChip,
    A: ApplicationFlash,
{
    pub fn new(
        table: &'a mut BootTable<F>,
        settings: &'a mut BootSettings<R>,
        app: &'a mut A,
    ) -> Self {
        Self {
            table,
            settings,
            app,
        }
    }

    /// Run the state machine up to (but not including) the handoff.
    pub fn decide(&mut self) -> BootOutcome {
        let snapshot = match self.settings.snapshot() {
            Ok(snapshot) => snapshot,
            Err(_) => {
                // Three-of-three disagreement: the settings cannot be
                // trusted at all.
                error!("boot settings unreadable, booting safe mode");
                return self.enter_safe_mode(BootReason::InvalidBootIndex);
            }
        };

        if !snapshot.magic_valid() {
            error!("boot settings not tagged with magic number, booting safe mode");
            return self.enter_safe_mode(BootReason::InvalidBootIndex);
        }

        match SlotSelection::decode(snapshot.boot_slots) {
            SlotSelection::SafeMode => {
                info!("primary slots set to safe mode");
                return self.enter_safe_mode(BootReason::SelectedIndex);
            }
            SlotSelection::Upper => {
                // Field-debug escape hatch: boot whatever is in the
                // application region, no verification, no reload.
                info!("primary slots set to upper, booting application as-is");
                return BootOutcome::application(BootReason::SelectedIndex, self.table.boot_index());
            }
            SlotSelection::Invalid => {
                error!("primary slot mask malformed, booting safe mode");
                return self.enter_safe_mode(BootReason::InvalidBootIndex);
            }
            SlotSelection::Slots(_) => {}
        }

        let index = self.table.boot_index();

        if !verify_boot_index(index) {
            error!("invalid boot index, booting safe mode");
            return self.enter_safe_mode(BootReason::InvalidBootIndex);
        }

        if snapshot.boot_counter == 0 {
            error!("boot counter expired, booting safe mode");
            return self.enter_safe_mode(BootReason::CounterExpired);
        }

        if self.settings.dec_boot_counter().is_err() {
            // The budget byte could not be burned; boot anyway, the next
            // settings write repairs the block.
            warn!("boot counter decrement failed");
        }

        self.load_application(index)
    }

    /// Verify the application region against the entry for `index`, reload
    /// it from external flash when it differs.
    pub fn load_application(&mut self, index: u8) -> BootOutcome {
        if self.application_crc_matches(index) {
            info!("booting application, slot {}", index);
            return BootOutcome::application(BootReason::SelectedIndex, index);
        }

        // A mismatch here is not an error; the copy in internal flash is
        // simply stale or damaged. Reload it from the boot table.
        match self.download_entry(index) {
            DownloadResult::Successful => {
                info!("slot {} reloaded, booting application", index);
                BootOutcome::application(BootReason::SelectedIndex, index)
            }
            _ => {
                error!("unable to load application, booting safe mode");
                self.enter_safe_mode(BootReason::DownloadError)
            }
        }
    }

    /// Copy the entry at `index` into the application region: erase, stream
    /// page-sized blocks, verify the copy. Mirrors the recovery path of the
    /// boot ROM.
    pub fn download_entry(&mut self, index: u8) -> DownloadResult {
        let Ok(entry) = self.table.entry(index) else {
            return DownloadResult::IndexNotValid;
        };

        if !entry.is_valid() {
            return DownloadResult::EntryNotValid;
        }

        if entry.calculate_crc() != entry.crc() {
            return DownloadResult::EntryCrcMismatch;
        }

        let length = entry.length().min(ENTRY_CAPACITY);
        let program_base = entry.program_base();

        if self.app.erase().is_err() {
            return DownloadResult::DeviceError;
        }

        let mut offset = 0u32;
        let mut page = [0u8; INT_FLASH_PAGE_SIZE as usize];

        while offset < length {
            let chunk = (length - offset).min(INT_FLASH_PAGE_SIZE) as usize;
            self.table
                .flash()
                .read(program_base + offset, &mut page[..chunk]);

            if self.app.program(offset, &page[..chunk]).is_err() {
                return DownloadResult::DeviceError;
            }

            offset += chunk as u32;
        }

        if self.application_crc_matches(index) {
            DownloadResult::Successful
        } else {
            DownloadResult::DownloadCrcMismatch
        }
    }

    fn application_crc_matches(&self, index: u8) -> bool {
        let entry = match self.table.entry(index) {
            Ok(entry) => entry,
            Err(_) => return false,
        };

        if !entry.is_valid() {
            return false;
        }

        let length = entry.length().min(ENTRY_CAPACITY);
        let mut crc = Crc16::new();
        for offset in 0..length {
            crc.update(self.app.read_byte(offset));
        }

        crc.finish() == entry.crc()
    }

    /// Terminal fallback: record safe mode on disk and aim at the safe-mode
    /// entry point.
    fn enter_safe_mode(&mut self, reason: BootReason) -> BootOutcome {
        if self.table.set_boot_index(0).is_err() {
            warn!("could not persist safe-mode boot index");
        }
        BootOutcome::safe_mode(reason)
    }
}

/// A bootable index is 1..=7; 0 is the safe-mode sentinel and anything
/// larger is off the table.
pub fn verify_boot_index(index: u8) -> bool {
    index > 0 && index <= BOOT_TABLE_SIZE
}
