// SPDX-License-Identifier: MIT

//! Operator command shell on the debug serial line.
//!
//! Single ASCII characters dispatch to the operations below; the shell is
//! the external stimulus that drives the engines and doubles as the test
//! harness interface. Terminal commands (`b`, `B`, `u`, `r`) do not jump by
//! themselves — they hand a [`ShellAction`] back to the platform loop, which
//! owns the persisted-parameter write and the handoff.

use core::fmt::{self, Write as _};

use heapless::Vec;

use crate::boot_table::BootTable;
use crate::eeprom::{Eeprom, MemoryBus};
use crate::engine::{ApplicationFlash, BootDecisionEngine, BootOutcome, verify_boot_index};
use crate::flash::FlashDriver;
use crate::fram::FramChip;
use crate::layout::{
    BOOTLOADER_COPIES, BOOT_TABLE_SIZE, DESCRIPTION_SIZE, SAFE_MODE_MARK, UPPER_MARK,
};
use crate::params::BootReason;
use crate::settings::{BootSettings, SlotSelection};
use crate::xmodem::{self, FlashEntryTarget, SafeModeTarget, SerialLink};

/// What the platform loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ShellAction {
    /// Keep reading commands.
    Continue,
    /// Write persisted parameters and hand off.
    Boot(BootOutcome),
    /// Request a hardware reset.
    Reset,
}

/// Command table used by the help listing.
pub const COMMANDS: &[(u8, &str)] = &[
    (b'b', "Continue booting"),
    (b'B', "Select slot and boot"),
    (b'u', "Boot to upper half"),
    (b'x', "Upload application"),
    (b'z', "Upload safe mode"),
    (b'e', "Erase boot table entry"),
    (b'l', "Print boot table"),
    (b's', "Set boot slots"),
    (b'C', "Current boot settings"),
    (b'c', "Check boot environment"),
    (b'r', "Restart"),
    (b'?', "Print help"),
];

/// Polls granted to the stay-in-bootloader prompt before booting anyway.
pub const STAY_POLL_BUDGET: u32 = 5_000_000;

/// Emit `&` and wait for an operator `S`; answer `O` and stay in the shell
/// when it arrives, proceed with booting otherwise.
pub fn stay_in_bootloader<S: SerialLink>(serial: &mut S) -> bool {
    serial.write_byte(b'&');

    for _ in 0..STAY_POLL_BUDGET {
        if let Some(byte) = serial.poll_byte() {
            if byte == b'S' {
                serial.write_byte(b'O');
                return true;
            }
        }
    }

    false
}

/// The shell borrows every store for the duration of a session.
pub struct Shell<'a, S, F, R, A, B> {
    serial: &'a mut S,
    table: &'a mut BootTable<F>,
    settings: &'a mut BootSettings<R>,
    app: &'a mut A,
    eeprom: &'a mut Eeprom<B>,
}

impl<'a, S, F, R, A, B> Shell<'a, S, F, R, A, B>
where
    S: SerialLink,
    F: FlashDriver,
    R: FramChip,
    A: ApplicationFlash,
    B: MemoryBus,
{
    pub fn new(
        serial: &'a mut S,
        table: &'a mut BootTable<F>,
        settings: &'a mut BootSettings<R>,
        app: &'a mut A,
        eeprom: &'a mut Eeprom<B>,
    ) -> Self {
        Self {
            serial,
            table,
            settings,
            app,
            eeprom,
        }
    }

    /// Read and run commands until one asks the platform to act.
    pub fn run(&mut self) -> ShellAction {
        loop {
            let command = self.serial.read_byte();
            let action = self.dispatch(command);

            if command != 0 {
                self.serial.write_byte(b'#');
            }

            if action != ShellAction::Continue {
                return action;
            }
        }
    }

    /// Run one command.
    pub fn dispatch(&mut self, command: u8) -> ShellAction {
        match command {
            b'b' => self.proceed_with_booting(),
            b'B' => self.boot_to_selected(),
            b'u' => self.boot_upper(),
            b'x' => {
                self.upload_application();
                ShellAction::Continue
            }
            b'z' => {
                self.upload_safe_mode();
                ShellAction::Continue
            }
            b'e' => {
                self.erase_entry();
                ShellAction::Continue
            }
            b'l' => {
                self.print_boot_table();
                ShellAction::Continue
            }
            b's' => {
                self.set_boot_slots();
                ShellAction::Continue
            }
            b'C' => {
                self.show_boot_settings();
                ShellAction::Continue
            }
            b'c' => {
                self.check();
                ShellAction::Continue
            }
            b'r' => ShellAction::Reset,
            b'?' => {
                self.print_help();
                ShellAction::Continue
            }
            _ => ShellAction::Continue,
        }
    }

    fn proceed_with_booting(&mut self) -> ShellAction {
        self.puts("\nTimeout exceeded - booting");

        let mut engine = BootDecisionEngine::new(self.table, self.settings, self.app);
        ShellAction::Boot(engine.decide())
    }

    fn boot_to_selected(&mut self) -> ShellAction {
        let Some(slot) = self.read_slot_digit() else {
            return ShellAction::Continue;
        };

        if slot == 0 {
            return ShellAction::Boot(BootOutcome::safe_mode(BootReason::SelectedIndex));
        }

        let _ = write!(self.out(), "\nBooting slot: {}", slot);

        let mut engine = BootDecisionEngine::new(self.table, self.settings, self.app);
        ShellAction::Boot(engine.load_application(slot))
    }

    fn boot_upper(&mut self) -> ShellAction {
        self.puts("\n\nBooting to upper half");
        let index = self.table.boot_index();
        ShellAction::Boot(BootOutcome::application(BootReason::SelectedIndex, index))
    }

    fn upload_application(&mut self) {
        self.puts("\n\nBoot Slot: ");

        let Some(slot) = self.read_slot_digit() else {
            return;
        };

        if slot == 0 {
            self.puts("\nError: Cant override safe mode program!");
            return;
        }

        self.puts("\nUpload Binary: ");

        let mut target = FlashEntryTarget::new(self.table, slot);
        let length = match xmodem::receive(self.serial, &mut target) {
            Ok(length) => length,
            Err(_) => {
                self.puts("\nUpload failed!");
                return;
            }
        };

        self.puts("\nBoot Description: ");
        let description = self.read_description();

        if self
            .table
            .finalize_entry(slot, length, &description)
            .is_err()
        {
            self.puts("\nError: Failed to publish entry!");
            return;
        }

        let _ = self.table.set_boot_index(slot);
        let _ = self.settings.reset_boot_counter();

        self.puts("...Done!");
    }

    fn upload_safe_mode(&mut self) {
        self.puts("\nUpload Safe Mode: ");

        let mut target = SafeModeTarget::new(self.eeprom);
        if xmodem::receive(self.serial, &mut target).is_err() {
            self.puts("\nUpload failed!");
            return;
        }

        let _ = self.table.set_boot_index(0);
        let _ = self.settings.reset_boot_counter();

        self.puts("...Done!");
    }

    fn erase_entry(&mut self) {
        self.puts("\nErase Slot: ");

        let Some(slot) = self.read_slot_digit() else {
            return;
        };

        if slot == 0 {
            self.puts("\nError: Cant erase safe mode program!");
            return;
        }

        self.puts("\nErasing....");
        match self.table.erase_entry(slot) {
            Ok(()) => self.puts("Done"),
            Err(_) => self.puts("Failed!"),
        }
    }

    fn print_boot_table(&mut self) {
        self.puts("\n\nBoot Table Entries:\n");

        for slot in 1..=BOOT_TABLE_SIZE {
            let _ = write!(self.out(), "\n{}. ", slot);

            // Slot number is in range by construction; pull the metadata out
            // before printing so the table borrow ends.
            let (valid, crc, length, description) = {
                let entry = self.table.entry(slot).unwrap();
                (
                    entry.is_valid(),
                    entry.crc(),
                    entry.length(),
                    entry.description(),
                )
            };

            if !valid {
                self.puts("Not Valid!");
                continue;
            }

            for &byte in description.iter() {
                self.serial.write_byte(byte);
            }
            let _ = write!(self.out(), " (CRC: {:04X} Size: {} bytes)", crc, length);
        }

        self.puts("\n");
    }

    /// The `s` flow: `m` marks safe mode, `u` marks upper, anything else
    /// starts the three-primary-three-failsafe selection ritual.
    fn set_boot_slots(&mut self) {
        self.puts("\n\nNew Boot slots (Primary):\n");

        let first = self.serial.read_byte();
        self.serial.write_byte(first);

        match first {
            b'm' => {
                let _ = self.settings.set_boot_slots(SAFE_MODE_MARK);
                let _ = self.settings.mark_as_valid();
                self.puts("\nPrimary boot slot set to safe-mode\n");
                return;
            }
            b'u' => {
                let _ = self.settings.set_boot_slots(UPPER_MARK);
                let _ = self.settings.mark_as_valid();
                self.puts("\nPrimary boot slot set to upper\n");
                return;
            }
            _ => {}
        }

        let Some(primary) = self.read_boot_slots(Some(first)) else {
            return;
        };

        self.puts("\n\nNew Boot slots (failsafe):\n");

        let Some(failsafe) = self.read_boot_slots(None) else {
            return;
        };

        if self.settings.mark_as_valid().is_err() {
            self.puts("Failed to mark settings valid\n");
            return;
        }

        if self.settings.set_boot_slots(primary).is_err() {
            self.puts("Failed to set boot slots\n");
            return;
        }

        if self.settings.set_failsafe_boot_slots(failsafe).is_err() {
            self.puts("Failed to set failsafe boot slots\n");
            return;
        }

        let _ = self.settings.reset_boot_counter();
        let _ = self.settings.confirm_boot();

        self.puts("\nNew boot slots set\n");
    }

    fn show_boot_settings(&mut self) {
        self.puts("\nBoot settings:");

        let Ok(snapshot) = self.settings.snapshot() else {
            self.puts("\nSettings unreadable!\n");
            return;
        };

        self.puts("\nBoot slots: ");
        self.print_slot_mask(snapshot.boot_slots);

        self.puts("\nFailsafe boot slots: ");
        self.print_slot_mask(snapshot.failsafe_slots);

        let _ = write!(self.out(), "\nBoot counter: {}", snapshot.boot_counter);
        let _ = write!(
            self.out(),
            "\nLast confirmed boot counter: {}",
            snapshot.last_confirmed_boot_counter
        );

        self.puts("\n");
    }

    fn check(&mut self) {
        self.puts("\nChecking OBC:\n");

        let Ok(snapshot) = self.settings.snapshot() else {
            self.puts("[FAIL] Boot settings readable\n");
            return;
        };

        self.report(snapshot.magic_valid(), "Boot settings tagged with magic number");

        // Per-slot validity and CRC health.
        let mut slot_valid = [false; BOOT_TABLE_SIZE as usize + 1];
        let mut slot_crc = [0u16; BOOT_TABLE_SIZE as usize + 1];

        for slot in 1..=BOOT_TABLE_SIZE {
            let (valid, expected) = {
                let entry = self.table.entry(slot).unwrap();
                (entry.is_valid(), entry.crc())
            };

            if !valid {
                let _ = write!(self.out(), "[FAIL] Boot slot {}: Not valid\n", slot);
                continue;
            }

            let actual = self.table.entry(slot).unwrap().calculate_crc();

            if expected != actual {
                let _ = write!(self.out(), "[FAIL] Boot slot {}: CRC mismatch\n", slot);
                continue;
            }

            let _ = write!(self.out(), "[OK  ] Boot slot {}: CRC match\n", slot);
            slot_valid[slot as usize] = true;
            slot_crc[slot as usize] = actual;
        }

        self.report_slot_group(snapshot.boot_slots, "Primary", &slot_valid, &slot_crc);
        self.report_slot_group(snapshot.failsafe_slots, "Failsafe", &slot_valid, &slot_crc);

        // Redundant bootloader copies must agree on their CRC.
        let mut min = u16::MAX;
        let mut max = u16::MIN;
        for index in 0..BOOTLOADER_COPIES {
            let crc = self.table.bootloader_copy(index).unwrap().calculate_crc();
            min = min.min(crc);
            max = max.max(crc);
        }
        self.report(min == max, "Bootloader copies all the same");
    }

    fn report_slot_group(
        &mut self,
        mask: u8,
        name: &str,
        slot_valid: &[bool],
        slot_crc: &[u16],
    ) {
        let SlotSelection::Slots(slots) = SlotSelection::decode(mask) else {
            let _ = write!(self.out(), "[FAIL] {} boot slots decodable\n", name);
            return;
        };

        // Slot 0 is the safe-mode image in EEPROM, not a table entry; only
        // the flash-backed slots take part in the group health check.
        let entries: Vec<u8, 3> = slots.iter().copied().filter(|&s| s != 0).collect();

        let all_valid = entries.iter().all(|&s| slot_valid[s as usize]);
        let crc_match = entries
            .windows(2)
            .all(|pair| slot_crc[pair[0] as usize] == slot_crc[pair[1] as usize]);

        let _ = write!(
            self.out(),
            "[{}] {} boot slots valid & CRC match\n",
            if all_valid && crc_match { "OK  " } else { "FAIL" },
            name
        );
    }

    fn report(&mut self, ok: bool, what: &str) {
        let _ = write!(
            self.out(),
            "[{}] {}\n",
            if ok { "OK  " } else { "FAIL" },
            what
        );
    }

    fn print_help(&mut self) {
        for &(id, help) in COMMANDS {
            let _ = write!(self.out(), "\n{} - {}", id as char, help);
        }
        self.puts("\n");
    }

    fn print_slot_mask(&mut self, mask: u8) {
        match SlotSelection::decode(mask) {
            SlotSelection::SafeMode => self.puts("Safe Mode"),
            SlotSelection::Upper => self.puts("Upper"),
            SlotSelection::Invalid => self.puts("Invalid"),
            SlotSelection::Slots(slots) => {
                for slot in slots {
                    let _ = write!(self.out(), "{} ", slot);
                }
            }
        }
    }

    /// Read three distinct slot digits and fold them into a mask. `first`
    /// carries a digit the caller already consumed.
    fn read_boot_slots(&mut self, first: Option<u8>) -> Option<u8> {
        let mut mask = 0u8;

        for i in 0..3u8 {
            let _ = write!(self.out(), "\tSlot {}: ", i);

            let byte = match (i, first) {
                (0, Some(byte)) => byte,
                _ => {
                    let byte = self.serial.read_byte();
                    self.serial.write_byte(byte);
                    byte
                }
            };

            if !(b'0'..=b'7').contains(&byte) {
                self.puts("\tInvalid boot slot\n");
                return None;
            }

            mask |= 1 << (byte - b'0');
        }

        if mask.count_ones() != 3 {
            self.puts("\t3 distinct slots must be selected\n");
            return None;
        }

        Some(mask)
    }

    /// Read one slot digit 0..=7.
    fn read_slot_digit(&mut self) -> Option<u8> {
        let byte = self.serial.read_byte();
        self.serial.write_byte(byte);

        let slot = byte.wrapping_sub(b'0');
        if byte < b'0' || !(slot == 0 || verify_boot_index(slot)) {
            self.puts("\nError: Boot slot out of bounds!");
            return None;
        }

        Some(slot)
    }

    /// Read the entry description up to and including `\n`.
    fn read_description(&mut self) -> Vec<u8, DESCRIPTION_SIZE> {
        let mut description = Vec::new();

        while description.len() < DESCRIPTION_SIZE {
            let byte = self.serial.read_byte();
            self.serial.write_byte(byte);
            let _ = description.push(byte);

            if byte == b'\n' {
                break;
            }
        }

        description
    }

    fn puts(&mut self, s: &str) {
        self.serial.write_all(s.as_bytes());
    }

    fn out(&mut self) -> SerialWriter<'_, S> {
        SerialWriter {
            serial: &mut *self.serial,
        }
    }
}

/// `core::fmt` adapter over the serial link.
struct SerialWriter<'s, S> {
    serial: &'s mut S,
}

impl<S: SerialLink> fmt::Write for SerialWriter<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.serial.write_all(s.as_bytes());
        Ok(())
    }
}
