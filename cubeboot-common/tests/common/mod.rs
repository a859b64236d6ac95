// SPDX-License-Identifier: MIT

//! Mock stores shared by the integration tests: an external NOR flash with
//! an operation journal, FRAM chips with fault injection, a scripted serial
//! link, a RAM-backed EEPROM bus and an internal application flash.

#![allow(dead_code)]

use std::collections::VecDeque;

use cubeboot_common::eeprom::MemoryBus;
use cubeboot_common::engine::ApplicationFlash;
use cubeboot_common::flash::{FlashDriver, FlashStatus};
use cubeboot_common::fram::{FramChip, FramError};
use cubeboot_common::layout::{
    APPLICATION_SIZE, FLASH_SECTOR_SIZE, FLASH_SUBSECTOR_SIZE, TOP_BOOT_DEVICE_ID,
};
use cubeboot_common::xmodem::SerialLink;

/// One journalled flash operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    EraseSector(u32),
    Program(u32, u8),
}

/// In-memory NOR flash. Programs AND bytes in like the real part, erases to
/// 0xFF, and keeps a journal of every mutation so tests can replay a power
/// cut at any point.
pub struct MockFlash {
    pub data: Vec<u8>,
    pub journal: Vec<FlashOp>,
    device_id: u32,
    /// Remaining operation budget; `Some(0)` fails everything from here on.
    pub ops_left: Option<usize>,
}

impl MockFlash {
    pub fn top_boot() -> Self {
        Self {
            data: vec![0xFF; 0x40_0000],
            journal: Vec::new(),
            device_id: TOP_BOOT_DEVICE_ID,
            ops_left: None,
        }
    }

    /// Cut power after `ops` mutations: later ones fail without touching
    /// the array.
    pub fn cut_after(&mut self, ops: usize) {
        self.ops_left = Some(ops);
    }

    fn consume_op(&mut self) -> bool {
        match self.ops_left {
            None => true,
            Some(0) => false,
            Some(ref mut left) => {
                *left -= 1;
                true
            }
        }
    }

    fn sector_bounds(&self, offset: u32) -> (u32, u32) {
        if offset < FLASH_SECTOR_SIZE {
            let base = offset & !(FLASH_SUBSECTOR_SIZE - 1);
            (base, base + FLASH_SUBSECTOR_SIZE)
        } else {
            let base = offset & !(FLASH_SECTOR_SIZE - 1);
            (base, base + FLASH_SECTOR_SIZE)
        }
    }
}

impl FlashDriver for MockFlash {
    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn boot_config(&self) -> u32 {
        0
    }

    fn read_byte(&self, offset: u32) -> u8 {
        self.data[offset as usize]
    }

    fn erase_sector(&mut self, offset: u32) -> FlashStatus {
        if !self.consume_op() {
            return FlashStatus::Error(0xDEAD);
        }

        let (start, end) = self.sector_bounds(offset);
        for byte in &mut self.data[start as usize..end as usize] {
            *byte = 0xFF;
        }
        self.journal.push(FlashOp::EraseSector(offset));
        FlashStatus::NotBusy
    }

    fn program_byte(&mut self, offset: u32, value: u8) -> FlashStatus {
        if !self.consume_op() {
            return FlashStatus::Error(0xDEAD);
        }

        // NOR programming can only clear bits.
        self.data[offset as usize] &= value;
        self.journal.push(FlashOp::Program(offset, value));
        FlashStatus::NotBusy
    }

    fn wait_idle(&mut self, _offset: u32) -> bool {
        true
    }
}

/// One mock FRAM chip, 64 bytes.
pub struct MockFramChip {
    pub data: Vec<u8>,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl MockFramChip {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; 64],
            fail_reads: false,
            fail_writes: false,
        }
    }
}

impl FramChip for MockFramChip {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FramError> {
        if self.fail_reads {
            return Err(FramError::NoMajority);
        }
        let start = address as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FramError> {
        if self.fail_writes {
            return Err(FramError::WriteFailed);
        }
        let start = address as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn status(&mut self) -> Option<u8> {
        if self.fail_reads {
            None
        } else {
            Some(0x02)
        }
    }
}

/// Serial link fed from a canned byte script; everything the device sends
/// is captured in `sent`.
pub struct ScriptedSerial {
    pub script: VecDeque<u8>,
    pub sent: Vec<u8>,
}

impl ScriptedSerial {
    pub fn new(script: &[u8]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            sent: Vec::new(),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.script.extend(bytes.iter().copied());
    }
}

impl SerialLink for ScriptedSerial {
    fn poll_byte(&mut self) -> Option<u8> {
        self.script.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        self.sent.push(byte);
    }

    fn read_byte(&mut self) -> u8 {
        self.poll_byte()
            .expect("serial script exhausted while device still reading")
    }
}

/// RAM-backed EEPROM data bus. Every write, including the unlock handshake,
/// lands in the journal.
pub struct RamBus {
    pub data: Vec<u8>,
    pub writes: Vec<(u32, u8)>,
}

impl RamBus {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; 0x1_0000],
            writes: Vec::new(),
        }
    }
}

impl MemoryBus for RamBus {
    fn write_byte(&mut self, offset: u32, value: u8) {
        self.data[offset as usize] = value;
        self.writes.push((offset, value));
    }

    fn read_byte(&self, offset: u32) -> u8 {
        self.data[offset as usize]
    }
}

/// Internal MCU flash application region.
pub struct MockAppFlash {
    pub data: Vec<u8>,
    pub erased: bool,
    pub fail_erase: bool,
    pub fail_program: bool,
}

impl MockAppFlash {
    pub fn new() -> Self {
        Self {
            data: vec![0xFF; APPLICATION_SIZE as usize],
            erased: true,
            fail_erase: false,
            fail_program: false,
        }
    }

    /// Pretend the region already holds `image`.
    pub fn preload(&mut self, image: &[u8]) {
        self.data[..image.len()].copy_from_slice(image);
    }

    /// Fill the region with zeroes, as after a partial or failed copy.
    pub fn zero(&mut self) {
        self.data.fill(0);
    }
}

impl ApplicationFlash for MockAppFlash {
    fn erase(&mut self) -> Result<(), FlashStatus> {
        if self.fail_erase {
            return Err(FlashStatus::Error(0xDEAD));
        }
        self.data.fill(0xFF);
        self.erased = true;
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashStatus> {
        if self.fail_program {
            return Err(FlashStatus::Error(0xDEAD));
        }
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_byte(&self, offset: u32) -> u8 {
        self.data[offset as usize]
    }
}

// --- XMODEM wire helpers ---

/// Frame one 128-byte block as it appears on the wire.
pub fn xmodem_frame(seq: u8, data: &[u8; 128]) -> Vec<u8> {
    let crc = cubeboot_common::crc::crc16(data);

    let mut frame = Vec::with_capacity(133);
    frame.push(0x01); // SOH
    frame.push(seq);
    frame.push(255 - seq);
    frame.extend_from_slice(data);
    frame.push((crc >> 8) as u8);
    frame.push((crc & 0xFF) as u8);
    frame
}

/// Frame a whole image as consecutive packets plus the closing EOT. The
/// final block is padded with 0xFF.
pub fn xmodem_stream(image: &[u8]) -> Vec<u8> {
    let mut stream = Vec::new();
    let mut seq: u32 = 1;

    for chunk in image.chunks(128) {
        let mut block = [0xFFu8; 128];
        block[..chunk.len()].copy_from_slice(chunk);
        stream.extend_from_slice(&xmodem_frame((seq % 256) as u8, &block));
        seq += 1;
    }

    stream.push(0x04); // EOT
    stream
}
