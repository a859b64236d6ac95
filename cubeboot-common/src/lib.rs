// SPDX-License-Identifier: MIT

//! Core logic of the cubeboot multi-slot satellite bootloader.
//!
//! The boot environment is built from three stores: a boot table in external
//! NOR flash (seven program slots plus redundant bootloader copies), a
//! triple-redundant settings block in FRAM, and the safe-mode image in
//! EEPROM. This crate implements the typed views over those stores, the
//! XMODEM-CRC upload path, and the boot decision engine that verifies,
//! repairs and finally hands control to a program image.
//!
//! Everything is generic over small capability traits ([`flash::FlashDriver`],
//! [`fram::FramChip`], [`xmodem::SerialLink`], ...) so the complete decision
//! path runs on the host in tests. Environments:
//! - Default: `no_std` for the flight target
//! - `std` feature: host tools
//! - `embedded` feature: Cortex-M vector-table handoff and fixed-address
//!   persisted parameters

#![cfg_attr(not(feature = "std"), no_std)]

pub mod boot_table;
pub mod crc;
pub mod eeprom;
pub mod engine;
pub mod flash;
pub mod fram;
pub mod handoff;
pub mod layout;
pub mod params;
pub mod settings;
pub mod shell;
pub mod xmodem;

// Re-export commonly used types
pub use boot_table::{BootTable, BootTableError, Entry};
pub use engine::{BootDecisionEngine, BootOutcome, DownloadResult};
pub use flash::{FlashDriver, FlashStatus};
pub use fram::{FramChip, FramError, RedundantFram};
pub use params::{BootReason, PersistedParameters, Runlevel};
pub use settings::{BootSettings, SlotSelection};
