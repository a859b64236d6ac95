// SPDX-License-Identifier: MIT

//! Operator tool for the cubeboot debug serial shell.
//!
//! Usage:
//!   cubeboot-upload --port /dev/ttyUSB0 list
//!   cubeboot-upload --port /dev/ttyUSB0 upload firmware.bin --slot 3 --description "flight build"
//!   cubeboot-upload --port /dev/ttyUSB0 settings --primary 012 --failsafe 345
//!   cubeboot-upload --port /dev/ttyUSB0 boot

mod cli;
mod commands;
mod transport;
mod xmodem;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
