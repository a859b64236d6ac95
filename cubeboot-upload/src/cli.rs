// SPDX-License-Identifier: MIT

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::commands;
use crate::transport::Transport;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "cubeboot-upload")]
#[command(about = "Operator tool for the cubeboot bootloader shell")]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyUSB0)
    #[arg(short, long)]
    pub port: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Enumerate the boot table
    List,

    /// Upload an application image into a boot slot via XMODEM-CRC
    Upload {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Target slot (1..=7)
        #[arg(short, long)]
        slot: u8,

        /// Entry description stored next to the image
        #[arg(short, long, default_value = "uploaded image")]
        description: String,
    },

    /// Upload the safe-mode image into EEPROM (slot 0)
    UploadSafeMode {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Edit the boot settings block
    Settings {
        /// Primary slot digits, e.g. 012
        #[arg(long, conflicts_with_all = ["safe_mode", "upper"])]
        primary: Option<String>,

        /// Failsafe slot digits, e.g. 345
        #[arg(long, requires = "primary")]
        failsafe: Option<String>,

        /// Mark the primary selection as safe mode
        #[arg(long)]
        safe_mode: bool,

        /// Mark the primary selection as upper (boot application as-is)
        #[arg(long, conflicts_with = "safe_mode")]
        upper: bool,
    },

    /// Dump the current boot settings
    ShowSettings,

    /// Run the environment check report
    Check,

    /// Erase one boot table entry
    Erase {
        /// Target slot (1..=7)
        #[arg(value_name = "SLOT")]
        slot: u8,
    },

    /// Let the bootloader proceed with booting
    Boot,

    /// Request a hardware reset
    Reset,
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let mut transport = Transport::new(&cli.port)?;

    match cli.command {
        Commands::List => commands::list(&mut transport),
        Commands::Upload {
            file,
            slot,
            description,
        } => commands::upload(&mut transport, &file, slot, &description),
        Commands::UploadSafeMode { file } => commands::upload_safe_mode(&mut transport, &file),
        Commands::Settings {
            primary,
            failsafe,
            safe_mode,
            upper,
        } => {
            if safe_mode {
                commands::set_safe_mode(&mut transport)
            } else if upper {
                commands::set_upper(&mut transport)
            } else {
                let Some(primary) = primary else {
                    bail!("pass --primary/--failsafe digits, or --safe-mode / --upper");
                };
                let Some(failsafe) = failsafe else {
                    bail!("--primary also needs --failsafe");
                };
                commands::set_slots(&mut transport, &primary, &failsafe)
            }
        }
        Commands::ShowSettings => commands::show_settings(&mut transport),
        Commands::Check => commands::check(&mut transport),
        Commands::Erase { slot } => commands::erase(&mut transport, slot),
        Commands::Boot => commands::boot(&mut transport),
        Commands::Reset => commands::reset(&mut transport),
    }
}
