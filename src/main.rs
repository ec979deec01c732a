//! usbasp - USBasp AVR programmer simulator
//!
//! Runs the USBasp programming-session engine against an emulated AVR
//! target and drives it the way a PC tool drives real hardware: setup
//! packets for every request, 200-byte blocks for memory transfers, and
//! 8-byte packets in each data stage.
//!
//! # Architecture
//!
//! - `usbasp-core` holds the firmware side: command decoding, the session
//!   state machine and the streaming read/write engines, plus the ISP
//!   instruction layer that talks to the target
//! - `usbasp-dummy` emulates the target and the programmer board
//! - this crate adds the host driver and the CLI on top

mod cli;
mod commands;
mod error;
mod host;
mod sim;

use clap::Parser;
use cli::{Cli, Commands, MemoryArg, SckArg};
use host::Memory;
use sim::{SimConfig, Simulator};
use usbasp_core::SckOption;

impl From<MemoryArg> for Memory {
    fn from(arg: MemoryArg) -> Self {
        match arg {
            MemoryArg::Flash => Memory::Flash,
            MemoryArg::Eeprom => Memory::Eeprom,
        }
    }
}

fn sck_option(arg: SckArg) -> SckOption {
    match arg {
        SckArg::Auto => SckOption::AUTO,
        SckArg::Hz(hz) => SckOption::from_hz(hz),
    }
}

/// Log filter for a `-v` count: info by default, then debug, then trace
fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Logger honoring `env`, falling back to the level selected by `-v`
fn logger_builder(verbose: u8, env: env_logger::Env<'_>) -> env_logger::Builder {
    env_logger::Builder::from_env(env.default_filter_or(log_level(verbose).to_string()))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    logger_builder(cli.verbose, env_logger::Env::default()).init();

    if let Commands::ListParts = cli.command {
        commands::list_parts();
        return Ok(());
    }

    let config = SimConfig {
        part: cli.part.clone(),
        slow_sck_jumper: cli.slow_sck,
        flash_image: cli.flash_image.clone(),
        eeprom_image: cli.eeprom_image.clone(),
    };
    let sck = sck_option(cli.sck);

    let mut sim = Simulator::open(&config)?;
    let signature = sim.start(sck)?;

    let result = match cli.command {
        Commands::Info => commands::run_info(&mut sim, signature, sck),
        Commands::Read {
            memory,
            output,
            address,
            length,
        } => commands::run_read(&mut sim, memory.into(), &output, address, length),
        Commands::Write {
            memory,
            input,
            address,
            no_erase,
            no_verify,
        } => commands::run_write(
            &mut sim,
            memory.into(),
            &input,
            address,
            commands::WriteOptions {
                erase: !no_erase,
                verify: !no_verify,
            },
        ),
        Commands::Erase => commands::run_erase(&mut sim),
        Commands::ListParts => Ok(()),
    };

    // Images are saved even after a failed command, like a real target
    // keeps whatever was programmed
    sim.close()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
