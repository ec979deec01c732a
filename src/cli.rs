//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Target memory selector
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryArg {
    /// Program memory
    Flash,
    /// Data EEPROM
    Eeprom,
}

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Requested ISP clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SckArg {
    /// Let the programmer pick its default
    Auto,
    /// Fastest preset not above this frequency
    Hz(u32),
}

/// Parse an SCK frequency: "auto" or a value in Hz with optional k/M suffix
fn parse_sck(s: &str) -> Result<SckArg, String> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(SckArg::Auto);
    }
    let (digits, scale) = if let Some(d) = s.strip_suffix(|c: char| c == 'k' || c == 'K') {
        (d, 1_000)
    } else if let Some(d) = s.strip_suffix('M') {
        (d, 1_000_000)
    } else {
        (s, 1)
    };
    let value = digits
        .parse::<u32>()
        .map_err(|e| format!("Invalid frequency: {}", e))?;
    value
        .checked_mul(scale)
        .filter(|&hz| hz != 0)
        .map(SckArg::Hz)
        .ok_or_else(|| format!("Invalid frequency: {}", s))
}

#[derive(Parser)]
#[command(name = "usbasp")]
#[command(author, version, about = "USBasp AVR programmer simulator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emulated target part
    #[arg(short, long, default_value = "ATmega328P", global = true)]
    pub part: String,

    /// ISP clock: "auto" or a frequency in Hz (e.g. 93750, 375k, 3M)
    #[arg(long, value_parser = parse_sck, default_value = "auto", global = true)]
    pub sck: SckArg,

    /// Fit the slow-SCK jumper on the programmer
    #[arg(long, global = true)]
    pub slow_sck: bool,

    /// File backing the target flash between runs
    #[arg(long, global = true)]
    pub flash_image: Option<PathBuf>,

    /// File backing the target EEPROM between runs
    #[arg(long, global = true)]
    pub eeprom_image: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and show target information
    Info,

    /// Read target memory to file
    Read {
        /// Memory to read
        #[arg(short, long, value_enum, default_value = "flash")]
        memory: MemoryArg,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Start address (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        address: u32,

        /// Number of bytes to read, defaults to the rest of the memory
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// Write file to target memory
    Write {
        /// Memory to write
        #[arg(short, long, value_enum, default_value = "flash")]
        memory: MemoryArg,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start address (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        address: u32,

        /// Don't erase the chip before writing flash
        #[arg(long)]
        no_erase: bool,

        /// Skip read-back verification
        #[arg(long)]
        no_verify: bool,
    },

    /// Erase flash and EEPROM
    Erase,

    /// List emulated parts
    ListParts,
}
