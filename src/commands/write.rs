//! Write command implementation

use std::fs;
use std::path::Path;

use super::{check_bounds, progress_bar};
use crate::host::Memory;
use crate::sim::Simulator;

/// Options for the write command
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Erase the chip before writing flash
    pub erase: bool,
    /// Read back and compare afterwards
    pub verify: bool,
}

/// Write a file to target memory
pub fn run_write(
    sim: &mut Simulator,
    memory: Memory,
    input: &Path,
    address: u32,
    opts: WriteOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let part = *sim.part();
    let data = fs::read(input)?;
    println!("Read {} bytes from {:?}", data.len(), input);
    if data.is_empty() {
        return Err("Input file is empty".into());
    }
    check_bounds(&part, memory, address, data.len())?;

    // Flash cells only program 1 -> 0
    if memory == Memory::Flash && opts.erase {
        println!("Erasing chip...");
        sim.host().chip_erase()?;
    }

    let page_size = match memory {
        Memory::Flash => part.flash_page_size as u16,
        Memory::Eeprom => 0,
    };
    let pb = progress_bar(data.len() as u64, "Writing")?;
    sim.host().write_memory(memory, address, &data, page_size, &mut |done| {
        pb.set_position(done as u64)
    })?;
    pb.finish_with_message("Write complete");

    if opts.verify {
        let pb = progress_bar(data.len() as u64, "Verifying")?;
        sim.host()
            .verify_memory(memory, address, &data, &mut |done| pb.set_position(done as u64))?;
        pb.finish_with_message("Verify complete");
        println!("Verified {} bytes", data.len());
    }

    println!("Write complete");
    Ok(())
}
