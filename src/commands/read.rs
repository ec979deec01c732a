//! Read command implementation

use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::{check_bounds, memory_size, progress_bar};
use crate::host::Memory;
use crate::sim::Simulator;

/// Read target memory to a file
///
/// Without `length` the read runs from `address` to the end of the memory.
pub fn run_read(
    sim: &mut Simulator,
    memory: Memory,
    output: &Path,
    address: u32,
    length: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let part = *sim.part();
    let size = memory_size(&part, memory);
    let len = match length {
        Some(len) => len as usize,
        None => size.saturating_sub(address as usize),
    };
    check_bounds(&part, memory, address, len)?;

    let mut data = vec![0u8; len];
    let pb = progress_bar(len as u64, "Reading")?;
    sim.host()
        .read_memory(memory, address, &mut data, &mut |done| pb.set_position(done as u64))?;
    pb.finish_with_message("Read complete");

    let mut file = File::create(output)?;
    file.write_all(&data)?;
    println!("Wrote {} bytes of {} to {:?}", data.len(), memory.name(), output);

    Ok(())
}
