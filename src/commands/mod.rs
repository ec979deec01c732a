//! CLI command implementations
//!
//! Every command runs against an open [`Simulator`](crate::sim::Simulator)
//! that has already been started, and returns the first host-side error.

mod erase;
mod info;
mod list;
mod read;
mod write;

pub use erase::run_erase;
pub use info::run_info;
pub use list::list_parts;
pub use read::run_read;
pub use write::{run_write, WriteOptions};

use indicatif::{ProgressBar, ProgressStyle};
use usbasp_dummy::Part;

use crate::error::{HostError, Result};
use crate::host::Memory;

/// Size of `memory` on `part`
fn memory_size(part: &Part, memory: Memory) -> usize {
    match memory {
        Memory::Flash => part.flash_size,
        Memory::Eeprom => part.eeprom_size,
    }
}

/// Reject ranges that run past the end of the target memory
fn check_bounds(part: &Part, memory: Memory, address: u32, len: usize) -> Result<()> {
    if address as usize + len > memory_size(part, memory) {
        return Err(HostError::AddressOutOfRange {
            memory: memory.name(),
            address,
            len,
        });
    }
    Ok(())
}

/// Bar template: phase label, then the completion message once finished
fn bar_template(phase: &str) -> String {
    format!(
        "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {} {{msg}}",
        phase
    )
}

/// Create a progress bar with a phase message
fn progress_bar(
    total: u64,
    phase: &str,
) -> std::result::Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&bar_template(phase))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}
