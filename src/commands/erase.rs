//! Erase command implementation

use crate::sim::Simulator;

/// Erase flash and EEPROM
pub fn run_erase(sim: &mut Simulator) -> Result<(), Box<dyn std::error::Error>> {
    println!("Erasing {}...", sim.part().name);
    sim.host().chip_erase()?;
    println!("Erase complete");
    Ok(())
}
