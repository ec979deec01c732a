//! Info command implementation

use usbasp_core::SckOption;
use usbasp_dummy::{CMD_READ_FUSE, CMD_READ_FUSE_HIGH};

use crate::sim::Simulator;

/// Print what the programmer found on the target
pub fn run_info(
    sim: &mut Simulator,
    signature: [u8; 3],
    sck: SckOption,
) -> Result<(), Box<dyn std::error::Error>> {
    let part = *sim.part();
    println!("Part:       {}", part.name);
    println!(
        "Signature:  {:02X} {:02X} {:02X}",
        signature[0], signature[1], signature[2]
    );
    match sck.frequency_hz() {
        Some(hz) => println!("SCK:        option {} ({} Hz)", sck.code(), hz),
        None => println!("SCK:        option {}", sck.code()),
    }
    println!("Flash:      {} bytes", part.flash_size);
    if part.is_paged() {
        println!("Page size:  {} bytes", part.flash_page_size);
    } else {
        println!("Page size:  byte-programmed");
    }
    println!("EEPROM:     {} bytes", part.eeprom_size);
    if part.needs_extended_address() {
        println!("Addressing: extended");
    }

    // Fuses through raw ISP instructions
    let host = sim.host();
    let low = host.transmit([CMD_READ_FUSE, 0x00, 0x00, 0x00])?[3];
    let high = host.transmit([CMD_READ_FUSE_HIGH, 0x08, 0x00, 0x00])?[3];
    let ext = host.transmit([CMD_READ_FUSE, 0x08, 0x00, 0x00])?[3];
    println!("Fuses:      low 0x{:02X}, high 0x{:02X}, ext 0x{:02X}", low, high, ext);

    Ok(())
}
