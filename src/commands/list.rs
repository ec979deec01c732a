//! List command implementation

use usbasp_dummy::PARTS;

/// List all emulated parts
pub fn list_parts() {
    println!("Emulated parts:");
    println!();
    println!(
        "{:<12} {:>10} {:>6} {:>8} {:>10}",
        "Name", "Flash", "Page", "EEPROM", "Signature"
    );
    println!("{}", "-".repeat(50));

    for part in PARTS {
        let page = if part.is_paged() {
            part.flash_page_size.to_string()
        } else {
            "-".to_string()
        };
        let sig = format!(
            "{:02X} {:02X} {:02X}",
            part.signature[0], part.signature[1], part.signature[2]
        );
        println!(
            "{:<12} {:>10} {:>6} {:>8} {:>10}",
            part.name,
            format_size(part.flash_size),
            page,
            format_size(part.eeprom_size),
            sig
        );
    }
}

fn format_size(bytes: usize) -> String {
    if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
