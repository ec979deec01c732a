//! Simulated programmer setup
//!
//! Builds the full stack the host talks to: an emulated AVR on an ISP bus,
//! driven by the programmer engine on a board with an optional slow-SCK
//! jumper. Memory contents can be backed by image files so a write in one
//! run is visible to a read in the next.

use std::fs;
use std::path::{Path, PathBuf};

use usbasp_core::isp::Isp;
use usbasp_core::{Programmer, SckOption};
use usbasp_dummy::{DummyAvr, DummyBoard, Part};

use crate::error::{HostError, Result};
use crate::host::Host;

/// Options for opening a simulated programmer
#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    /// Part name to emulate
    pub part: String,
    /// Whether the slow-SCK jumper is fitted
    pub slow_sck_jumper: bool,
    /// Flash backing file
    pub flash_image: Option<PathBuf>,
    /// EEPROM backing file
    pub eeprom_image: Option<PathBuf>,
}

/// An open simulated programmer with its host driver
pub struct Simulator {
    host: Host<Isp<DummyAvr>, DummyBoard>,
    part: Part,
    flash_image: Option<PathBuf>,
    eeprom_image: Option<PathBuf>,
}

fn load_if_present(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    match path {
        Some(path) if path.exists() => {
            let data = fs::read(path)?;
            log::debug!("loaded {} bytes from {:?}", data.len(), path);
            Ok(Some(data))
        }
        _ => Ok(None),
    }
}

impl Simulator {
    /// Create the emulated target and programmer
    pub fn open(config: &SimConfig) -> Result<Self> {
        let mut avr = DummyAvr::from_name(&config.part)?;
        if let Some(image) = load_if_present(config.flash_image.as_deref())? {
            avr.load_flash(&image)?;
        }
        if let Some(image) = load_if_present(config.eeprom_image.as_deref())? {
            avr.load_eeprom(&image)?;
        }

        let part = *avr.part();
        let board = DummyBoard {
            slow_sck_jumper: config.slow_sck_jumper,
            ..Default::default()
        };
        let prog = Programmer::with_board(Isp::new(avr), board);
        log::info!("Emulating {}", part.name);

        Ok(Self {
            host: Host::new(prog, part.needs_extended_address()),
            part,
            flash_image: config.flash_image.clone(),
            eeprom_image: config.eeprom_image.clone(),
        })
    }

    /// The emulated part
    pub fn part(&self) -> &Part {
        &self.part
    }

    /// Host driver
    pub fn host(&mut self) -> &mut Host<Isp<DummyAvr>, DummyBoard> {
        &mut self.host
    }

    /// Connect, enter programming mode and check the signature
    pub fn start(&mut self, sck: SckOption) -> Result<[u8; 3]> {
        self.host.connect(sck)?;
        self.host.enable_programming()?;

        let signature = self.host.read_signature()?;
        if signature != self.part.signature {
            return Err(HostError::SignatureMismatch {
                part: self.part.name,
                expected: self.part.signature,
                found: signature,
            });
        }
        Ok(signature)
    }

    /// Disconnect and write memory contents back to the image files
    pub fn close(mut self) -> Result<()> {
        self.host.disconnect()?;

        let (isp, _board) = self.host.into_programmer().into_parts();
        let avr = isp.into_inner();
        if let Some(path) = &self.flash_image {
            fs::write(path, avr.flash())?;
            log::debug!("saved flash to {:?}", path);
        }
        if let Some(path) = &self.eeprom_image {
            fs::write(path, avr.eeprom())?;
            log::debug!("saved EEPROM to {:?}", path);
        }
        Ok(())
    }
}
