// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Byte-addressable EEPROM abstraction for non-firmware tunables (spec §6.4).
//!
//! Kept deliberately separate from [`crate::flash::FlashDevice`]: the OTA
//! engine must never touch this device, and this device never holds firmware.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromError {
    OutOfRange,
    Postcard,
}

pub trait EepromDevice {
    fn capacity(&self) -> usize;
    fn read(&self, offset: u16, buf: &mut [u8]) -> Result<(), EepromError>;
    fn write(&mut self, offset: u16, data: &[u8]) -> Result<(), EepromError>;
}

/// Reads and writes a `postcard`-serialized value at a fixed offset.
pub fn load<T, E>(dev: &E, offset: u16, scratch: &mut [u8]) -> Result<T, EepromError>
where
    T: serde::de::DeserializeOwned,
    E: EepromDevice,
{
    dev.read(offset, scratch)?;
    postcard::from_bytes(scratch).map_err(|_| EepromError::Postcard)
}

pub fn store<T, E>(dev: &mut E, offset: u16, value: &T, scratch: &mut [u8]) -> Result<(), EepromError>
where
    T: serde::Serialize,
    E: EepromDevice,
{
    let used = postcard::to_slice(value, scratch).map_err(|_| EepromError::Postcard)?;
    dev.write(offset, used)
}

/// In-memory double for host tests.
#[cfg(feature = "std")]
pub struct SimEeprom {
    bytes: alloc::vec::Vec<u8>,
}

#[cfg(feature = "std")]
impl SimEeprom {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: alloc::vec![0u8; capacity],
        }
    }
}

#[cfg(feature = "std")]
impl EepromDevice for SimEeprom {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: u16, buf: &mut [u8]) -> Result<(), EepromError> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            return Err(EepromError::OutOfRange);
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn write(&mut self, offset: u16, data: &[u8]) -> Result<(), EepromError> {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.bytes.len() {
            return Err(EepromError::OutOfRange);
        }
        self.bytes[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// An 8-bit RGB triple for one status LED color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// The RGB mapping for each semantic [`crate::drivers::LedStatus`], persisted
/// so the color scheme can be customized without a firmware update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LedColors {
    pub not_ready: RgbColor,
    pub under_charge: RgbColor,
    pub over_charge: RgbColor,
    pub normal: RgbColor,
}

impl Default for LedColors {
    fn default() -> Self {
        Self {
            not_ready: RgbColor::new(0, 0, 255),
            under_charge: RgbColor::new(255, 255, 0),
            over_charge: RgbColor::new(255, 0, 0),
            normal: RgbColor::new(0, 255, 0),
        }
    }
}

/// Charge-mode thresholds and other non-firmware tunables (spec §6.4).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChargeModeConfig {
    pub coarse_stop_threshold: f32,
    pub fine_stop_threshold: f32,
    pub set_point_sd_margin: f32,
    pub set_point_mean_margin: f32,
    pub decimal_places: u8,
    pub precharge_enabled: bool,
    pub precharge_time_ms: u32,
    pub precharge_speed: f32,
    pub led_colors: LedColors,
}

impl Default for ChargeModeConfig {
    fn default() -> Self {
        Self {
            coarse_stop_threshold: 5.0,
            fine_stop_threshold: 0.03,
            set_point_sd_margin: 0.02,
            set_point_mean_margin: 0.05,
            decimal_places: 2,
            precharge_enabled: false,
            precharge_time_ms: 0,
            precharge_speed: 0.0,
            led_colors: LedColors::default(),
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn store_then_load_round_trips() {
        let mut dev = SimEeprom::new(256);
        let cfg = ChargeModeConfig {
            coarse_stop_threshold: 4.2,
            ..ChargeModeConfig::default()
        };
        let mut scratch = [0u8; 64];
        store(&mut dev, 0, &cfg, &mut scratch).unwrap();
        let loaded: ChargeModeConfig = load(&dev, 0, &mut scratch).unwrap();
        assert_eq!(loaded, cfg);
    }
}
