// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared firmware-update and control core for the trickler instrument.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode, suitable for the bootloader and firmware binaries
//! - `std` feature: enables `std` support for host-side tests and tools
//! - `embedded` feature: enables hardware-backed drivers (rp2040-hal)

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

pub mod charge_cycle;
pub mod crc32;
pub mod drivers;
pub mod eeprom;
pub mod firmware_manager;
pub mod flash;
pub mod layout;
pub mod metadata;
pub mod pid;
pub mod profile;
pub mod telemetry;
pub mod tuning;

pub use charge_cycle::{ChargeCycle, ChargeCycleError, ChargeCycleEvent, ChargeState};
pub use crc32::Crc32;
pub use firmware_manager::{FirmwareError, FirmwareManager, UpdateState};
pub use flash::{FlashDevice, FlashError};
pub use layout::Bank;
pub use metadata::{Metadata, MetadataError, MetadataStore};
pub use pid::{MotorGains, PidState};
pub use profile::{Profile, ProfileTable};
pub use telemetry::TelemetryRecord;
pub use tuning::{Phase as TuningPhase, TuningConfig, TuningSession};
