// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Named dispenser parameter sets (spec §3.5), persisted via the EEPROM path.

use serde::{Deserialize, Serialize};

pub const PROFILE_COUNT: usize = 8;
pub const PROFILE_NAME_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Gains {
    pub const fn zero() -> Self {
        Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: [u8; PROFILE_NAME_LEN],
    pub coarse_gains: Gains,
    pub fine_gains: Gains,
    pub coarse_max_flow_speed: f32,
    pub coarse_min_flow_speed: f32,
    pub fine_max_flow_speed: f32,
    pub fine_min_flow_speed: f32,
    pub ai_tuning_enabled: bool,
}

impl Profile {
    pub fn default_named(name: &str) -> Self {
        let mut bytes = [0u8; PROFILE_NAME_LEN];
        let n = name.len().min(PROFILE_NAME_LEN);
        bytes[..n].copy_from_slice(&name.as_bytes()[..n]);
        Self {
            name: bytes,
            coarse_gains: Gains {
                kp: 1.0,
                ki: 0.0,
                kd: 0.1,
            },
            fine_gains: Gains {
                kp: 0.5,
                ki: 0.0,
                kd: 0.05,
            },
            coarse_max_flow_speed: 100.0,
            coarse_min_flow_speed: 10.0,
            fine_max_flow_speed: 20.0,
            fine_min_flow_speed: 1.0,
            ai_tuning_enabled: false,
        }
    }
}

/// The EEPROM-resident profile table (spec §6.4): `PROFILE_COUNT` named
/// parameter sets, indexed by `profile_idx` from the HTTP API (§6.3) and the
/// tuning session (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileTable {
    pub profiles: [Profile; PROFILE_COUNT],
}

impl ProfileTable {
    pub fn get(&self, idx: u8) -> Option<&Profile> {
        self.profiles.get(idx as usize)
    }

    pub fn get_mut(&mut self, idx: u8) -> Option<&mut Profile> {
        self.profiles.get_mut(idx as usize)
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        const NAMES: [&str; PROFILE_COUNT] =
            ["profile 1", "profile 2", "profile 3", "profile 4", "profile 5", "profile 6", "profile 7", "profile 8"];
        let mut profiles = [Profile::default_named(""); PROFILE_COUNT];
        let mut i = 0;
        while i < PROFILE_COUNT {
            profiles[i] = Profile::default_named(NAMES[i]);
            i += 1;
        }
        Self { profiles }
    }
}

/// Flattened per-motor bounds used by the PID controller (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorBounds {
    pub min: f32,
    pub max: f32,
}

impl MotorBounds {
    /// Clamps the profile's bound against the motor's own hardware limits.
    pub fn clamp_against_hardware(profile_min: f32, profile_max: f32, hw_min: f32, hw_max: f32) -> Self {
        Self {
            min: hw_min.max(profile_min),
            max: hw_max.min(profile_max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_bounds_narrow_profile_bounds() {
        let bounds = MotorBounds::clamp_against_hardware(5.0, 150.0, 0.0, 100.0);
        assert_eq!(bounds.min, 5.0);
        assert_eq!(bounds.max, 100.0);
    }
}
