// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Per-cycle telemetry record and scoring (spec §3.4, §4.10).

use crate::profile::Gains;

/// Weights applied to the three component scores, configurable per
/// [`crate::tuning::TuningConfig`] but defaulting to the values in §4.10.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub overthrow: f32,
    pub speed: f32,
    pub accuracy: f32,
}

impl ScoringWeights {
    pub const fn default_weights() -> Self {
        Self { overthrow: 10.0, speed: 1.0, accuracy: 1.0 }
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::default_weights()
    }
}

/// Parameters the three component scores are normalized against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringParams {
    pub max_overthrow_percent: f32,
    pub target_total_time_ms: f32,
    pub weights: ScoringWeights,
}

fn overthrow_score(overthrow_percent: f32, max_overthrow_percent: f32) -> f32 {
    (100.0 * (1.0 - libm_abs(overthrow_percent) / max_overthrow_percent).max(0.0)).min(100.0)
}

fn speed_score(total_time_ms: f32, target_total_time_ms: f32) -> f32 {
    (100.0 * (2.0 - total_time_ms / target_total_time_ms).max(0.0)).min(100.0)
}

fn accuracy_score(final_weight: f32, target_weight: f32) -> f32 {
    if target_weight == 0.0 {
        return 0.0;
    }
    let frac = 100.0 * libm_abs(final_weight - target_weight) / target_weight;
    (100.0 * (1.0 - frac).max(0.0)).min(100.0)
}

fn libm_abs(v: f32) -> f32 {
    if v < 0.0 {
        -v
    } else {
        v
    }
}

fn overall_score(overthrow: f32, speed: f32, accuracy: f32, weights: &ScoringWeights) -> f32 {
    let total = weights.overthrow + weights.speed + weights.accuracy;
    (weights.overthrow * overthrow + weights.speed * speed + weights.accuracy * accuracy) / total
}

/// Immutable once produced, as required by spec §3.4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    pub sequence: u32,
    pub coarse_time_ms: Option<u32>,
    pub fine_time_ms: u32,
    pub total_time_ms: u32,
    pub final_weight: f32,
    pub target_weight: f32,
    pub overthrow: f32,
    pub overthrow_percent: f32,
    pub gains: Gains4,
    pub overall_score: f32,
}

/// The four gain values active during a cycle (spec §3.4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains4 {
    pub coarse_kp: f32,
    pub coarse_kd: f32,
    pub fine_kp: f32,
    pub fine_kd: f32,
}

impl TelemetryRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequence: u32,
        coarse_time_ms: Option<u32>,
        fine_time_ms: u32,
        total_time_ms: u32,
        final_weight: f32,
        target_weight: f32,
        gains: Gains4,
        params: &ScoringParams,
    ) -> Self {
        let overthrow = final_weight - target_weight;
        let overthrow_percent = if target_weight != 0.0 {
            100.0 * overthrow / target_weight
        } else {
            0.0
        };

        let o_score = overthrow_score(overthrow_percent, params.max_overthrow_percent);
        let s_score = speed_score(total_time_ms as f32, params.target_total_time_ms);
        let a_score = accuracy_score(final_weight, target_weight);
        let score = overall_score(o_score, s_score, a_score, &params.weights);

        Self {
            sequence,
            coarse_time_ms,
            fine_time_ms,
            total_time_ms,
            final_weight,
            target_weight,
            overthrow,
            overthrow_percent,
            gains,
            overall_score: score,
        }
    }

    pub fn is_overthrow_acceptable(&self, max_overthrow_percent: f32) -> bool {
        libm_abs(self.overthrow_percent) < max_overthrow_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ScoringParams {
        ScoringParams {
            max_overthrow_percent: 5.0,
            target_total_time_ms: 1000.0,
            weights: ScoringWeights::default_weights(),
        }
    }

    fn gains() -> Gains4 {
        Gains4 { coarse_kp: 1.0, coarse_kd: 0.1, fine_kp: 0.5, fine_kd: 0.05 }
    }

    #[test]
    fn perfect_cycle_scores_100() {
        let rec = TelemetryRecord::new(1, Some(400), 600, 1000, 10.0, 10.0, gains(), &params());
        assert!((rec.overall_score - 100.0).abs() < 1e-5);
    }

    #[test]
    fn overthrow_beyond_max_zeroes_that_component() {
        let p = params();
        let rec = TelemetryRecord::new(1, Some(400), 600, 1000, 10.5, 10.0, gains(), &p);
        // overthrow_percent = 5.0 == max_overthrow_percent -> component score 0
        assert_eq!(overthrow_score(rec.overthrow_percent, p.max_overthrow_percent), 0.0);
    }

    #[test]
    fn slow_cycle_penalizes_speed_score_only() {
        let p = params();
        let rec = TelemetryRecord::new(1, Some(400), 1600, 2000, 10.0, 10.0, gains(), &p);
        assert_eq!(rec.overthrow, 0.0);
        assert!(rec.overall_score < 100.0);
    }

    #[test]
    fn overthrow_acceptable_respects_max() {
        let rec = TelemetryRecord::new(1, None, 600, 1000, 10.2, 10.0, gains(), &params());
        assert!(rec.is_overthrow_acceptable(5.0));
        assert!(!rec.is_overthrow_acceptable(1.0));
    }
}
