// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Self-tuning PID gain search (spec §3.3, §4.9).
//!
//! Two phases run sequentially: phase 1 searches `coarse_kp`/`coarse_kd` with
//! the profile's fine gains held fixed, phase 2 searches `fine_kp`/`fine_kd`
//! with phase 1's winning coarse gains frozen. Both phases are a best-score
//! hill climb with an adaptive step scaled by an "exploration factor" λ.

use crate::profile::{Gains, Profile};
use crate::telemetry::{Gains4, ScoringParams, TelemetryRecord};

const RECORD_CAPACITY: usize = 50;
const MIN_DROPS_PER_PHASE: u32 = 2;
const FORCE_CONVERGE_DROPS: u32 = 5;
const MIN_LAMBDA: f32 = 0.05;
const MAX_LAMBDA: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningError {
    NotActive,
    AlreadyActive,
    NotComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Phase1Coarse,
    Phase2Fine,
    Complete,
    Error,
}

/// Host-inspectable cost-function weights and search ranges, per
/// `ai_tuning_get_config` in the original (spec §9a.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningConfig {
    /// Hard ceiling on drops in a session; §9 Open Questions resolves the
    /// source's two disagreeing variants (50 vs. 10) in favor of 50.
    pub max_drops_allowed: u32,
    /// Nominal number of drops a phase is expected to need for progress
    /// reporting (`/rest/ai_tuning_status`); resolved to 4 per §9.
    pub total_drops_target: u32,
    pub max_overthrow_percent: f32,
    pub target_total_time_ms: f32,
    pub initial_lambda: f32,
    pub scoring: ScoringParams,
}

impl TuningConfig {
    pub fn default_for(max_overthrow_percent: f32, target_total_time_ms: f32) -> Self {
        Self {
            max_drops_allowed: 50,
            total_drops_target: 4,
            max_overthrow_percent,
            target_total_time_ms,
            initial_lambda: 0.5,
            scoring: ScoringParams {
                max_overthrow_percent,
                target_total_time_ms,
                weights: Default::default(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningStats {
    pub average_overthrow_percent: f32,
    pub average_time_ms: f32,
    pub consistency: f32,
}

struct PhaseSearch {
    gains: Gains,
    best_gains: Gains,
    best_score: f32,
    last_kp_delta: f32,
    last_kd_delta: f32,
    consecutive_good: u32,
}

impl PhaseSearch {
    fn new(start: Gains) -> Self {
        Self {
            gains: start,
            best_gains: start,
            best_score: f32::NEG_INFINITY,
            last_kp_delta: 0.0,
            last_kd_delta: 0.0,
            consecutive_good: 0,
        }
    }
}

pub struct TuningSession {
    phase: Phase,
    profile_idx: u8,
    config: TuningConfig,
    lambda: f32,
    drops_completed: u32,
    phase_drop_count: u32,
    records: heapless::Vec<TelemetryRecord, RECORD_CAPACITY>,
    phase2_start_index: Option<usize>,
    base_fine_gains: Gains,
    phase1: Option<PhaseSearch>,
    phase2: Option<PhaseSearch>,
    recommended_coarse: Option<Gains>,
    recommended_fine: Option<Gains>,
    stats: Option<TuningStats>,
}

impl TuningSession {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            profile_idx: 0,
            config: TuningConfig::default_for(5.0, 2000.0),
            lambda: 0.5,
            drops_completed: 0,
            phase_drop_count: 0,
            records: heapless::Vec::new(),
            phase2_start_index: None,
            base_fine_gains: Gains::zero(),
            phase1: None,
            phase2: None,
            recommended_coarse: None,
            recommended_fine: None,
            stats: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Phase1Coarse | Phase::Phase2Fine)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    pub fn drops_completed(&self) -> u32 {
        self.drops_completed
    }

    pub fn stats(&self) -> Option<&TuningStats> {
        self.stats.as_ref()
    }

    pub fn start(&mut self, profile_idx: u8, profile: &Profile, config: TuningConfig) -> Result<(), TuningError> {
        if self.is_active() {
            return Err(TuningError::AlreadyActive);
        }
        self.profile_idx = profile_idx;
        self.config = config;
        self.lambda = config.initial_lambda;
        self.drops_completed = 0;
        self.phase_drop_count = 0;
        self.records.clear();
        self.phase2_start_index = None;
        self.base_fine_gains = profile.fine_gains;
        self.phase1 = Some(PhaseSearch::new(profile.coarse_gains));
        self.phase2 = None;
        self.recommended_coarse = None;
        self.recommended_fine = None;
        self.stats = None;
        self.phase = Phase::Phase1Coarse;
        #[cfg(feature = "embedded")]
        defmt::println!(
            "tuning: session started (max_drops={}, target_drops={})",
            self.config.max_drops_allowed,
            self.config.total_drops_target
        );
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.phase = Phase::Idle;
    }

    /// Gains to use on the next dispense cycle, composed from whichever
    /// phase is active and the frozen/base gains of the other.
    pub fn next_gains(&self) -> Option<Gains4> {
        match self.phase {
            Phase::Phase1Coarse => {
                let coarse = self.phase1.as_ref()?.gains;
                Some(Gains4 {
                    coarse_kp: coarse.kp,
                    coarse_kd: coarse.kd,
                    fine_kp: self.base_fine_gains.kp,
                    fine_kd: self.base_fine_gains.kd,
                })
            }
            Phase::Phase2Fine => {
                let coarse = self.recommended_coarse.unwrap_or(self.base_fine_gains);
                let fine = self.phase2.as_ref()?.gains;
                Some(Gains4 {
                    coarse_kp: coarse.kp,
                    coarse_kd: coarse.kd,
                    fine_kp: fine.kp,
                    fine_kd: fine.kd,
                })
            }
            _ => None,
        }
    }

    pub fn recommended(&self) -> Option<Gains4> {
        let coarse = self.recommended_coarse?;
        let fine = self.recommended_fine?;
        Some(Gains4 {
            coarse_kp: coarse.kp,
            coarse_kd: coarse.kd,
            fine_kp: fine.kp,
            fine_kd: fine.kd,
        })
    }

    pub fn apply(&mut self, profile: &mut Profile) -> Result<(), TuningError> {
        let gains = self.recommended().ok_or(TuningError::NotComplete)?;
        profile.coarse_gains.kp = gains.coarse_kp;
        profile.coarse_gains.kd = gains.coarse_kd;
        profile.fine_gains.kp = gains.fine_kp;
        profile.fine_gains.kd = gains.fine_kd;
        self.phase = Phase::Idle;
        Ok(())
    }

    /// Record the outcome of one dispense and advance the search.
    pub fn record_drop(
        &mut self,
        coarse_time_ms: Option<u32>,
        fine_time_ms: u32,
        total_time_ms: u32,
        final_weight: f32,
        target_weight: f32,
    ) -> Result<&TelemetryRecord, TuningError> {
        if !self.is_active() {
            return Err(TuningError::NotActive);
        }

        let gains4 = self.next_gains().ok_or(TuningError::NotActive)?;
        let sequence = self.records.len() as u32;
        let record = TelemetryRecord::new(
            sequence,
            coarse_time_ms,
            fine_time_ms,
            total_time_ms,
            final_weight,
            target_weight,
            gains4,
            &self.config.scoring,
        );

        if self.records.len() == RECORD_CAPACITY {
            self.records.remove(0);
            if let Some(idx) = self.phase2_start_index.as_mut() {
                *idx = idx.saturating_sub(1);
            }
        }
        let _ = self.records.push(record);

        self.drops_completed += 1;
        self.phase_drop_count += 1;

        #[cfg(feature = "embedded")]
        defmt::println!(
            "tuning: drop {} complete, overthrow={}% score={}",
            self.drops_completed,
            record.overthrow_percent,
            record.overall_score
        );

        match self.phase {
            Phase::Phase1Coarse => self.step_phase1(),
            Phase::Phase2Fine => self.step_phase2(),
            _ => {}
        }

        self.check_convergence();

        Ok(self.records.last().expect("just pushed"))
    }

    fn phase_records(&self) -> &[TelemetryRecord] {
        match self.phase2_start_index {
            Some(idx) if self.phase == Phase::Phase2Fine => &self.records[idx..],
            _ => &self.records[..],
        }
    }

    fn step_phase1(&mut self) {
        let step_kp = 0.1 * (1.0 + self.lambda);
        let step_kd = 0.1 * (1.0 + 0.5 * self.lambda);
        let max_overthrow = self.config.max_overthrow_percent;

        let n = self.phase_drop_count;
        let records_len = self.records.len();
        let last = self.records[records_len - 1];
        let score = last.overall_score;

        let search = self.phase1.as_mut().expect("phase1 active");
        if score > search.best_score {
            search.best_score = score;
            search.best_gains = search.gains;
        }

        if n == 1 {
            let scale = if score < 70.0 { 1.5 } else { 1.0 };
            search.last_kp_delta = step_kp * scale;
            search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
        } else if n == 2 {
            let prev = self.records[records_len - 2];
            let gradient = score - prev.overall_score;
            if score > 80.0 {
                search.last_kd_delta = 0.0;
                search.last_kp_delta = 0.0;
                // handled by lambda adjustment below
            } else if gradient > 5.0 {
                search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
            } else if !last.is_overthrow_acceptable(max_overthrow) {
                search.last_kp_delta = -step_kp;
                search.last_kd_delta = step_kd;
                search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
                search.gains.kd = (search.gains.kd + search.last_kd_delta).clamp(0.0, 100.0);
            } else if libm_abs(last.overthrow_percent) < 1.0 {
                search.last_kp_delta = step_kp;
                search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
            } else {
                search.last_kd_delta = step_kd;
                search.gains.kd = (search.gains.kd + search.last_kd_delta).clamp(0.0, 100.0);
            }
            if score > 80.0 {
                self.lambda = (self.lambda * 0.5).max(MIN_LAMBDA);
            }
        } else {
            let prev = self.records[records_len - 2];
            let delta_score = score - prev.overall_score;
            if delta_score <= -2.0 {
                search.last_kp_delta = -search.last_kp_delta;
                search.last_kd_delta = -search.last_kd_delta;
                search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
                search.gains.kd = (search.gains.kd + search.last_kd_delta).clamp(0.0, 100.0);
                self.lambda = (self.lambda * 1.5).min(MAX_LAMBDA);
            } else if delta_score > 0.0 {
                self.lambda = (self.lambda * 0.7).max(MIN_LAMBDA);
                if !last.is_overthrow_acceptable(max_overthrow) {
                    search.last_kd_delta = step_kd;
                    search.gains.kd = (search.gains.kd + search.last_kd_delta).clamp(0.0, 100.0);
                } else if total_time_over_target(&last, self.config.target_total_time_ms) {
                    search.last_kp_delta = step_kp;
                    search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
                }
            }
        }
    }

    fn step_phase2(&mut self) {
        let step_kp = 0.05 * (1.0 + self.lambda);
        let step_kd = 0.05 * (1.0 + 0.5 * self.lambda);
        let max_overthrow = self.config.max_overthrow_percent * 0.5;

        let n = self.phase_drop_count;
        let records_len = self.records.len();
        let last = self.records[records_len - 1];
        let score = last.overall_score;

        let search = self.phase2.as_mut().expect("phase2 active");
        if score > search.best_score {
            search.best_score = score;
            search.best_gains = search.gains;
        }

        if n == 1 {
            let scale = if score < 70.0 { 1.5 } else { 1.0 };
            search.last_kp_delta = step_kp * scale;
            search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
        } else if n == 2 {
            let prev = self.records[records_len - 2];
            let gradient = score - prev.overall_score;
            if score > 85.0 {
                // exploitation, lambda lowered below
            } else if gradient > 5.0 {
                search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
            } else if !last.is_overthrow_acceptable(max_overthrow) {
                search.last_kp_delta = -step_kp;
                search.last_kd_delta = step_kd;
                search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
                search.gains.kd = (search.gains.kd + search.last_kd_delta).clamp(0.0, 100.0);
            } else if libm_abs(last.overthrow_percent) < 0.5 {
                search.last_kp_delta = step_kp;
                search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
            } else {
                search.last_kd_delta = step_kd;
                search.gains.kd = (search.gains.kd + search.last_kd_delta).clamp(0.0, 100.0);
            }
            if score > 85.0 {
                self.lambda = (self.lambda * 0.5).max(MIN_LAMBDA);
            }
        } else {
            let prev = self.records[records_len - 2];
            let delta_score = score - prev.overall_score;
            if delta_score <= -2.0 {
                search.last_kp_delta = -search.last_kp_delta;
                search.last_kd_delta = -search.last_kd_delta;
                search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
                search.gains.kd = (search.gains.kd + search.last_kd_delta).clamp(0.0, 100.0);
                self.lambda = (self.lambda * 1.5).min(MAX_LAMBDA);
            } else if delta_score > 0.0 {
                self.lambda = (self.lambda * 0.7).max(MIN_LAMBDA);
                if !last.is_overthrow_acceptable(max_overthrow) {
                    search.last_kd_delta = step_kd;
                    search.gains.kd = (search.gains.kd + search.last_kd_delta).clamp(0.0, 100.0);
                } else if total_time_over_target(&last, self.config.target_total_time_ms) {
                    search.last_kp_delta = step_kp;
                    search.gains.kp = (search.gains.kp + search.last_kp_delta).clamp(0.0, 100.0);
                }
            }
        }
    }

    fn check_convergence(&mut self) {
        if self.phase_drop_count < MIN_DROPS_PER_PHASE {
            return;
        }
        let max_overthrow = match self.phase {
            Phase::Phase2Fine => self.config.max_overthrow_percent * 0.5,
            _ => self.config.max_overthrow_percent,
        };
        let records = self.phase_records();
        let len = records.len();
        let a = records[len - 2];
        let b = records[len - 1];

        let excellent = libm_abs(a.overthrow_percent) < 3.0
            && libm_abs(b.overthrow_percent) < 3.0
            && a.overall_score > 80.0
            && b.overall_score > 80.0;
        let good_stable = a.is_overthrow_acceptable(max_overthrow)
            && b.is_overthrow_acceptable(max_overthrow)
            && (b.overall_score - a.overall_score) >= -1.0;

        let streak_hit = if b.is_overthrow_acceptable(max_overthrow) && b.overall_score > 75.0 {
            let counter = self.phase_consecutive_good_mut();
            *counter += 1;
            *counter >= 2
        } else {
            *self.phase_consecutive_good_mut() = 0;
            false
        };

        let forced = self.phase_drop_count >= FORCE_CONVERGE_DROPS;

        if excellent || good_stable || streak_hit || forced {
            self.converge_phase();
        }
    }

    fn phase_consecutive_good_mut(&mut self) -> &mut u32 {
        match self.phase {
            Phase::Phase1Coarse => &mut self.phase1.as_mut().expect("phase1 active").consecutive_good,
            Phase::Phase2Fine => &mut self.phase2.as_mut().expect("phase2 active").consecutive_good,
            _ => unreachable!("convergence only runs while a phase is active"),
        }
    }

    fn converge_phase(&mut self) {
        match self.phase {
            Phase::Phase1Coarse => {
                let best = self.phase1.as_ref().expect("phase1 active").best_gains;
                self.recommended_coarse = Some(best);
                #[cfg(feature = "embedded")]
                defmt::println!(
                    "tuning: phase 1 complete, best coarse kp={} kd={}, starting phase 2",
                    best.kp,
                    best.kd
                );
                self.phase2 = Some(PhaseSearch::new(self.base_fine_gains));
                self.phase2_start_index = Some(self.records.len());
                self.phase_drop_count = 0;
                self.lambda = self.config.initial_lambda;
                self.phase = Phase::Phase2Fine;
            }
            Phase::Phase2Fine => {
                let best = self.phase2.as_ref().expect("phase2 active").best_gains;
                self.recommended_fine = Some(best);
                self.stats = Some(self.compute_stats());
                #[cfg(feature = "embedded")]
                defmt::println!(
                    "tuning: phase 2 complete, best fine kp={} kd={}, session done",
                    best.kp,
                    best.kd
                );
                self.phase = Phase::Complete;
            }
            _ => {}
        }
    }

    fn compute_stats(&self) -> TuningStats {
        let records = self.phase_records();
        let count = records.len().max(1) as f32;
        let sum_overthrow: f32 = records.iter().map(|r| libm_abs(r.overthrow_percent)).sum();
        let sum_time: f32 = records.iter().map(|r| r.total_time_ms as f32).sum();
        let max_overthrow = records
            .iter()
            .map(|r| libm_abs(r.overthrow_percent))
            .fold(f32::MIN, f32::max);
        let min_overthrow = records
            .iter()
            .map(|r| libm_abs(r.overthrow_percent))
            .fold(f32::MAX, f32::min);
        let avg_overthrow = sum_overthrow / count;
        let avg_time = sum_time / count;
        let consistency =
            (1.0 - (max_overthrow - min_overthrow) / avg_overthrow.max(0.01)).clamp(0.0, 1.0) * 100.0;

        TuningStats {
            average_overthrow_percent: avg_overthrow,
            average_time_ms: avg_time,
            consistency,
        }
    }
}

impl Default for TuningSession {
    fn default() -> Self {
        Self::new()
    }
}

fn total_time_over_target(record: &TelemetryRecord, target_total_time_ms: f32) -> bool {
    record.total_time_ms as f32 > target_total_time_ms
}

fn libm_abs(v: f32) -> f32 {
    if v < 0.0 {
        -v
    } else {
        v
    }
}
