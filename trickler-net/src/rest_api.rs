// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! JSON response shapes of the HTTP API (spec §6.3). This crate does not
//! implement the HTTP server or REST demultiplexer itself (out of scope,
//! spec §1) — it only serializes the bodies the server writes back, and
//! decides success/error status from the underlying component results.
//!
//! Requires `std` (the server-facing half of this crate): `serde_json`
//! needs an allocator, and the HTTP server this plugs into is a host-side
//! collaborator by construction.

use serde::Serialize;

use trickler_common::flash::FlashDevice;
use trickler_common::metadata::MetadataStore;
use trickler_common::tuning::{Phase, TuningSession};
use trickler_common::{Bank, FirmwareManager};

/// `HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n` (spec §6.3);
/// errors are embedded in the JSON body rather than the status line.
pub const RESPONSE_PREAMBLE: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n";

/// Prefixes a JSON body with the fixed §6.3 preamble.
pub fn http_response(body: &str) -> String {
    let mut out = String::with_capacity(RESPONSE_PREAMBLE.len() + body.len());
    out.push_str(RESPONSE_PREAMBLE);
    out.push_str(body);
    out
}

#[derive(Serialize)]
struct SuccessEnvelope<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

/// `{"success":false,"error":"<message>"}`, HTTP 200 (spec §6.3: "Error
/// responses use status-embedded JSON").
pub fn error_body(message: &str) -> String {
    #[derive(Serialize)]
    struct ErrorEnvelope<'a> {
        success: bool,
        error: &'a str,
    }
    serde_json::to_string(&ErrorEnvelope { success: false, error: message }).expect("serializes")
}

pub fn success_body(message: Option<&str>) -> String {
    serde_json::to_string(&SuccessEnvelope { success: true, message }).expect("serializes")
}

fn version_str(bytes: &[u8; 32]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    core::str::from_utf8(&bytes[..end]).unwrap_or("").to_string()
}

fn hex_crc(crc: u32) -> String {
    format!("{crc:08x}")
}

#[derive(Serialize)]
pub struct BankInfoBody {
    pub valid: bool,
    pub size: u32,
    pub crc32: String,
    pub version: String,
    pub boot_count: u8,
}

#[derive(Serialize)]
pub struct UpdateStatusBody {
    pub state: &'static str,
    pub progress: u8,
    pub target_bank: Option<&'static str>,
    pub bytes_received: u32,
    pub total_bytes: u32,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct FirmwareStatusBody {
    pub current_bank: &'static str,
    pub bank_a: BankInfoBody,
    pub bank_b: BankInfoBody,
    pub update_status: UpdateStatusBody,
    pub rollback_occurred: bool,
}

fn bank_name(bank: Bank) -> &'static str {
    match bank {
        Bank::A => "A",
        Bank::B => "B",
    }
}

fn update_state_name(state: trickler_common::UpdateState) -> &'static str {
    use trickler_common::UpdateState::*;
    match state {
        Idle => "idle",
        Preparing => "preparing",
        Erasing => "erasing",
        Receiving => "receiving",
        Validating => "validating",
        Complete => "complete",
        Error => "error",
    }
}

fn bank_info_body(rec: &trickler_common::metadata::BankRecord) -> BankInfoBody {
    BankInfoBody {
        valid: rec.valid,
        size: rec.size,
        crc32: hex_crc(rec.crc32),
        version: version_str(&rec.version_string),
        boot_count: rec.boot_count,
    }
}

/// `GET /rest/firmware_status` (spec §6.3).
pub fn firmware_status_body<F: FlashDevice>(
    manager: &FirmwareManager,
    store: &MetadataStore,
    _flash: &F,
) -> FirmwareStatusBody {
    let md = store.current();
    let status = manager.status();

    FirmwareStatusBody {
        current_bank: bank_name(md.active_bank),
        bank_a: bank_info_body(md.bank(Bank::A)),
        bank_b: bank_info_body(md.bank(Bank::B)),
        update_status: UpdateStatusBody {
            state: update_state_name(status.state),
            progress: manager.progress_percent(),
            target_bank: status.target_bank.map(bank_name),
            bytes_received: status.bytes_received,
            total_bytes: status.expected_size,
            error: None,
        },
        rollback_occurred: md.rollback_occurred,
    }
}

pub fn firmware_status_json<F: FlashDevice>(manager: &FirmwareManager, store: &MetadataStore, flash: &F) -> String {
    serde_json::to_string(&firmware_status_body(manager, store, flash)).expect("serializes")
}

#[derive(Serialize)]
pub struct GainsBody {
    pub coarse_kp: f32,
    pub coarse_kd: f32,
    pub fine_kp: f32,
    pub fine_kd: f32,
}

#[derive(Serialize)]
pub struct TuningStatsBody {
    pub average_overthrow_percent: f32,
    pub average_time_ms: f32,
    pub consistency: f32,
}

#[derive(Serialize)]
pub struct AiTuningStatusBody {
    pub phase: &'static str,
    pub drops_completed: u32,
    pub total_drops_target: u32,
    pub max_drops_allowed: u32,
    pub progress_percent: u8,
    pub current_gains: Option<GainsBody>,
    pub recommended_gains: Option<GainsBody>,
    pub stats: Option<TuningStatsBody>,
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "idle",
        Phase::Phase1Coarse => "phase1-coarse",
        Phase::Phase2Fine => "phase2-fine",
        Phase::Complete => "complete",
        Phase::Error => "error",
    }
}

fn gains_body(g: trickler_common::telemetry::Gains4) -> GainsBody {
    GainsBody { coarse_kp: g.coarse_kp, coarse_kd: g.coarse_kd, fine_kp: g.fine_kp, fine_kd: g.fine_kd }
}

/// `GET /rest/ai_tuning_status` (spec §6.3).
pub fn ai_tuning_status_body(session: &TuningSession) -> AiTuningStatusBody {
    let cfg = session.config();
    let progress_percent = if cfg.total_drops_target == 0 {
        0
    } else {
        ((session.drops_completed() as u64 * 100) / cfg.total_drops_target as u64).min(100) as u8
    };

    AiTuningStatusBody {
        phase: phase_name(session.phase()),
        drops_completed: session.drops_completed(),
        total_drops_target: cfg.total_drops_target,
        max_drops_allowed: cfg.max_drops_allowed,
        progress_percent,
        current_gains: session.next_gains().map(gains_body),
        recommended_gains: session.recommended().map(gains_body),
        stats: session.stats().map(|s| TuningStatsBody {
            average_overthrow_percent: s.average_overthrow_percent,
            average_time_ms: s.average_time_ms,
            consistency: s.consistency,
        }),
    }
}

pub fn ai_tuning_status_json(session: &TuningSession) -> String {
    serde_json::to_string(&ai_tuning_status_body(session)).expect("serializes")
}

/// Parses the hex `X-Firmware-CRC32` header / `crc32` query parameter
/// (spec §6.3). Accepts an optional `0x` prefix.
pub fn parse_hex_crc32(s: &str) -> Option<u32> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trickler_common::flash::SimFlash;

    #[test]
    fn firmware_status_reports_active_bank_and_validity() {
        let mut flash = SimFlash::new();
        let store = MetadataStore::open(&mut flash).unwrap();
        let manager = FirmwareManager::new();

        let body = firmware_status_body(&manager, &store, &flash);
        assert_eq!(body.current_bank, "A");
        assert!(body.bank_a.valid);
        assert!(!body.bank_b.valid);
        assert!(!body.rollback_occurred);
    }

    #[test]
    fn error_body_embeds_message_with_success_false() {
        let body = error_body("bank not valid");
        assert!(body.contains("\"success\":false"));
        assert!(body.contains("bank not valid"));
    }

    #[test]
    fn hex_crc32_parses_with_and_without_prefix() {
        assert_eq!(parse_hex_crc32("deadbeef"), Some(0xDEADBEEF));
        assert_eq!(parse_hex_crc32("0xDEADBEEF"), Some(0xDEADBEEF));
        assert_eq!(parse_hex_crc32("not-hex"), None);
    }

    #[test]
    fn ai_tuning_status_reports_idle_before_start() {
        let session = TuningSession::new();
        let body = ai_tuning_status_body(&session);
        assert_eq!(body.phase, "idle");
        assert_eq!(body.drops_completed, 0);
        assert!(body.recommended_gains.is_none());
    }
}
