// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Cross-module integration tests for the OTA pipeline: firmware manager,
//! metadata store, and flash device wired together the way the boot
//! protocol and the HTTP adapters actually use them.

use trickler_common::flash::SimFlash;
use trickler_common::layout::Bank;
use trickler_common::metadata::{MetadataStore, MAX_BOOT_ATTEMPTS};
use trickler_common::{FirmwareError, FirmwareManager, UpdateState};

fn version(s: &str) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[..s.len()].copy_from_slice(s.as_bytes());
    buf
}

fn image_of(len: usize) -> heapless::Vec<u8, 8192> {
    (0u8..=255).cycle().take(len).collect()
}

#[test]
fn cancel_mid_receive_leaves_target_invalid_and_store_idle() {
    let mut flash = SimFlash::new();
    let mut store = MetadataStore::open(&mut flash).unwrap();
    let mut mgr = FirmwareManager::new();

    mgr.start_update(2048, &mut store, &mut flash).unwrap();
    let image = image_of(500);
    mgr.write_chunk(&image, &mut flash).unwrap();

    mgr.cancel_update(&mut store, &mut flash).unwrap();

    assert_eq!(mgr.state(), UpdateState::Idle);
    assert!(!store.current().update_in_progress);
    let target = store.current().active_bank.opposite();
    assert!(!store.current().bank(target).valid);
}

#[test]
fn interrupted_update_is_cleared_by_boot_protocol() {
    let mut flash = SimFlash::new();
    let mut store = MetadataStore::open(&mut flash).unwrap();
    let mut mgr = FirmwareManager::new();

    mgr.start_update(1024, &mut store, &mut flash).unwrap();
    mgr.write_chunk(&image_of(300), &mut flash).unwrap();
    // Simulate a power cut mid-receive: update_in_progress is still set in
    // metadata, but no process is left to call finalize/cancel.
    assert!(store.current().update_in_progress);

    let rebooted = FirmwareManager::run_boot_protocol(&mut store, &mut flash).unwrap();
    assert!(!rebooted);
    assert!(!store.current().update_in_progress);
    let target = store.current().active_bank.opposite();
    assert!(!store.current().bank(target).valid);
}

#[test]
fn full_upload_activate_rollback_cycle() {
    let mut flash = SimFlash::new();
    let mut store = MetadataStore::open(&mut flash).unwrap();
    let mut mgr = FirmwareManager::new();

    let image = image_of(4096);
    mgr.start_update(image.len() as u32, &mut store, &mut flash).unwrap();
    for chunk in image.chunks(256) {
        mgr.write_chunk(chunk, &mut flash).unwrap();
    }
    let crc = trickler_common::crc32::crc32(&image);
    mgr.finalize_update(crc, version("2.0.0"), &mut store, &mut flash).unwrap();

    let original_active = store.current().active_bank;
    let new_active = mgr.activate(&mut store, &mut flash).unwrap();
    assert_eq!(new_active, original_active.opposite());

    // Reopening flash from scratch must see the same activation.
    let reopened = MetadataStore::open(&mut flash).unwrap();
    assert_eq!(reopened.current().active_bank, new_active);

    let rolled_back = mgr.rollback(&mut store, &mut flash).unwrap();
    assert_eq!(rolled_back, original_active);
    assert!(store.did_rollback_occur());
}

#[test]
fn rollback_without_a_valid_opposite_bank_fails() {
    let mut flash = SimFlash::new();
    let mut store = MetadataStore::open(&mut flash).unwrap();
    let mut mgr = FirmwareManager::new();

    assert_eq!(
        mgr.rollback(&mut store, &mut flash),
        Err(FirmwareError::Metadata(
            trickler_common::MetadataError::NoValidOppositeBank
        ))
    );
}

#[test]
fn boot_attempts_past_the_limit_trigger_automatic_rollback() {
    let mut flash = SimFlash::new();
    let mut store = MetadataStore::open(&mut flash).unwrap();
    store.mark_bank_valid(Bank::B, 7, 7, version("b"), &mut flash).unwrap();
    store.set_active_bank(Bank::B, &mut flash).unwrap();

    let mut rebooted = false;
    for _ in 0..=(MAX_BOOT_ATTEMPTS as u32) {
        rebooted = FirmwareManager::run_boot_protocol(&mut store, &mut flash).unwrap();
        if rebooted {
            break;
        }
    }

    assert!(rebooted);
    assert_eq!(store.current().active_bank, Bank::A);
}
