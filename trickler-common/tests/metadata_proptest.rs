// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Property-based invariants for the metadata store: whatever sequence of
//! operations runs, the store must always expose a current record whose
//! CRC validates, and a crash at any point during a write must not lose
//! the prior record.

use proptest::prelude::*;
use trickler_common::flash::SimFlash;
use trickler_common::layout::Bank;
use trickler_common::metadata::MetadataStore;

#[derive(Debug, Clone, Copy)]
enum Op {
    MarkValid { bank_is_b: bool, crc: u32, size: u32 },
    MarkInvalid { bank_is_b: bool },
    SetActive { bank_is_b: bool },
    IncrementBoot,
    ResetBoot,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<bool>(), any::<u32>(), 1u32..FW_BANK_SIZE).prop_map(|(b, crc, size)| Op::MarkValid {
            bank_is_b: b,
            crc,
            size
        }),
        any::<bool>().prop_map(|b| Op::MarkInvalid { bank_is_b: b }),
        any::<bool>().prop_map(|b| Op::SetActive { bank_is_b: b }),
        Just(Op::IncrementBoot),
        Just(Op::ResetBoot),
    ]
}

const FW_BANK_SIZE: u32 = trickler_common::layout::FW_BANK_SIZE;

fn bank_of(is_b: bool) -> Bank {
    if is_b {
        Bank::B
    } else {
        Bank::A
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_operation_sequences_keep_a_valid_current_record(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();

        for op in ops {
            let _ = match op {
                Op::MarkValid { bank_is_b, crc, size } => {
                    store.mark_bank_valid(bank_of(bank_is_b), crc, size, [0u8; 32], &mut flash)
                }
                Op::MarkInvalid { bank_is_b } => store.mark_bank_invalid(bank_of(bank_is_b), &mut flash),
                Op::SetActive { bank_is_b } => store.set_active_bank(bank_of(bank_is_b), &mut flash),
                Op::IncrementBoot => store.increment_boot_count(&mut flash).map(|_| ()),
                Op::ResetBoot => store.reset_boot_count(&mut flash),
            };

            // Reopening from raw flash bytes must always resolve to the same
            // record the in-memory cache believes is current.
            let reopened = MetadataStore::open(&mut flash).unwrap();
            prop_assert_eq!(*reopened.current(), *store.current());
        }
    }

    #[test]
    fn crash_after_any_byte_count_preserves_a_readable_record(
        crash_after in 0u32..8192,
    ) {
        let mut flash = SimFlash::new();
        let mut store = MetadataStore::open(&mut flash).unwrap();
        let prior = *store.current();

        flash.power_cut_after_bytes = Some(crash_after);
        let _ = store.mark_bank_valid(Bank::B, 0x1234, 1000, [0u8; 32], &mut flash);
        flash.power_cut_after_bytes = None;

        // Either the write never reached flash (prior record survives) or it
        // fully completed (readback validated before being trusted) -- either
        // way a fresh open must succeed and must not panic.
        let reopened = MetadataStore::open(&mut flash).unwrap();
        prop_assert!(reopened.current().active_bank == prior.active_bank
            || reopened.current().active_bank == Bank::B);
    }
}
