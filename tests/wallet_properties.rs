//! Property tests for the engine's externally visible invariants: balance
//! event emission, persistence round-trips, and password handling.

mod common;

use std::io::Cursor;

use proptest::prelude::*;

use obol::sender::TransferOrder;
use obol::wallet::SharedBuffer;

use common::{harness, OutputState};

fn proptest_config(cases: u32) -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(cases);
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

/// Remove adjacent duplicates and drop the leading run equal to `initial`;
/// this is exactly the event series the notification rule promises.
fn expected_events(trajectory: &[u64], initial: u64) -> Vec<u64> {
    let mut expected = Vec::new();
    let mut last = initial;
    for value in trajectory {
        if *value != last {
            expected.push(*value);
            last = *value;
        }
    }
    expected
}

proptest! {
    #![proptest_config(proptest_config(24))]

    /// The emitted balance values are the computed trajectory
    /// with equal adjacent values collapsed; never an equal adjacent pair.
    #[test]
    fn balance_events_follow_the_value_trajectory(
        balances in prop::collection::vec(0u64..1_000_000, 1..12)
    ) {
        let h = harness();
        h.wallet.init_and_generate("pw").unwrap();
        h.observer.clear();

        let mut trajectory = Vec::new();
        for (round, amount) in balances.iter().enumerate() {
            h.container.clear_key_outputs();
            if *amount > 0 {
                h.container.add_key_output(
                    [round as u8 + 1; 32],
                    0,
                    *amount,
                    OutputState::Unlocked,
                );
            }
            trajectory.push(h.wallet.actual_balance().unwrap());
            h.wallet
                .synchronization_progress_updated(round as u32 + 1, 100);
        }

        let actual_series = h.observer.actual_balance_series();
        prop_assert_eq!(&actual_series, &expected_events(&trajectory, 0));
        prop_assert!(actual_series.windows(2).all(|w| w[0] != w[1]));
        let pending_series = h.observer.pending_balance_series();
        prop_assert!(pending_series.windows(2).all(|w| w[0] != w[1]));
    }
}

proptest! {
    #![proptest_config(proptest_config(4))]

    /// A detailed save followed by a load reproduces the cache.
    #[test]
    fn save_load_roundtrip_preserves_the_cache(
        amounts in prop::collection::vec(1u64..1_000_000, 1..6),
        spend in any::<bool>(),
    ) {
        let h = harness();
        h.wallet.init_and_generate("pw").unwrap();
        for (i, amount) in amounts.iter().enumerate() {
            h.confirm_incoming([i as u8 + 1; 32], *amount, i as u32 + 1);
        }
        if spend {
            let order = [TransferOrder { address: "oblpeer".into(), amount: 1 }];
            h.wallet
                .send_transaction(&order, 0, vec![], 0, 0, vec![], 0)
                .unwrap();
            h.observer.wait_for_send_completed().1.unwrap();
        }

        let tx_count = h.wallet.transaction_count().unwrap();
        let transfer_count = h.wallet.transfer_count().unwrap();
        let deposit_count = h.wallet.deposit_count().unwrap();
        let actual = h.wallet.actual_balance().unwrap();
        let pending = h.wallet.pending_balance().unwrap();
        let hashes: Vec<_> = (0..tx_count)
            .map(|i| {
                h.wallet
                    .get_transaction(obol::cache::TransactionId(i))
                    .unwrap()
                    .unwrap()
                    .hash
            })
            .collect();

        let buffer = SharedBuffer::new();
        h.wallet.save(buffer.clone(), true, true).unwrap();
        h.observer.wait_for_save().unwrap();
        h.wallet.shutdown().unwrap();
        h.observer.clear();
        h.wallet
            .init_and_load(Cursor::new(buffer.take()), "pw")
            .unwrap();
        h.observer.wait_for_init().unwrap();

        prop_assert_eq!(h.wallet.transaction_count().unwrap(), tx_count);
        prop_assert_eq!(h.wallet.transfer_count().unwrap(), transfer_count);
        prop_assert_eq!(h.wallet.deposit_count().unwrap(), deposit_count);
        prop_assert_eq!(h.wallet.actual_balance().unwrap(), actual);
        prop_assert_eq!(h.wallet.pending_balance().unwrap(), pending);
        for (i, hash) in hashes.iter().enumerate() {
            prop_assert_eq!(
                &h.wallet
                    .get_transaction(obol::cache::TransactionId(i))
                    .unwrap()
                    .unwrap()
                    .hash,
                hash
            );
        }
    }
}

proptest! {
    #![proptest_config(proptest_config(3))]

    /// After a password change, only the new password opens the
    /// saved wallet.
    #[test]
    fn only_the_new_password_opens_a_resaved_wallet(
        old in "[a-z]{1,12}",
        new in "[A-Z]{1,12}",
    ) {
        let h = harness();
        h.wallet.init_and_generate(&old).unwrap();
        h.wallet.change_password(&old, &new).unwrap();

        let buffer = SharedBuffer::new();
        h.wallet.save(buffer.clone(), false, false).unwrap();
        h.observer.wait_for_save().unwrap();
        h.wallet.shutdown().unwrap();
        let bytes = buffer.take();
        h.observer.clear();

        h.wallet
            .init_and_load(Cursor::new(bytes.clone()), &old)
            .unwrap();
        prop_assert_eq!(
            h.observer.wait_for_init().unwrap_err(),
            obol::error::WalletError::WrongPassword
        );
        h.observer.clear();
        h.wallet.init_and_load(Cursor::new(bytes), &new).unwrap();
        prop_assert!(h.observer.wait_for_init().is_ok());
    }
}
