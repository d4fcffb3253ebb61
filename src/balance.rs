//! Pure balance computations over the transfers container and the cache.
//!
//! Four axes: actual/pending × regular/deposit. Every function is called
//! under the façade mutex and uses saturating arithmetic so a transiently
//! inconsistent container can never produce a negative observable balance.

use crate::cache::TransactionCache;
use crate::currency::Currency;
use crate::sync::{include, TransactionOutputInformation, TransfersContainer};

/// Spendable funds: unlocked container balance minus outputs already locked
/// into pending transactions.
pub fn actual_balance(container: &dyn TransfersContainer, cache: &TransactionCache) -> u64 {
    container
        .balance(include::KEY_UNLOCKED)
        .saturating_sub(cache.unconfirmed_outs_amount())
}

/// Funds on their way back: locked container balance, plus change from
/// pending transactions, plus interest of deposits being withdrawn.
pub fn pending_balance(container: &dyn TransfersContainer, cache: &TransactionCache) -> u64 {
    let change = cache
        .unconfirmed_outs_amount()
        .saturating_sub(cache.unconfirmed_transactions_amount());
    container
        .balance(include::KEY_NOT_UNLOCKED)
        .saturating_add(change)
        .saturating_add(cache.count_unconfirmed_spent_deposits_profit())
}

/// Withdrawable deposits: principal plus interest of unlocked deposit
/// outputs, minus deposits already being withdrawn.
pub fn actual_deposit_balance(
    container: &dyn TransfersContainer,
    cache: &TransactionCache,
    currency: &Currency,
) -> u64 {
    let outputs = container.outputs(include::DEPOSIT | include::STATE_UNLOCKED);
    deposits_amount(container, currency, &outputs)
        .saturating_sub(cache.count_unconfirmed_spent_deposits_total_amount())
}

/// Deposits still maturing: principal plus interest of locked and soft-locked
/// deposit outputs, plus the principal of unconfirmed deposit creations.
pub fn pending_deposit_balance(
    container: &dyn TransfersContainer,
    cache: &TransactionCache,
    currency: &Currency,
) -> u64 {
    let outputs =
        container.outputs(include::DEPOSIT | include::STATE_LOCKED | include::STATE_SOFT_LOCKED);
    deposits_amount(container, currency, &outputs)
        .saturating_add(cache.count_unconfirmed_created_deposits_sum())
}

/// Sum of `amount + interest(amount, term, creation height)` over deposit
/// outputs. Heights are looked up per creating transaction.
fn deposits_amount(
    container: &dyn TransfersContainer,
    currency: &Currency,
    outputs: &[TransactionOutputInformation],
) -> u64 {
    outputs.iter().fold(0u64, |sum, output| {
        let height = container
            .transaction_information(&output.transaction_hash)
            .map(|(info, _, _)| info.block_height)
            .unwrap_or(0);
        sum.saturating_add(output.amount)
            .saturating_add(currency.calculate_interest(output.amount, output.term, height))
    })
}
