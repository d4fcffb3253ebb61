//! Currency parameter table consumed by the wallet core.
//!
//! The engine never hardcodes consensus values: deposit bounds, interest
//! rates, and mempool lifetimes all come from this table so tests and
//! alternative networks can swap them.

use crate::account::AccountPublicKeys;
use crate::hash_domain;

/// Basis points in one whole (100%).
const BPS_DENOMINATOR: u128 = 10_000;

/// Parameters of the tracked currency.
#[derive(Clone, Debug)]
pub struct Currency {
    /// Human-readable prefix of account addresses.
    pub address_prefix: String,
    /// Seconds an unconfirmed transaction may stay in the mempool before the
    /// cache garbage-collects it.
    pub mempool_tx_live_time: u64,
    /// Confirmations before an output is spendable.
    pub tx_spendable_age: u32,
    /// Minimum principal accepted for a term deposit.
    pub deposit_min_amount: u64,
    /// Minimum deposit term in blocks.
    pub deposit_min_term: u32,
    /// Maximum deposit term in blocks.
    pub deposit_max_term: u32,
    /// Annual deposit interest rate, in basis points.
    pub deposit_rate_bps: u64,
    /// Below this height the rate is doubled (early adopter tier).
    pub deposit_rate_v2_height: u32,
    /// Blocks mined per year at the target block time.
    pub blocks_per_year: u32,
}

impl Default for Currency {
    fn default() -> Self {
        Currency {
            address_prefix: "obl".into(),
            mempool_tx_live_time: 24 * 60 * 60,
            tx_spendable_age: crate::constants::DEFAULT_TX_SPENDABLE_AGE,
            deposit_min_amount: 100,
            deposit_min_term: 10,
            deposit_max_term: 1_000_000,
            deposit_rate_bps: 300,
            deposit_rate_v2_height: 100_000,
            blocks_per_year: 262_800,
        }
    }
}

impl Currency {
    /// Interest accrued by a deposit of `amount` locked for `term` blocks,
    /// created at block `height`. Fixed-point, rounds down.
    pub fn calculate_interest(&self, amount: u64, term: u32, height: u32) -> u64 {
        let rate = if height < self.deposit_rate_v2_height {
            self.deposit_rate_bps.saturating_mul(2)
        } else {
            self.deposit_rate_bps
        };
        let numerator = amount as u128 * rate as u128 * term as u128;
        let denominator = self.blocks_per_year as u128 * BPS_DENOMINATOR;
        u64::try_from(numerator / denominator).unwrap_or(u64::MAX)
    }

    pub fn is_valid_deposit_term(&self, term: u32) -> bool {
        (self.deposit_min_term..=self.deposit_max_term).contains(&term)
    }

    pub fn is_valid_deposit_amount(&self, amount: u64) -> bool {
        amount >= self.deposit_min_amount
    }

    /// Render an account's public keys as an address string.
    pub fn account_address(&self, keys: &AccountPublicKeys) -> String {
        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(keys.spend.as_bytes());
        material.extend_from_slice(keys.view.as_bytes());
        let digest = hash_domain(b"obol.address", &material);
        format!("{}{}", self.address_prefix, hex::encode(digest))
    }
}
