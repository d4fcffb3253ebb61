//! Collaborator interfaces of the blockchain synchroniser.
//!
//! The synchroniser owns the authoritative view of the account's outputs (the
//! transfers container) and pushes transaction lifecycle callbacks into the
//! wallet on its own thread. The wallet only ever talks to these traits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::account::AccountPublicKeys;
use crate::Hash;

/// Block height marker for transactions that are not in a block yet.
pub const UNCONFIRMED_HEIGHT: u32 = u32::MAX;

/// Output selection flags, combined with `|`.
pub mod include {
    /// Plain key outputs.
    pub const KEY: u32 = 1;
    /// Term-deposit outputs.
    pub const DEPOSIT: u32 = 1 << 1;
    /// Outputs still inside their lock term.
    pub const STATE_LOCKED: u32 = 1 << 2;
    /// On-chain outputs inside the maturity window.
    pub const STATE_SOFT_LOCKED: u32 = 1 << 3;
    /// Spendable outputs.
    pub const STATE_UNLOCKED: u32 = 1 << 4;
    /// Any state.
    pub const STATE_ALL: u32 = STATE_LOCKED | STATE_SOFT_LOCKED | STATE_UNLOCKED;
    /// Spendable key outputs.
    pub const KEY_UNLOCKED: u32 = KEY | STATE_UNLOCKED;
    /// Key outputs that are not spendable yet.
    pub const KEY_NOT_UNLOCKED: u32 = KEY | STATE_LOCKED | STATE_SOFT_LOCKED;
}

/// Where the synchroniser starts scanning for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncStart {
    pub height: u32,
    pub timestamp: u64,
}

/// Account registration handed to the synchroniser.
#[derive(Clone, Debug)]
pub struct AccountSubscription {
    pub keys: AccountPublicKeys,
    pub sync_start: SyncStart,
    pub transaction_spendable_age: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    Key,
    Deposit,
}

/// One output as the container reports it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionOutputInformation {
    pub output_type: OutputType,
    pub amount: u64,
    /// Deposit term in blocks; zero for key outputs.
    pub term: u32,
    /// Hash of the transaction that created the output.
    pub transaction_hash: Hash,
    /// Index of the output inside that transaction.
    pub output_in_transaction: u32,
}

/// Chain-level facts about one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInformation {
    pub hash: Hash,
    /// [`UNCONFIRMED_HEIGHT`] while the transaction sits in the mempool.
    pub block_height: u32,
    pub timestamp: u64,
    pub unlock_time: u64,
    pub extra: Vec<u8>,
}

/// The synchroniser-owned authoritative view of outputs and spends for a
/// subscribed account.
pub trait TransfersContainer: Send + Sync {
    /// Total amount of outputs matching `flags`.
    fn balance(&self, flags: u32) -> u64;
    /// All outputs matching `flags`.
    fn outputs(&self, flags: u32) -> Vec<TransactionOutputInformation>;
    /// Chain facts plus the account's (amount in, amount out) for one
    /// transaction, or `None` if the container has never seen it.
    fn transaction_information(&self, hash: &Hash)
        -> Option<(TransactionInformation, u64, u64)>;
    /// Outputs created by one transaction, filtered by `flags`.
    fn transaction_outputs(&self, hash: &Hash, flags: u32) -> Vec<TransactionOutputInformation>;
    /// Previously owned outputs consumed by one transaction, filtered by
    /// `flags`.
    fn transaction_inputs(&self, hash: &Hash, flags: u32) -> Vec<TransactionOutputInformation>;
}

/// The lower-level blockchain synchroniser.
pub trait BlockchainSync: Send + Sync {
    /// Register an account and borrow its transfers container.
    fn subscribe(&self, subscription: AccountSubscription) -> Arc<dyn TransfersContainer>;
    /// Drop the registration for `address`.
    fn unsubscribe(&self, address: &str);
    fn start(&self) -> Result<(), SyncError>;
    fn stop(&self);
    /// Snapshot the synchroniser's internal state as an opaque blob.
    fn save(&self) -> Vec<u8>;
    /// Restore a blob produced by [`BlockchainSync::save`].
    fn load(&self, blob: &[u8]) -> Result<(), SyncError>;
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The synchroniser was stopped mid-run; completion callbacks carrying
    /// this are swallowed rather than surfaced to observers.
    #[error("synchronization interrupted")]
    Interrupted,
    #[error("synchronizer failure: {0}")]
    Failed(String),
    #[error("malformed synchronizer state blob")]
    MalformedState,
}
