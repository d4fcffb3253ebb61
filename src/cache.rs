//! Locally known transactions, transfers, and deposits.
//!
//! The cache is the wallet's source of truth between synchroniser pushes: it
//! records outgoing transactions the moment they are signed, reconciles them
//! with authoritative on-chain state as it arrives, and produces the event
//! objects describing every observable change. Identifiers are dense,
//! insertion-ordered, and never reused.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::currency::Currency;
use crate::observer::WalletEvent;
use crate::sync::{TransactionInformation, TransactionOutputInformation, UNCONFIRMED_HEIGHT};
use crate::Hash;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepositId(pub usize);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 32-byte payment id carried in the transaction extra blob.
pub type PaymentId = [u8; 32];

/// Tag byte introducing a payment id in the extra blob.
pub const EXTRA_PAYMENT_ID_TAG: u8 = 0x00;

/// Parse a payment id out of a transaction extra blob: tag byte followed by
/// 32 bytes.
pub fn extract_payment_id(extra: &[u8]) -> Option<PaymentId> {
    if extra.len() >= 33 && extra[0] == EXTRA_PAYMENT_ID_TAG {
        extra[1..33].try_into().ok()
    } else {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionDirection {
    Incoming,
    Outgoing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confirmation {
    Unconfirmed,
    Confirmed { height: u32, timestamp: u64 },
}

/// A message attached to an outgoing transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMessage {
    pub recipient: String,
    pub content: String,
}

/// One cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub hash: Hash,
    pub direction: TransactionDirection,
    /// Signed net effect on the account, fee included.
    pub total_amount: i64,
    pub fee: u64,
    pub confirmation: Confirmation,
    pub created_at: u64,
    pub extra: Vec<u8>,
    pub messages: Vec<TransactionMessage>,
    /// Absolute height past which an unconfirmed transaction is outdated;
    /// zero means the mempool live-time applies instead.
    pub ttl: u32,
    pub transfers: Vec<TransferId>,
    pub deposits: Vec<DepositId>,
    pub is_deleted: bool,
}

/// One recipient of an outgoing transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransfer {
    pub transaction: TransactionId,
    pub address: String,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub creating_transaction: TransactionId,
    pub spending_transaction: Option<TransactionId>,
    /// Lock term in blocks.
    pub term: u32,
    pub amount: u64,
    /// Interest accrued over the full term, fixed at materialisation.
    pub interest: u64,
    pub is_locked: bool,
}

/// A deposit plus the index of its creating output, which is how lock and
/// unlock notifications identify it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositInfo {
    pub deposit: Deposit,
    pub output_in_transaction: u32,
}

/// Transactions grouped under one payment id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payments {
    pub payment_id: PaymentId,
    pub transactions: Vec<TransactionId>,
}

/// Bookkeeping for an outgoing transaction that has not been confirmed yet.
/// The balance calculator reads these sums until the synchroniser takes over.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct UnconfirmedEntry {
    /// Container outputs consumed by the pending transaction; still counted
    /// in the container's balance until confirmation.
    used_outputs_sum: u64,
    /// Amount actually leaving the account (orders plus fee).
    amount_out: u64,
    /// Principal of deposits the transaction creates.
    created_deposits_sum: u64,
    /// Principal plus interest of deposits the transaction withdraws.
    spent_deposits_total: u64,
    /// Interest part of the withdrawn deposits.
    spent_deposits_profit: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UnconfirmedStore {
    entries: HashMap<TransactionId, UnconfirmedEntry>,
}

impl UnconfirmedStore {
    fn remove(&mut self, id: TransactionId) {
        self.entries.remove(&id);
    }

    fn sum_of(&self, field: impl Fn(&UnconfirmedEntry) -> u64) -> u64 {
        self.entries.values().map(field).sum()
    }
}

/// Serialized cache contents for the detailed wallet save.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheSnapshot {
    transactions: Vec<WalletTransaction>,
    transfers: Vec<WalletTransfer>,
    deposits: Vec<DepositInfo>,
    unconfirmed: UnconfirmedStore,
}

pub struct TransactionCache {
    transactions: Vec<WalletTransaction>,
    transfers: Vec<WalletTransfer>,
    deposits: Vec<DepositInfo>,
    by_hash: HashMap<Hash, TransactionId>,
    payment_index: HashMap<PaymentId, Vec<TransactionId>>,
    unconfirmed: UnconfirmedStore,
    /// Blockchain tip hint, fed from synchronisation progress; drives TTL
    /// garbage collection.
    tip_height: u32,
    mempool_tx_live_time: u64,
}

impl TransactionCache {
    pub fn new(mempool_tx_live_time: u64) -> Self {
        TransactionCache {
            transactions: Vec::new(),
            transfers: Vec::new(),
            deposits: Vec::new(),
            by_hash: HashMap::new(),
            payment_index: HashMap::new(),
            unconfirmed: UnconfirmedStore::default(),
            tip_height: 0,
            mempool_tx_live_time,
        }
    }

    /// Drop everything; used on shutdown.
    pub fn reset(&mut self) {
        self.transactions.clear();
        self.transfers.clear();
        self.deposits.clear();
        self.by_hash.clear();
        self.payment_index.clear();
        self.unconfirmed.entries.clear();
        self.tip_height = 0;
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn deposit_count(&self) -> usize {
        self.deposits.len()
    }

    pub fn transaction(&self, id: TransactionId) -> Option<&WalletTransaction> {
        self.transactions.get(id.0)
    }

    pub fn transfer(&self, id: TransferId) -> Option<&WalletTransfer> {
        self.transfers.get(id.0)
    }

    pub fn deposit(&self, id: DepositId) -> Option<&DepositInfo> {
        self.deposits.get(id.0)
    }

    pub fn find_transaction_by_hash(&self, hash: &Hash) -> Option<TransactionId> {
        self.by_hash.get(hash).copied()
    }

    pub fn find_transaction_by_transfer_id(&self, id: TransferId) -> Option<TransactionId> {
        self.transfers.get(id.0).map(|t| t.transaction)
    }

    pub fn transactions_by_payment_ids(&self, payment_ids: &[PaymentId]) -> Vec<Payments> {
        payment_ids
            .iter()
            .map(|pid| Payments {
                payment_id: *pid,
                transactions: self.payment_index.get(pid).cloned().unwrap_or_default(),
            })
            .collect()
    }

    pub fn tip_height(&self) -> u32 {
        self.tip_height
    }

    pub fn set_tip_height(&mut self, height: u32) {
        self.tip_height = height;
    }

    // ── Sender side ────────────────────────────────────────────────────

    /// Register a freshly signed outgoing transaction.
    pub fn add_new_transaction(
        &mut self,
        hash: Hash,
        total_amount: i64,
        fee: u64,
        extra: Vec<u8>,
        messages: Vec<TransactionMessage>,
        ttl: u32,
        created_at: u64,
    ) -> TransactionId {
        let id = TransactionId(self.transactions.len());
        let direction = if total_amount < 0 {
            TransactionDirection::Outgoing
        } else {
            TransactionDirection::Incoming
        };
        if let Some(payment_id) = extract_payment_id(&extra) {
            self.payment_index.entry(payment_id).or_default().push(id);
        }
        self.by_hash.insert(hash, id);
        self.transactions.push(WalletTransaction {
            hash,
            direction,
            total_amount,
            fee,
            confirmation: Confirmation::Unconfirmed,
            created_at,
            extra,
            messages,
            ttl,
            transfers: Vec::new(),
            deposits: Vec::new(),
            is_deleted: false,
        });
        id
    }

    /// Attach a recipient record to an outgoing transaction.
    pub fn push_transfer(
        &mut self,
        transaction: TransactionId,
        address: String,
        amount: u64,
    ) -> TransferId {
        let id = TransferId(self.transfers.len());
        self.transfers.push(WalletTransfer {
            transaction,
            address,
            amount,
        });
        if let Some(tx) = self.transactions.get_mut(transaction.0) {
            tx.transfers.push(id);
        }
        id
    }

    /// Replace a placeholder hash once the transaction is actually signed.
    pub fn set_transaction_hash(&mut self, id: TransactionId, hash: Hash) {
        if let Some(tx) = self.transactions.get_mut(id.0) {
            self.by_hash.remove(&tx.hash);
            tx.hash = hash;
            self.by_hash.insert(hash, id);
        }
    }

    pub fn set_transaction_amount(&mut self, id: TransactionId, total_amount: i64) {
        if let Some(tx) = self.transactions.get_mut(id.0) {
            tx.total_amount = total_amount;
            tx.direction = if total_amount < 0 {
                TransactionDirection::Outgoing
            } else {
                TransactionDirection::Incoming
            };
        }
    }

    /// Link an outgoing transaction to the deposits it withdraws.
    pub fn attach_spent_deposits(&mut self, id: TransactionId, deposit_ids: &[DepositId]) {
        for deposit_id in deposit_ids {
            if let Some(info) = self.deposits.get_mut(deposit_id.0) {
                info.deposit.spending_transaction = Some(id);
            }
        }
        if let Some(tx) = self.transactions.get_mut(id.0) {
            tx.deposits.extend_from_slice(deposit_ids);
        }
    }

    pub fn register_unconfirmed_send(
        &mut self,
        id: TransactionId,
        used_outputs_sum: u64,
        amount_out: u64,
    ) {
        self.unconfirmed.entries.insert(
            id,
            UnconfirmedEntry {
                used_outputs_sum,
                amount_out,
                ..UnconfirmedEntry::default()
            },
        );
    }

    pub fn register_unconfirmed_deposit(
        &mut self,
        id: TransactionId,
        used_outputs_sum: u64,
        amount_out: u64,
        created_deposits_sum: u64,
    ) {
        self.unconfirmed.entries.insert(
            id,
            UnconfirmedEntry {
                used_outputs_sum,
                amount_out,
                created_deposits_sum,
                ..UnconfirmedEntry::default()
            },
        );
    }

    pub fn register_unconfirmed_withdraw(
        &mut self,
        id: TransactionId,
        spent_deposits_total: u64,
        spent_deposits_profit: u64,
    ) {
        self.unconfirmed.entries.insert(
            id,
            UnconfirmedEntry {
                spent_deposits_total,
                spent_deposits_profit,
                ..UnconfirmedEntry::default()
            },
        );
    }

    /// Mark a transaction that could not be sent. Its deposits, if any, are
    /// released for another attempt.
    pub fn mark_transaction_failed(&mut self, id: TransactionId) -> Vec<DepositId> {
        if let Some(tx) = self.transactions.get_mut(id.0) {
            tx.is_deleted = true;
        }
        self.unconfirmed.remove(id);
        self.orphan_spent_by(id)
    }

    // ── Synchroniser side ──────────────────────────────────────────────

    /// Insert-or-update by transaction hash. Idempotent: a repeated push with
    /// identical facts produces no events.
    pub fn on_transaction_updated(
        &mut self,
        info: &TransactionInformation,
        net_amount: i64,
        new_deposit_outputs: &[TransactionOutputInformation],
        spent_deposit_inputs: &[TransactionOutputInformation],
        currency: &Currency,
    ) -> VecDeque<WalletEvent> {
        let mut events = VecDeque::new();

        let (id, mut changed) = match self.by_hash.get(&info.hash).copied() {
            Some(id) => {
                let tx = &mut self.transactions[id.0];
                let mut changed = false;
                // A re-announced transaction is live again, whatever GC or a
                // reorg said earlier.
                if tx.is_deleted {
                    tx.is_deleted = false;
                    changed = true;
                }
                if info.block_height != UNCONFIRMED_HEIGHT {
                    let confirmation = Confirmation::Confirmed {
                        height: info.block_height,
                        timestamp: info.timestamp,
                    };
                    if tx.confirmation != confirmation {
                        tx.confirmation = confirmation;
                        changed = true;
                    }
                }
                (id, changed)
            }
            None => {
                // Only incoming funds warrant a new entry: outgoing
                // transactions were registered when they were signed.
                if net_amount <= 0 {
                    return events;
                }
                let id = self.insert_incoming(info, net_amount);
                (id, true)
            }
        };

        if self.transactions[id.0].confirmation != Confirmation::Unconfirmed {
            self.unconfirmed.remove(id);
        }

        let creation_height = if info.block_height == UNCONFIRMED_HEIGHT {
            self.tip_height
        } else {
            info.block_height
        };

        let mut touched = Vec::new();
        for output in new_deposit_outputs {
            if self
                .find_deposit_by_output(id, output.output_in_transaction)
                .is_some()
            {
                continue;
            }
            let deposit_id = DepositId(self.deposits.len());
            self.deposits.push(DepositInfo {
                deposit: Deposit {
                    creating_transaction: id,
                    spending_transaction: None,
                    term: output.term,
                    amount: output.amount,
                    interest: currency.calculate_interest(
                        output.amount,
                        output.term,
                        creation_height,
                    ),
                    is_locked: true,
                },
                output_in_transaction: output.output_in_transaction,
            });
            self.transactions[id.0].deposits.push(deposit_id);
            touched.push(deposit_id);
        }

        for input in spent_deposit_inputs {
            let Some(creating) = self.by_hash.get(&input.transaction_hash).copied() else {
                continue;
            };
            let Some(deposit_id) =
                self.find_deposit_by_output(creating, input.output_in_transaction)
            else {
                continue;
            };
            let deposit = &mut self.deposits[deposit_id.0].deposit;
            if deposit.spending_transaction != Some(id) {
                deposit.spending_transaction = Some(id);
                touched.push(deposit_id);
            }
            if !self.transactions[id.0].deposits.contains(&deposit_id) {
                self.transactions[id.0].deposits.push(deposit_id);
            }
        }

        if !touched.is_empty() {
            changed = true;
        }
        if changed {
            events.push_back(WalletEvent::TransactionUpdated(id));
        }
        if !touched.is_empty() {
            touched.sort();
            touched.dedup();
            events.push_back(WalletEvent::DepositsUpdated(touched));
        }
        events
    }

    /// The chain dropped a transaction (reorg or pool eviction).
    pub fn on_transaction_deleted(&mut self, hash: &Hash) -> VecDeque<WalletEvent> {
        let mut events = VecDeque::new();
        let Some(id) = self.by_hash.get(hash).copied() else {
            return events;
        };
        {
            let tx = &mut self.transactions[id.0];
            tx.is_deleted = true;
            tx.confirmation = Confirmation::Unconfirmed;
        }
        self.unconfirmed.remove(id);
        let orphaned = self.orphan_spent_by(id);
        events.push_back(WalletEvent::TransactionUpdated(id));
        if !orphaned.is_empty() {
            events.push_back(WalletEvent::DepositsUpdated(orphaned));
        }
        events
    }

    pub fn lock_deposits(&mut self, outputs: &[TransactionOutputInformation]) -> Vec<DepositId> {
        self.set_deposits_locked(outputs, true)
    }

    pub fn unlock_deposits(&mut self, outputs: &[TransactionOutputInformation]) -> Vec<DepositId> {
        self.set_deposits_locked(outputs, false)
    }

    fn set_deposits_locked(
        &mut self,
        outputs: &[TransactionOutputInformation],
        locked: bool,
    ) -> Vec<DepositId> {
        let mut affected = Vec::new();
        for output in outputs {
            let Some(creating) = self.by_hash.get(&output.transaction_hash).copied() else {
                continue;
            };
            let Some(deposit_id) =
                self.find_deposit_by_output(creating, output.output_in_transaction)
            else {
                continue;
            };
            let deposit = &mut self.deposits[deposit_id.0].deposit;
            if deposit.is_locked != locked {
                deposit.is_locked = locked;
                affected.push(deposit_id);
            }
        }
        affected
    }

    /// Mark unconfirmed transactions whose TTL height has passed the tip, or
    /// whose mempool live-time has elapsed, as deleted. Returns their ids.
    pub fn delete_outdated_transactions(&mut self, now: u64) -> Vec<TransactionId> {
        let tip = self.tip_height;
        let mut deleted = Vec::new();
        for (index, tx) in self.transactions.iter_mut().enumerate() {
            if tx.is_deleted || tx.confirmation != Confirmation::Unconfirmed {
                continue;
            }
            let ttl_expired = tx.ttl != 0 && tx.ttl < tip;
            let live_time_expired =
                tx.ttl == 0 && now.saturating_sub(tx.created_at) > self.mempool_tx_live_time;
            if ttl_expired || live_time_expired {
                tx.is_deleted = true;
                deleted.push(TransactionId(index));
            }
        }
        for id in &deleted {
            self.unconfirmed.remove(*id);
            self.orphan_spent_by(*id);
        }
        deleted
    }

    // ── Summations for the balance calculator ──────────────────────────

    pub fn unconfirmed_outs_amount(&self) -> u64 {
        self.unconfirmed.sum_of(|e| e.used_outputs_sum)
    }

    pub fn unconfirmed_transactions_amount(&self) -> u64 {
        self.unconfirmed.sum_of(|e| e.amount_out)
    }

    pub fn count_unconfirmed_created_deposits_sum(&self) -> u64 {
        self.unconfirmed.sum_of(|e| e.created_deposits_sum)
    }

    pub fn count_unconfirmed_spent_deposits_total_amount(&self) -> u64 {
        self.unconfirmed.sum_of(|e| e.spent_deposits_total)
    }

    pub fn count_unconfirmed_spent_deposits_profit(&self) -> u64 {
        self.unconfirmed.sum_of(|e| e.spent_deposits_profit)
    }

    // ── Persistence ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            transactions: self.transactions.clone(),
            transfers: self.transfers.clone(),
            deposits: self.deposits.clone(),
            unconfirmed: self.unconfirmed.clone(),
        }
    }

    /// Replace the cache contents with a snapshot, rebuilding the hash and
    /// payment indices.
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.transactions = snapshot.transactions;
        self.transfers = snapshot.transfers;
        self.deposits = snapshot.deposits;
        self.unconfirmed = snapshot.unconfirmed;
        self.by_hash.clear();
        self.payment_index.clear();
        for (index, tx) in self.transactions.iter().enumerate() {
            let id = TransactionId(index);
            self.by_hash.insert(tx.hash, id);
            if let Some(payment_id) = extract_payment_id(&tx.extra) {
                self.payment_index.entry(payment_id).or_default().push(id);
            }
        }
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn insert_incoming(&mut self, info: &TransactionInformation, net_amount: i64) -> TransactionId {
        let id = TransactionId(self.transactions.len());
        let confirmation = if info.block_height == UNCONFIRMED_HEIGHT {
            Confirmation::Unconfirmed
        } else {
            Confirmation::Confirmed {
                height: info.block_height,
                timestamp: info.timestamp,
            }
        };
        if let Some(payment_id) = extract_payment_id(&info.extra) {
            self.payment_index.entry(payment_id).or_default().push(id);
        }
        self.by_hash.insert(info.hash, id);
        self.transactions.push(WalletTransaction {
            hash: info.hash,
            direction: TransactionDirection::Incoming,
            total_amount: net_amount,
            fee: 0,
            confirmation,
            created_at: info.timestamp,
            extra: info.extra.clone(),
            messages: Vec::new(),
            ttl: 0,
            transfers: Vec::new(),
            deposits: Vec::new(),
            is_deleted: false,
        });
        id
    }

    fn find_deposit_by_output(
        &self,
        creating: TransactionId,
        output_in_transaction: u32,
    ) -> Option<DepositId> {
        self.deposits
            .iter()
            .position(|info| {
                info.deposit.creating_transaction == creating
                    && info.output_in_transaction == output_in_transaction
            })
            .map(DepositId)
    }

    /// Clear the spent-by pointer of every deposit referencing `id`.
    fn orphan_spent_by(&mut self, id: TransactionId) -> Vec<DepositId> {
        let mut orphaned = Vec::new();
        for (index, info) in self.deposits.iter_mut().enumerate() {
            if info.deposit.spending_transaction == Some(id) {
                info.deposit.spending_transaction = None;
                orphaned.push(DepositId(index));
            }
        }
        orphaned
    }
}
