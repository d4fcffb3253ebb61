//! In-memory collaborator doubles and a recording observer for the
//! integration suite.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use obol::account::AccountPublicKeys;
use obol::cache::{DepositId, TransactionId};
use obol::currency::Currency;
use obol::error::WalletError;
use obol::node::{Node, NodeError, SignedTransaction};
use obol::observer::WalletObserver;
use obol::sync::{
    include, AccountSubscription, BlockchainSync, OutputType, SyncError,
    TransactionInformation, TransactionOutputInformation, TransfersContainer,
};
use obol::wallet::Wallet;
use obol::Hash;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Transfers container double ──────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputState {
    Locked,
    SoftLocked,
    Unlocked,
}

struct MockOutput {
    info: TransactionOutputInformation,
    state: OutputState,
}

#[derive(Default)]
struct ContainerState {
    outputs: Vec<MockOutput>,
    transactions: HashMap<Hash, (TransactionInformation, u64, u64)>,
    inputs_by_tx: HashMap<Hash, Vec<TransactionOutputInformation>>,
}

#[derive(Default)]
pub struct MockContainer {
    state: Mutex<ContainerState>,
}

fn matches(flags: u32, output_type: OutputType, state: OutputState) -> bool {
    let type_ok = match output_type {
        OutputType::Key => flags & include::KEY != 0,
        OutputType::Deposit => flags & include::DEPOSIT != 0,
    };
    let state_ok = match state {
        OutputState::Locked => flags & include::STATE_LOCKED != 0,
        OutputState::SoftLocked => flags & include::STATE_SOFT_LOCKED != 0,
        OutputState::Unlocked => flags & include::STATE_UNLOCKED != 0,
    };
    type_ok && state_ok
}

impl MockContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key_output(&self, hash: Hash, index: u32, amount: u64, state: OutputState) {
        self.state.lock().unwrap().outputs.push(MockOutput {
            info: TransactionOutputInformation {
                output_type: OutputType::Key,
                amount,
                term: 0,
                transaction_hash: hash,
                output_in_transaction: index,
            },
            state,
        });
    }

    pub fn add_deposit_output(
        &self,
        hash: Hash,
        index: u32,
        amount: u64,
        term: u32,
        state: OutputState,
    ) -> TransactionOutputInformation {
        let info = TransactionOutputInformation {
            output_type: OutputType::Deposit,
            amount,
            term,
            transaction_hash: hash,
            output_in_transaction: index,
        };
        self.state.lock().unwrap().outputs.push(MockOutput {
            info: info.clone(),
            state,
        });
        info
    }

    pub fn set_output_state(&self, hash: Hash, index: u32, state: OutputState) {
        for output in &mut self.state.lock().unwrap().outputs {
            if output.info.transaction_hash == hash && output.info.output_in_transaction == index {
                output.state = state;
            }
        }
    }

    pub fn remove_outputs_of(&self, hash: Hash) {
        self.state
            .lock()
            .unwrap()
            .outputs
            .retain(|o| o.info.transaction_hash != hash);
    }

    pub fn clear_key_outputs(&self) {
        self.state
            .lock()
            .unwrap()
            .outputs
            .retain(|o| o.info.output_type != OutputType::Key);
    }

    pub fn register_transaction(
        &self,
        info: TransactionInformation,
        amount_in: u64,
        amount_out: u64,
    ) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(info.hash, (info, amount_in, amount_out));
    }

    pub fn add_spent_deposit_input(
        &self,
        spending_hash: Hash,
        original: TransactionOutputInformation,
    ) {
        self.state
            .lock()
            .unwrap()
            .inputs_by_tx
            .entry(spending_hash)
            .or_default()
            .push(original);
    }
}

impl TransfersContainer for MockContainer {
    fn balance(&self, flags: u32) -> u64 {
        self.state
            .lock()
            .unwrap()
            .outputs
            .iter()
            .filter(|o| matches(flags, o.info.output_type, o.state))
            .map(|o| o.info.amount)
            .sum()
    }

    fn outputs(&self, flags: u32) -> Vec<TransactionOutputInformation> {
        self.state
            .lock()
            .unwrap()
            .outputs
            .iter()
            .filter(|o| matches(flags, o.info.output_type, o.state))
            .map(|o| o.info.clone())
            .collect()
    }

    fn transaction_information(&self, hash: &Hash) -> Option<(TransactionInformation, u64, u64)> {
        self.state.lock().unwrap().transactions.get(hash).cloned()
    }

    fn transaction_outputs(&self, hash: &Hash, flags: u32) -> Vec<TransactionOutputInformation> {
        self.state
            .lock()
            .unwrap()
            .outputs
            .iter()
            .filter(|o| o.info.transaction_hash == *hash)
            .filter(|o| matches(flags, o.info.output_type, o.state))
            .map(|o| o.info.clone())
            .collect()
    }

    fn transaction_inputs(&self, hash: &Hash, flags: u32) -> Vec<TransactionOutputInformation> {
        self.state
            .lock()
            .unwrap()
            .inputs_by_tx
            .get(hash)
            .map(|inputs| {
                inputs
                    .iter()
                    .filter(|i| match i.output_type {
                        OutputType::Key => flags & include::KEY != 0,
                        OutputType::Deposit => flags & include::DEPOSIT != 0,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ── Synchroniser double ─────────────────────────────────────────────────

const BLOB_MAGIC: &[u8] = b"SYNC";

pub struct MockSync {
    container: Arc<MockContainer>,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub subscriptions: Mutex<Vec<AccountPublicKeys>>,
    pub unsubscribed: Mutex<Vec<String>>,
    blob: Mutex<Vec<u8>>,
    pub loaded_ok: AtomicUsize,
    pub load_failures: AtomicUsize,
    pub fail_next_start: AtomicBool,
    stop_gate: Mutex<bool>,
    stop_gate_cv: Condvar,
    pub stop_blocked: AtomicBool,
}

impl MockSync {
    pub fn new(container: Arc<MockContainer>) -> Self {
        MockSync {
            container,
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            blob: Mutex::new(BLOB_MAGIC.to_vec()),
            loaded_ok: AtomicUsize::new(0),
            load_failures: AtomicUsize::new(0),
            fail_next_start: AtomicBool::new(false),
            stop_gate: Mutex::new(false),
            stop_gate_cv: Condvar::new(),
            stop_blocked: AtomicBool::new(false),
        }
    }

    /// Replace the state blob `save` hands out.
    pub fn set_blob(&self, blob: Vec<u8>) {
        *self.blob.lock().unwrap() = blob;
    }

    /// Make the next `stop` call block until [`MockSync::release_stop`].
    pub fn hold_next_stop(&self) {
        *self.stop_gate.lock().unwrap() = true;
    }

    pub fn release_stop(&self) {
        *self.stop_gate.lock().unwrap() = false;
        self.stop_gate_cv.notify_all();
    }
}

impl BlockchainSync for MockSync {
    fn subscribe(&self, subscription: AccountSubscription) -> Arc<dyn TransfersContainer> {
        self.subscriptions.lock().unwrap().push(subscription.keys);
        Arc::clone(&self.container) as Arc<dyn TransfersContainer>
    }

    fn unsubscribe(&self, address: &str) {
        self.unsubscribed.lock().unwrap().push(address.to_string());
    }

    fn start(&self) -> Result<(), SyncError> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Failed("start refused".into()));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        let mut gate = self.stop_gate.lock().unwrap();
        while *gate {
            self.stop_blocked.store(true, Ordering::SeqCst);
            gate = self.stop_gate_cv.wait(gate).unwrap();
        }
        self.stop_blocked.store(false, Ordering::SeqCst);
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn save(&self) -> Vec<u8> {
        self.blob.lock().unwrap().clone()
    }

    fn load(&self, blob: &[u8]) -> Result<(), SyncError> {
        if blob.starts_with(BLOB_MAGIC) {
            self.loaded_ok.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            self.load_failures.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::MalformedState)
        }
    }
}

// ── Node double ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockNode {
    pub relayed: Mutex<Vec<SignedTransaction>>,
    pub fail_relay: Mutex<Option<NodeError>>,
    pub relay_delay: Mutex<Option<Duration>>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relayed_hashes(&self) -> Vec<Hash> {
        self.relayed.lock().unwrap().iter().map(|t| t.hash).collect()
    }
}

impl Node for MockNode {
    fn relay_transaction(&self, transaction: &SignedTransaction) -> Result<(), NodeError> {
        if let Some(delay) = *self.relay_delay.lock().unwrap() {
            std::thread::sleep(delay);
        }
        if let Some(error) = self.fail_relay.lock().unwrap().clone() {
            return Err(error);
        }
        self.relayed.lock().unwrap().push(transaction.clone());
        Ok(())
    }

    fn transaction_known(&self, hash: &Hash) -> Result<bool, NodeError> {
        Ok(self.relayed.lock().unwrap().iter().any(|t| t.hash == *hash))
    }
}

// ── Recording observer ──────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum Recorded {
    InitCompleted(Result<(), WalletError>),
    SaveCompleted(Result<(), WalletError>),
    SyncProgress(u32, u32),
    SyncCompleted(Result<(), WalletError>),
    ActualBalance(u64),
    PendingBalance(u64),
    ActualDepositBalance(u64),
    PendingDepositBalance(u64),
    TransactionCreated(TransactionId),
    TransactionUpdated(TransactionId),
    SendCompleted(TransactionId, Result<(), WalletError>),
    DepositsUpdated(Vec<DepositId>),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Recorded>>,
    arrived: Condvar,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
        self.arrived.notify_all();
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Block until `predicate` holds over the recorded events or the timeout
    /// elapses. Returns whether it held.
    pub fn wait_until<F: Fn(&[Recorded]) -> bool>(&self, predicate: F) -> bool {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        let mut events = self.events.lock().unwrap();
        loop {
            if predicate(&events) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.arrived.wait_timeout(events, deadline - now).unwrap();
            events = guard;
        }
    }

    pub fn wait_for_init(&self) -> Result<(), WalletError> {
        assert!(
            self.wait_until(|events| events
                .iter()
                .any(|e| matches!(e, Recorded::InitCompleted(_)))),
            "init never completed"
        );
        self.events()
            .iter()
            .find_map(|e| match e {
                Recorded::InitCompleted(result) => Some(result.clone()),
                _ => None,
            })
            .unwrap()
    }

    pub fn wait_for_save(&self) -> Result<(), WalletError> {
        assert!(
            self.wait_until(|events| events
                .iter()
                .any(|e| matches!(e, Recorded::SaveCompleted(_)))),
            "save never completed"
        );
        self.events()
            .iter()
            .find_map(|e| match e {
                Recorded::SaveCompleted(result) => Some(result.clone()),
                _ => None,
            })
            .unwrap()
    }

    pub fn wait_for_send_completed(&self) -> (TransactionId, Result<(), WalletError>) {
        assert!(
            self.wait_until(|events| events
                .iter()
                .any(|e| matches!(e, Recorded::SendCompleted(_, _)))),
            "send never completed"
        );
        self.events()
            .iter()
            .find_map(|e| match e {
                Recorded::SendCompleted(id, result) => Some((*id, result.clone())),
                _ => None,
            })
            .unwrap()
    }

    /// Values of the actual-balance event series, in emission order.
    pub fn actual_balance_series(&self) -> Vec<u64> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Recorded::ActualBalance(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn pending_balance_series(&self) -> Vec<u64> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Recorded::PendingBalance(v) => Some(*v),
                _ => None,
            })
            .collect()
    }
}

impl WalletObserver for RecordingObserver {
    fn init_completed(&self, result: Result<(), WalletError>) {
        self.record(Recorded::InitCompleted(result));
    }
    fn save_completed(&self, result: Result<(), WalletError>) {
        self.record(Recorded::SaveCompleted(result));
    }
    fn synchronization_progress_updated(&self, current: u32, total: u32) {
        self.record(Recorded::SyncProgress(current, total));
    }
    fn synchronization_completed(&self, result: Result<(), WalletError>) {
        self.record(Recorded::SyncCompleted(result));
    }
    fn actual_balance_updated(&self, balance: u64) {
        self.record(Recorded::ActualBalance(balance));
    }
    fn pending_balance_updated(&self, balance: u64) {
        self.record(Recorded::PendingBalance(balance));
    }
    fn actual_deposit_balance_updated(&self, balance: u64) {
        self.record(Recorded::ActualDepositBalance(balance));
    }
    fn pending_deposit_balance_updated(&self, balance: u64) {
        self.record(Recorded::PendingDepositBalance(balance));
    }
    fn transaction_created(&self, id: TransactionId) {
        self.record(Recorded::TransactionCreated(id));
    }
    fn transaction_updated(&self, id: TransactionId) {
        self.record(Recorded::TransactionUpdated(id));
    }
    fn send_transaction_completed(&self, id: TransactionId, result: Result<(), WalletError>) {
        self.record(Recorded::SendCompleted(id, result));
    }
    fn deposits_updated(&self, ids: &[DepositId]) {
        self.record(Recorded::DepositsUpdated(ids.to_vec()));
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

pub struct Harness {
    pub wallet: Arc<Wallet>,
    pub node: Arc<MockNode>,
    pub sync: Arc<MockSync>,
    pub container: Arc<MockContainer>,
    pub observer: Arc<RecordingObserver>,
    pub currency: Currency,
}

pub fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let currency = Currency::default();
    let container = Arc::new(MockContainer::new());
    let sync = Arc::new(MockSync::new(Arc::clone(&container)));
    let node = Arc::new(MockNode::new());
    let node_dyn: Arc<dyn Node> = Arc::clone(&node) as Arc<dyn Node>;
    let sync_dyn: Arc<dyn BlockchainSync> = Arc::clone(&sync) as Arc<dyn BlockchainSync>;
    let wallet = Wallet::new(currency.clone(), node_dyn, sync_dyn);
    let observer = RecordingObserver::new();
    wallet.add_observer(&observer);
    Harness {
        wallet,
        node,
        sync,
        container,
        observer,
        currency,
    }
}

impl Harness {
    /// Put a confirmed incoming transaction with one unlocked key output
    /// into the container and push it through the wallet's sync bridge.
    pub fn confirm_incoming(&self, hash: Hash, amount: u64, height: u32) {
        self.container.register_transaction(
            TransactionInformation {
                hash,
                block_height: height,
                timestamp: height as u64 * 60,
                unlock_time: 0,
                extra: Vec::new(),
            },
            0,
            amount,
        );
        self.container
            .add_key_output(hash, 0, amount, OutputState::Unlocked);
        self.wallet.on_transaction_updated(&hash);
    }
}
