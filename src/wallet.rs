//! Wallet façade: lifecycle state machine, mutex discipline, event emission.
//!
//! A single mutex guards the cache, the state, and the password. Observers
//! are never invoked while it is held: every path collects its events into a
//! local queue, releases the mutex, and drains the queue. Loading, saving,
//! and request execution run on detached worker threads announced to the
//! async counter, which `shutdown` drains before tearing state down.

use std::collections::VecDeque;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;

use crate::account::{Account, AccountKeys};
use crate::async_counter::{AsyncContextCounter, AsyncContextGuard};
use crate::balance;
use crate::cache::{
    DepositId, DepositInfo, PaymentId, Payments, TransactionCache, TransactionId,
    TransactionMessage, TransferId, WalletTransaction, WalletTransfer,
};
use crate::constants::ACCOUNT_CREATE_TIME_ACCURACY;
use crate::currency::Currency;
use crate::error::WalletError;
use crate::node::Node;
use crate::observer::{ObserverRegistry, WalletEvent, WalletObserver};
use crate::sender::{CallbackContext, Request, RequestCallback, TransactionSender, TransferOrder};
use crate::serializer;
use crate::sync::{
    include, AccountSubscription, BlockchainSync, SyncError, SyncStart, TransfersContainer,
};
use crate::Hash;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalletState {
    NotInitialized,
    Loading,
    Initialized,
    Saving,
}

/// Which wrapper handles a request callback. Transaction callbacks append
/// deposit-balance change events; synchronisation callbacks (the follow-up
/// steps of a chain) do not.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CallbackKind {
    Transaction,
    Synchronization,
}

struct WalletInner {
    state: WalletState,
    is_stopping: bool,
    password: String,
    account: Option<Account>,
    cache: TransactionCache,
    container: Option<Arc<dyn TransfersContainer>>,
    sender: Option<TransactionSender>,
}

/// The wallet engine. Constructed behind an `Arc`; workers re-enter it
/// through the weak self handle.
pub struct Wallet {
    weak_self: Weak<Wallet>,
    currency: Currency,
    node: Arc<dyn Node>,
    sync: Arc<dyn BlockchainSync>,
    inner: Mutex<WalletInner>,
    observers: ObserverRegistry,
    async_counter: AsyncContextCounter,
    last_notified_actual: AtomicU64,
    last_notified_pending: AtomicU64,
    last_notified_actual_deposit: AtomicU64,
    last_notified_pending_deposit: AtomicU64,
}

impl Wallet {
    pub fn new(currency: Currency, node: Arc<dyn Node>, sync: Arc<dyn BlockchainSync>) -> Arc<Self> {
        let cache = TransactionCache::new(currency.mempool_tx_live_time);
        Arc::new_cyclic(|weak_self| Wallet {
            weak_self: weak_self.clone(),
            currency,
            node,
            sync,
            inner: Mutex::new(WalletInner {
                state: WalletState::NotInitialized,
                is_stopping: false,
                password: String::new(),
                account: None,
                cache,
                container: None,
                sender: None,
            }),
            observers: ObserverRegistry::new(),
            async_counter: AsyncContextCounter::new(),
            last_notified_actual: AtomicU64::new(0),
            last_notified_pending: AtomicU64::new(0),
            last_notified_actual_deposit: AtomicU64::new(0),
            last_notified_pending_deposit: AtomicU64::new(0),
        })
    }

    pub fn add_observer<T: WalletObserver + 'static>(&self, observer: &Arc<T>) {
        self.observers.add(observer);
    }

    pub fn remove_observer<T: WalletObserver + 'static>(&self, observer: &Arc<T>) {
        self.observers.remove(observer);
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Create a fresh account under `password`. Synchronous; fires
    /// `init_completed(Ok)` before returning.
    pub fn init_and_generate(&self, password: &str) -> Result<(), WalletError> {
        {
            let mut inner = self.lock();
            if inner.state != WalletState::NotInitialized {
                return Err(WalletError::AlreadyInitialized);
            }
            inner.account = Some(Account::generate());
            inner.password = password.to_string();
            self.init_sync(&mut inner);
        }
        self.notify_event(WalletEvent::InitCompleted(Ok(())));
        self.start_synchronizer();
        Ok(())
    }

    /// Import existing keys under `password`. Synchronous; the whole chain
    /// will be rescanned.
    pub fn init_with_keys(&self, keys: AccountKeys, password: &str) -> Result<(), WalletError> {
        {
            let mut inner = self.lock();
            if inner.state != WalletState::NotInitialized {
                return Err(WalletError::AlreadyInitialized);
            }
            inner.account = Some(Account::from_keys(keys));
            inner.password = password.to_string();
            self.init_sync(&mut inner);
        }
        self.notify_event(WalletEvent::InitCompleted(Ok(())));
        self.start_synchronizer();
        Ok(())
    }

    /// Decrypt `source` on a worker thread and bring the wallet up from it.
    /// The outcome arrives via `init_completed`.
    pub fn init_and_load<R: Read + Send + 'static>(
        &self,
        source: R,
        password: &str,
    ) -> Result<(), WalletError> {
        {
            let mut inner = self.lock();
            if inner.state != WalletState::NotInitialized {
                return Err(WalletError::AlreadyInitialized);
            }
            inner.password = password.to_string();
            inner.state = WalletState::Loading;
        }
        self.async_counter.add();
        let wallet = self.strong();
        thread::spawn(move || {
            let _context = AsyncContextGuard::new(&wallet.async_counter);
            wallet.do_load(source);
        });
        Ok(())
    }

    fn do_load<R: Read>(&self, mut source: R) {
        let result = (|| -> Result<(), WalletError> {
            let mut inner = self.lock();
            let mut bytes = Vec::new();
            source
                .read_to_end(&mut bytes)
                .map_err(|e| WalletError::Internal(format!("failed to read wallet stream: {e}")))?;
            let loaded = serializer::deserialize_wallet(&bytes, &inner.password)?;
            inner.account = Some(loaded.account);
            if let Some(snapshot) = loaded.cache {
                inner.cache.restore(snapshot);
            }
            self.init_sync(&mut inner);
            if let Some(blob) = loaded.container_blob {
                // The container cache is only an optimisation; a rejected
                // blob means a full rescan, not a failed init.
                if let Err(e) = self.sync.load(&blob) {
                    tracing::warn!(error = %e, "transfers cache rejected, resyncing from scratch");
                }
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.notify_event(WalletEvent::InitCompleted(Ok(())));
                self.start_synchronizer();
            }
            Err(error) => {
                self.lock().state = WalletState::NotInitialized;
                self.notify_event(WalletEvent::InitCompleted(Err(error)));
            }
        }
    }

    /// Subscribe the account, build the request engine, and mark the wallet
    /// initialized. Runs under the façade mutex.
    fn init_sync(&self, inner: &mut WalletInner) {
        let account = inner.account.as_ref().expect("account set before init_sync");
        let public_keys = account.public_keys();
        let keys = account.keys().clone();
        let sync_start_timestamp = account
            .create_time()
            .saturating_sub(ACCOUNT_CREATE_TIME_ACCURACY);

        let container = self.sync.subscribe(AccountSubscription {
            keys: public_keys,
            sync_start: SyncStart {
                height: 0,
                timestamp: sync_start_timestamp,
            },
            transaction_spendable_age: self.currency.tx_spendable_age,
        });
        inner.container = Some(container);
        let address = self.currency.account_address(&public_keys);
        inner.sender = Some(TransactionSender::new(keys, address.clone()));
        inner.state = WalletState::Initialized;
        tracing::info!(address = %address, "wallet initialized");
    }

    /// Post-init hook: kick the synchroniser once init has been announced.
    fn start_synchronizer(&self) {
        if let Err(e) = self.sync.start() {
            tracing::warn!(error = %e, "failed to start synchronizer");
        }
    }

    /// Tear the wallet down to `NotInitialized`. Blocks until every worker
    /// has drained.
    pub fn shutdown(&self) -> Result<(), WalletError> {
        {
            let mut inner = self.lock();
            if inner.is_stopping {
                return Err(WalletError::AlreadyShuttingDown);
            }
            if inner.state != WalletState::Initialized {
                return Err(WalletError::WrongState);
            }
            inner.is_stopping = true;
            if let Some(sender) = &inner.sender {
                sender.stop();
            }
        }

        self.sync.stop();
        self.async_counter.wait_async_contexts_finish();

        {
            let mut inner = self.lock();
            inner.is_stopping = false;
            inner.state = WalletState::NotInitialized;
            if let Some(account) = &inner.account {
                self.sync
                    .unsubscribe(&self.currency.account_address(&account.public_keys()));
            }
            inner.container = None;
            inner.sender = None;
            inner.cache.reset();
        }

        self.last_notified_actual.store(0, Ordering::SeqCst);
        self.last_notified_pending.store(0, Ordering::SeqCst);
        self.last_notified_actual_deposit.store(0, Ordering::SeqCst);
        self.last_notified_pending_deposit.store(0, Ordering::SeqCst);
        tracing::info!("wallet shut down");
        Ok(())
    }

    /// Save to a buffer, shut down, and reload from the buffer. Best-effort:
    /// failures are logged and swallowed.
    pub fn reset(&self) {
        let attempt = || -> Result<(), WalletError> {
            let buffer = SharedBuffer::new();
            let save_waiter = Arc::new(CompletionWaiter::for_save());
            self.add_observer(&save_waiter);
            let started = self.save(buffer.clone(), false, false);
            let saved = started.and_then(|()| save_waiter.wait());
            self.remove_observer(&save_waiter);
            saved?;

            let password = self.lock().password.clone();
            self.shutdown()?;

            let init_waiter = Arc::new(CompletionWaiter::for_init());
            self.add_observer(&init_waiter);
            let started = self.init_and_load(Cursor::new(buffer.take()), &password);
            let loaded = started.and_then(|()| init_waiter.wait());
            self.remove_observer(&init_waiter);
            loaded
        };
        if let Err(error) = attempt() {
            tracing::warn!(error = %error, "wallet reset failed");
        }
    }

    /// Serialize the wallet to `destination` on a worker thread. The outcome
    /// arrives via `save_completed`.
    pub fn save<W: Write + Send + 'static>(
        &self,
        destination: W,
        save_detailed: bool,
        save_cache: bool,
    ) -> Result<(), WalletError> {
        {
            let mut inner = self.lock();
            if inner.is_stopping {
                drop(inner);
                self.notify_event(WalletEvent::SaveCompleted(Err(
                    WalletError::OperationCancelled,
                )));
                return Ok(());
            }
            if inner.state != WalletState::Initialized {
                return Err(WalletError::WrongState);
            }
            inner.state = WalletState::Saving;
        }
        self.async_counter.add();
        let wallet = self.strong();
        thread::spawn(move || {
            let _context = AsyncContextGuard::new(&wallet.async_counter);
            wallet.do_save(destination, save_detailed, save_cache);
        });
        Ok(())
    }

    fn do_save<W: Write>(&self, mut destination: W, save_detailed: bool, save_cache: bool) {
        let result = (|| -> Result<(), WalletError> {
            self.sync.stop();
            let mut inner = self.lock();
            let container_blob = save_cache.then(|| self.sync.save());
            let snapshot = save_detailed.then(|| inner.cache.snapshot());
            let account = inner
                .account
                .as_ref()
                .ok_or_else(|| WalletError::Internal("account missing while saving".into()))?;
            let bytes =
                serializer::serialize_wallet(account, &inner.password, snapshot, container_blob)?;
            destination
                .write_all(&bytes)
                .and_then(|()| destination.flush())
                .map_err(|e| WalletError::Internal(format!("failed to write wallet stream: {e}")))?;
            inner.state = WalletState::Initialized;
            drop(inner);
            // Restart failures are surfaced instead of leaving the
            // synchroniser silently stopped.
            self.sync
                .start()
                .map_err(|e| WalletError::Internal(format!("failed to restart synchronizer: {e}")))?;
            Ok(())
        })();
        match result {
            Ok(()) => self.notify_event(WalletEvent::SaveCompleted(Ok(()))),
            Err(error) => {
                self.lock().state = WalletState::Initialized;
                self.notify_event(WalletEvent::SaveCompleted(Err(error)));
            }
        }
    }

    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), WalletError> {
        let mut inner = self.lock();
        ensure_initialized(&inner)?;
        if !constant_time_eq(inner.password.as_bytes(), old_password.as_bytes()) {
            return Err(WalletError::WrongPassword);
        }
        inner.password = new_password.to_string();
        Ok(())
    }

    // ── Read access ────────────────────────────────────────────────────

    pub fn address(&self) -> Result<String, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        let account = inner.account.as_ref().expect("account present while initialized");
        Ok(self.currency.account_address(&account.public_keys()))
    }

    /// Key export; allowed in any state where an account exists.
    pub fn account_keys(&self) -> Result<AccountKeys, WalletError> {
        let inner = self.lock();
        inner
            .account
            .as_ref()
            .map(|account| account.keys().clone())
            .ok_or(WalletError::NotInitialized)
    }

    pub fn actual_balance(&self) -> Result<u64, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(balance::actual_balance(container(&inner), &inner.cache))
    }

    pub fn pending_balance(&self) -> Result<u64, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(balance::pending_balance(container(&inner), &inner.cache))
    }

    pub fn actual_deposit_balance(&self) -> Result<u64, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(balance::actual_deposit_balance(
            container(&inner),
            &inner.cache,
            &self.currency,
        ))
    }

    pub fn pending_deposit_balance(&self) -> Result<u64, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(balance::pending_deposit_balance(
            container(&inner),
            &inner.cache,
            &self.currency,
        ))
    }

    pub fn transaction_count(&self) -> Result<usize, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(inner.cache.transaction_count())
    }

    pub fn transfer_count(&self) -> Result<usize, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(inner.cache.transfer_count())
    }

    pub fn deposit_count(&self) -> Result<usize, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(inner.cache.deposit_count())
    }

    pub fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<WalletTransaction>, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(inner.cache.transaction(id).cloned())
    }

    pub fn get_transfer(&self, id: TransferId) -> Result<Option<WalletTransfer>, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(inner.cache.transfer(id).cloned())
    }

    pub fn get_deposit(&self, id: DepositId) -> Result<Option<DepositInfo>, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(inner.cache.deposit(id).cloned())
    }

    pub fn find_transaction_by_transfer_id(
        &self,
        id: TransferId,
    ) -> Result<Option<TransactionId>, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(inner.cache.find_transaction_by_transfer_id(id))
    }

    pub fn transactions_by_payment_ids(
        &self,
        payment_ids: &[PaymentId],
    ) -> Result<Vec<Payments>, WalletError> {
        let inner = self.lock();
        ensure_initialized(&inner)?;
        Ok(inner.cache.transactions_by_payment_ids(payment_ids))
    }

    // ── Transaction operations ─────────────────────────────────────────

    /// Draft, sign, and relay a transaction to `orders`. Returns its id;
    /// the terminal outcome arrives via `send_transaction_completed`.
    #[allow(clippy::too_many_arguments)]
    pub fn send_transaction(
        &self,
        orders: &[TransferOrder],
        fee: u64,
        extra: Vec<u8>,
        mixin: u64,
        unlock_time: u64,
        messages: Vec<TransactionMessage>,
        ttl: u32,
    ) -> Result<TransactionId, WalletError> {
        let (id, request, events) = {
            let mut inner = self.lock();
            ensure_initialized(&inner)?;
            let mut events = VecDeque::new();
            let WalletInner {
                cache,
                sender,
                container,
                ..
            } = &mut *inner;
            let sender = sender.as_ref().expect("sender present while initialized");
            let container = container
                .as_ref()
                .expect("container present while initialized");
            let (id, request) = sender.make_send_request(
                &mut events,
                cache,
                container.as_ref(),
                orders,
                fee,
                extra,
                mixin,
                unlock_time,
                messages,
                ttl,
            )?;
            (id, request, events)
        };
        self.notify_events(events);
        self.perform_request(request, CallbackKind::Transaction);
        Ok(id)
    }

    /// Create a term-locked deposit output.
    pub fn deposit(
        &self,
        term: u32,
        amount: u64,
        fee: u64,
        mixin: u64,
    ) -> Result<TransactionId, WalletError> {
        let (id, request, events) = {
            let mut inner = self.lock();
            ensure_initialized(&inner)?;
            let mut events = VecDeque::new();
            let WalletInner {
                cache,
                sender,
                container,
                ..
            } = &mut *inner;
            let sender = sender.as_ref().expect("sender present while initialized");
            let container = container
                .as_ref()
                .expect("container present while initialized");
            let (id, request) = sender.make_deposit_request(
                &mut events,
                cache,
                container.as_ref(),
                &self.currency,
                term,
                amount,
                fee,
                mixin,
            )?;
            self.append_balance_events(cache, container.as_ref(), &mut events);
            (id, request, events)
        };
        self.notify_events(events);
        self.perform_request(request, CallbackKind::Transaction);
        Ok(id)
    }

    /// Spend matured deposits. Validation failures surface through a failure
    /// event rather than an error return.
    pub fn withdraw_deposits(
        &self,
        deposit_ids: &[DepositId],
        fee: u64,
    ) -> Result<TransactionId, WalletError> {
        let (id, request, events) = {
            let mut inner = self.lock();
            ensure_initialized(&inner)?;
            let mut events = VecDeque::new();
            let WalletInner {
                cache,
                sender,
                container,
                ..
            } = &mut *inner;
            let sender = sender.as_ref().expect("sender present while initialized");
            let container = container
                .as_ref()
                .expect("container present while initialized");
            let (id, request) =
                sender.make_withdraw_deposit_request(&mut events, cache, deposit_ids, fee)?;
            if request.is_some() {
                self.append_balance_events(cache, container.as_ref(), &mut events);
            }
            (id, request, events)
        };
        self.notify_events(events);
        if let Some(request) = request {
            self.perform_request(request, CallbackKind::Transaction);
        }
        Ok(id)
    }

    /// The wallet does not model cancellation.
    pub fn cancel_transaction(&self, _id: TransactionId) -> Result<(), WalletError> {
        Err(WalletError::TxCancelImpossible)
    }

    fn perform_request(&self, request: Request, kind: CallbackKind) {
        self.async_counter.add();
        let wallet = self.strong();
        thread::spawn(move || {
            let _context = AsyncContextGuard::new(&wallet.async_counter);
            let (callback, outcome) = request.perform(wallet.node.as_ref());
            wallet.request_callback(callback, outcome, kind);
        });
    }

    fn request_callback(
        &self,
        callback: RequestCallback,
        outcome: Result<(), WalletError>,
        kind: CallbackKind,
    ) {
        let (events, next) = {
            let mut inner = self.lock();
            let mut events = VecDeque::new();
            let WalletInner {
                cache, container, ..
            } = &mut *inner;
            let next = {
                let mut context = CallbackContext {
                    cache: &mut *cache,
                    events: &mut events,
                };
                callback(&mut context, outcome)
            };
            if kind == CallbackKind::Transaction {
                if let Some(container) = container.as_ref() {
                    self.append_deposit_balance_events(cache, container.as_ref(), &mut events);
                }
            }
            (events, next)
        };
        self.notify_events(events);
        if let Some(next) = next {
            self.perform_request(next, CallbackKind::Synchronization);
        }
    }

    // ── Synchroniser bridge ────────────────────────────────────────────
    //
    // Invoked by the synchroniser on its own thread.

    pub fn on_transaction_updated(&self, hash: &Hash) {
        let events = {
            let mut inner = self.lock();
            let Some(container) = inner.container.clone() else {
                return;
            };
            let Some((info, amount_in, amount_out)) = container.transaction_information(hash)
            else {
                return;
            };
            let new_deposit_outputs =
                container.transaction_outputs(hash, include::DEPOSIT | include::STATE_ALL);
            let spent_deposit_inputs = container.transaction_inputs(hash, include::DEPOSIT);
            let net_amount = amount_out as i64 - amount_in as i64;
            let mut events = inner.cache.on_transaction_updated(
                &info,
                net_amount,
                &new_deposit_outputs,
                &spent_deposit_inputs,
                &self.currency,
            );
            self.append_deposit_balance_events(&inner.cache, container.as_ref(), &mut events);
            events
        };
        self.notify_events(events);
    }

    pub fn on_transaction_deleted(&self, hash: &Hash) {
        let events = {
            let mut inner = self.lock();
            let Some(container) = inner.container.clone() else {
                return;
            };
            let mut events = inner.cache.on_transaction_deleted(hash);
            self.append_deposit_balance_events(&inner.cache, container.as_ref(), &mut events);
            events
        };
        self.notify_events(events);
    }

    pub fn on_transfers_locked(&self, transfers: &[crate::sync::TransactionOutputInformation]) {
        let events = {
            let mut inner = self.lock();
            let Some(container) = inner.container.clone() else {
                return;
            };
            let locked = inner.cache.lock_deposits(transfers);
            let mut events = VecDeque::new();
            if !locked.is_empty() {
                events.push_back(WalletEvent::DepositsUpdated(locked));
                self.append_deposit_balance_events(&inner.cache, container.as_ref(), &mut events);
            }
            events
        };
        self.notify_events(events);
    }

    pub fn on_transfers_unlocked(&self, transfers: &[crate::sync::TransactionOutputInformation]) {
        let events = {
            let mut inner = self.lock();
            let Some(container) = inner.container.clone() else {
                return;
            };
            let unlocked = inner.cache.unlock_deposits(transfers);
            let mut events = VecDeque::new();
            if !unlocked.is_empty() {
                events.push_back(WalletEvent::DepositsUpdated(unlocked));
                self.append_deposit_balance_events(&inner.cache, container.as_ref(), &mut events);
            }
            events
        };
        self.notify_events(events);
    }

    /// Progress tick from the synchroniser: advance the tip hint, collect
    /// outdated transactions, and diff the regular balances.
    pub fn synchronization_progress_updated(&self, current: u32, total: u32) {
        let events = {
            let mut inner = self.lock();
            let Some(container) = inner.container.clone() else {
                return;
            };
            inner.cache.set_tip_height(current);
            let deleted = inner.cache.delete_outdated_transactions(crate::unix_now());
            let mut events = VecDeque::new();
            events.push_back(WalletEvent::SynchronizationProgress { current, total });
            for id in deleted {
                events.push_back(WalletEvent::TransactionUpdated(id));
            }
            self.append_regular_balance_events(&inner.cache, container.as_ref(), &mut events);
            events
        };
        self.notify_events(events);
    }

    pub fn synchronization_completed(&self, result: Result<(), SyncError>) {
        if result == Err(SyncError::Interrupted) {
            return;
        }
        let failed = result.is_err();
        let events = {
            let mut inner = self.lock();
            let Some(container) = inner.container.clone() else {
                return;
            };
            let mut events = VecDeque::new();
            events.push_back(WalletEvent::SynchronizationCompleted(
                result.map_err(WalletError::from),
            ));
            if !failed {
                let deleted = inner.cache.delete_outdated_transactions(crate::unix_now());
                for id in deleted {
                    events.push_back(WalletEvent::TransactionUpdated(id));
                }
                self.append_regular_balance_events(&inner.cache, container.as_ref(), &mut events);
            }
            events
        };
        self.notify_events(events);
    }

    // ── Event plumbing ─────────────────────────────────────────────────

    fn notify_events(&self, mut events: VecDeque<WalletEvent>) {
        while let Some(event) = events.pop_front() {
            event.dispatch(&self.observers);
        }
    }

    fn notify_event(&self, event: WalletEvent) {
        event.dispatch(&self.observers);
    }

    /// Diff all four balance axes against the last-notified values; deposit
    /// axes first.
    fn append_balance_events(
        &self,
        cache: &TransactionCache,
        container: &dyn TransfersContainer,
        events: &mut VecDeque<WalletEvent>,
    ) {
        self.append_deposit_balance_events(cache, container, events);
        self.append_regular_balance_events(cache, container, events);
    }

    fn append_deposit_balance_events(
        &self,
        cache: &TransactionCache,
        container: &dyn TransfersContainer,
        events: &mut VecDeque<WalletEvent>,
    ) {
        let actual = balance::actual_deposit_balance(container, cache, &self.currency);
        if self
            .last_notified_actual_deposit
            .swap(actual, Ordering::SeqCst)
            != actual
        {
            events.push_back(WalletEvent::ActualDepositBalanceUpdated(actual));
        }
        let pending = balance::pending_deposit_balance(container, cache, &self.currency);
        if self
            .last_notified_pending_deposit
            .swap(pending, Ordering::SeqCst)
            != pending
        {
            events.push_back(WalletEvent::PendingDepositBalanceUpdated(pending));
        }
    }

    fn append_regular_balance_events(
        &self,
        cache: &TransactionCache,
        container: &dyn TransfersContainer,
        events: &mut VecDeque<WalletEvent>,
    ) {
        let actual = balance::actual_balance(container, cache);
        if self.last_notified_actual.swap(actual, Ordering::SeqCst) != actual {
            events.push_back(WalletEvent::ActualBalanceUpdated(actual));
        }
        let pending = balance::pending_balance(container, cache);
        if self.last_notified_pending.swap(pending, Ordering::SeqCst) != pending {
            events.push_back(WalletEvent::PendingBalanceUpdated(pending));
        }
    }

    fn lock(&self) -> MutexGuard<'_, WalletInner> {
        self.inner.lock().expect("wallet state mutex poisoned")
    }

    /// Strong handle for handing to worker threads. The weak reference was
    /// installed at construction and lives as long as any caller does.
    fn strong(&self) -> Arc<Wallet> {
        self.weak_self
            .upgrade()
            .expect("wallet dropped while spawning a worker")
    }
}

impl Drop for Wallet {
    fn drop(&mut self) {
        // Workers hold their own Arc, so by the time this runs they are
        // gone; only the synchroniser needs to be told.
        let initialized = self
            .inner
            .get_mut()
            .map(|inner| inner.state != WalletState::NotInitialized)
            .unwrap_or(false);
        if initialized {
            self.sync.stop();
        }
    }
}

fn ensure_initialized(inner: &WalletInner) -> Result<(), WalletError> {
    match inner.state {
        WalletState::Initialized => Ok(()),
        WalletState::Saving => Err(WalletError::WrongState),
        WalletState::NotInitialized | WalletState::Loading => Err(WalletError::NotInitialized),
    }
}

fn container(inner: &WalletInner) -> &dyn TransfersContainer {
    inner
        .container
        .as_ref()
        .expect("container present while initialized")
        .as_ref()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// A clonable in-memory `Write` destination; lets a caller keep hold of the
/// bytes a save worker produces.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the accumulated bytes out.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.bytes.lock().expect("shared buffer poisoned"))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes
            .lock()
            .expect("shared buffer poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Internal observer that forwards one completion outcome to a channel;
/// backs the synchronous phases of [`Wallet::reset`].
enum WaiterTarget {
    Init,
    Save,
}

struct CompletionWaiter {
    target: WaiterTarget,
    sender: Mutex<mpsc::Sender<Result<(), WalletError>>>,
    receiver: Mutex<mpsc::Receiver<Result<(), WalletError>>>,
}

impl CompletionWaiter {
    fn for_init() -> Self {
        Self::new(WaiterTarget::Init)
    }

    fn for_save() -> Self {
        Self::new(WaiterTarget::Save)
    }

    fn new(target: WaiterTarget) -> Self {
        let (sender, receiver) = mpsc::channel();
        CompletionWaiter {
            target,
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
        }
    }

    fn wait(&self) -> Result<(), WalletError> {
        self.receiver
            .lock()
            .expect("waiter receiver poisoned")
            .recv()
            .unwrap_or_else(|_| Err(WalletError::Internal("completion never arrived".into())))
    }

    fn complete(&self, result: Result<(), WalletError>) {
        let _ = self
            .sender
            .lock()
            .expect("waiter sender poisoned")
            .send(result);
    }
}

impl WalletObserver for CompletionWaiter {
    fn init_completed(&self, result: Result<(), WalletError>) {
        if matches!(self.target, WaiterTarget::Init) {
            self.complete(result);
        }
    }

    fn save_completed(&self, result: Result<(), WalletError>) {
        if matches!(self.target, WaiterTarget::Save) {
            self.complete(result);
        }
    }
}
