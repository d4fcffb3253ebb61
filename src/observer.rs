//! Observer interface, event objects, and the thread-safe registry.
//!
//! Events are collected under the façade mutex and dispatched after it is
//! released; each [`WalletEvent`] invokes exactly one observer method.

use std::sync::{Arc, Mutex, Weak};

use crate::cache::{DepositId, TransactionId};
use crate::error::WalletError;

/// Callbacks delivered by the wallet. All methods default to no-ops so
/// implementors subscribe only to what they need.
#[allow(unused_variables)]
pub trait WalletObserver: Send + Sync {
    fn init_completed(&self, result: Result<(), WalletError>) {}
    fn save_completed(&self, result: Result<(), WalletError>) {}
    fn synchronization_progress_updated(&self, current: u32, total: u32) {}
    fn synchronization_completed(&self, result: Result<(), WalletError>) {}
    fn actual_balance_updated(&self, balance: u64) {}
    fn pending_balance_updated(&self, balance: u64) {}
    fn actual_deposit_balance_updated(&self, balance: u64) {}
    fn pending_deposit_balance_updated(&self, balance: u64) {}
    fn transaction_created(&self, id: TransactionId) {}
    fn transaction_updated(&self, id: TransactionId) {}
    fn send_transaction_completed(&self, id: TransactionId, result: Result<(), WalletError>) {}
    fn deposits_updated(&self, ids: &[DepositId]) {}
}

/// An immutable record that, when dispatched, invokes one observer method.
#[derive(Clone, Debug)]
pub enum WalletEvent {
    InitCompleted(Result<(), WalletError>),
    SaveCompleted(Result<(), WalletError>),
    SynchronizationProgress { current: u32, total: u32 },
    SynchronizationCompleted(Result<(), WalletError>),
    ActualBalanceUpdated(u64),
    PendingBalanceUpdated(u64),
    ActualDepositBalanceUpdated(u64),
    PendingDepositBalanceUpdated(u64),
    TransactionCreated(TransactionId),
    TransactionUpdated(TransactionId),
    SendTransactionCompleted {
        id: TransactionId,
        result: Result<(), WalletError>,
    },
    DepositsUpdated(Vec<DepositId>),
}

impl WalletEvent {
    /// Deliver this event to every registered observer.
    pub fn dispatch(self, registry: &ObserverRegistry) {
        match self {
            WalletEvent::InitCompleted(result) => {
                registry.notify(|o| o.init_completed(result.clone()))
            }
            WalletEvent::SaveCompleted(result) => {
                registry.notify(|o| o.save_completed(result.clone()))
            }
            WalletEvent::SynchronizationProgress { current, total } => {
                registry.notify(|o| o.synchronization_progress_updated(current, total))
            }
            WalletEvent::SynchronizationCompleted(result) => {
                registry.notify(|o| o.synchronization_completed(result.clone()))
            }
            WalletEvent::ActualBalanceUpdated(balance) => {
                registry.notify(|o| o.actual_balance_updated(balance))
            }
            WalletEvent::PendingBalanceUpdated(balance) => {
                registry.notify(|o| o.pending_balance_updated(balance))
            }
            WalletEvent::ActualDepositBalanceUpdated(balance) => {
                registry.notify(|o| o.actual_deposit_balance_updated(balance))
            }
            WalletEvent::PendingDepositBalanceUpdated(balance) => {
                registry.notify(|o| o.pending_deposit_balance_updated(balance))
            }
            WalletEvent::TransactionCreated(id) => {
                registry.notify(|o| o.transaction_created(id))
            }
            WalletEvent::TransactionUpdated(id) => {
                registry.notify(|o| o.transaction_updated(id))
            }
            WalletEvent::SendTransactionCompleted { id, result } => {
                registry.notify(|o| o.send_transaction_completed(id, result.clone()))
            }
            WalletEvent::DepositsUpdated(ids) => registry.notify(|o| o.deposits_updated(&ids)),
        }
    }
}

/// Thread-safe observer list. Notification iterates a snapshot taken under
/// the registry lock, so observers may add or remove (including themselves)
/// during delivery. Order within one notification is insertion order.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<Weak<dyn WalletObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. The registry holds a weak reference: dropping
    /// the observer unregisters it implicitly.
    pub fn add<T: WalletObserver + 'static>(&self, observer: &Arc<T>) {
        let observer: Arc<dyn WalletObserver> = observer.clone();
        let weak: Weak<dyn WalletObserver> = Arc::downgrade(&observer);
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .push(weak);
    }

    /// Unregister by allocation identity.
    pub fn remove<T: WalletObserver + 'static>(&self, observer: &Arc<T>) {
        let target = Arc::as_ptr(observer) as *const ();
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .retain(|weak| weak.as_ptr() as *const () != target);
    }

    /// Invoke `f` on every live observer, in insertion order. Dead weak
    /// references are pruned while the snapshot is taken.
    pub fn notify<F: Fn(&dyn WalletObserver)>(&self, f: F) {
        let snapshot: Vec<Arc<dyn WalletObserver>> = {
            let mut observers = self
                .observers
                .lock()
                .expect("observer registry poisoned");
            observers.retain(|weak| weak.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in snapshot {
            f(observer.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl WalletObserver for Counter {
        fn actual_balance_updated(&self, _balance: u64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn notify_reaches_registered_observers() {
        let registry = ObserverRegistry::new();
        let observer = Arc::new(Counter(AtomicUsize::new(0)));
        registry.add(&observer);
        WalletEvent::ActualBalanceUpdated(10).dispatch(&registry);
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_observers_are_not_notified() {
        let registry = ObserverRegistry::new();
        let observer = Arc::new(Counter(AtomicUsize::new(0)));
        registry.add(&observer);
        registry.remove(&observer);
        WalletEvent::ActualBalanceUpdated(10).dispatch(&registry);
        assert_eq!(observer.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let registry = ObserverRegistry::new();
        let observer = Arc::new(Counter(AtomicUsize::new(0)));
        registry.add(&observer);
        drop(observer);
        // Must not panic or deliver to the dead observer.
        WalletEvent::ActualBalanceUpdated(10).dispatch(&registry);
        assert!(registry.observers.lock().unwrap().is_empty());
    }

    struct SelfRemover {
        registry: Arc<ObserverRegistry>,
        this: Mutex<Option<Arc<SelfRemover>>>,
        calls: AtomicUsize,
    }

    impl WalletObserver for SelfRemover {
        fn actual_balance_updated(&self, _balance: u64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(this) = self.this.lock().unwrap().take() {
                self.registry.remove(&this);
            }
        }
    }

    #[test]
    fn observers_may_remove_themselves_during_delivery() {
        let registry = Arc::new(ObserverRegistry::new());
        let observer = Arc::new(SelfRemover {
            registry: Arc::clone(&registry),
            this: Mutex::new(None),
            calls: AtomicUsize::new(0),
        });
        *observer.this.lock().unwrap() = Some(Arc::clone(&observer));
        registry.add(&observer);

        WalletEvent::ActualBalanceUpdated(1).dispatch(&registry);
        WalletEvent::ActualBalanceUpdated(2).dispatch(&registry);
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
    }

    struct Recorder {
        label: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl WalletObserver for Recorder {
        fn pending_balance_updated(&self, _balance: u64) {
            self.order.lock().unwrap().push(self.label);
        }
    }

    #[test]
    fn delivery_order_is_insertion_order() {
        let registry = ObserverRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(Recorder {
            label: "first",
            order: Arc::clone(&order),
        });
        let second = Arc::new(Recorder {
            label: "second",
            order: Arc::clone(&order),
        });
        registry.add(&first);
        registry.add(&second);
        WalletEvent::PendingBalanceUpdated(5).dispatch(&registry);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
