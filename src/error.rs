//! Wallet error kinds and propagation policy.
//!
//! Synchronous preconditions (state, password, amounts) fail on the caller's
//! thread with the specific kind; asynchronous operations surface their
//! outcome only through the matching completion observer method.

use crate::cache::DepositId;
use crate::node::NodeError;
use crate::sync::SyncError;

/// Errors surfaced by the wallet façade and the request engine.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("wallet is already initialized")]
    AlreadyInitialized,
    #[error("wallet is not initialized")]
    NotInitialized,
    #[error("operation is not allowed in the current wallet state")]
    WrongState,
    #[error("wrong password")]
    WrongPassword,
    #[error("operation cancelled")]
    OperationCancelled,
    #[error("transaction cancellation is not supported")]
    TxCancelImpossible,
    #[error("shutdown is already in progress")]
    AlreadyShuttingDown,
    #[error("wrong transfer amount")]
    WrongAmount,
    #[error("amount sum overflow")]
    SumOverflow,
    #[error("deposit term is outside the allowed range")]
    DepositTermInvalid,
    #[error("deposit amount is below the allowed minimum")]
    DepositAmountTooSmall,
    #[error("deposit {0} is locked or already being withdrawn")]
    DepositLocked(DepositId),
    #[error("unknown deposit {0}")]
    UnknownDeposit(DepositId),
    #[error("insufficient funds: available {available}, needed {needed}")]
    InsufficientFunds { available: u64, needed: u64 },
    #[error("node error: {0}")]
    Node(#[from] NodeError),
    #[error("synchronizer error: {0}")]
    Sync(#[from] SyncError),
    #[error("internal wallet error: {0}")]
    Internal(String),
}
