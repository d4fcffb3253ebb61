//! Node collaborator interface: relaying signed transactions.

use serde::{Deserialize, Serialize};

use crate::Hash;

/// A fully drafted and signed transaction in its wire shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hash: Hash,
    /// Serialized draft followed by the spend-key signature.
    pub blob: Vec<u8>,
}

/// Remote node consumed by the request engine. Calls may block on network
/// I/O; they are only ever made from worker threads, never under the façade
/// mutex.
pub trait Node: Send + Sync {
    fn relay_transaction(&self, transaction: &SignedTransaction) -> Result<(), NodeError>;
    /// Whether the node's pool or chain knows the transaction.
    fn transaction_known(&self, hash: &Hash) -> Result<bool, NodeError>;
}

/// Pass-through network error codes.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("node is not connected")]
    NotConnected,
    #[error("transaction rejected: {0}")]
    TxRejected(String),
    #[error("network error: {0}")]
    Network(String),
}
