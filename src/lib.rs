//! # Obol
//!
//! A single-account cryptocurrency wallet engine:
//! - **Lifecycle state machine** — init/load/save/shutdown guarded against
//!   concurrent observer callbacks and user calls
//! - **Transaction cache** — reconciles authoritative on-chain state with the
//!   wallet's own pending transactions and term deposits
//! - **Four-axis balances** — actual/pending × regular/deposit, with exactly
//!   one notification per axis per value change
//! - **Request chaining** — build, sign, relay, and confirm transactions as a
//!   linked list of remote calls with per-step event emission
//! - **Encrypted persistence** — Argon2id + XChaCha20-Poly1305 versioned
//!   wallet blobs
//!
//! The blockchain synchroniser, the transfers container, and the node RPC are
//! external collaborators consumed through the traits in [`sync`] and
//! [`node`].

pub mod account;
pub mod async_counter;
pub mod balance;
pub mod cache;
pub mod currency;
pub mod error;
pub mod node;
pub mod observer;
pub mod sender;
pub mod serializer;
pub mod sync;
pub mod wallet;

/// Engine-wide constants.
pub mod constants {
    /// Accuracy quantum of an account's creation timestamp (one day, in
    /// seconds). Sync starts one quantum before the recorded create time.
    pub const ACCOUNT_CREATE_TIME_ACCURACY: u64 = 24 * 60 * 60;

    /// Confirmations an output needs before the container treats it as
    /// spendable; forwarded to the synchroniser subscription.
    pub const DEFAULT_TX_SPENDABLE_AGE: u32 = 10;

    /// Upper bound on a decrypted wallet body (64 MiB). Bodies are untrusted
    /// input until authenticated decryption and parsing both succeed.
    pub const MAX_WALLET_BODY_BYTES: usize = 64 * 1024 * 1024;
}

/// 32-byte hash used throughout the engine.
pub type Hash = [u8; 32];

/// Compute a domain-separated BLAKE3 hash. The domain must be valid UTF-8
/// (all obol domains are ASCII); a non-UTF-8 domain is a programming error.
pub fn hash_domain(domain: &[u8], data: &[u8]) -> Hash {
    let domain_str = std::str::from_utf8(domain).expect("hash_domain: domain must be valid UTF-8");
    let mut hasher = blake3::Hasher::new_derive_key(domain_str);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Size-limited bincode config used for both serialization and
/// deserialization of wallet bodies and cache snapshots.
fn codec() -> impl bincode::Options {
    use bincode::Options;
    bincode::DefaultOptions::new().with_limit(constants::MAX_WALLET_BODY_BYTES as u64)
}

/// Serialize a value with the wallet codec.
pub fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    use bincode::Options;
    codec().serialize(value)
}

/// Deserialize a value with the wallet codec. Rejects oversized and trailing
/// input.
pub fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    use bincode::Options;
    codec().deserialize(bytes)
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
