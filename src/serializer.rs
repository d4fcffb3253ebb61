//! Encrypted, versioned wallet persistence.
//!
//! Blob layout: `magic(4) ‖ version(4, LE) ‖ salt(32) ‖ nonce(24) ‖
//! ciphertext`. The key is derived from the password with Argon2id and the
//! body is sealed with XChaCha20-Poly1305, so a wrong password is
//! distinguishable from a corrupted stream: AEAD failure means wrong
//! password, anything before or after it means a damaged blob.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::account::{Account, AccountKeys, AccountKeysData};
use crate::cache::CacheSnapshot;
use crate::error::WalletError;

const WALLET_MAGIC: [u8; 4] = *b"OBWL";
const WALLET_VERSION: u32 = 1;
const SALT_SIZE: usize = 32;
const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;
const HEADER_SIZE: usize = 4 + 4 + SALT_SIZE + NONCE_SIZE;

/// Plaintext body of the wallet blob.
#[derive(Serialize, Deserialize)]
struct WalletBody {
    keys: AccountKeysData,
    create_time: u64,
    /// Full transaction cache, present on detailed saves.
    cache: Option<CacheSnapshot>,
    /// Opaque sub-container state produced by the synchroniser's own save.
    container: Option<Vec<u8>>,
}

/// Everything a successful load yields. The container blob is handed back
/// untouched: loading it is an optimisation the caller may give up on.
#[derive(Debug)]
pub struct LoadedWallet {
    pub account: Account,
    pub cache: Option<CacheSnapshot>,
    pub container_blob: Option<Vec<u8>>,
}

/// Argon2id parameters for wallet key derivation: 64 MiB memory, 3
/// iterations, 4 lanes.
fn derive_wallet_key(password: &str, salt: &[u8; SALT_SIZE]) -> [u8; 32] {
    let params = argon2::Params::new(65536, 3, 4, Some(32)).expect("valid Argon2 params");
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .expect("Argon2 hash_password_into failed");
    key
}

/// Seal the account (and optionally the cache and container blob) under the
/// password.
pub fn serialize_wallet(
    account: &Account,
    password: &str,
    cache: Option<CacheSnapshot>,
    container_blob: Option<Vec<u8>>,
) -> Result<Vec<u8>, WalletError> {
    let body = WalletBody {
        keys: AccountKeysData::from(account.keys()),
        create_time: account.create_time(),
        cache,
        container: container_blob,
    };
    let plaintext = crate::serialize(&body)
        .map_err(|e| WalletError::Internal(format!("wallet body serialization failed: {e}")))?;

    let salt: [u8; SALT_SIZE] = rand::random();
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let mut key = derive_wallet_key(password, &salt);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext.as_ref())
        .map_err(|_| WalletError::Internal("wallet encryption failed".into()))?;
    key.zeroize();

    let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    out.extend_from_slice(&WALLET_MAGIC);
    out.extend_from_slice(&WALLET_VERSION.to_le_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a wallet blob. `WrongPassword` if the AEAD check fails; `Internal`
/// for a malformed header, an unsupported version, or a body the parser
/// rejects.
pub fn deserialize_wallet(bytes: &[u8], password: &str) -> Result<LoadedWallet, WalletError> {
    if bytes.len() < HEADER_SIZE + TAG_SIZE {
        return Err(WalletError::Internal("wallet stream truncated".into()));
    }
    if bytes[..4] != WALLET_MAGIC {
        return Err(WalletError::Internal("not a wallet stream".into()));
    }
    let version = u32::from_le_bytes(
        bytes[4..8]
            .try_into()
            .map_err(|_| WalletError::Internal("wallet stream truncated".into()))?,
    );
    if version != WALLET_VERSION {
        return Err(WalletError::Internal(format!(
            "unsupported wallet version: {version}"
        )));
    }
    let salt: [u8; SALT_SIZE] = bytes[8..8 + SALT_SIZE]
        .try_into()
        .map_err(|_| WalletError::Internal("wallet stream truncated".into()))?;
    let nonce: [u8; NONCE_SIZE] = bytes[8 + SALT_SIZE..HEADER_SIZE]
        .try_into()
        .map_err(|_| WalletError::Internal("wallet stream truncated".into()))?;
    let ciphertext = &bytes[HEADER_SIZE..];

    let mut key = derive_wallet_key(password, &salt);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let decrypted = cipher.decrypt(XNonce::from_slice(&nonce), ciphertext);
    key.zeroize();
    let plaintext = decrypted.map_err(|_| WalletError::WrongPassword)?;

    let body: WalletBody = crate::deserialize(&plaintext)
        .map_err(|e| WalletError::Internal(format!("malformed wallet body: {e}")))?;
    Ok(LoadedWallet {
        account: Account::from_parts(AccountKeys::from(&body.keys), body.create_time),
        cache: body.cache,
        container_blob: body.container,
    })
}
