//! Account key material and creation-time bookkeeping.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::ACCOUNT_CREATE_TIME_ACCURACY;
use crate::Hash;

/// Secret key material: a spend keypair authorising outgoing transactions and
/// a view keypair identifying the account to the synchroniser.
#[derive(Clone)]
pub struct AccountKeys {
    pub spend: SigningKey,
    pub view: SigningKey,
}

impl AccountKeys {
    pub fn generate() -> Self {
        AccountKeys {
            spend: SigningKey::from_bytes(&rand::random()),
            view: SigningKey::from_bytes(&rand::random()),
        }
    }

    pub fn public_keys(&self) -> AccountPublicKeys {
        AccountPublicKeys {
            spend: self.spend.verifying_key(),
            view: self.view.verifying_key(),
        }
    }

    /// Sign a digest with the spend key.
    pub fn sign(&self, digest: &Hash) -> [u8; 64] {
        self.spend.sign(digest).to_bytes()
    }
}

impl std::fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret seeds never reach logs.
        f.debug_struct("AccountKeys")
            .field("spend", &hex::encode(self.spend.verifying_key().as_bytes()))
            .field("view", &hex::encode(self.view.verifying_key().as_bytes()))
            .finish()
    }
}

/// Public half of the account keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountPublicKeys {
    pub spend: VerifyingKey,
    pub view: VerifyingKey,
}

/// Serialized form of [`AccountKeys`]: the two 32-byte seeds. Scrubbed on
/// drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct AccountKeysData {
    pub spend_seed: [u8; 32],
    pub view_seed: [u8; 32],
}

impl From<&AccountKeys> for AccountKeysData {
    fn from(keys: &AccountKeys) -> Self {
        AccountKeysData {
            spend_seed: keys.spend.to_bytes(),
            view_seed: keys.view.to_bytes(),
        }
    }
}

impl From<&AccountKeysData> for AccountKeys {
    fn from(data: &AccountKeysData) -> Self {
        AccountKeys {
            spend: SigningKey::from_bytes(&data.spend_seed),
            view: SigningKey::from_bytes(&data.view_seed),
        }
    }
}

/// A cryptographic identity plus the creation timestamp the synchroniser uses
/// as its scan-start hint.
#[derive(Clone, Debug)]
pub struct Account {
    keys: AccountKeys,
    create_time: u64,
}

impl Account {
    /// Generate a fresh account stamped with the current time.
    pub fn generate() -> Self {
        Account {
            keys: AccountKeys::generate(),
            create_time: crate::unix_now(),
        }
    }

    /// Import existing keys. The creation time is unknown, so it is set to
    /// one accuracy quantum: the sync start hint becomes the epoch and the
    /// whole chain is scanned.
    pub fn from_keys(keys: AccountKeys) -> Self {
        Account {
            keys,
            create_time: ACCOUNT_CREATE_TIME_ACCURACY,
        }
    }

    pub fn from_parts(keys: AccountKeys, create_time: u64) -> Self {
        Account { keys, create_time }
    }

    pub fn keys(&self) -> &AccountKeys {
        &self.keys
    }

    pub fn public_keys(&self) -> AccountPublicKeys {
        self.keys.public_keys()
    }

    pub fn create_time(&self) -> u64 {
        self.create_time
    }
}
