//! Signing collaborator
//!
//! - `SignatureService`: the opaque sign/verify contract the auction consumes
//! - `Sr25519Keyring`: software implementation over sr25519 key pairs
//!
//! A hardware-backed implementation lives in [`crate::device`].

use std::collections::HashMap;

use parking_lot::RwLock;
use sp_core::sr25519::{Pair, Public, Signature};
use sp_core::Pair as _;
use tracing::debug;

use crate::error::DeviceError;

pub trait SignatureService: Send + Sync {
    /// Sign `hash` with the key stored in slot `key_id`.
    fn sign(&self, key_id: u8, hash: &[u8]) -> Result<Vec<u8>, DeviceError>;

    /// Check `signature` over `hash` against `public_key`. Malformed inputs
    /// are an ordinary `false`, not an error.
    fn verify(&self, public_key: &[u8], signature: &[u8], hash: &[u8]) -> Result<bool, DeviceError>;
}

/// Verify a raw sr25519 signature.
pub fn verify_sr25519(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        debug!(
            "Invalid public key length: {} (expected 32)",
            public_key.len()
        );
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        debug!(
            "Invalid signature length: {} (expected 64)",
            signature.len()
        );
        return false;
    };

    let public = Public::from_raw(key_bytes);
    let signature = Signature::from_raw(sig_bytes);
    Pair::verify(&signature, message, &public)
}

/// In-process sr25519 keys addressed by slot, mirroring the 128-slot layout
/// of the hardware signer.
#[derive(Default)]
pub struct Sr25519Keyring {
    keys: RwLock<HashMap<u8, Pair>>,
}

impl Sr25519Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a key derived from a 32-byte seed. Returns its public key.
    pub fn insert_seed(&self, key_id: u8, seed: &[u8; 32]) -> Result<Vec<u8>, DeviceError> {
        check_key_id(key_id)?;
        let pair = Pair::from_seed(seed);
        let public = AsRef::<[u8]>::as_ref(&pair.public()).to_vec();
        self.keys.write().insert(key_id, pair);
        Ok(public)
    }

    pub fn public_key(&self, key_id: u8) -> Result<Vec<u8>, DeviceError> {
        self.keys
            .read()
            .get(&key_id)
            .map(|pair| AsRef::<[u8]>::as_ref(&pair.public()).to_vec())
            .ok_or(DeviceError::UnknownKey(key_id))
    }

    pub fn remove(&self, key_id: u8) -> bool {
        self.keys.write().remove(&key_id).is_some()
    }
}

impl SignatureService for Sr25519Keyring {
    fn sign(&self, key_id: u8, hash: &[u8]) -> Result<Vec<u8>, DeviceError> {
        check_key_id(key_id)?;
        let keys = self.keys.read();
        let pair = keys.get(&key_id).ok_or(DeviceError::UnknownKey(key_id))?;
        Ok(AsRef::<[u8]>::as_ref(&pair.sign(hash)).to_vec())
    }

    fn verify(&self, public_key: &[u8], signature: &[u8], hash: &[u8]) -> Result<bool, DeviceError> {
        Ok(verify_sr25519(public_key, signature, hash))
    }
}

/// Key slots are numbered 0-127.
pub const MAX_KEY_ID: u8 = 127;

pub(crate) fn check_key_id(key_id: u8) -> Result<(), DeviceError> {
    if key_id > MAX_KEY_ID {
        return Err(DeviceError::InvalidKeyId(key_id));
    }
    Ok(())
}
