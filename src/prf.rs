//! AES-based pseudo-random function used to derive correlated randomness without communication.
//!
//! Every party evaluates the same keyed function on the same inputs, so masks that several
//! parties need to agree on can be computed locally. Inputs are encoded into a single AES block:
//! the low 8 bytes hold the input, the high 8 bytes a domain tweak (the task and operation the
//! mask belongs to).
use std::fmt;

use aes::{
    Aes128,
    cipher::{BlockCipherEncrypt, Key, KeyInit},
};
use serde::{Deserialize, Serialize};

/// Context string for deriving session keys from passphrases.
const KEY_DERIVATION_CONTEXT: &str = "quintet 2025-01 prf session key";

/// The pre-shared 16-byte key of a PRF.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey([u8; 16]);

impl SessionKey {
    /// Wraps raw key bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Derives a key from a passphrase that all parties share out of band.
    pub fn derive(passphrase: &str) -> Self {
        let derived = blake3::derive_key(KEY_DERIVATION_CONTEXT, passphrase.as_bytes());
        let mut key = [0; 16];
        key.copy_from_slice(&derived[..16]);
        Self(key)
    }

    /// Samples a fresh random key.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for SessionKey {
    fn default() -> Self {
        Self([0x01; 16])
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// A keyed pseudo-random function `u64 -> u64`.
#[derive(Clone)]
pub struct Prf {
    aes: Aes128,
}

impl Prf {
    /// Creates the PRF for the given session key.
    pub fn new(key: &SessionKey) -> Self {
        let key: Key<Aes128> = key.0.into();
        Self {
            aes: Aes128::new(&key),
        }
    }

    /// Evaluates the PRF on `input` without a domain tweak.
    pub fn eval(&self, input: u64) -> u64 {
        self.eval_tweaked(0, input)
    }

    /// Evaluates the PRF on `input` in the domain identified by `tweak`.
    pub fn eval_tweaked(&self, tweak: u64, input: u64) -> u64 {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&input.to_le_bytes());
        bytes[8..].copy_from_slice(&tweak.to_le_bytes());
        let mut block: aes::Block = bytes.into();
        self.aes.encrypt_block(&mut block);
        let mut out = [0u8; 8];
        out.copy_from_slice(&block[..8]);
        u64::from_le_bytes(out)
    }
}

impl Default for Prf {
    fn default() -> Self {
        Self::new(&SessionKey::default())
    }
}

impl fmt::Debug for Prf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prf").finish_non_exhaustive()
    }
}
