//! Ed25519 identities and the deterministic ids derived from them.
//!
//! A peer is its key pair. The 32-byte seed is the only persistent
//! material; everything else is a pure function of it: the signing key,
//! the full id (hex SHA-1 of the public key) and the short id (its first
//! twenty characters).

use std::fmt::Write;

use ed25519_dalek::Signer;
use ed25519_dalek::Verifier;
use rand::RngCore;
use sha1::Digest;
use sha1::Sha1;

use crate::consts::REALM_SEPARATOR;
use crate::consts::SHORT_ID_LEN;
use crate::error::Error;
use crate::error::Result;

/// Byte length of a seed.
pub const SEED_LEN: usize = 32;

/// The random material an identity is derived from. Base58-encoded when
/// persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Seed([u8; SEED_LEN]);

impl Seed {
    /// Generate a fresh seed from the OS RNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SEED_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw seed bytes.
    pub fn from_bytes(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a Base58 seed string.
    pub fn from_base58(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s).into_vec()?;
        let bytes: [u8; SEED_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidSeedLength)?;
        Ok(Self(bytes))
    }

    /// The Base58 rendition used for persistence.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// Raw seed bytes.
    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The seed is the private key material, never log it.
        write!(f, "Seed(..)")
    }
}

/// An Ed25519 signing pair derived deterministically from a [Seed].
#[derive(Clone)]
pub struct KeyPair {
    signing: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Derive the key pair of `seed`.
    pub fn from_seed(seed: &Seed) -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::from_bytes(seed.as_bytes()),
        }
    }

    /// The 32-byte public key.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// Sign `msg`, returning the 64-byte signature.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing.sign(msg).to_bytes()
    }

    /// The full id of this identity.
    pub fn full_id(&self) -> String {
        make_full_id(&self.public_key())
    }

    /// The short id of this identity.
    pub fn short_id(&self) -> String {
        make_short_id(&self.public_key())
    }
}

/// Hex SHA-1 of arbitrary bytes. The hash behind ids and the SDP binding
/// is centralized here; it defaults to SHA-1 for wire compatibility with
/// existing deployments.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let bytes = hasher.finalize();
    let mut ret = String::with_capacity(bytes.len() * 2);
    for &b in &bytes {
        write!(ret, "{:02x}", b).unwrap();
    }
    ret
}

/// The full id of a public key: its lowercase hex SHA-1, 40 chars.
pub fn make_full_id(public_key: &[u8]) -> String {
    sha1_hex(public_key)
}

/// The short id of a public key: the first 20 chars of its full id.
pub fn make_short_id(public_key: &[u8]) -> String {
    let mut id = make_full_id(public_key);
    id.truncate(SHORT_ID_LEN);
    id
}

/// Derive the rendezvous info hash of a realm and user key, 40 hex chars.
/// Different realms never collide even for equal user keys.
pub fn make_info_hash(realm: &str, user_key: &str) -> String {
    sha1_hex(format!("{realm}{REALM_SEPARATOR}{user_key}").as_bytes())
}

/// Verify an Ed25519 signature over `msg` with a raw 32-byte public key.
pub fn verify(public_key: &[u8], msg: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <&[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <&[u8; 64]>::try_from(signature) else {
        return false;
    };
    key.verify(msg, &ed25519_dalek::Signature::from_bytes(sig_bytes))
        .is_ok()
}

/// Compare two ids on the shorter of the two lengths, so a ShortID and
/// the FullID it prefixes are considered the same peer.
pub fn id_prefix_match(a: &str, b: &str) -> bool {
    let n = a.len().min(b.len());
    if n == 0 {
        return false;
    }
    a.as_bytes()[..n] == b.as_bytes()[..n]
}
