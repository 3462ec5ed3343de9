//! Mood entry identifiers.
//!
//! Entry IDs are 16-byte values encoded with bs58check (base58 with checksum).
//! They are generated on the device that records the entry, so they must stay
//! unique without consulting the server and regardless of clock skew: each ID is
//! derived from 128 random bits, a per-device salt and a per-generator counter.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur with entry IDs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryIdError {
    #[error("Invalid bs58check encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid entry ID length: expected 16 bytes, got {0}")]
    InvalidLength(usize),
}

/// Identifier of a single mood entry.
///
/// Displays and serializes as a bs58check string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId([u8; 16]);

impl EntryId {
    /// Create an entry ID from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Encode as bs58check string
    pub fn to_bs58check(&self) -> String {
        bs58::encode(&self.0).with_check().into_string()
    }

    /// Decode from bs58check string
    pub fn from_bs58check(s: &str) -> Result<Self, EntryIdError> {
        let bytes = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| EntryIdError::InvalidEncoding(e.to_string()))?;

        if bytes.len() != 16 {
            return Err(EntryIdError::InvalidLength(bytes.len()));
        }

        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_bs58check())
    }
}

impl std::str::FromStr for EntryId {
    type Err = EntryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bs58check(s)
    }
}

impl Serialize for EntryId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_bs58check())
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_bs58check(&s).map_err(serde::de::Error::custom)
    }
}

/// Generates collision-resistant entry IDs for one device.
#[derive(Debug)]
pub struct EntryIdGenerator {
    salt: [u8; 32],
    counter: AtomicU64,
}

impl EntryIdGenerator {
    /// Create a generator salted with the given device identifier.
    pub fn new(device_id: &str) -> Self {
        let salt: [u8; 32] = Sha256::digest(device_id.as_bytes()).into();
        Self {
            salt,
            counter: AtomicU64::new(0),
        }
    }

    /// Generate a fresh entry ID.
    pub fn generate(&self) -> EntryId {
        let random: [u8; 16] = rand::random();
        let count = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(self.salt);
        hasher.update(random);
        hasher.update(count.to_be_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        EntryId(bytes)
    }
}
