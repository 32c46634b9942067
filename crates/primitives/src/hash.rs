use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use sha2::Digest;
use thiserror::Error;

const BYTES_LEN: usize = 32;

/// A 32-byte content hash.
///
/// The identity of every tree node is the SHA-256 digest of its canonical
/// serialization. Displayed and serialized as base58.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash {
    bytes: [u8; BYTES_LEN],
}

impl Hash {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BYTES_LEN] {
        &self.bytes
    }

    /// Digest raw bytes into a hash.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self {
            bytes: sha2::Sha256::digest(data).into(),
        }
    }

    /// Digest the borsh serialization of a value.
    #[cfg(feature = "borsh")]
    pub fn hash_borsh<T: borsh::BorshSerialize>(data: &T) -> std::io::Result<Self> {
        let mut hasher = sha2::Sha256::default();

        data.serialize(&mut hasher)?;

        Ok(Self {
            bytes: hasher.finalize().into(),
        })
    }

    /// The all-zero hash, used as the empty-tree sentinel.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            bytes: [0; BYTES_LEN],
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.bytes == [0; BYTES_LEN]
    }
}

impl From<[u8; BYTES_LEN]> for Hash {
    fn from(bytes: [u8; BYTES_LEN]) -> Self {
        Self { bytes }
    }
}

impl From<Hash> for [u8; BYTES_LEN] {
    fn from(hash: Hash) -> Self {
        hash.bytes
    }
}

impl Deref for Hash {
    type Target = [u8; BYTES_LEN];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&bs58::encode(&self.bytes).into_string())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash")
            .field(&bs58::encode(&self.bytes).into_string())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Error)]
pub enum Error {
    #[error("invalid hash length")]
    InvalidLength,

    #[error("invalid base58")]
    DecodeError(#[from] bs58::decode::Error),
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; BYTES_LEN];
        match bs58::decode(s).onto(&mut bytes) {
            Ok(len) if len == bytes.len() => Ok(Self { bytes }),
            Ok(_) => Err(Error::InvalidLength),
            Err(err) => Err(Error::DecodeError(err)),
        }
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HashVisitor;

        impl serde::de::Visitor<'_> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a base58 encoded hash")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Hash::from_str(v).map_err(|err| match err {
                    Error::InvalidLength => E::invalid_length(v.len(), &self),
                    Error::DecodeError(err) => E::custom(err),
                })
            }
        }

        deserializer.deserialize_str(HashVisitor)
    }
}

#[cfg(feature = "borsh")]
impl borsh::BorshSerialize for Hash {
    fn serialize<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        borsh::BorshSerialize::serialize(&self.bytes, writer)
    }
}

#[cfg(feature = "borsh")]
impl borsh::BorshDeserialize for Hash {
    fn deserialize_reader<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
        <[u8; BYTES_LEN] as borsh::BorshDeserialize>::deserialize_reader(reader).map(Self::from)
    }
}
