//! Identity keys shared by all persisted records.
//!
//! # Responsibility
//! - Define the canonical key type and the pending/persisted reference sum.
//! - Keep the caller-side negative-key convention at the serde boundary only.
//!
//! # Invariants
//! - Persisted keys are strictly positive row ids.
//! - Pending tags are strictly negative and never reach storage.
//! - Zero is not a valid key on either side.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Generated storage key. SQLite row ids are 64-bit integers.
pub type RecordId = i64;

/// Capability shared by every record with a declared identity key.
pub trait Keyed {
    type Key: Copy + Ord;

    fn key(&self) -> Self::Key;
    fn set_key(&mut self, key: Self::Key);
}

/// Reference to a sub-entity that may not have a storage key yet.
///
/// Submissions cross-reference new children with caller-assigned negative
/// tags. Those tags live only for the duration of one save; remapping them to
/// real keys is a total function over the key map built while persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    /// Row already exists under this key.
    Persisted(RecordId),
    /// New row, identified inside the submission by a negative tag.
    Pending(i64),
}

impl EntityRef {
    /// Converts the wire integer into a reference. Zero is rejected.
    pub fn from_raw(value: i64) -> Result<Self, InvalidRefError> {
        if value > 0 {
            Ok(Self::Persisted(value))
        } else if value < 0 {
            Ok(Self::Pending(value))
        } else {
            Err(InvalidRefError)
        }
    }

    /// Returns the wire integer: the key for persisted refs, the tag otherwise.
    pub fn raw(self) -> i64 {
        match self {
            Self::Persisted(id) => id,
            Self::Pending(tag) => tag,
        }
    }

    /// Returns the storage key when already persisted.
    pub fn as_persisted(self) -> Option<RecordId> {
        match self {
            Self::Persisted(id) => Some(id),
            Self::Pending(_) => None,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Resolves this reference against the key map of the current save.
    ///
    /// Persisted refs pass through unchanged; pending tags must be present in
    /// `map` or the reference is unresolved.
    pub fn resolve(self, map: &BTreeMap<i64, RecordId>) -> Result<RecordId, UnresolvedRef> {
        match self {
            Self::Persisted(id) => Ok(id),
            Self::Pending(tag) => map.get(&tag).copied().ok_or(UnresolvedRef { tag }),
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw())
    }
}

impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.raw())
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Self::from_raw(value)
            .map_err(|_| D::Error::custom("entity reference must be a non-zero integer"))
    }
}

/// Zero was supplied where a key or pending tag was expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRefError;

impl Display for InvalidRefError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity reference must be a non-zero integer")
    }
}

impl std::error::Error for InvalidRefError {}

/// A pending tag had no entry in the key map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedRef {
    pub tag: i64,
}

impl Display for UnresolvedRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "pending reference {} was never assigned a key", self.tag)
    }
}

impl std::error::Error for UnresolvedRef {}
