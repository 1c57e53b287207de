//! # Checkpoint Format
//!
//! Full-state checkpoints of the rate limiter.
//!
//! A [`PartitionSnapshot`] captures one partition: its live window and its
//! next flush deadline. An [`OperatorState`] bundles the snapshots of every
//! live partition of one limiter, keyed by partition identity.
//!
//! ## Wire Format
//!
//! ```text
//! [version: 1][rkyv archive ...]
//! ```
//!
//! The version byte selects the archive layout. New fields get a new version;
//! older versions keep decoding through their own branch.

use crate::event::{Event, PartitionKey};
use rkyv::{
    api::high::{HighDeserializer, HighSerializer, HighValidator},
    bytecheck::CheckBytes,
    rancor::Error as RkyvError,
    ser::allocator::ArenaHandle,
    util::AlignedVec,
    Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize,
};

/// Current checkpoint layout version.
pub const CHECKPOINT_VERSION: u8 = 1;

/// Errors from checkpoint encoding, decoding and restore.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Payload has no version header
    #[error("empty checkpoint data")]
    Empty,

    /// Payload was written by an unknown layout
    #[error("unsupported checkpoint version: {0}")]
    UnsupportedVersion(u8),

    /// Archive could not be produced
    #[error("checkpoint serialization failed: {0}")]
    Serialization(String),

    /// Archive is truncated or corrupt
    #[error("checkpoint deserialization failed: {0}")]
    Deserialization(String),

    /// Checkpoint belongs to another operator
    #[error("operator ID mismatch: expected {expected}, got {actual}")]
    OperatorMismatch {
        /// ID of the restoring operator
        expected: String,
        /// ID recorded in the checkpoint
        actual: String,
    },
}

/// Full state of one partition at checkpoint time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct PartitionSnapshot {
    /// Live window entries in membership order
    pub event_list: Vec<Event>,
    /// Next flush deadline, `None` if unarmed
    pub scheduled_time: Option<i64>,
}

impl PartitionSnapshot {
    /// Encodes the snapshot with a version header.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Serialization`] if archiving fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        encode(self)
    }

    /// Decodes a snapshot produced by [`PartitionSnapshot::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is empty, of an unknown version, or
    /// corrupt.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CheckpointError> {
        decode(data)
    }
}

/// A partition snapshot tagged with its partition identity.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct PartitionCheckpoint {
    /// Raw partition key bytes
    pub key: Vec<u8>,
    /// The partition's state
    pub snapshot: PartitionSnapshot,
}

impl PartitionCheckpoint {
    /// Pairs a snapshot with its partition key.
    #[must_use]
    pub fn new(key: &PartitionKey, snapshot: PartitionSnapshot) -> Self {
        Self {
            key: key.as_bytes().to_vec(),
            snapshot,
        }
    }

    /// Returns the partition key.
    #[must_use]
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(&self.key)
    }
}

/// Every partition of one limiter, as written into [`OperatorState::data`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct LimiterCheckpoint {
    /// Per-partition snapshots
    pub partitions: Vec<PartitionCheckpoint>,
}

impl LimiterCheckpoint {
    /// Encodes the bundle with a version header.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Serialization`] if archiving fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        encode(self)
    }

    /// Decodes a bundle produced by [`LimiterCheckpoint::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is empty, of an unknown version, or
    /// corrupt.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CheckpointError> {
        decode(data)
    }
}

/// Serialized operator state handed to the checkpoint manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorState {
    /// Operator ID
    pub operator_id: String,
    /// Versioned [`LimiterCheckpoint`] bytes
    pub data: Vec<u8>,
}

fn encode<T>(value: &T) -> Result<Vec<u8>, CheckpointError>
where
    T: for<'a> RkyvSerialize<HighSerializer<AlignedVec, ArenaHandle<'a>, RkyvError>>,
{
    let archive = rkyv::to_bytes::<RkyvError>(value)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
    let mut buf = Vec::with_capacity(1 + archive.len());
    buf.push(CHECKPOINT_VERSION);
    buf.extend_from_slice(&archive);
    Ok(buf)
}

fn decode<T>(data: &[u8]) -> Result<T, CheckpointError>
where
    T: Archive,
    T::Archived:
        for<'a> CheckBytes<HighValidator<'a, RkyvError>> + RkyvDeserialize<T, HighDeserializer<RkyvError>>,
{
    let (&version, payload) = data.split_first().ok_or(CheckpointError::Empty)?;
    match version {
        CHECKPOINT_VERSION => {
            // The header shifts the archive off its alignment.
            let mut aligned = AlignedVec::<16>::with_capacity(payload.len());
            aligned.extend_from_slice(payload);
            rkyv::from_bytes::<T, RkyvError>(&aligned)
                .map_err(|e| CheckpointError::Deserialization(e.to_string()))
        }
        other => Err(CheckpointError::UnsupportedVersion(other)),
    }
}
