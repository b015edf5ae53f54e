// Replicated-log types shared between the metadata store, the peer
// buffer, and the log cache it reads from.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

/// Identifier of one log entry: the term it was written in and its
/// position in the log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct OpId {
    pub term: i64,
    pub index: i64,
}

impl OpId {
    pub fn new(term: i64, index: i64) -> Self {
        Self { term, index }
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.term, self.index)
    }
}

/// A replicate message staged for shipment to a follower.
///
/// The id is absent on messages that have not been assigned a log
/// position; such messages cannot be buffered. The payload is shared, so
/// clones of the surrounding `ReplicateRef` are cheap.
#[derive(Debug, Clone)]
pub struct ReplicateMsg {
    id: Option<OpId>,
    payload: Bytes,
}

impl ReplicateMsg {
    pub fn new(term: i64, index: i64, payload: Bytes) -> Self {
        Self {
            id: Some(OpId::new(term, index)),
            payload,
        }
    }

    /// A message with no log position yet.
    pub fn unassigned(payload: Bytes) -> Self {
        Self { id: None, payload }
    }

    pub fn id(&self) -> Option<&OpId> {
        self.id.as_ref()
    }

    pub fn index(&self) -> Option<i64> {
        self.id.map(|id| id.index)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Approximate wire size, used for batching arithmetic.
    pub fn size_bytes(&self) -> usize {
        std::mem::size_of::<OpId>() + self.payload.len()
    }
}

/// Shared-ownership handle to a replicate message. The log cache and any
/// number of peer buffers may hold the same message concurrently.
pub type ReplicateRef = Arc<ReplicateMsg>;

/// Destination details for one cache read on behalf of a peer.
#[derive(Debug, Clone)]
pub struct ReadContext {
    pub peer_uuid: String,
    pub host: String,
    pub port: u32,
    /// Whether the messages will be shipped via an intermediate node.
    pub route_via_proxy: bool,
}

/// Result of a successful `LogCache::read_ops` call.
#[derive(Debug, Default)]
pub struct CacheReadResult {
    /// Messages following `after_index`, contiguous and in index order.
    pub messages: Vec<ReplicateRef>,

    /// The id of the entry at `after_index`, when the cache knows it.
    pub preceding_op: Option<OpId>,

    /// The cache stopped before reaching the requested fill size; the
    /// caller may resume from where this read ended.
    pub stopped_early: bool,
}

/// Read-side contract of the log cache.
///
/// Implementations return ops strictly after `after_index`, bounded by
/// `max_bytes`. A request for an op that is still pending append fails
/// with `ConsensusError::Incomplete`.
pub trait LogCache {
    fn read_ops(&self, after_index: i64, max_bytes: i64, ctx: &ReadContext)
        -> Result<CacheReadResult>;
}
