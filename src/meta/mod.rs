// Durable per-group consensus metadata.
//
// ConsensusMetadata mirrors the persisted record (term, vote grant,
// committed config, pruned vote history, last-known leader) and overlays
// the volatile state: a pending config while a membership change is in
// flight, the observed leader for the current term, the derived role, and
// a bounded ring of recently removed peers. Mutators are memory-only
// unless noted; durability goes through `flush`.
//
// The type is not internally synchronized. Mutators take `&mut self`;
// callers that share a ConsensusMetadata across threads serialize access
// with whatever lock owns the value.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{self, RaftConfig, RaftRole};
use crate::error::{ConsensusError, Result};
use crate::fault;
use crate::fs::record::{self, SyncMode, WriteMode};
use crate::fs::FsManager;

/// Lowest term the protocol admits.
pub const MIN_TERM: i64 = 0;

/// Sentinel for "no vote-history entry has ever been pruned".
pub const NO_PRUNED_TERM: i64 = -1;

pub const DEFAULT_VOTE_HISTORY_MAX_SIZE: usize = 5;
pub const DEFAULT_MAX_REMOVED_PEERS: usize = 20;

// Flushes slower than this get a warning log.
const SLOW_FLUSH: Duration = Duration::from_millis(500);

/// Startup knobs for the metadata store.
#[derive(Debug, Clone)]
pub struct MetadataOptions {
    /// Cap on `previous_vote_history`; the oldest entry is evicted beyond it.
    pub vote_history_max_size: usize,

    /// Cap on the recently-removed-peers ring.
    pub max_removed_peers: usize,

    /// Probability that `flush` aborts the process before writing.
    /// Honored only under the `fault-injection` feature.
    pub crash_before_flush: f64,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            vote_history_max_size: DEFAULT_VOTE_HISTORY_MAX_SIZE,
            max_removed_peers: DEFAULT_MAX_REMOVED_PEERS,
            crash_before_flush: 0.0,
        }
    }
}

/// A vote granted in a prior term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PreviousVote {
    pub candidate_uuid: String,
    pub term: i64,
}

/// Last leader this node acknowledged. Empty uuid and term 0 when none is
/// known.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct LeaderRecord {
    pub uuid: String,
    pub term: i64,
}

impl LeaderRecord {
    pub fn is_known(&self) -> bool {
        !self.uuid.is_empty()
    }
}

/// The on-disk record, serialized whole on every flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PersistedMetadata {
    pub current_term: i64,
    pub voted_for: Option<String>,
    pub committed_config: RaftConfig,
    pub previous_vote_history: BTreeMap<i64, PreviousVote>,
    pub last_known_leader: LeaderRecord,
    pub last_pruned_term: i64,
}

/// Point-in-time export of the externally visible consensus state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusState {
    pub current_term: i64,
    pub leader_uuid: Option<String>,
    pub committed_config: RaftConfig,
    pub pending_config: Option<RaftConfig>,
}

/// Whether `create` writes the record immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Flush with no-overwrite semantics; fails if the file exists.
    FlushOnCreate,
    /// Construct in memory only; still fails if the file already exists.
    NoFlushOnCreate,
}

#[derive(Debug)]
pub struct ConsensusMetadata {
    fs: Arc<FsManager>,
    group_id: String,
    peer_uuid: String,

    persisted: PersistedMetadata,

    // Volatile overlay, never persisted directly.
    pending_config: Option<RaftConfig>,
    leader_uuid: String,
    active_role: RaftRole,
    removed_peers: VecDeque<String>,

    opts: MetadataOptions,
    on_disk_size: u64,
    flush_count: u64,
}

impl ConsensusMetadata {
    /// Construct fresh metadata for a group that has never had any.
    ///
    /// `FlushOnCreate` writes the record with no-overwrite semantics, so
    /// an existing file fails with `AlreadyPresent`; `NoFlushOnCreate`
    /// checks for an existing file and fails the same way without
    /// writing.
    pub fn create(
        fs: Arc<FsManager>,
        group_id: impl Into<String>,
        peer_uuid: impl Into<String>,
        initial_config: RaftConfig,
        initial_term: i64,
        mode: CreateMode,
        opts: MetadataOptions,
    ) -> Result<Self> {
        debug_assert!(initial_term >= MIN_TERM, "term {initial_term} below minimum");
        let group_id = group_id.into();
        let peer_uuid = peer_uuid.into();

        let persisted = PersistedMetadata {
            current_term: initial_term,
            voted_for: None,
            committed_config: initial_config,
            previous_vote_history: BTreeMap::new(),
            last_known_leader: LeaderRecord::default(),
            last_pruned_term: NO_PRUNED_TERM,
        };
        let mut cmeta = Self {
            fs,
            group_id,
            peer_uuid,
            persisted,
            pending_config: None,
            leader_uuid: String::new(),
            active_role: RaftRole::NonParticipant,
            removed_peers: VecDeque::new(),
            opts,
            on_disk_size: 0,
            flush_count: 0,
        };
        cmeta.recompute_role();

        match mode {
            CreateMode::FlushOnCreate => cmeta.flush(WriteMode::NoOverwrite)?,
            CreateMode::NoFlushOnCreate => {
                let path = cmeta.fs.meta_path(&cmeta.group_id);
                if cmeta.fs.file_exists(&path) {
                    return Err(ConsensusError::AlreadyPresent(format!(
                        "consensus metadata already exists for group {}: {}",
                        cmeta.group_id,
                        path.display()
                    )));
                }
            }
        }

        tracing::debug!(
            group_id = %cmeta.group_id,
            peer_uuid = %cmeta.peer_uuid,
            term = initial_term,
            "created consensus metadata"
        );
        Ok(cmeta)
    }

    /// Load metadata previously flushed for `group_id`.
    pub fn load(
        fs: Arc<FsManager>,
        group_id: impl Into<String>,
        peer_uuid: impl Into<String>,
        opts: MetadataOptions,
    ) -> Result<Self> {
        let group_id = group_id.into();
        let path = fs.meta_path(&group_id);
        let persisted: PersistedMetadata = record::read(&path)?;
        let on_disk_size = fs.file_size(&path)?;

        let mut cmeta = Self {
            fs,
            group_id,
            peer_uuid: peer_uuid.into(),
            persisted,
            pending_config: None,
            leader_uuid: String::new(),
            active_role: RaftRole::NonParticipant,
            removed_peers: VecDeque::new(),
            opts,
            on_disk_size,
            flush_count: 0,
        };
        cmeta.recompute_role();

        tracing::debug!(
            group_id = %cmeta.group_id,
            term = cmeta.persisted.current_term,
            on_disk_size,
            "loaded consensus metadata"
        );
        Ok(cmeta)
    }

    /// Write the persisted record to disk, fsynced.
    ///
    /// The committed config is structurally validated first; a failure
    /// surfaces as `InvalidConfig` and nothing is written. The metadata
    /// directory is created on first use, with its parent fsynced.
    pub fn flush(&mut self, mode: WriteMode) -> Result<()> {
        fault::maybe_crash("crash_before_cmeta_flush", self.opts.crash_before_flush);
        let started = Instant::now();

        config::verify(&self.persisted.committed_config)?;

        let meta_dir = self.fs.meta_dir();
        if self.fs.create_dir_if_missing(&meta_dir)? {
            if let Some(parent) = meta_dir.parent() {
                self.fs.sync_dir(parent)?;
            }
        }

        let path = self.fs.meta_path(&self.group_id);
        record::write(&path, &self.persisted, mode, SyncMode::Sync)?;
        self.on_disk_size = self.fs.file_size(&path)?;
        self.flush_count += 1;

        let elapsed = started.elapsed();
        if elapsed > SLOW_FLUSH {
            tracing::warn!(
                group_id = %self.group_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow consensus metadata flush"
            );
        }
        tracing::debug!(
            group_id = %self.group_id,
            term = self.persisted.current_term,
            bytes = self.on_disk_size,
            "flushed consensus metadata"
        );
        Ok(())
    }

    /// Remove the record file. The in-memory state is untouched.
    pub fn delete_on_disk(&self) -> Result<()> {
        self.fs.delete_file(&self.fs.meta_path(&self.group_id))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn peer_uuid(&self) -> &str {
        &self.peer_uuid
    }

    pub fn current_term(&self) -> i64 {
        self.persisted.current_term
    }

    pub fn has_voted_for(&self) -> bool {
        self.persisted.voted_for.is_some()
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.persisted.voted_for.as_deref()
    }

    pub fn has_pending_config(&self) -> bool {
        self.pending_config.is_some()
    }

    pub fn pending_config(&self) -> Option<&RaftConfig> {
        self.pending_config.as_ref()
    }

    pub fn committed_config(&self) -> &RaftConfig {
        &self.persisted.committed_config
    }

    /// The pending config when a change is in flight, else the committed
    /// one.
    pub fn active_config(&self) -> &RaftConfig {
        self.pending_config
            .as_ref()
            .unwrap_or(&self.persisted.committed_config)
    }

    /// Observed leader for the current term; empty when unknown.
    pub fn leader_uuid(&self) -> &str {
        &self.leader_uuid
    }

    pub fn last_known_leader(&self) -> &LeaderRecord {
        &self.persisted.last_known_leader
    }

    pub fn previous_vote_history(&self) -> BTreeMap<i64, PreviousVote> {
        self.persisted.previous_vote_history.clone()
    }

    pub fn last_pruned_term(&self) -> i64 {
        self.persisted.last_pruned_term
    }

    pub fn active_role(&self) -> RaftRole {
        self.active_role
    }

    pub fn removed_peers_snapshot(&self) -> Vec<String> {
        self.removed_peers.iter().cloned().collect()
    }

    /// Size of the record file as of the last flush or load.
    pub fn on_disk_size(&self) -> u64 {
        self.on_disk_size
    }

    /// Number of successful flushes since construction.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    // ------------------------------------------------------------------
    // Mutators (memory-only unless noted)
    // ------------------------------------------------------------------

    pub fn set_current_term(&mut self, term: i64) {
        debug_assert!(term >= MIN_TERM, "term {term} below minimum");
        self.persisted.current_term = term;
    }

    pub fn clear_voted_for(&mut self) {
        self.persisted.voted_for = None;
    }

    /// Grant the current term's vote to `candidate_uuid` and record it in
    /// the vote history, pruning the history afterwards.
    pub fn set_voted_for(&mut self, candidate_uuid: impl Into<String>) {
        let candidate_uuid = candidate_uuid.into();
        let term = self.persisted.current_term;
        self.persisted.voted_for = Some(candidate_uuid.clone());
        self.persisted
            .previous_vote_history
            .insert(term, PreviousVote { candidate_uuid, term });
        self.prune_vote_history();
    }

    // Two passes: erase everything at or below the last known leader's
    // term, then evict the oldest entries beyond capacity. Tracks the
    // largest erased key in `last_pruned_term`. In-memory only; the next
    // flush persists the pruned map.
    fn prune_vote_history(&mut self) {
        let leader_term = self.persisted.last_known_leader.term;
        while let Some((&key, _)) = self.persisted.previous_vote_history.first_key_value() {
            if key > leader_term {
                break;
            }
            self.persisted.previous_vote_history.remove(&key);
            self.persisted.last_pruned_term = self.persisted.last_pruned_term.max(key);
        }
        while self.persisted.previous_vote_history.len() > self.opts.vote_history_max_size {
            if let Some((&key, _)) = self.persisted.previous_vote_history.first_key_value() {
                self.persisted.previous_vote_history.remove(&key);
                self.persisted.last_pruned_term = self.persisted.last_pruned_term.max(key);
            }
        }
    }

    pub fn set_committed_config(&mut self, config: RaftConfig) {
        self.persisted.committed_config = config;
        if self.pending_config.is_none() {
            self.recompute_role();
        }
    }

    pub fn set_pending_config(&mut self, config: RaftConfig) {
        self.pending_config = Some(config);
        self.recompute_role();
    }

    pub fn clear_pending_config(&mut self) {
        self.pending_config = None;
        self.recompute_role();
    }

    /// Replace whichever config is currently active: the pending one when
    /// a change is in flight, else the committed one.
    pub fn set_active_config(&mut self, config: RaftConfig) {
        if self.pending_config.is_some() {
            self.pending_config = Some(config);
        } else {
            self.persisted.committed_config = config;
        }
        self.recompute_role();
    }

    /// Record the observed leader for the current term. Memory-only;
    /// `sync_last_known_leader` is the only path that makes it durable.
    pub fn set_leader_uuid(&mut self, uuid: impl Into<String>) {
        self.leader_uuid = uuid.into();
        self.recompute_role();
    }

    /// Persist the observed leader as `last_known_leader` and flush.
    ///
    /// No-op when no leader is known. When `cas_term` is given and no
    /// longer matches the current term the call returns OK without
    /// flushing; the caller raced with a term change.
    pub fn sync_last_known_leader(&mut self, cas_term: Option<i64>) -> Result<()> {
        if self.leader_uuid.is_empty() {
            return Ok(());
        }
        if let Some(term) = cas_term {
            if term != self.persisted.current_term {
                return Ok(());
            }
        }
        self.persisted.last_known_leader = LeaderRecord {
            uuid: self.leader_uuid.clone(),
            term: self.persisted.current_term,
        };
        self.flush(WriteMode::Overwrite)
    }

    /// Adopt a more recent committed state learned from a peer: raise the
    /// term (clearing the vote) if the remote is ahead, forget the
    /// observed leader, and replace the committed config, dropping any
    /// pending change.
    pub fn merge_committed_state(&mut self, remote: &ConsensusState) {
        if remote.current_term > self.persisted.current_term {
            self.persisted.current_term = remote.current_term;
            self.persisted.voted_for = None;
        }
        self.leader_uuid.clear();
        self.persisted.committed_config = remote.committed_config.clone();
        self.pending_config = None;
        self.recompute_role();
        tracing::debug!(
            group_id = %self.group_id,
            term = self.persisted.current_term,
            "merged committed consensus state"
        );
    }

    /// Snapshot of the externally visible consensus state.
    pub fn to_consensus_state(&self) -> ConsensusState {
        ConsensusState {
            current_term: self.persisted.current_term,
            leader_uuid: if self.leader_uuid.is_empty() {
                None
            } else {
                Some(self.leader_uuid.clone())
            },
            committed_config: self.persisted.committed_config.clone(),
            pending_config: self.pending_config.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Removed-peers registry
    // ------------------------------------------------------------------

    /// Record peers that were deliberately removed from the config.
    /// Members of the active config are skipped; the oldest entry is
    /// evicted before pushing once the ring is full.
    pub fn insert_removed<I, S>(&mut self, uuids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let active = match &self.pending_config {
            Some(config) => config,
            None => &self.persisted.committed_config,
        };
        for uuid in uuids {
            let uuid = uuid.into();
            if config::is_member(&uuid, active) {
                continue;
            }
            if self.removed_peers.len() == self.opts.max_removed_peers {
                self.removed_peers.pop_front();
            }
            self.removed_peers.push_back(uuid);
        }
    }

    /// Whether `uuid` was deliberately removed. A member of the active
    /// config is never reported as removed.
    pub fn is_peer_removed(&self, uuid: &str) -> bool {
        if config::is_member(uuid, self.active_config()) {
            return false;
        }
        self.removed_peers.iter().any(|u| u == uuid)
    }

    pub fn delete_removed(&mut self, uuid: &str) {
        self.removed_peers.retain(|u| u != uuid);
    }

    pub fn delete_removed_many<I, S>(&mut self, uuids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for uuid in uuids {
            self.delete_removed(uuid.as_ref());
        }
    }

    pub fn clear_removed(&mut self) {
        self.removed_peers.clear();
    }

    // Derive the role from (self, observed leader, active config) and drop
    // active members from the removed ring; a peer cannot be both.
    fn recompute_role(&mut self) {
        let active: &RaftConfig = match &self.pending_config {
            Some(config) => config,
            None => &self.persisted.committed_config,
        };
        let role = config::compute_role(&self.peer_uuid, &self.leader_uuid, active);
        self.removed_peers
            .retain(|uuid| !config::is_member(uuid, active));
        self.active_role = role;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PeerRole, RaftPeer};
    use tempfile::TempDir;

    fn three_voter_config() -> RaftConfig {
        RaftConfig::new(vec![
            RaftPeer::new("p1", PeerRole::Voter).with_addr("host1", 7050),
            RaftPeer::new("p2", PeerRole::Voter).with_addr("host2", 7050),
            RaftPeer::new("p3", PeerRole::Voter).with_addr("host3", 7050),
        ])
    }

    fn new_cmeta(opts: MetadataOptions) -> (TempDir, ConsensusMetadata) {
        let tmp = TempDir::new().unwrap();
        let fs = Arc::new(FsManager::new(tmp.path()));
        let cmeta = ConsensusMetadata::create(
            fs,
            "group-1",
            "p1",
            three_voter_config(),
            1,
            CreateMode::NoFlushOnCreate,
            opts,
        )
        .unwrap();
        (tmp, cmeta)
    }

    #[test]
    fn test_term_updates_take_the_last_value() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        assert_eq!(cmeta.current_term(), 1);
        cmeta.set_current_term(4);
        cmeta.set_current_term(9);
        assert_eq!(cmeta.current_term(), 9);
    }

    #[test]
    fn test_vote_history_capacity_prune() {
        let opts = MetadataOptions {
            vote_history_max_size: 3,
            ..Default::default()
        };
        let (_tmp, mut cmeta) = new_cmeta(opts);

        cmeta.set_current_term(5);
        cmeta.set_voted_for("a");
        cmeta.set_current_term(6);
        cmeta.set_voted_for("b");
        cmeta.set_current_term(7);
        cmeta.set_voted_for("c");
        cmeta.set_current_term(8);
        cmeta.set_voted_for("d");

        let history = cmeta.previous_vote_history();
        assert_eq!(history.keys().copied().collect::<Vec<_>>(), vec![6, 7, 8]);
        assert_eq!(cmeta.last_pruned_term(), 5);
        assert_eq!(history[&8].candidate_uuid, "d");
        assert_eq!(cmeta.voted_for(), Some("d"));
    }

    #[test]
    fn test_vote_history_known_leader_prune() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());

        for (term, candidate) in [(3, "a"), (4, "b"), (5, "c")] {
            cmeta.set_current_term(term);
            cmeta.set_voted_for(candidate);
        }
        assert_eq!(
            cmeta.previous_vote_history().keys().copied().collect::<Vec<_>>(),
            vec![3, 4, 5]
        );

        // Leader acknowledged at term 5; the history is untouched until the
        // next vote triggers pruning.
        cmeta.set_leader_uuid("p2");
        cmeta.sync_last_known_leader(None).unwrap();
        assert_eq!(cmeta.last_known_leader().term, 5);
        assert_eq!(cmeta.previous_vote_history().len(), 3);

        cmeta.set_current_term(6);
        cmeta.set_voted_for("d");
        assert_eq!(
            cmeta.previous_vote_history().keys().copied().collect::<Vec<_>>(),
            vec![6]
        );
        assert_eq!(cmeta.last_pruned_term(), 5);

        cmeta.set_current_term(7);
        cmeta.set_voted_for("e");
        assert_eq!(
            cmeta.previous_vote_history().keys().copied().collect::<Vec<_>>(),
            vec![6, 7]
        );
        assert_eq!(cmeta.last_pruned_term(), 5);
    }

    #[test]
    fn test_vote_history_entry_matches_current_vote() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        cmeta.set_current_term(12);
        cmeta.set_voted_for("p3");

        let history = cmeta.previous_vote_history();
        let entry = &history[&12];
        assert_eq!(entry.candidate_uuid, "p3");
        assert_eq!(entry.term, 12);
    }

    #[test]
    fn test_merge_committed_state() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        cmeta.set_current_term(3);
        cmeta.set_voted_for("x");
        cmeta.set_leader_uuid("p2");
        cmeta.set_pending_config(RaftConfig::new(vec![
            RaftPeer::new("p1", PeerRole::Voter).with_addr("host1", 7050),
        ]));

        let remote_config = RaftConfig::new(vec![
            RaftPeer::new("p1", PeerRole::Voter).with_addr("host1", 7050),
            RaftPeer::new("p4", PeerRole::Voter).with_addr("host4", 7050),
        ])
        .with_opid_index(42);
        let remote = ConsensusState {
            current_term: 5,
            leader_uuid: Some("p4".to_string()),
            committed_config: remote_config.clone(),
            pending_config: None,
        };

        cmeta.merge_committed_state(&remote);

        assert_eq!(cmeta.current_term(), 5);
        assert!(!cmeta.has_voted_for());
        assert_eq!(cmeta.leader_uuid(), "");
        assert!(!cmeta.has_pending_config());
        assert_eq!(cmeta.committed_config(), &remote_config);
    }

    #[test]
    fn test_merge_with_stale_term_keeps_local_term_and_vote() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        cmeta.set_current_term(9);
        cmeta.set_voted_for("x");

        let remote = ConsensusState {
            current_term: 9,
            leader_uuid: None,
            committed_config: three_voter_config(),
            pending_config: None,
        };
        cmeta.merge_committed_state(&remote);

        assert_eq!(cmeta.current_term(), 9);
        assert_eq!(cmeta.voted_for(), Some("x"));
    }

    #[test]
    fn test_pending_config_overlay() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        assert_eq!(cmeta.active_config(), cmeta.committed_config());

        let pending = RaftConfig::new(vec![
            RaftPeer::new("p1", PeerRole::Voter).with_addr("host1", 7050),
            RaftPeer::new("p2", PeerRole::Voter).with_addr("host2", 7050),
        ])
        .with_opid_index(7);
        cmeta.set_pending_config(pending.clone());

        assert!(cmeta.has_pending_config());
        assert_eq!(cmeta.active_config(), &pending);
        assert_eq!(cmeta.committed_config(), &three_voter_config());

        cmeta.clear_pending_config();
        assert_eq!(cmeta.active_config(), &three_voter_config());
    }

    #[test]
    fn test_set_active_config_routes_to_the_right_slot() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());

        // No pending change: writes the committed slot.
        let committed = three_voter_config().with_opid_index(10);
        cmeta.set_active_config(committed.clone());
        assert!(!cmeta.has_pending_config());
        assert_eq!(cmeta.committed_config(), &committed);

        // Pending change in flight: writes the pending slot.
        cmeta.set_pending_config(three_voter_config().with_opid_index(11));
        let replacement = three_voter_config().with_opid_index(12);
        cmeta.set_active_config(replacement.clone());
        assert_eq!(cmeta.pending_config(), Some(&replacement));
        assert_eq!(cmeta.committed_config(), &committed);
    }

    #[test]
    fn test_role_tracks_leader_and_config() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        assert_eq!(cmeta.active_role(), RaftRole::NonParticipant);

        cmeta.set_leader_uuid("p1");
        assert_eq!(cmeta.active_role(), RaftRole::Leader);

        cmeta.set_leader_uuid("p2");
        assert_eq!(cmeta.active_role(), RaftRole::Follower);

        // Dropped from the active config: no longer a participant.
        cmeta.set_pending_config(RaftConfig::new(vec![
            RaftPeer::new("p2", PeerRole::Voter).with_addr("host2", 7050),
        ]));
        assert_eq!(cmeta.active_role(), RaftRole::NonParticipant);

        cmeta.clear_pending_config();
        assert_eq!(cmeta.active_role(), RaftRole::Follower);
    }

    #[test]
    fn test_removed_peers_ring() {
        let opts = MetadataOptions {
            max_removed_peers: 2,
            ..Default::default()
        };
        let (_tmp, mut cmeta) = new_cmeta(opts);

        // Active members are never recorded.
        cmeta.insert_removed(["p1", "q1"]);
        assert_eq!(cmeta.removed_peers_snapshot(), vec!["q1"]);
        assert!(!cmeta.is_peer_removed("p1"));
        assert!(cmeta.is_peer_removed("q1"));
        assert!(!cmeta.is_peer_removed("never-seen"));

        // Ring evicts oldest before pushing.
        cmeta.insert_removed(["q2", "q3"]);
        assert_eq!(cmeta.removed_peers_snapshot(), vec!["q2", "q3"]);
        assert!(!cmeta.is_peer_removed("q1"));

        cmeta.delete_removed("q2");
        assert_eq!(cmeta.removed_peers_snapshot(), vec!["q3"]);

        cmeta.clear_removed();
        assert!(cmeta.removed_peers_snapshot().is_empty());
    }

    #[test]
    fn test_removed_peer_readded_to_config_is_purged() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        cmeta.insert_removed(["p4"]);
        assert!(cmeta.is_peer_removed("p4"));

        let mut config = three_voter_config();
        config
            .peers
            .push(RaftPeer::new("p4", PeerRole::Voter).with_addr("host4", 7050));
        cmeta.set_committed_config(config);

        assert!(!cmeta.is_peer_removed("p4"));
        assert!(cmeta.removed_peers_snapshot().is_empty());
    }

    #[test]
    fn test_to_consensus_state() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        cmeta.set_current_term(6);

        let state = cmeta.to_consensus_state();
        assert_eq!(state.current_term, 6);
        assert_eq!(state.leader_uuid, None);
        assert_eq!(state.committed_config, three_voter_config());
        assert_eq!(state.pending_config, None);

        cmeta.set_leader_uuid("p2");
        let state = cmeta.to_consensus_state();
        assert_eq!(state.leader_uuid.as_deref(), Some("p2"));
    }

    #[test]
    fn test_sync_last_known_leader_without_leader_is_a_noop() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        cmeta.sync_last_known_leader(None).unwrap();
        assert_eq!(cmeta.flush_count(), 0);
        assert!(!cmeta.last_known_leader().is_known());
    }

    #[test]
    fn test_sync_last_known_leader_cas_mismatch_skips_flush() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        cmeta.set_current_term(4);
        cmeta.set_leader_uuid("p2");

        cmeta.sync_last_known_leader(Some(3)).unwrap();
        assert_eq!(cmeta.flush_count(), 0);
        assert!(!cmeta.last_known_leader().is_known());

        cmeta.sync_last_known_leader(Some(4)).unwrap();
        assert_eq!(cmeta.flush_count(), 1);
        assert_eq!(cmeta.last_known_leader().uuid, "p2");
        assert_eq!(cmeta.last_known_leader().term, 4);
    }

    #[test]
    fn test_flush_rejects_invalid_committed_config() {
        let (_tmp, mut cmeta) = new_cmeta(MetadataOptions::default());
        cmeta.set_committed_config(RaftConfig::new(vec![RaftPeer::new(
            "p1",
            PeerRole::NonVoter,
        )]));

        let err = cmeta.flush(WriteMode::Overwrite).unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidConfig(_)), "{err}");
        assert_eq!(cmeta.flush_count(), 0);
    }
}
