// Raft membership configuration records and the pure predicates over them.
//
// A RaftConfig is an ordered list of peers plus the log position at which
// the config was proposed. Everything in this module is a plain function
// over the record; the committed/pending overlay lives in the metadata
// store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{ConsensusError, Result};

/// Log position marking a config that has never been through the log.
pub const INVALID_OPID_INDEX: i64 = -1;

/// Membership class of a peer inside a config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum PeerRole {
    /// Full voting member.
    Voter,
    /// Replicates but does not vote.
    NonVoter,
    /// Catching up; replicates but does not vote.
    Learner,
}

/// Last-known address of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct HostPort {
    pub host: String,
    pub port: u32,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One peer in a membership configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct RaftPeer {
    /// Permanent UUID of the peer.
    pub uuid: String,

    /// Membership class.
    pub role: PeerRole,

    /// Last-known address, required for voters.
    pub addr: Option<HostPort>,

    /// Opaque tag grouping voters for flexible-quorum policies.
    pub quorum_id: Option<String>,
}

impl RaftPeer {
    pub fn new(uuid: impl Into<String>, role: PeerRole) -> Self {
        Self {
            uuid: uuid.into(),
            role,
            addr: None,
            quorum_id: None,
        }
    }

    pub fn with_addr(mut self, host: impl Into<String>, port: u32) -> Self {
        self.addr = Some(HostPort::new(host, port));
        self
    }

    pub fn with_quorum_id(mut self, quorum_id: impl Into<String>) -> Self {
        self.quorum_id = Some(quorum_id.into());
        self
    }
}

/// A membership configuration: the ordered peer list, the log position at
/// which it was proposed, and an optional group -> required-voters map for
/// flexible-quorum variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct RaftConfig {
    pub peers: Vec<RaftPeer>,

    /// Index of the log entry that proposed this config; monotonically
    /// increasing across config changes.
    pub opid_index: i64,

    /// Group tag -> number of voters required from that group. Empty when
    /// simple majority quorums are in use.
    pub voter_distribution: BTreeMap<String, u32>,
}

impl RaftConfig {
    pub fn new(peers: Vec<RaftPeer>) -> Self {
        Self {
            peers,
            opid_index: INVALID_OPID_INDEX,
            voter_distribution: BTreeMap::new(),
        }
    }

    pub fn with_opid_index(mut self, opid_index: i64) -> Self {
        self.opid_index = opid_index;
        self
    }
}

/// Role of a node as derived from (self uuid, leader uuid, config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftRole {
    Leader,
    Follower,
    Learner,
    NonParticipant,
}

/// Whether `uuid` is listed in `config` with any role.
pub fn is_member(uuid: &str, config: &RaftConfig) -> bool {
    config.peers.iter().any(|p| p.uuid == uuid)
}

/// Whether `uuid` is a voting member of `config`.
pub fn is_voter(uuid: &str, config: &RaftConfig) -> bool {
    config
        .peers
        .iter()
        .any(|p| p.uuid == uuid && p.role == PeerRole::Voter)
}

/// Number of voting members in `config`.
pub fn count_voters(config: &RaftConfig) -> usize {
    config
        .peers
        .iter()
        .filter(|p| p.role == PeerRole::Voter)
        .count()
}

/// Address/role detail for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub addr: Option<HostPort>,
    pub is_voter: bool,
    pub quorum_id: Option<String>,
}

/// Detail for `uuid` if it is a member of `config`.
pub fn member_info(uuid: &str, config: &RaftConfig) -> Option<MemberInfo> {
    config.peers.iter().find(|p| p.uuid == uuid).map(|p| MemberInfo {
        addr: p.addr.clone(),
        is_voter: p.role == PeerRole::Voter,
        quorum_id: p.quorum_id.clone(),
    })
}

/// Structural validation of a config: unique non-empty UUIDs, addresses
/// with usable ports for voters, and at least one voter.
pub fn verify(config: &RaftConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for peer in &config.peers {
        if peer.uuid.is_empty() {
            return Err(ConsensusError::InvalidConfig(
                "peer with empty UUID".to_string(),
            ));
        }
        if !seen.insert(peer.uuid.as_str()) {
            return Err(ConsensusError::InvalidConfig(format!(
                "duplicate peer UUID: {}",
                peer.uuid
            )));
        }
        match &peer.addr {
            Some(addr) => {
                if addr.port == 0 || addr.port > u16::MAX as u32 {
                    return Err(ConsensusError::InvalidConfig(format!(
                        "peer {} has unusable port {}",
                        peer.uuid, addr.port
                    )));
                }
            }
            None => {
                if peer.role == PeerRole::Voter {
                    return Err(ConsensusError::InvalidConfig(format!(
                        "voter {} has no address",
                        peer.uuid
                    )));
                }
            }
        }
    }
    if count_voters(config) == 0 {
        return Err(ConsensusError::InvalidConfig(
            "config has no voters".to_string(),
        ));
    }
    Ok(())
}

/// Derive the role of `self_uuid` given the observed leader and a config.
///
/// An empty `leader_uuid` means no leader is known for the current term.
pub fn compute_role(self_uuid: &str, leader_uuid: &str, config: &RaftConfig) -> RaftRole {
    let self_is_voter = is_voter(self_uuid, config);
    if self_uuid == leader_uuid && self_is_voter {
        return RaftRole::Leader;
    }
    if !leader_uuid.is_empty() && self_is_voter {
        return RaftRole::Follower;
    }
    if is_member(self_uuid, config) && !self_is_voter {
        return RaftRole::Learner;
    }
    RaftRole::NonParticipant
}
