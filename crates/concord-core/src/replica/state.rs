//! [`ReplicaState`]: the core state of one participant in the replication
//! group, plus its embedded [`ClientState`] (every replica can also submit
//! its own requests, mirroring a co-located client).

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use concord_types::{
    Address, ByzantineFlags, ConsensusState, Epoch, Hash, LcState, LogicalTime, Round,
};
use concord_wire::{Job, Propose};

use crate::client::{ClientConfig, ClientState};

/// Per-`(round, epoch)` bucket holding the flattened form of the distilled
/// spec's `proposes[round][epoch][from]`, `writes[round][epoch][hash]`, and
/// `accepts[round][epoch][hash]` triple-nested maps (see the "nested
/// mappings" redesign note).
#[derive(Debug, Default, Clone)]
pub(crate) struct RoundEpochBucket {
    pub proposes: HashMap<Address, Propose>,
    pub writes: HashMap<Hash, HashSet<Address>>,
    pub accepts: HashMap<Hash, HashSet<Address>>,
}

/// Construction-time configuration for a [`ReplicaState`].
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// This replica's own identity.
    pub key: Address,
    /// Initial membership. Sorted and deduplicated by the constructor.
    pub keys: Vec<Address>,
    /// Per-job timeout before a replica suspects the leader (§4.4).
    pub request_t: u64,
    /// Sync heartbeat interval (§4.5).
    pub whatsup_t: u64,
    /// Allowed lag of a Request's claimed index behind the current round.
    pub index_tolerance: u64,
    /// Whether requests from addresses outside `keys` are admitted.
    pub allow_external: bool,
    /// Embedded client configuration (call timeout, bonjour interval).
    pub client: ClientConfig,
    /// Deliberate-misbehavior flags for negative testing.
    pub byzantine_flags: ByzantineFlags,
}

/// The state of one BFT replica: consensus, leader-change, and sync state,
/// plus an embedded client the host can use to submit its own requests.
#[derive(Debug)]
pub struct ReplicaState {
    pub(crate) key: Address,
    pub(crate) keys: Vec<Address>,

    pub(crate) n: u64,
    pub(crate) f: u64,
    pub(crate) q: u64,

    pub(crate) round: Round,
    pub(crate) epoch: Epoch,
    pub(crate) time: LogicalTime,

    pub(crate) request_timeout: LogicalTime,
    pub(crate) whatsup_t: LogicalTime,
    pub(crate) next_whatsup: LogicalTime,
    pub(crate) index_tolerance: Round,
    pub(crate) allow_external: bool,

    pub(crate) consensus_state: ConsensusState,
    pub(crate) lc_state: LcState,

    pub(crate) log_data: Vec<Bytes>,
    pub(crate) log_buzz: Vec<Hash>,
    pub(crate) log_data_hash: Vec<Hash>,
    pub(crate) log_buzz_hash: Vec<Hash>,
    pub(crate) set_buzz: HashSet<Hash>,

    pub(crate) jobs: HashMap<Hash, Job>,
    pub(crate) earliest_job_timestamp: Option<LogicalTime>,

    pub(crate) round_epoch: HashMap<(Round, Epoch), RoundEpochBucket>,
    pub(crate) suspects: HashMap<Epoch, HashMap<Address, concord_wire::Suspect>>,

    pub(crate) heads: HashMap<(Round, Epoch), HashSet<Address>>,
    pub(crate) sync_sent: HashSet<Round>,
    pub(crate) sync_data: HashMap<Round, HashMap<Hash, Vec<Bytes>>>,
    pub(crate) sync_buzz: HashMap<Round, HashMap<Hash, Vec<Hash>>>,
    pub(crate) confirms: HashMap<(Round, Hash, Hash), HashSet<Address>>,

    pub(crate) most_recent_round_known: Round,
    pub(crate) most_recent_epoch_known: Epoch,
    pub(crate) most_recent_round_to_sync: Round,
    pub(crate) most_recent_hash_to_sync: Hash,
    pub(crate) most_recent_buzz_to_sync: Hash,

    pub(crate) current_job: Option<Job>,
    pub(crate) current_buzz: Option<Hash>,

    pub(crate) byzantine_flags: ByzantineFlags,

    /// The co-located client this host uses to submit its own requests.
    pub client: ClientState,
}

impl ReplicaState {
    pub fn new(config: ReplicaConfig) -> Self {
        let mut keys = config.keys;
        keys.sort();
        keys.dedup();

        let client = ClientState::new(ClientConfig {
            key: config.key,
            server_keys: keys.clone(),
            ..config.client
        });

        let mut replica = Self {
            key: config.key,
            keys,
            n: 0,
            f: 0,
            q: 0,
            round: Round::ZERO,
            epoch: Epoch::ZERO,
            time: LogicalTime::ZERO,
            request_timeout: LogicalTime(config.request_t),
            whatsup_t: LogicalTime(config.whatsup_t),
            next_whatsup: LogicalTime::ZERO,
            index_tolerance: Round(config.index_tolerance),
            allow_external: config.allow_external,
            consensus_state: ConsensusState::Idle,
            lc_state: LcState::Idle,
            log_data: Vec::new(),
            log_buzz: Vec::new(),
            log_data_hash: vec![Hash::ZERO],
            log_buzz_hash: vec![Hash::ZERO],
            set_buzz: HashSet::new(),
            jobs: HashMap::new(),
            earliest_job_timestamp: None,
            round_epoch: HashMap::new(),
            suspects: HashMap::new(),
            heads: HashMap::new(),
            sync_sent: HashSet::new(),
            sync_data: HashMap::new(),
            sync_buzz: HashMap::new(),
            confirms: HashMap::new(),
            most_recent_round_known: Round::ZERO,
            most_recent_epoch_known: Epoch::ZERO,
            most_recent_round_to_sync: Round::ZERO,
            most_recent_hash_to_sync: Hash::ZERO,
            most_recent_buzz_to_sync: Hash::ZERO,
            current_job: None,
            current_buzz: None,
            byzantine_flags: config.byzantine_flags,
            client,
        };
        replica.update_factors();
        replica
    }

    /// `n = |keys|`, `f = (n-1) div 3`, `q = (n+f)/2 + 1`, special-cased to
    /// `q = 1` for `n <= 2` (crash-fault-only fallback; see DESIGN.md).
    pub(crate) fn update_factors(&mut self) {
        self.n = self.keys.len() as u64;
        self.f = self.n.saturating_sub(1) / 3;
        self.q = (self.n + self.f) / 2 + 1;
        if self.n <= 2 {
            self.q = 1;
        }
    }

    /// `leader(epoch) = keys[epoch mod n]`.
    pub fn leader(&self) -> Address {
        self.keys[(self.epoch.get() % self.n) as usize]
    }

    pub fn is_leader(&self) -> bool {
        self.key == self.leader()
    }

    pub(crate) fn someone_else_key(&self) -> Address {
        let my_pos = self.keys.iter().position(|k| *k == self.key).unwrap_or(0);
        self.keys[(my_pos + 1) % self.keys.len()]
    }

    pub(crate) fn update_earliest_job_timestamp(&mut self) {
        self.earliest_job_timestamp = self.jobs.values().map(|job| job.timestamp).min();
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn keys(&self) -> &[Address] {
        &self.keys
    }

    pub fn log_len(&self) -> usize {
        self.log_data.len()
    }

    pub fn log_data(&self) -> &[Bytes] {
        &self.log_data
    }

    pub fn log_buzz(&self) -> &[Hash] {
        &self.log_buzz
    }
}
