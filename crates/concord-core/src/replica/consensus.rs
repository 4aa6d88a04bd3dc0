//! Normal-path consensus (§4.3): Propose / Write / Accept / Decide.

use concord_types::{Address, ByzantineFlags, ConsensusState, Hash};
use concord_wire::{fingerprint, Accept, Envelope, Job, Propose, Response, Write};

use super::{ReplicaOutput, ReplicaState, RoundEpochBucket};

impl ReplicaState {
    pub(crate) fn on_propose(&mut self, from: Address, propose: Propose) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected propose: not from a server");
            return;
        }

        let bucket = self
            .round_epoch
            .entry((propose.round, propose.epoch))
            .or_insert_with(RoundEpochBucket::default);

        if bucket.proposes.contains_key(&from) {
            tracing::trace!(?from, "rejected propose: already received");
            return;
        }

        let buzz = fingerprint(&propose.job.request);
        if self.set_buzz.contains(&buzz) {
            tracing::trace!(?buzz, "rejected propose: already decided");
            return;
        }

        bucket.proposes.insert(from, propose);
    }

    pub(crate) fn on_write(&mut self, from: Address, write: Write) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected write: not from a server");
            return;
        }

        let bucket = self
            .round_epoch
            .entry((write.round, write.epoch))
            .or_insert_with(RoundEpochBucket::default);
        let voters = bucket.writes.entry(write.hash).or_default();

        if !voters.insert(from) {
            tracing::trace!(?from, "rejected write: already received");
        }
    }

    pub(crate) fn on_accept(&mut self, from: Address, accept: Accept) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected accept: not from a server");
            return;
        }

        let bucket = self
            .round_epoch
            .entry((accept.round, accept.epoch))
            .or_insert_with(RoundEpochBucket::default);
        let voters = bucket.accepts.entry(accept.hash).or_default();

        if !voters.insert(from) {
            tracing::trace!(?from, "rejected accept: already received");
        }
    }

    pub(crate) fn maybe_propose(&mut self) -> Option<ReplicaOutput> {
        if !self.is_leader() {
            return None;
        }
        if self.jobs.is_empty() {
            return None;
        }
        if self.consensus_state != ConsensusState::Idle {
            return None;
        }

        // Deterministic across correct replicas: iteration order over a
        // `HashMap` is not, so pick by lowest fingerprint rather than by
        // insertion/iteration order (see the job-selection open question in
        // DESIGN.md).
        let (_, job) = self.jobs.iter().min_by_key(|(buzz, _)| **buzz)?;
        let job = job.clone();

        if self
            .byzantine_flags
            .has(ByzantineFlags::SEND_DIFFERENT_PROPOSES)
        {
            return self.byzantine_propose(&job);
        }

        let propose = Propose {
            round: self.round,
            epoch: self.epoch,
            job: job.clone(),
        };
        let messages = self
            .keys
            .iter()
            .map(|key| (*key, Envelope::Propose(propose.clone())))
            .collect();

        self.consensus_state = ConsensusState::IdlePropose;
        Some(ReplicaOutput {
            messages,
            ..Default::default()
        })
    }

    /// Sends a different propose to every other follower, deliberately
    /// breaking agreement for negative testing.
    fn byzantine_propose(&mut self, job: &Job) -> Option<ReplicaOutput> {
        if self.jobs.len() < 2 {
            return None;
        }
        let other_job = self
            .jobs
            .values()
            .find(|candidate| candidate.request.nonce != job.request.nonce)?
            .clone();

        let propose = Propose {
            round: self.round,
            epoch: self.epoch,
            job: job.clone(),
        };
        let alternate = Propose {
            round: self.round,
            epoch: self.epoch,
            job: other_job,
        };

        let messages = self
            .keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                if i % 2 == 0 {
                    (*key, Envelope::Propose(propose.clone()))
                } else {
                    (*key, Envelope::Propose(alternate.clone()))
                }
            })
            .collect();

        self.consensus_state = ConsensusState::IdlePropose;
        Some(ReplicaOutput {
            messages,
            ..Default::default()
        })
    }

    pub(crate) fn maybe_write(&mut self) -> Option<ReplicaOutput> {
        let expected = if self.is_leader() {
            ConsensusState::IdlePropose
        } else {
            ConsensusState::Idle
        };
        if self.consensus_state != expected {
            return None;
        }

        let leader = self.leader();
        let propose = self
            .round_epoch
            .get(&(self.round, self.epoch))?
            .proposes
            .get(&leader)?
            .clone();

        let buzz = fingerprint(&propose.job.request);
        self.current_job = Some(propose.job);
        self.current_buzz = Some(buzz);

        let write = Write {
            round: self.round,
            epoch: self.epoch,
            hash: buzz,
        };
        let messages = self
            .keys
            .iter()
            .map(|key| (*key, Envelope::Write(write)))
            .collect();

        self.consensus_state = ConsensusState::ProposeWrite;
        Some(ReplicaOutput {
            messages,
            ..Default::default()
        })
    }

    pub(crate) fn maybe_accept(&mut self) -> Option<ReplicaOutput> {
        if self.consensus_state != ConsensusState::ProposeWrite {
            return None;
        }
        let buzz = self.current_buzz?;

        let have = self
            .round_epoch
            .get(&(self.round, self.epoch))
            .and_then(|bucket| bucket.writes.get(&buzz))
            .map_or(0, std::collections::HashSet::len);
        if (have as u64) < self.q {
            return None;
        }

        let accept = Accept {
            round: self.round,
            epoch: self.epoch,
            hash: buzz,
        };
        let messages = self
            .keys
            .iter()
            .map(|key| (*key, Envelope::Accept(accept)))
            .collect();

        self.consensus_state = ConsensusState::WriteAccept;
        Some(ReplicaOutput {
            messages,
            ..Default::default()
        })
    }

    pub(crate) fn maybe_decide(&mut self) -> Option<ReplicaOutput> {
        if self.consensus_state != ConsensusState::WriteAccept {
            return None;
        }
        let buzz = self.current_buzz?;

        let have = self
            .round_epoch
            .get(&(self.round, self.epoch))
            .and_then(|bucket| bucket.accepts.get(&buzz))
            .map_or(0, std::collections::HashSet::len);
        if (have as u64) < self.q {
            return None;
        }

        let job = self.current_job.clone()?;
        let mut output = ReplicaOutput::default();
        output.messages.push((
            job.from,
            Envelope::Response(Response {
                index: self.round,
                nonce: job.request.nonce,
            }),
        ));

        self.decide(job.request.payload, buzz, &mut output);

        Some(output)
    }

    /// Appends `data`/`buzz` to the log, extends both cumulative hash
    /// chains, retires the associated job if any, advances the round, and
    /// applies a membership change if `data` carries a magic reconfiguration
    /// prefix.
    pub(crate) fn decide(&mut self, data: bytes::Bytes, buzz: Hash, output: &mut ReplicaOutput) {
        self.log_data.push(data.clone());
        self.log_buzz.push(buzz);
        self.set_buzz.insert(buzz);

        let prev_data_hash = *self.log_data_hash.last().expect("chain never empty");
        self.log_data_hash
            .push(concord_crypto::cum_data_hash(prev_data_hash, [data.as_ref()]));

        let prev_buzz_hash = *self.log_buzz_hash.last().expect("chain never empty");
        self.log_buzz_hash
            .push(concord_crypto::cum_buzz_hash(prev_buzz_hash, [buzz]));

        if self.jobs.remove(&buzz).is_some() {
            self.update_earliest_job_timestamp();
        }

        let decided_round = self.round;
        self.round = self.round.next();
        output.decided.push(decided_round);

        self.apply_magic_prefix_if_present(&data);

        if self.consensus_state != ConsensusState::Idle {
            self.consensus_state = ConsensusState::Idle;
        }
        self.current_job = None;
        self.current_buzz = None;

        self.reschedule_whatsup();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use concord_types::{Nonce, Round};

    use super::*;
    use crate::client::ClientConfig;
    use crate::replica::ReplicaConfig;

    fn addr(b: u8) -> Address {
        let mut bytes = [0u8; 32];
        bytes[0] = b;
        Address::new(bytes)
    }

    fn replica(i: usize, n: usize) -> ReplicaState {
        let keys: Vec<Address> = (0..n as u8).map(addr).collect();
        ReplicaState::new(ReplicaConfig {
            key: keys[i],
            keys: keys.clone(),
            request_t: 50,
            whatsup_t: 200,
            index_tolerance: 5,
            allow_external: true,
            client: ClientConfig {
                key: keys[i],
                server_keys: keys,
                call_t: 20,
                bonjour_t: 100,
                byzantine_flags: ByzantineFlags::NONE,
            },
            byzantine_flags: ByzantineFlags::NONE,
        })
    }

    fn request(nonce: u8) -> concord_wire::Request {
        concord_wire::Request {
            nonce: Nonce::new([nonce; 16]),
            payload: Bytes::from_static(b"hello"),
            index: Round(0),
        }
    }

    #[test]
    fn leader_proposes_once_a_job_exists() {
        let mut leader = replica(0, 4);
        leader.on_request(addr(0xCC), request(1));
        let output = leader.maybe_propose().expect("should propose");
        assert_eq!(output.messages.len(), 4);
        assert_eq!(leader.consensus_state, ConsensusState::IdlePropose);
    }

    #[test]
    fn follower_does_not_propose() {
        let mut follower = replica(1, 4);
        follower.on_request(addr(0xCC), request(1));
        assert!(follower.maybe_propose().is_none());
    }

    #[test]
    fn full_round_trip_appends_to_log_and_advances_round() {
        let mut leader = replica(0, 4);
        let keys = leader.keys().to_vec();
        leader.on_request(addr(0xCC), request(1));
        leader.maybe_propose().unwrap();

        let propose = leader
            .round_epoch
            .get(&(Round(0), concord_types::Epoch(0)))
            .unwrap()
            .proposes
            .get(&keys[0])
            .unwrap()
            .clone();

        leader.on_propose(keys[0], propose);
        leader.maybe_write().unwrap();

        // q=3 for n=4: the leader never self-records its own broadcast (it
        // relies on network loopback), so three distinct senders are needed
        // to reach quorum, not two.
        let buzz = leader.current_buzz.unwrap();
        for key in &keys[1..4] {
            leader.on_write(*key, Write {
                round: Round(0),
                epoch: concord_types::Epoch(0),
                hash: buzz,
            });
        }
        let out = leader.maybe_accept().expect("write quorum reached");
        assert_eq!(out.messages.len(), 4);

        for key in &keys[1..4] {
            leader.on_accept(*key, Accept {
                round: Round(0),
                epoch: concord_types::Epoch(0),
                hash: buzz,
            });
        }
        let out = leader.maybe_decide().expect("accept quorum reached");
        assert_eq!(out.decided, vec![Round(0)]);
        assert_eq!(leader.round(), Round(1));
        assert_eq!(leader.log_len(), 1);
    }
}
