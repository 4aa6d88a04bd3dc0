//! Leader change via suspect gossip (§4.4).

use std::collections::HashMap;

use concord_types::{Address, ConsensusState, LcState};
use concord_wire::{fingerprint, Envelope, Job, Load, Suspect};

use super::{ReplicaOutput, ReplicaState};

impl ReplicaState {
    pub(crate) fn on_suspect(&mut self, from: Address, suspect: Suspect) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected suspect: not from a server");
            return;
        }

        if suspect.epoch != self.epoch.next() {
            tracing::trace!(?suspect.epoch, epoch = ?self.epoch, "rejected suspect: wrong epoch");
            return;
        }

        let has_new_load = suspect
            .loads
            .iter()
            .any(|load| !self.set_buzz.contains(&fingerprint(&load.request)));
        if !has_new_load {
            tracing::trace!("rejected suspect: nothing new");
            return;
        }

        let epoch_suspects = self.suspects.entry(suspect.epoch).or_default();
        if epoch_suspects.contains_key(&from) {
            tracing::trace!(?from, "rejected suspect: already received");
            return;
        }
        epoch_suspects.insert(from, suspect);
    }

    pub(crate) fn maybe_suspect(&mut self) -> Option<ReplicaOutput> {
        if self.lc_state != LcState::Idle {
            return None;
        }

        let has_timeout_jobs = !self.jobs.is_empty()
            && self
                .earliest_job_timestamp
                .is_some_and(|ts| ts + self.request_timeout <= self.time);

        let next_epoch = self.epoch.next();
        let suspect_count = self.suspects.get(&next_epoch).map_or(0, HashMap::len) as u64;
        let enough_suspects = suspect_count >= self.f + 1;

        if !has_timeout_jobs && !enough_suspects {
            return None;
        }

        let mut loads_by_buzz = std::collections::HashMap::new();

        if has_timeout_jobs {
            for (buzz, job) in &self.jobs {
                if job.timestamp + self.request_timeout <= self.time {
                    loads_by_buzz.insert(
                        *buzz,
                        Load {
                            from: job.from,
                            request: job.request.clone(),
                        },
                    );
                }
            }
        }

        if enough_suspects {
            if let Some(epoch_suspects) = self.suspects.get(&next_epoch) {
                for suspect in epoch_suspects.values() {
                    for load in &suspect.loads {
                        let buzz = fingerprint(&load.request);
                        if self.set_buzz.contains(&buzz) || self.jobs.contains_key(&buzz) {
                            continue;
                        }
                        loads_by_buzz.entry(buzz).or_insert_with(|| load.clone());
                    }
                }
            }
        }

        let suspect = Suspect {
            epoch: next_epoch,
            loads: loads_by_buzz.into_values().collect(),
        };
        let messages = self
            .keys
            .iter()
            .map(|key| (*key, Envelope::Suspect(suspect.clone())))
            .collect();

        self.lc_state = LcState::Alert;
        Some(ReplicaOutput {
            messages,
            ..Default::default()
        })
    }

    pub(crate) fn maybe_leader_change(&mut self) -> Option<ReplicaOutput> {
        if self.lc_state != LcState::Alert {
            return None;
        }

        let next_epoch = self.epoch.next();
        let suspect_count = self.suspects.get(&next_epoch).map_or(0, HashMap::len) as u64;
        if suspect_count < self.q {
            return None;
        }

        for job in self.jobs.values_mut() {
            job.timestamp = self.time + self.request_timeout;
        }

        if let Some(epoch_suspects) = self.suspects.get(&next_epoch).cloned() {
            for suspect in epoch_suspects.values() {
                for load in &suspect.loads {
                    let buzz = fingerprint(&load.request);
                    if self.set_buzz.contains(&buzz) {
                        continue;
                    }
                    self.jobs.entry(buzz).or_insert_with(|| Job {
                        from: load.from,
                        request: load.request.clone(),
                        timestamp: self.time + self.request_timeout,
                    });
                }
            }
        }
        self.update_earliest_job_timestamp();

        self.epoch = next_epoch;
        self.consensus_state = ConsensusState::Idle;
        self.lc_state = LcState::Idle;

        Some(ReplicaOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use concord_types::{ByzantineFlags, Epoch, Nonce, Round};

    use super::*;
    use crate::client::ClientConfig;
    use crate::replica::ReplicaConfig;

    fn addr(b: u8) -> Address {
        let mut bytes = [0u8; 32];
        bytes[0] = b;
        Address::new(bytes)
    }

    fn replica(i: usize, n: usize, request_t: u64) -> ReplicaState {
        let keys: Vec<Address> = (0..n as u8).map(addr).collect();
        ReplicaState::new(ReplicaConfig {
            key: keys[i],
            keys: keys.clone(),
            request_t,
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

    #[test]
    fn local_timeout_triggers_suspect_broadcast() {
        let mut r = replica(1, 4, 10);
        r.on_request(
            addr(0xCC),
            concord_wire::Request {
                nonce: Nonce::new([1; 16]),
                payload: Bytes::from_static(b"x"),
                index: Round(0),
            },
        );
        r.time = r.time + 11;
        let out = r.maybe_suspect().expect("should suspect");
        assert_eq!(out.messages.len(), 4);
        assert_eq!(r.lc_state, LcState::Alert);
    }

    #[test]
    fn leader_change_advances_epoch_once_quorum_reached() {
        let mut r = replica(1, 4, 10);
        r.lc_state = LcState::Alert;
        let next_epoch = Epoch(1);
        for key in r.keys().to_vec().iter().take(3) {
            r.suspects.entry(next_epoch).or_default().insert(
                *key,
                Suspect {
                    epoch: next_epoch,
                    loads: Vec::new(),
                },
            );
        }
        let out = r.maybe_leader_change().expect("quorum reached");
        assert!(out.messages.is_empty());
        assert_eq!(r.epoch(), next_epoch);
        assert_eq!(r.lc_state, LcState::Idle);
    }
}
