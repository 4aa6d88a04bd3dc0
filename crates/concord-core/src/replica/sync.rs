//! Catch-up sync (§4.5): Whatsup/Head/Need/Ensure/Chunk/Confirm, and the
//! quorum-verified cumulative hash chain that makes a synced entry
//! trustworthy without believing any single peer's framing of it.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use concord_types::{Address, Epoch, LcState, Round};
use concord_wire::{Chunk, Confirm, Ensure, Envelope, Head, Need, Tip, Whatsup};

use super::{ReplicaOutput, ReplicaState};

impl ReplicaState {
    pub(crate) fn on_whatsup(&mut self, from: Address, output: &mut ReplicaOutput) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected whatsup: not from a server");
            return;
        }
        output.messages.push((
            from,
            Envelope::Head(Head {
                round: self.round,
                epoch: self.epoch,
            }),
        ));
    }

    pub(crate) fn on_bonjour(&mut self, from: Address, output: &mut ReplicaOutput) {
        output
            .messages
            .push((from, Envelope::Tip(Tip { round: self.round })));
    }

    pub(crate) fn on_head(&mut self, from: Address, head: Head) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected head: not from a server");
            return;
        }
        if head.round < self.most_recent_round_known {
            tracing::trace!("rejected head: outdated");
            return;
        }

        let voters = self
            .heads
            .entry((head.round, head.epoch))
            .or_insert_with(HashSet::new);
        if !voters.insert(from) {
            return;
        }

        if (voters.len() as u64) < self.q {
            return;
        }

        if head.round >= self.most_recent_round_known && head.epoch >= self.most_recent_epoch_known
        {
            self.most_recent_round_known = head.round;
            self.most_recent_epoch_known = head.epoch;
        }
    }

    pub(crate) fn on_need(&mut self, from: Address, need: Need, output: &mut ReplicaOutput) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected need: not from a server");
            return;
        }
        if need.first >= need.last {
            tracing::trace!("rejected need: invalid range");
            return;
        }
        if need.last > self.round {
            tracing::trace!("rejected need: no data can be returned");
            return;
        }

        let first = need.first.get() as usize;
        let last = need.last.get() as usize;
        let chunk = Chunk {
            last: need.last,
            data: self.log_data[first..last].to_vec(),
            buzz: self.log_buzz[first..last].to_vec(),
        };
        output.messages.push((from, Envelope::Chunk(chunk)));
    }

    pub(crate) fn on_ensure(&mut self, from: Address, ensure: Ensure, output: &mut ReplicaOutput) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected ensure: not from a server");
            return;
        }
        if ensure.last > self.round {
            tracing::trace!("rejected ensure: no data can be returned");
            return;
        }

        let last = ensure.last.get() as usize;
        let confirm = Confirm {
            last: ensure.last,
            data_hash: self.log_data_hash[last],
            buzz_hash: self.log_buzz_hash[last],
        };
        output.messages.push((from, Envelope::Confirm(confirm)));
    }

    pub(crate) fn on_chunk(&mut self, from: Address, chunk: Chunk) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected chunk: not from a server");
            return;
        }
        if chunk.last <= self.round {
            tracing::trace!("rejected chunk: useless");
            return;
        }
        if chunk.data.len() != chunk.buzz.len() {
            tracing::trace!("rejected chunk: data/buzz length mismatch");
            return;
        }

        let useful_len = (chunk.last - self.round) as usize;
        if useful_len > chunk.data.len() {
            tracing::trace!("rejected chunk: not enough data received");
            return;
        }

        let index_from = chunk.data.len() - useful_len;
        let useful_data = &chunk.data[index_from..];
        let useful_buzz = &chunk.buzz[index_from..];

        let prev_data_hash = *self.log_data_hash.last().expect("chain never empty");
        let data_hash = concord_crypto::cum_data_hash(
            prev_data_hash,
            useful_data.iter().map(Bytes::as_ref),
        );
        self.sync_data
            .entry(chunk.last)
            .or_insert_with(HashMap::new)
            .insert(data_hash, useful_data.to_vec());

        let prev_buzz_hash = *self.log_buzz_hash.last().expect("chain never empty");
        let buzz_hash = concord_crypto::cum_buzz_hash(prev_buzz_hash, useful_buzz.iter().copied());
        self.sync_buzz
            .entry(chunk.last)
            .or_insert_with(HashMap::new)
            .insert(buzz_hash, useful_buzz.to_vec());

        // Locally recomputed, never trusting the sender's own framing.
        self.on_confirm(
            from,
            Confirm {
                last: chunk.last,
                data_hash,
                buzz_hash,
            },
        );
    }

    pub(crate) fn on_confirm(&mut self, from: Address, confirm: Confirm) {
        if !self.keys.contains(&from) {
            tracing::trace!(?from, "rejected confirm: not from a server");
            return;
        }
        if confirm.last <= self.most_recent_round_to_sync {
            tracing::trace!("rejected confirm: already past this round");
            return;
        }

        let voters = self
            .confirms
            .entry((confirm.last, confirm.data_hash, confirm.buzz_hash))
            .or_insert_with(HashSet::new);
        voters.insert(from);

        if (voters.len() as u64) < self.q {
            return;
        }

        if confirm.last > self.most_recent_round_to_sync {
            self.most_recent_round_to_sync = confirm.last;
            self.most_recent_hash_to_sync = confirm.data_hash;
            self.most_recent_buzz_to_sync = confirm.buzz_hash;
        }
    }

    pub(crate) fn maybe_whatsup(&mut self) -> Option<ReplicaOutput> {
        if self.time < self.next_whatsup {
            return None;
        }

        let messages = self
            .keys
            .iter()
            .map(|key| (*key, Envelope::Whatsup(Whatsup)))
            .collect();

        self.reschedule_whatsup();

        Some(ReplicaOutput {
            messages,
            ..Default::default()
        })
    }

    pub(crate) fn maybe_sync(&mut self) -> Option<ReplicaOutput> {
        if self.round >= self.most_recent_round_known {
            return None;
        }
        if self.sync_sent.contains(&self.most_recent_round_known) {
            return None;
        }

        let selected = self.someone_else_key();
        let mut messages = vec![(
            selected,
            Envelope::Need(Need {
                first: self.round,
                last: self.most_recent_round_known,
            }),
        )];

        for key in &self.keys {
            if *key == self.key || *key == selected {
                continue;
            }
            messages.push((
                *key,
                Envelope::Ensure(Ensure {
                    last: self.most_recent_round_known,
                }),
            ));
        }

        self.sync_sent.insert(self.most_recent_round_known);
        self.reschedule_whatsup();

        Some(ReplicaOutput {
            messages,
            ..Default::default()
        })
    }

    pub(crate) fn maybe_update(&mut self) -> Option<ReplicaOutput> {
        if self.round >= self.most_recent_round_to_sync {
            return None;
        }

        let missing_data = self
            .sync_data
            .get(&self.most_recent_round_to_sync)
            .and_then(|by_hash| by_hash.get(&self.most_recent_hash_to_sync))?
            .clone();
        let missing_buzz = self
            .sync_buzz
            .get(&self.most_recent_round_to_sync)
            .and_then(|by_hash| by_hash.get(&self.most_recent_buzz_to_sync))?
            .clone();

        if missing_data.len() != missing_buzz.len() {
            tracing::trace!("chunk cache corrupt: data/buzz length mismatch");
            return None;
        }

        let advance_n = (self.most_recent_round_to_sync - self.round) as usize;
        let mut output = ReplicaOutput::default();
        for i in 0..advance_n {
            let data = missing_data[missing_data.len() - advance_n + i].clone();
            let buzz = missing_buzz[missing_buzz.len() - advance_n + i];
            self.decide(data, buzz, &mut output);
        }

        if self.epoch < self.most_recent_epoch_known {
            self.epoch = self.most_recent_epoch_known;
        }
        if self.lc_state != LcState::Idle {
            self.lc_state = LcState::Idle;
        }

        Some(output)
    }

    pub(crate) fn reschedule_whatsup(&mut self) {
        let candidate = self.time + self.whatsup_t;
        if self.next_whatsup < candidate {
            self.next_whatsup = candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use concord_types::ByzantineFlags;

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

    #[test]
    fn whatsup_replies_with_current_head() {
        let mut r = replica(0, 4);
        let mut output = ReplicaOutput::default();
        r.on_whatsup(addr(1), &mut output);
        assert_eq!(output.messages.len(), 1);
    }

    #[test]
    fn head_quorum_updates_most_recent_round_known() {
        let mut r = replica(0, 4);
        let keys = r.keys().to_vec();
        for key in keys.iter().take(3) {
            r.on_head(
                *key,
                Head {
                    round: Round(5),
                    epoch: Epoch(0),
                },
            );
        }
        assert_eq!(r.most_recent_round_known, Round(5));
    }

    #[test]
    fn maybe_sync_sends_need_to_one_peer_and_ensure_to_the_rest() {
        let mut r = replica(0, 4);
        r.most_recent_round_known = Round(3);
        let out = r.maybe_sync().expect("should sync");
        // n=4: one Need to the selected peer, Ensure to the other two
        // (self and the selected peer are both skipped) = 3 messages.
        assert_eq!(out.messages.len(), 3);
        let need_count = out
            .messages
            .iter()
            .filter(|(_, e)| matches!(e, Envelope::Need(_)))
            .count();
        assert_eq!(need_count, 1);
        let ensure_count = out
            .messages
            .iter()
            .filter(|(_, e)| matches!(e, Envelope::Ensure(_)))
            .count();
        assert_eq!(ensure_count, 2);
    }
}
