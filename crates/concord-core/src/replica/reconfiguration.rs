//! Online reconfiguration (§4.6): membership changes triggered by decided
//! log entries carrying a magic prefix.

use bytes::Bytes;
use concord_types::{Address, Epoch, MAGIC_ADD, MAGIC_REMOVE};

use super::{ReplicaState, RoundEpochBucket};

impl ReplicaState {
    pub(crate) fn apply_magic_prefix_if_present(&mut self, data: &Bytes) {
        if data.len() == MAGIC_ADD.len() + 32 && data[..MAGIC_ADD.len()] == MAGIC_ADD {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&data[MAGIC_ADD.len()..]);
            self.add_replica(Address::new(bytes));
            return;
        }
        if data.len() == MAGIC_REMOVE.len() + 32 && data[..MAGIC_REMOVE.len()] == MAGIC_REMOVE {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&data[MAGIC_REMOVE.len()..]);
            self.remove_replica(Address::new(bytes));
        }
    }

    fn add_replica(&mut self, new_key: Address) {
        if self.keys.contains(&new_key) {
            tracing::trace!(?new_key, "reconfigure: already a member, ignoring");
            return;
        }

        let leader_pos = self.epoch.get() % self.n;
        let new_n = self.n + 1;
        let epoch_delta = (0..)
            .find(|delta| (self.epoch.get() + delta) % new_n == leader_pos)
            .expect("modular search always terminates");
        if epoch_delta > 0 {
            self.epoch = Epoch(self.epoch.get() + epoch_delta);
        }

        self.keys.push(new_key);
        self.keys.sort();
        self.update_factors();
        self.client.reconfigure_to(&self.keys.clone());
    }

    fn remove_replica(&mut self, dead_key: Address) {
        if !self.keys.contains(&dead_key) {
            tracing::trace!(?dead_key, "reconfigure: not a member, ignoring");
            return;
        }
        if self.n == 1 {
            tracing::trace!("reconfigure: refusing to remove the last replica");
            return;
        }

        if dead_key != self.leader() {
            let leader_pos = self.epoch.get() % self.n;
            let new_n = self.n - 1;
            let epoch_delta = (0..)
                .find(|delta| (self.epoch.get() + delta) % new_n == leader_pos)
                .expect("modular search always terminates");
            if epoch_delta > 0 {
                self.epoch = Epoch(self.epoch.get() + epoch_delta);
            }
        }

        self.keys.retain(|key| *key != dead_key);
        self.update_factors();
        self.client.reconfigure_to(&self.keys.clone());

        self.prune_address(dead_key);
    }

    /// Strips every vote/proposal/confirmation attributed to `dead_key` from
    /// the flattened bookkeeping maps, mirroring the four nested-map rebuilds
    /// the distilled protocol performs on removal.
    fn prune_address(&mut self, dead_key: Address) {
        for bucket in self.round_epoch.values_mut() {
            let RoundEpochBucket {
                proposes,
                writes,
                accepts,
            } = bucket;
            proposes.remove(&dead_key);
            for voters in writes.values_mut() {
                voters.remove(&dead_key);
            }
            for voters in accepts.values_mut() {
                voters.remove(&dead_key);
            }
        }

        for epoch_suspects in self.suspects.values_mut() {
            epoch_suspects.remove(&dead_key);
        }

        for voters in self.heads.values_mut() {
            voters.remove(&dead_key);
        }

        for voters in self.confirms.values_mut() {
            voters.remove(&dead_key);
        }
    }
}
