//! Request admission (§4.2): turning an incoming [`Request`] into a local
//! job, with replay and out-of-range rejection.

use concord_types::{Address, ByzantineFlags};
use concord_wire::{fingerprint, Job, Request};

use super::ReplicaState;

impl ReplicaState {
    pub(crate) fn on_request(&mut self, from: Address, request: Request) {
        if self
            .byzantine_flags
            .has(ByzantineFlags::IGNORE_CLIENT_X)
            && from == self.someone_else_key()
        {
            tracing::trace!("byzantine: ignoring request from configured client");
            return;
        }

        let from_server = self.keys.contains(&from);
        if !from_server && !self.allow_external {
            tracing::trace!(?from, "rejected request: external requests disallowed");
            return;
        }

        if request.index > self.round {
            tracing::trace!(?request.index, round = ?self.round, "rejected request: index ahead of round");
            return;
        }

        if request.index + self.index_tolerance.get() < self.round {
            tracing::trace!(
                ?request.index, round = ?self.round,
                "rejected request: index too far behind, possible replay"
            );
            return;
        }

        let buzz = fingerprint(&request);
        if self.jobs.contains_key(&buzz) {
            tracing::trace!(?buzz, "rejected request: already an open job, possible replay");
            return;
        }
        if self.set_buzz.contains(&buzz) {
            tracing::trace!(?buzz, "rejected request: already decided, possible replay");
            return;
        }

        let job = Job {
            from,
            timestamp: self.time,
            request,
        };
        tracing::trace!(?buzz, ?job, "admitted new job");
        self.jobs.insert(buzz, job);
        self.update_earliest_job_timestamp();
    }
}
