//! The replica engine: consensus, leader-change, sync and reconfiguration,
//! dispatched from three entry points ([`ReplicaState::handle_net`],
//! [`ReplicaState::handle_call`], [`ReplicaState::handle_tick`]) that each
//! run the same `proceed` fixpoint afterward.

mod admission;
mod consensus;
mod leader_change;
mod reconfiguration;
mod state;
mod sync;

pub use state::{ReplicaConfig, ReplicaState, RoundEpochBucket};

use concord_types::{Address, Round};
use concord_wire::Envelope;

use crate::client::Call;
use crate::error::ConcordError;

/// Output accumulated while processing one event: messages to send, and
/// anything the embedded client decided to surface to the host.
#[derive(Debug, Default)]
pub struct ReplicaOutput {
    pub messages: Vec<(Address, Envelope)>,
    pub client_returns: Vec<crate::client::Return>,
    /// Rounds newly appended to the log by this event, in order.
    pub decided: Vec<Round>,
    /// Local failures the host's `error()` collaborator should observe,
    /// forwarded from the embedded client (e.g. a `Response` for a nonce
    /// with no matching outstanding ticket). Never fatal on their own.
    pub errors: Vec<ConcordError>,
}

impl ReplicaOutput {
    pub(crate) fn merge(&mut self, mut other: ReplicaOutput) {
        self.messages.append(&mut other.messages);
        self.client_returns.append(&mut other.client_returns);
        self.decided.append(&mut other.decided);
        self.errors.append(&mut other.errors);
    }

    fn absorb_client(&mut self, client_output: crate::client::ClientOutput) {
        self.messages.extend(client_output.messages);
        self.client_returns.extend(client_output.returns);
        self.errors.extend(client_output.errors);
    }
}

const MAX_PROCEED_ITERATIONS: usize = 1000;

impl ReplicaState {
    /// A message arrived from the network, addressed to `self.key`.
    pub fn handle_net(
        &mut self,
        from: Address,
        envelope: Envelope,
    ) -> Result<ReplicaOutput, ConcordError> {
        let mut output = ReplicaOutput::default();
        match envelope {
            Envelope::Request(request) => self.on_request(from, request),
            Envelope::Propose(propose) => self.on_propose(from, propose),
            Envelope::Write(write) => self.on_write(from, write),
            Envelope::Accept(accept) => self.on_accept(from, accept),
            Envelope::Suspect(suspect) => self.on_suspect(from, suspect),
            Envelope::Whatsup(_) => self.on_whatsup(from, &mut output),
            Envelope::Bonjour(_) => self.on_bonjour(from, &mut output),
            Envelope::Head(head) => self.on_head(from, head),
            Envelope::Need(need) => self.on_need(from, need, &mut output),
            Envelope::Ensure(ensure) => self.on_ensure(from, ensure, &mut output),
            Envelope::Chunk(chunk) => self.on_chunk(from, chunk),
            Envelope::Confirm(confirm) => self.on_confirm(from, confirm),
            Envelope::Response(_) | Envelope::Tip(_) => {
                let client_output = self.client.handle_net(from, envelope)?;
                output.absorb_client(client_output);
            }
        }
        self.proceed(&mut output)?;
        Ok(output)
    }

    /// A local submission from this host's own co-located client.
    pub fn handle_call(&mut self, call: Call) -> Result<ReplicaOutput, ConcordError> {
        let mut output = ReplicaOutput::default();
        let client_output = self.client.handle_call(call)?;
        output.absorb_client(client_output);
        self.proceed(&mut output)?;
        Ok(output)
    }

    /// Advances the logical clock by `delta` units.
    pub fn handle_tick(&mut self, delta: u64) -> Result<ReplicaOutput, ConcordError> {
        let mut output = ReplicaOutput::default();
        self.time = self.time + delta;

        let client_output = self.client.handle_tick(delta)?;
        output.absorb_client(client_output);

        self.proceed(&mut output)?;
        Ok(output)
    }

    fn proceed(&mut self, output: &mut ReplicaOutput) -> Result<(), ConcordError> {
        let mut i = 0;
        loop {
            if let Some(step) = self.try_proceed() {
                output.merge(step);
            } else {
                break;
            }
            i += 1;
            if i == MAX_PROCEED_ITERATIONS {
                return Err(ConcordError::ProceedLoopExceeded(MAX_PROCEED_ITERATIONS));
            }
        }
        Ok(())
    }

    /// Runs every guarded transition once, in the fixed order the distilled
    /// protocol specifies, and returns the output of the first one that made
    /// progress (or `None` once none of them do).
    fn try_proceed(&mut self) -> Option<ReplicaOutput> {
        self.maybe_whatsup()
            .or_else(|| self.maybe_propose())
            .or_else(|| self.maybe_write())
            .or_else(|| self.maybe_accept())
            .or_else(|| self.maybe_decide())
            .or_else(|| self.maybe_suspect())
            .or_else(|| self.maybe_leader_change())
            .or_else(|| self.maybe_sync())
            .or_else(|| self.maybe_update())
    }
}
