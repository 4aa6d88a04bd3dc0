//! The client-side request engine (§4.7): at-most-once, quorum-confirmed
//! delivery against a possibly Byzantine replica set.
//!
//! Driven by the same three event kinds as the replica (call, net, tick),
//! with its own `proceed` fixpoint whose guarded transitions run in order:
//! `maybe_bonjour`, `maybe_send_tickets`, `maybe_return_responses`,
//! `maybe_return_timeouts`.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use concord_types::{Address, ByzantineFlags, LogicalTime, Nonce, Round};
use concord_wire::{Envelope, Request, Response};

use crate::error::ConcordError;

/// A client's pending `(tag, nonce, payload, timestamp)` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub nonce: Nonce,
    pub tag: u64,
    pub timestamp: LogicalTime,
    pub payload: Bytes,
}

/// A local submission handed to the client by its caller.
#[derive(Debug, Clone)]
pub struct Call {
    pub tag: u64,
    pub payload: Bytes,
}

/// Exactly one of these two outcomes is ever produced for a given `tag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Return {
    Decided { tag: u64, index: Round },
    TimedOut { tag: u64 },
}

/// Output produced by processing one client event.
#[derive(Debug, Default)]
pub struct ClientOutput {
    pub messages: Vec<(Address, Envelope)>,
    pub returns: Vec<Return>,
    /// Local failures the host's `error()` collaborator should observe (§6,
    /// §7). Never fatal by themselves -- the fixpoint keeps running -- but
    /// worth surfacing, unlike the silent trace-only rejects.
    pub errors: Vec<ConcordError>,
}

impl ClientOutput {
    fn merge(&mut self, mut other: ClientOutput) {
        self.messages.append(&mut other.messages);
        self.returns.append(&mut other.returns);
        self.errors.append(&mut other.errors);
    }
}

/// Construction-time configuration for a [`ClientState`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub key: Address,
    pub server_keys: Vec<Address>,
    pub call_t: u64,
    pub bonjour_t: u64,
    pub byzantine_flags: ByzantineFlags,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            key: Address::new([0u8; 32]),
            server_keys: Vec::new(),
            call_t: 20,
            bonjour_t: 100,
            byzantine_flags: ByzantineFlags::NONE,
        }
    }
}

#[derive(Debug)]
pub struct ClientState {
    pub(crate) key: Address,
    pub(crate) server_keys: Vec<Address>,
    pub(crate) n: u64,
    pub(crate) f: u64,
    pub(crate) q: u64,

    pub(crate) time: LogicalTime,
    pub(crate) timeout: LogicalTime,
    pub(crate) bonjour_t: LogicalTime,
    pub(crate) next_bonjour: LogicalTime,

    pub(crate) last_known_index: Round,
    pub(crate) has_fresh_index: bool,
    pub(crate) is_bonjour_sent_at_least_once: bool,

    pub(crate) tickets_to_send: HashMap<Nonce, Ticket>,
    pub(crate) sent_tickets: HashMap<Nonce, Ticket>,

    pub(crate) response_counters: HashMap<concord_types::Hash, HashSet<Address>>,
    pub(crate) responses: HashMap<concord_types::Hash, Response>,
    pub(crate) tip_counters: HashMap<Round, HashSet<Address>>,

    pub(crate) responses_to_return: Vec<Response>,
    pub(crate) tickets_timeout: Vec<Ticket>,

    pub(crate) byzantine_flags: ByzantineFlags,
}

impl ClientState {
    pub fn new(config: ClientConfig) -> Self {
        let mut client = Self {
            key: config.key,
            server_keys: config.server_keys,
            n: 0,
            f: 0,
            q: 0,
            time: LogicalTime::ZERO,
            timeout: LogicalTime(config.call_t),
            bonjour_t: LogicalTime(config.bonjour_t),
            next_bonjour: LogicalTime::ZERO,
            last_known_index: Round::ZERO,
            has_fresh_index: false,
            is_bonjour_sent_at_least_once: false,
            tickets_to_send: HashMap::new(),
            sent_tickets: HashMap::new(),
            response_counters: HashMap::new(),
            responses: HashMap::new(),
            tip_counters: HashMap::new(),
            responses_to_return: Vec::new(),
            tickets_timeout: Vec::new(),
            byzantine_flags: config.byzantine_flags,
        };
        client.update_factors();
        client
    }

    pub(crate) fn update_factors(&mut self) {
        self.n = self.server_keys.len() as u64;
        self.f = self.n.saturating_sub(1) / 3;
        self.q = (self.n + self.f) / 2 + 1;
        if self.n <= 2 {
            self.q = 1;
        }
    }

    /// Called by the replica's reconfiguration logic when membership
    /// changes. Drops counters attributed to addresses no longer present.
    pub(crate) fn reconfigure_to(&mut self, keys: &[Address]) {
        let removed: HashSet<Address> = self
            .server_keys
            .iter()
            .filter(|k| !keys.contains(k))
            .copied()
            .collect();

        for voters in self.response_counters.values_mut() {
            voters.retain(|a| !removed.contains(a));
        }
        for voters in self.tip_counters.values_mut() {
            voters.retain(|a| !removed.contains(a));
        }

        self.server_keys = keys.to_vec();
        self.update_factors();
    }

    pub fn handle_call(&mut self, call: Call) -> Result<ClientOutput, ConcordError> {
        let mut output = ClientOutput::default();
        self.on_call(call);
        self.proceed(&mut output)?;
        Ok(output)
    }

    pub fn handle_net(
        &mut self,
        from: Address,
        envelope: Envelope,
    ) -> Result<ClientOutput, ConcordError> {
        let mut output = ClientOutput::default();
        match envelope {
            Envelope::Response(response) => self.on_response(from, response),
            Envelope::Tip(tip) => self.on_tip(from, tip),
            other => {
                tracing::trace!(?other, "client: ignoring envelope not addressed to client");
            }
        }
        self.proceed(&mut output)?;
        Ok(output)
    }

    pub fn handle_tick(&mut self, delta: u64) -> Result<ClientOutput, ConcordError> {
        let mut output = ClientOutput::default();
        self.time = self.time + delta;

        let mut newly_timed_out = Vec::new();
        self.sent_tickets.retain(|_, ticket| {
            if ticket.timestamp + self.timeout <= self.time {
                newly_timed_out.push(ticket.clone());
                false
            } else {
                true
            }
        });
        self.tickets_to_send.retain(|_, ticket| {
            if ticket.timestamp + self.timeout <= self.time {
                newly_timed_out.push(ticket.clone());
                false
            } else {
                true
            }
        });
        self.tickets_timeout.extend(newly_timed_out);

        self.proceed(&mut output)?;
        Ok(output)
    }

    fn on_call(&mut self, call: Call) {
        let mut nonce = Self::random_nonce();

        if self.byzantine_flags.has(ByzantineFlags::CLIENT_FIX_NONCE) {
            let mut fixed = [0u8; 16];
            fixed[0] = 0xFA;
            fixed[1] = 0xCE;
            nonce = Nonce::new(fixed);
        }

        let ticket = Ticket {
            tag: call.tag,
            timestamp: self.time,
            nonce,
            payload: call.payload,
        };
        self.tickets_to_send.insert(nonce, ticket);
    }

    fn on_response(&mut self, _from: Address, response: Response) {
        let response_id = concord_wire::response_hash(&response);
        let voters = self.response_counters.entry(response_id).or_default();
        voters.insert(_from);
        self.responses.entry(response_id).or_insert(response);

        if voters.len() as u64 >= self.q {
            self.responses_to_return.push(response);
            self.response_counters.remove(&response_id);
            self.responses.remove(&response_id);
        }
    }

    fn on_tip(&mut self, from: Address, tip: concord_wire::Tip) {
        if tip.round < self.last_known_index {
            return;
        }
        let voters = self.tip_counters.entry(tip.round).or_default();
        voters.insert(from);

        if voters.len() as u64 >= self.q {
            self.last_known_index = tip.round;
            self.has_fresh_index = true;
        }
    }

    fn proceed(&mut self, output: &mut ClientOutput) -> Result<(), ConcordError> {
        const MAX_ITERATIONS: usize = 1000;
        let mut i = 0;
        loop {
            let step = self.try_proceed();
            if let Some(step) = step {
                output.merge(step);
            } else {
                break;
            }
            i += 1;
            if i == MAX_ITERATIONS {
                return Err(ConcordError::ProceedLoopExceeded(MAX_ITERATIONS));
            }
        }
        Ok(())
    }

    fn try_proceed(&mut self) -> Option<ClientOutput> {
        self.maybe_bonjour()
            .or_else(|| self.maybe_send_tickets())
            .or_else(|| self.maybe_return_responses())
            .or_else(|| self.maybe_return_timeouts())
    }

    fn maybe_bonjour(&mut self) -> Option<ClientOutput> {
        if self.time < self.next_bonjour {
            return None;
        }

        let messages = self
            .server_keys
            .iter()
            .map(|key| (*key, Envelope::Bonjour(concord_wire::Bonjour)))
            .collect();

        self.next_bonjour = self.time + self.bonjour_t.get();

        if self.is_bonjour_sent_at_least_once {
            self.has_fresh_index = false;
        } else {
            self.has_fresh_index = true;
            self.is_bonjour_sent_at_least_once = true;
        }

        Some(ClientOutput {
            messages,
            ..Default::default()
        })
    }

    fn maybe_send_tickets(&mut self) -> Option<ClientOutput> {
        if self.tickets_to_send.is_empty() || !self.has_fresh_index {
            return None;
        }

        let mut messages = Vec::new();
        for (&nonce, ticket) in &self.tickets_to_send {
            let request = Request {
                payload: ticket.payload.clone(),
                nonce,
                index: self.last_known_index,
            };
            for key in &self.server_keys {
                messages.push((*key, Envelope::Request(request.clone())));
            }
        }

        self.sent_tickets.extend(self.tickets_to_send.drain());

        Some(ClientOutput {
            messages,
            ..Default::default()
        })
    }

    fn maybe_return_responses(&mut self) -> Option<ClientOutput> {
        if self.responses_to_return.is_empty() {
            return None;
        }

        let mut returns = Vec::new();
        let mut errors = Vec::new();
        for response in self.responses_to_return.drain(..) {
            match self.sent_tickets.remove(&response.nonce) {
                Some(ticket) => returns.push(Return::Decided {
                    tag: ticket.tag,
                    index: response.index,
                }),
                None => {
                    tracing::warn!(?response.nonce, "response for unknown ticket nonce");
                    errors.push(ConcordError::UnknownTicketNonce(response.nonce));
                }
            }
        }

        Some(ClientOutput {
            messages: Vec::new(),
            returns,
            errors,
        })
    }

    fn maybe_return_timeouts(&mut self) -> Option<ClientOutput> {
        if self.tickets_timeout.is_empty() {
            return None;
        }

        let returns = self
            .tickets_timeout
            .drain(..)
            .map(|ticket| Return::TimedOut { tag: ticket.tag })
            .collect();

        Some(ClientOutput {
            messages: Vec::new(),
            returns,
            ..Default::default()
        })
    }

    fn random_nonce() -> Nonce {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes).expect("system RNG unavailable");
        Nonce::new(bytes)
    }
}
