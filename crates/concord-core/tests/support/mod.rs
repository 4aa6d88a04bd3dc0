//! A tiny in-process simulated network for end-to-end scenario tests: one
//! FIFO mailbox per address, delivered by an explicit `run_to_quiescence`
//! loop rather than real sockets or a real clock.

use std::collections::{HashMap, HashSet, VecDeque};

use concord_core::{Call, ClientConfig, ClientState, Return, ReplicaConfig, ReplicaState};
use concord_types::Address;
use concord_wire::Envelope;

pub fn addr(b: u8) -> Address {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Address::new(bytes)
}

#[derive(Default)]
struct Network {
    mailboxes: HashMap<Address, VecDeque<(Address, Envelope)>>,
    isolated: HashSet<Address>,
}

impl Network {
    fn send(&mut self, from: Address, to: Address, envelope: Envelope) {
        if self.isolated.contains(&from) || self.isolated.contains(&to) {
            return;
        }
        self.mailboxes.entry(to).or_default().push_back((from, envelope));
    }
}

/// Wires a handful of [`ReplicaState`]s and standalone [`ClientState`]s
/// together over a simulated [`Network`], collecting every `Return` each
/// client has observed so scenarios can assert on them directly.
#[derive(Default)]
pub struct Harness {
    network: Network,
    replicas: HashMap<Address, ReplicaState>,
    clients: HashMap<Address, ClientState>,
    pub returns: HashMap<Address, Vec<Return>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_replica(&mut self, key: Address, config: ReplicaConfig) {
        self.replicas.insert(key, ReplicaState::new(config));
    }

    pub fn replace_replica(&mut self, key: Address, config: ReplicaConfig) {
        self.replicas.insert(key, ReplicaState::new(config));
    }

    pub fn add_client(&mut self, key: Address, config: ClientConfig) {
        self.clients.insert(key, ClientState::new(config));
    }

    pub fn replica(&self, key: Address) -> &ReplicaState {
        self.replicas.get(&key).expect("no such replica in harness")
    }

    pub fn isolate(&mut self, key: Address) {
        self.network.isolated.insert(key);
    }

    pub fn reconnect(&mut self, key: Address) {
        self.network.isolated.remove(&key);
    }

    /// Submits a local call through a standalone client.
    pub fn call(&mut self, client: Address, call: Call) {
        let output = self
            .clients
            .get_mut(&client)
            .expect("no such client in harness")
            .handle_call(call)
            .expect("client call should not hit the iteration cap");
        assert!(
            output.errors.is_empty(),
            "unexpected client errors on call: {:?}",
            output.errors
        );
        self.route(client, output.messages);
        self.returns.entry(client).or_default().extend(output.returns);
    }

    /// Submits a local call through a replica's co-located client.
    pub fn call_via_replica(&mut self, replica: Address, call: Call) {
        let output = self
            .replicas
            .get_mut(&replica)
            .expect("no such replica in harness")
            .handle_call(call)
            .expect("replica call should not hit the iteration cap");
        assert!(
            output.errors.is_empty(),
            "unexpected replica errors on call: {:?}",
            output.errors
        );
        self.route(replica, output.messages);
        self.returns
            .entry(replica)
            .or_default()
            .extend(output.client_returns);
    }

    /// Advances every participant's logical clock by `delta` and delivers
    /// whatever that provokes, to quiescence.
    pub fn tick_all(&mut self, delta: u64) {
        let replica_keys: Vec<Address> = self.replicas.keys().copied().collect();
        for key in replica_keys {
            let output = self
                .replicas
                .get_mut(&key)
                .expect("key came from this map")
                .handle_tick(delta)
                .expect("tick should not hit the iteration cap");
            assert!(
                output.errors.is_empty(),
                "unexpected replica errors on tick: {:?}",
                output.errors
            );
            self.route(key, output.messages);
            self.returns.entry(key).or_default().extend(output.client_returns);
        }

        let client_keys: Vec<Address> = self.clients.keys().copied().collect();
        for key in client_keys {
            let output = self
                .clients
                .get_mut(&key)
                .expect("key came from this map")
                .handle_tick(delta)
                .expect("tick should not hit the iteration cap");
            assert!(
                output.errors.is_empty(),
                "unexpected client errors on tick: {:?}",
                output.errors
            );
            self.route(key, output.messages);
            self.returns.entry(key).or_default().extend(output.returns);
        }

        self.run_to_quiescence();
    }

    fn route(&mut self, from: Address, messages: Vec<(Address, Envelope)>) {
        for (to, envelope) in messages {
            self.network.send(from, to, envelope);
        }
    }

    /// Delivers every currently queued message exactly once. Returns whether
    /// anything was delivered, so `run_to_quiescence` knows when to stop.
    fn deliver_all(&mut self) -> bool {
        let addrs: Vec<Address> = self.network.mailboxes.keys().copied().collect();
        let mut any = false;

        for addr in addrs {
            loop {
                let next = self
                    .network
                    .mailboxes
                    .get_mut(&addr)
                    .and_then(VecDeque::pop_front);
                let Some((from, envelope)) = next else {
                    break;
                };
                any = true;

                if let Some(replica) = self.replicas.get_mut(&addr) {
                    let output = replica
                        .handle_net(from, envelope)
                        .expect("replica handle_net should not hit the iteration cap");
                    assert!(
                        output.errors.is_empty(),
                        "unexpected replica errors delivering to {addr:?}: {:?}",
                        output.errors
                    );
                    self.route(addr, output.messages);
                    self.returns.entry(addr).or_default().extend(output.client_returns);
                } else if let Some(client) = self.clients.get_mut(&addr) {
                    let output = client
                        .handle_net(from, envelope)
                        .expect("client handle_net should not hit the iteration cap");
                    assert!(
                        output.errors.is_empty(),
                        "unexpected client errors delivering to {addr:?}: {:?}",
                        output.errors
                    );
                    self.route(addr, output.messages);
                    self.returns.entry(addr).or_default().extend(output.returns);
                }
            }
        }

        any
    }

    /// Repeatedly delivers queued messages until the network falls silent,
    /// or `max_rounds` is reached (a stuck scenario is a test failure, not
    /// an infinite hang).
    pub fn run_to_quiescence(&mut self) {
        const MAX_ROUNDS: usize = 500;
        for _ in 0..MAX_ROUNDS {
            if !self.deliver_all() {
                return;
            }
        }
        panic!("network did not quiesce within {MAX_ROUNDS} rounds");
    }
}

/// The canonical four-replica, one-client configuration used across S1-S4:
/// `keys[i] = addr(i+1)` so A,B,C,D sort in that order and leader(0) = A.
pub fn four_replica_config(i: usize, keys: &[Address], byzantine_flags: concord_types::ByzantineFlags) -> ReplicaConfig {
    ReplicaConfig {
        key: keys[i],
        keys: keys.to_vec(),
        request_t: 50,
        whatsup_t: 200,
        index_tolerance: 5,
        allow_external: true,
        client: ClientConfig {
            key: keys[i],
            server_keys: keys.to_vec(),
            call_t: 20,
            bonjour_t: 100,
            byzantine_flags: concord_types::ByzantineFlags::NONE,
        },
        byzantine_flags,
    }
}

pub fn client_config(key: Address, server_keys: &[Address], byzantine_flags: concord_types::ByzantineFlags) -> ClientConfig {
    ClientConfig {
        key,
        server_keys: server_keys.to_vec(),
        call_t: 20,
        bonjour_t: 100,
        byzantine_flags,
    }
}
