//! The node process's event loop: wires [`Transport`], [`HttpSidecar`],
//! [`Clock`] and [`FileStorage`] to one [`ReplicaState`].

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Instant;

use concord_config::NodeConfig;
use concord_core::{ClientConfig, ReplicaConfig, ReplicaOutput, ReplicaState};
use concord_types::{Address, ByzantineFlags};
use concord_wire::Envelope;
use mio::{Events, Poll};
use tracing::{info, trace, warn};

use crate::clock::Clock;
use crate::error::NodeError;
use crate::hex::decode_address;
use crate::http::{HttpSidecar, StatusSnapshot, HTTP_LISTENER_TOKEN};
use crate::storage::{FileStorage, Storage};
use crate::transport::{Transport, LISTENER_TOKEN};

pub fn run(config: NodeConfig) -> Result<(), NodeError> {
    let self_key = decode_address(&config.identity.key)?;

    let mut keys = vec![self_key];
    let mut peer_addrs: HashMap<Address, SocketAddr> = HashMap::new();
    for (hex_key, host_port) in &config.cluster.peers {
        let addr = decode_address(hex_key)?;
        peer_addrs.insert(addr, resolve(host_port)?);
        keys.push(addr);
    }
    keys.sort();
    keys.dedup();

    let replica_config = ReplicaConfig {
        key: self_key,
        keys: keys.clone(),
        request_t: config.timing.request_t,
        whatsup_t: config.timing.whatsup_t,
        index_tolerance: config.timing.index_tolerance,
        allow_external: config.identity.allow_external,
        client: ClientConfig {
            key: self_key,
            server_keys: keys,
            call_t: config.timing.call_t,
            bonjour_t: config.timing.bonjour_t,
            byzantine_flags: ByzantineFlags::NONE,
        },
        byzantine_flags: ByzantineFlags::NONE,
    };
    let mut replica = ReplicaState::new(replica_config);

    let storage_path = config.storage.data_dir.join("log.bin");
    let mut storage = FileStorage::open(storage_path)?;

    let mut poll = Poll::new()?;

    let bind_addr = parse_socket_addr(&config.network.bind_address)?;
    let mut transport = Transport::bind(self_key, bind_addr, peer_addrs, &poll)?;

    let health_addr = parse_socket_addr(&config.network.health_address)?;
    let http = HttpSidecar::bind(health_addr, &poll)?;

    let clock = Clock::new(config.timing.tick_interval_ms);
    let mut events = Events::with_capacity(128);
    let mut last_tick = Instant::now();

    info!(%self_key, %bind_addr, "concord node started");

    loop {
        poll.poll(&mut events, Some(clock.interval()))?;

        for event in &events {
            let token = event.token();
            if token == LISTENER_TOKEN {
                transport.accept_all(&poll)?;
            } else if token == HTTP_LISTENER_TOKEN {
                http.handle_accept(&snapshot(self_key, &replica));
            } else if transport.is_known_token(token) {
                if event.is_readable() {
                    let (_, envelopes) = transport.readable(token, &poll)?;
                    if let Some(from) = transport.peer_of(token) {
                        for envelope in envelopes {
                            dispatch(&mut replica, &mut transport, &mut storage, &poll, from, envelope)?;
                        }
                    }
                }
                if event.is_writable() {
                    transport.writable(token, &poll)?;
                }
            }
        }

        if last_tick.elapsed() >= clock.interval() {
            last_tick = Instant::now();
            let output = replica.handle_tick(1)?;
            handle_output(&replica, &mut transport, &mut storage, &poll, output)?;
        }
    }
}

fn dispatch(
    replica: &mut ReplicaState,
    transport: &mut Transport,
    storage: &mut dyn Storage,
    poll: &Poll,
    from: Address,
    envelope: Envelope,
) -> Result<(), NodeError> {
    let output = replica.handle_net(from, envelope)?;
    handle_output(&*replica, transport, storage, poll, output)
}

fn handle_output(
    replica: &ReplicaState,
    transport: &mut Transport,
    storage: &mut dyn Storage,
    poll: &Poll,
    output: ReplicaOutput,
) -> Result<(), NodeError> {
    for (to, envelope) in output.messages {
        if let Err(e) = transport.send(to, &envelope, poll) {
            warn!(?to, error = %e, "failed to send message");
        }
    }

    let log_data = replica.log_data();
    for round in &output.decided {
        if let Some(entry) = log_data.get(round.get() as usize) {
            storage.append(entry)?;
        }
        trace!(?round, "round decided");
    }

    for ret in output.client_returns {
        info!(?ret, "local client call resolved");
    }

    for err in output.errors {
        tracing::error!(?err, "local failure surfaced by replica");
    }

    Ok(())
}

fn snapshot(self_key: Address, replica: &ReplicaState) -> StatusSnapshot {
    StatusSnapshot {
        key: crate::hex::encode_address(&self_key),
        round: replica.round().get(),
        epoch: replica.epoch().get(),
        log_len: replica.log_len(),
        leader: crate::hex::encode_address(&replica.leader()),
        n: replica.keys().len() as u64,
        is_leader: replica.is_leader(),
    }
}

fn resolve(host_port: &str) -> Result<SocketAddr, NodeError> {
    host_port
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| NodeError::MalformedFrame(format!("unresolvable peer address {host_port}")))
}

fn parse_socket_addr(s: &str) -> Result<SocketAddr, NodeError> {
    resolve(s)
}
