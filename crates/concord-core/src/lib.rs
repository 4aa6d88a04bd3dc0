//! Byzantine-fault-tolerant total-order replication engine.
//!
//! [`replica::ReplicaState`] drives one participant's consensus,
//! leader-change, sync and reconfiguration logic; [`client::ClientState`]
//! drives a standalone or co-located client's at-most-once request
//! submission. Both expose three entry points -- `handle_net`, `handle_call`
//! (client only, or via the replica's embedded client), and `handle_tick` --
//! and run their respective `proceed` fixpoints internally. Neither type
//! performs I/O: callers own the transport, storage, and clock, and feed
//! events in.

pub mod client;
pub mod error;
pub mod replica;

pub use client::{Call, ClientConfig, ClientState, Return};
pub use error::ConcordError;
pub use replica::{ReplicaConfig, ReplicaOutput, ReplicaState};
