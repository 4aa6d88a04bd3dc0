//! Node-process error types: everything that can go wrong outside the pure
//! consensus core -- I/O, framing, and configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] concord_wire::WireError),

    #[error("consensus core error: {0}")]
    Core(#[from] concord_core::ConcordError),

    #[error("unknown peer address {0}")]
    UnknownPeer(concord_types::Address),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
