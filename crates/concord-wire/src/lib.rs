//! The `concord` message taxonomy and its canonical, deterministic encoding.
//!
//! Two concerns live here, deliberately kept apart:
//!
//! 1. [`Envelope`]: every message type a replica or client can receive, as a
//!    single tagged union. Dispatch on receipt is an exhaustive `match` —
//!    an unknown wire variant is a compile error here, not a runtime trace,
//!    per the "polymorphic message dispatch" redesign note.
//! 2. [`fingerprint`]: a byte-exact, host-language-independent encoding of a
//!    [`Request`], used as the input to the content hash ("buzz") that
//!    identifies it across the cluster. A general-purpose structural
//!    encoder (e.g. feeding `Request` through `serde_json`/`postcard`
//!    directly) is explicitly NOT used for this, because such an encoder's
//!    output is free to change across library versions or include
//!    language-specific framing -- exactly the instability the distilled
//!    spec's design notes warn about. The canonical layout is fixed here:
//!    `nonce(16B) || len(payload):u32-be || payload || index:u64-be`.
//!
//! Ordinary wire transport (sending an [`Envelope`] between replicas) goes
//! through `postcard`, which is stable for a fixed Rust type across a single
//! build but is never used to compute a fingerprint.

use bytes::Bytes;
use concord_crypto::hash_bytes;
use concord_types::{Address, Epoch, Hash, LogicalTime, Nonce, Round};
use serde::{Deserialize, Serialize};

/// A client request for a new log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub nonce: Nonce,
    pub payload: Bytes,
    pub index: Round,
}

/// A request admitted by some replica, paired with who submitted it and
/// when it was first seen locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub from: Address,
    pub timestamp: LogicalTime,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propose {
    pub round: Round,
    pub epoch: Epoch,
    pub job: Job,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    pub round: Round,
    pub epoch: Epoch,
    pub hash: Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accept {
    pub round: Round,
    pub epoch: Epoch,
    pub hash: Hash,
}

/// A `(from, request)` pair carried in Suspect gossip so a request survives
/// a leader change without the new leader needing to re-admit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Load {
    pub from: Address,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspect {
    pub epoch: Epoch,
    pub loads: Vec<Load>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Whatsup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Bonjour;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub round: Round,
    pub epoch: Epoch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    pub round: Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Need {
    pub first: Round,
    pub last: Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ensure {
    pub last: Round,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub last: Round,
    pub data: Vec<Bytes>,
    pub buzz: Vec<Hash>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirm {
    pub last: Round,
    pub data_hash: Hash,
    pub buzz_hash: Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub index: Round,
    pub nonce: Nonce,
}

/// Every message a replica or a client can send or receive, as a single
/// tagged union. `Response` and `Tip` are the two variants routed to the
/// co-located client rather than handled by the replica itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    Request(Request),
    Propose(Propose),
    Write(Write),
    Accept(Accept),
    Suspect(Suspect),
    Whatsup(Whatsup),
    Bonjour(Bonjour),
    Head(Head),
    Tip(Tip),
    Need(Need),
    Ensure(Ensure),
    Chunk(Chunk),
    Confirm(Confirm),
    Response(Response),
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] postcard::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] postcard::Error),
}

/// Serializes an [`Envelope`] for transport. Stable within one build of the
/// crate; never used as the input to [`fingerprint`].
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(envelope).map_err(WireError::Encode)
}

/// Deserializes an [`Envelope`] received from the transport.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, WireError> {
    postcard::from_bytes(bytes).map_err(WireError::Decode)
}

/// The byte-exact canonical encoding of a [`Request`], used only as input to
/// [`fingerprint`]. Layout: `nonce(16B) || len(payload):u32-be || payload ||
/// index:u64-be`.
pub fn canonical_request_bytes(request: &Request) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + 4 + request.payload.len() + 8);
    buf.extend_from_slice(request.nonce.as_bytes());
    buf.extend_from_slice(&(request.payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&request.payload);
    buf.extend_from_slice(&request.index.get().to_be_bytes());
    buf
}

/// The fingerprint ("buzz") of a [`Request`]: `H(canonical_request_bytes)`.
pub fn fingerprint(request: &Request) -> Hash {
    hash_bytes(&canonical_request_bytes(request))
}

/// Canonical encoding of a [`Response`], used only as input to
/// [`response_hash`]. Layout: `nonce(16B) || index:u64-be`.
pub fn canonical_response_bytes(response: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + 8);
    buf.extend_from_slice(response.nonce.as_bytes());
    buf.extend_from_slice(&response.index.get().to_be_bytes());
    buf
}

/// The content hash of a [`Response`], used by the client to deduplicate
/// quorum votes for "the same response" without trusting any single
/// replica's framing of it.
pub fn response_hash(response: &Response) -> Hash {
    hash_bytes(&canonical_response_bytes(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(nonce_byte: u8, payload: &[u8], index: u64) -> Request {
        Request {
            nonce: Nonce::new([nonce_byte; 16]),
            payload: Bytes::copy_from_slice(payload),
            index: Round(index),
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let r = req(1, b"hello", 3);
        assert_eq!(fingerprint(&r), fingerprint(&r));
    }

    #[test]
    fn fingerprint_distinguishes_nonce() {
        let a = req(1, b"hello", 3);
        let b = req(2, b"hello", 3);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_distinguishes_index() {
        let a = req(1, b"hello", 3);
        let b = req(1, b"hello", 4);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_distinguishes_payload_framing() {
        // Two different (payload, index) pairs that would collide under a
        // naive concatenation without the length-prefix must still differ.
        let a = Request {
            nonce: Nonce::new([9; 16]),
            payload: Bytes::from_static(b"ab"),
            index: Round(0x0100),
        };
        let b = Request {
            nonce: Nonce::new([9; 16]),
            payload: Bytes::from_static(b"a"),
            index: Round(0x6200),
        };
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn envelope_roundtrips_through_wire_encoding() {
        let envelope = Envelope::Response(Response {
            index: Round(7),
            nonce: Nonce::new([3; 16]),
        });
        let bytes = encode_envelope(&envelope).expect("encode");
        let decoded = decode_envelope(&bytes).expect("decode");
        assert_eq!(envelope, decoded);
    }
}
