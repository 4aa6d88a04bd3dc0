//! The standalone `concord-node` process: wires transport, storage, the
//! logical clock and an HTTP status sidecar to the pure consensus engine
//! in `concord-core`.

pub mod clock;
pub mod error;
mod hex;
pub mod http;
pub mod run;
pub mod storage;
pub mod transport;

/// A freshly generated replica identity, hex-encoded, for `concord-node init`.
pub fn new_random_key_hex() -> String {
    let mut bytes = [0u8; concord_types::ADDRESS_SIZE];
    getrandom::fill(&mut bytes).expect("system RNG unavailable");
    hex::encode_address(&concord_types::Address::new(bytes))
}
