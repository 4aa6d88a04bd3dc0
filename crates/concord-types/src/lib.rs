//! Core identifiers and scalar types shared across the `concord` workspace.
//!
//! This crate contains the small, `Copy`-friendly building blocks used by
//! every other crate in the workspace:
//! - Identity ([`Address`])
//! - Content digests ([`Hash`])
//! - Request deduplication ([`Nonce`])
//! - Log position and view tracking ([`Round`], [`Epoch`])
//! - The logical clock unit ([`LogicalTime`])
//! - The replica's local consensus/leader-change stage
//!   ([`ConsensusState`], `LcState`)
//! - The membership-change magic tags ([`MAGIC_ADD`], [`MAGIC_REMOVE`])

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of bytes in an [`Address`].
pub const ADDRESS_SIZE: usize = 32;

/// Number of bytes in a [`Nonce`].
pub const NONCE_SIZE: usize = 16;

/// Number of bytes in a [`Hash`].
pub const HASH_SIZE: usize = 32;

/// Opaque 32-byte replica identity.
///
/// Ordered lexicographically by its byte representation; this order is what
/// defines the deterministic `keys` membership sequence and therefore the
/// leader schedule.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// 16-byte client-chosen unique tag attached to every request.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    pub const fn new(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// 32-byte collision-resistant content digest (SHA-256 of a canonical
/// encoding). Used both as a request fingerprint ("buzz") and as the
/// cumulative log hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}{:02x}..", self.0[0], self.0[1])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Monotone non-negative integer: the position a decided entry occupies in
/// the log. Aliased as `Index` at call sites that emphasize the client view.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Round(pub u64);

/// The position a client claims to know about; semantically identical to
/// [`Round`] but named for readability at client-facing call sites.
pub type Index = Round;

impl Round {
    pub const ZERO: Round = Round(0);

    pub fn next(self) -> Round {
        Round(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl std::ops::Add<u64> for Round {
    type Output = Round;
    fn add(self, rhs: u64) -> Round {
        Round(self.0 + rhs)
    }
}

impl std::ops::Sub<Round> for Round {
    type Output = u64;
    fn sub(self, rhs: Round) -> u64 {
        self.0 - rhs.0
    }
}

/// Monotone non-negative integer: the current "view," used to pick the
/// leader via `epoch mod n`.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Epoch(pub u64);

impl Epoch {
    pub const ZERO: Epoch = Epoch(0);

    pub fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl std::ops::Add<u64> for Epoch {
    type Output = Epoch;
    fn add(self, rhs: u64) -> Epoch {
        Epoch(self.0 + rhs)
    }
}

/// Monotone non-negative integer advanced only by tick events. Units are
/// chosen by the operator (e.g. milliseconds); the engine never reads a wall
/// clock.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogicalTime(pub u64);

impl LogicalTime {
    pub const ZERO: LogicalTime = LogicalTime(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl std::ops::Add<LogicalTime> for LogicalTime {
    type Output = LogicalTime;
    fn add(self, rhs: LogicalTime) -> LogicalTime {
        LogicalTime(self.0 + rhs.0)
    }
}

impl std::ops::Add<u64> for LogicalTime {
    type Output = LogicalTime;
    fn add(self, rhs: u64) -> LogicalTime {
        LogicalTime(self.0 + rhs)
    }
}

/// Local stage of the in-flight consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsensusState {
    #[default]
    Idle,
    IdlePropose,
    ProposeWrite,
    WriteAccept,
}

/// Local stage of leader change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LcState {
    #[default]
    Idle,
    Alert,
}

/// Fixed 32-byte prefix identifying a "add this replica" membership command,
/// followed by the 32-byte [`Address`] to add.
pub const MAGIC_ADD: [u8; 32] = [
    0xFA, 0xCE, 0xF5, 0x0B, 0xFC, 0xDA, 0xD3, 0x29, 0xF4, 0x0E, 0xE6, 0x79, 0x3B, 0x0D, 0x5D, 0xA8,
    0xB7, 0x6F, 0xCA, 0xF8, 0x20, 0x78, 0x71, 0x71, 0x0A, 0xFC, 0x39, 0x19, 0xBB, 0x6E, 0x3C, 0x25,
];

/// Fixed 32-byte prefix identifying a "remove this replica" membership
/// command, followed by the 32-byte [`Address`] to remove.
pub const MAGIC_REMOVE: [u8; 32] = [
    0xDE, 0xAD, 0x0A, 0x3C, 0x83, 0x9F, 0x43, 0xAB, 0xC1, 0x11, 0x74, 0x70, 0xC0, 0x19, 0x48, 0x8F,
    0xE2, 0x07, 0x59, 0x74, 0xB0, 0x66, 0x48, 0xFF, 0x20, 0x63, 0x26, 0x30, 0x28, 0x71, 0xEA, 0x68,
];

/// Bitfield of deliberate-misbehavior modes used in negative tests.
/// Correct implementations MUST honour these flags when present to keep the
/// test suite meaningful; in production they are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByzantineFlags(pub u32);

impl ByzantineFlags {
    pub const NONE: ByzantineFlags = ByzantineFlags(0);
    /// Drop requests from a fixed client address.
    pub const IGNORE_CLIENT_X: u32 = 1 << 0;
    /// Leader sends an alternate job to half the followers.
    pub const SEND_DIFFERENT_PROPOSES: u32 = 1 << 1;
    /// Client emits a constant nonce.
    pub const CLIENT_FIX_NONCE: u32 = 1 << 2;

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_orders_lexicographically() {
        let a = Address::new([0u8; 32]);
        let mut b = [0u8; 32];
        b[31] = 1;
        let b = Address::new(b);
        assert!(a < b);
    }

    #[test]
    fn round_and_epoch_are_monotone_helpers() {
        assert_eq!(Round::ZERO.next(), Round(1));
        assert_eq!(Epoch::ZERO.next(), Epoch(1));
        assert_eq!(Round(5) - Round(2), 3);
    }

    #[test]
    fn byzantine_flags_are_checked_by_bit() {
        let flags = ByzantineFlags(ByzantineFlags::CLIENT_FIX_NONCE);
        assert!(flags.has(ByzantineFlags::CLIENT_FIX_NONCE));
        assert!(!flags.has(ByzantineFlags::IGNORE_CLIENT_X));
    }
}
