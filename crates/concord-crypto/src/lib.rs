//! Content hashing for the `concord` replication log.
//!
//! Two pure helpers, [`cum_data_hash`] and [`cum_buzz_hash`], fold a base
//! hash left over a sequence of items so that `cum_hash[i+1] =
//! H(cum_hash[i] || item[i])`. Both the consensus core and the sync
//! subprotocol rely on these never diverging between replicas, so they take
//! no locks, touch no global state, and never trust a hash computed by a
//! peer — every replica recomputes its own chain locally (see the
//! sync-subsystem open question in DESIGN.md).

use concord_types::Hash;
use sha2::{Digest, Sha256};

/// SHA-256 of an arbitrary byte slice.
pub fn hash_bytes(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Hash::new(bytes)
}

/// Extends a cumulative hash chain over a sequence of opaque data entries.
///
/// `cum_data_hash(base, [a, b]) == H(H(base || a) || b)`.
pub fn cum_data_hash<'a>(base: Hash, items: impl IntoIterator<Item = &'a [u8]>) -> Hash {
    items.into_iter().fold(base, |acc, item| {
        let mut hasher = Sha256::new();
        hasher.update(acc.as_bytes());
        hasher.update(item);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Hash::new(bytes)
    })
}

/// Extends a cumulative hash chain over a sequence of fingerprints ("buzz").
///
/// `cum_buzz_hash(base, [h1, h2]) == H(H(base || h1) || h2)`.
pub fn cum_buzz_hash(base: Hash, items: impl IntoIterator<Item = Hash>) -> Hash {
    items.into_iter().fold(base, |acc, item| {
        let mut hasher = Sha256::new();
        hasher.update(acc.as_bytes());
        hasher.update(item.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Hash::new(bytes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cum_data_hash_folds_left() {
        let base = Hash::ZERO;
        let step1 = cum_data_hash(base, [b"a".as_slice()]);
        let step2 = cum_data_hash(step1, [b"b".as_slice()]);
        let both = cum_data_hash(base, [b"a".as_slice(), b"b".as_slice()]);
        assert_eq!(step2, both);
    }

    #[test]
    fn cum_data_hash_of_empty_is_identity() {
        let base = hash_bytes(b"seed");
        assert_eq!(cum_data_hash(base, []), base);
    }

    #[test]
    fn cum_buzz_hash_differs_from_cum_data_hash_for_same_bytes() {
        let base = Hash::ZERO;
        let h = hash_bytes(b"payload");
        let via_buzz = cum_buzz_hash(base, [h]);
        let via_data = cum_data_hash(base, [h.as_bytes().as_slice()]);
        // Buzz items are hashes (32B) so the byte representation coincides
        // with feeding the raw hash bytes as "data" -- this test documents
        // that coincidence rather than asserting independence.
        assert_eq!(via_buzz, via_data);
    }

    proptest::proptest! {
        #[test]
        fn cum_data_hash_is_order_sensitive(a in proptest::collection::vec(proptest::num::u8::ANY, 0..8),
                                             b in proptest::collection::vec(proptest::num::u8::ANY, 0..8)) {
            if a != b {
                let base = Hash::ZERO;
                let forward = cum_data_hash(base, [a.as_slice(), b.as_slice()]);
                let backward = cum_data_hash(base, [b.as_slice(), a.as_slice()]);
                proptest::prop_assert_ne!(forward, backward);
            }
        }
    }
}
