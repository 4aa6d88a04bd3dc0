//! Error taxonomy for the consensus core.
//!
//! Per the distilled spec's error-handling design, rejects that are expected
//! at runtime (unknown sender, duplicate message, stale index, replay,
//! malformed chunk) are never represented here -- they are `tracing::trace!`
//! events emitted at the call site and never change state. Only the two
//! remaining categories -- local failures surfaced to the host, and fatal
//! invariant violations -- are `Err` values.

use concord_types::Nonce;

/// Errors surfaced to the host. [`ConcordError::HashChainInconsistent`] is a
/// fatal invariant violation; the host should treat it as abort-worthy. The
/// others are local failures the host can log and continue past.
#[derive(Debug, thiserror::Error)]
pub enum ConcordError {
    /// The `proceed` fixpoint hit its iteration cap without quiescing.
    #[error("proceed: iteration cap ({0}) exceeded without reaching quiescence")]
    ProceedLoopExceeded(usize),

    /// A client received a `Response` for a nonce it has no matching
    /// outstanding ticket for.
    #[error("received response for unknown ticket nonce {0:?}")]
    UnknownTicketNonce(Nonce),

    /// A cumulative hash computed locally did not extend the prior chain
    /// the way the bookkeeping expected it to. This should be unreachable;
    /// if it fires, the in-memory log state has diverged from its own
    /// invariants and the process should not keep participating in
    /// consensus.
    #[error("cumulative hash chain inconsistency detected at round {0:?}")]
    HashChainInconsistent(concord_types::Round),
}
