//! The single error surface the gate raises on admission rejection.

/// The human-facing phrase every rejection reason is prefixed with.
///
/// `ReconciliationEngine::on_failure` substring-matches this to recognize
/// "the gate itself rejected this request" and skip reconciliation for it.
pub const RATE_LIMIT_ERROR_MESSAGE: &str = "Max parallel request limit reached";

/// Raised by [`crate::admission::AdmissionEngine::admit`] when any scope is
/// over budget. Carries enough detail for the caller to surface a proper
/// HTTP 429 with a `retry-after` header.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason} (retry after {retry_after_seconds}s)")]
pub struct RateLimitError {
    /// Always 429.
    pub status: u16,
    /// Human-readable reason, naming the violated scope and observed vs.
    /// configured values.
    pub reason: String,
    /// Seconds until the next minute boundary, in `[0, 60)`.
    pub retry_after_seconds: f64,
}

impl RateLimitError {
    pub fn new(reason: impl Into<String>, retry_after_seconds: f64) -> Self {
        Self {
            status: 429,
            reason: reason.into(),
            retry_after_seconds,
        }
    }

    /// `true` when this is the gate's own rejection (as opposed to some
    /// other upstream failure) — the substring the reconciliation engine
    /// checks for on the failure path.
    pub fn is_gate_rejection(message: &str) -> bool {
        message.contains(RATE_LIMIT_ERROR_MESSAGE)
    }
}
