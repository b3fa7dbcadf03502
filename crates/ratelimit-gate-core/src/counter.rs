//! The counter triple, its wire codec, and bucket key construction.

use serde::{Deserialize, Serialize};

/// Literal cache key for the process-wide in-flight counter.
///
/// Always `local_only`: never replicated to a shared store.
pub const GLOBAL_PARALLEL_KEY: &str = "global_max_parallel_requests";

/// The value stored per scope per minute: in-flight, cumulative tokens, and
/// cumulative completed requests for that bucket.
///
/// All fields are non-negative; `current_requests` is clamped to zero on
/// every reconciliation, never allowed to go negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub current_requests: u64,
    pub current_tpm: u64,
    pub current_rpm: u64,
}

impl Counter {
    /// The value written when a scope is admitted for the first time in a
    /// minute window: one reservation, no usage recorded yet.
    pub fn first_admission() -> Self {
        Self {
            current_requests: 1,
            current_tpm: 0,
            current_rpm: 0,
        }
    }

    /// Returns a copy with `current_requests` incremented by one, leaving
    /// tpm/rpm unchanged (they are advanced only by reconciliation).
    pub fn reserve_one(&self) -> Self {
        Self {
            current_requests: self.current_requests + 1,
            ..*self
        }
    }

    /// Releases one reservation and records `total_tokens` plus one
    /// completed request. `current_requests` never underflows below zero.
    pub fn release_and_record(&self, total_tokens: u64) -> Self {
        Self {
            current_requests: self.current_requests.saturating_sub(1),
            current_tpm: self.current_tpm + total_tokens,
            current_rpm: self.current_rpm + 1,
        }
    }

    /// Releases one reservation without recording usage (the failure path).
    pub fn release_only(&self) -> Self {
        Self {
            current_requests: self.current_requests.saturating_sub(1),
            ..*self
        }
    }
}

/// (De)serialises [`Counter`] for storage in a [`crate::cache::CacheStore`].
///
/// Kept as an explicit, narrow component (rather than inlining
/// `serde_json` calls at every call site) so a future wire format change
/// only touches this module.
pub struct CounterCodec;

impl CounterCodec {
    /// Encodes a counter to its wire representation.
    pub fn encode(counter: &Counter) -> String {
        // A `Counter` is three `u64` fields; this can never fail to encode.
        serde_json::to_string(counter).expect("Counter is always serializable")
    }

    /// Decodes a counter from its wire representation.
    ///
    /// Returns `None` on malformed input rather than erroring — callers
    /// treat a malformed bucket the same as an absent one.
    pub fn decode(raw: &str) -> Option<Counter> {
        serde_json::from_str(raw).ok()
    }
}

/// Builds the bucket key for a scope keyed only by its id:
/// `"{scope_id}::{precise_minute}::request_count"`.
pub fn scope_bucket_key(scope_id: &str, precise_minute: &str) -> String {
    format!("{scope_id}::{precise_minute}::request_count")
}

/// Builds the bucket key for the (api_key, model) scope:
/// `"{api_key}::{model}::{precise_minute}::request_count"`.
pub fn model_bucket_key(api_key: &str, model: &str, precise_minute: &str) -> String {
    format!("{api_key}::{model}::{precise_minute}::request_count")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_key_matches_grammar() {
        assert_eq!(
            scope_bucket_key("sk-abc", "2026-07-28-10-05"),
            "sk-abc::2026-07-28-10-05::request_count"
        );
    }

    #[test]
    fn model_key_matches_grammar() {
        assert_eq!(
            model_bucket_key("sk-abc", "gpt-4", "2026-07-28-10-05"),
            "sk-abc::gpt-4::2026-07-28-10-05::request_count"
        );
    }

    #[test]
    fn codec_round_trips() {
        let counter = Counter {
            current_requests: 2,
            current_tpm: 137,
            current_rpm: 9,
        };
        let encoded = CounterCodec::encode(&counter);
        assert_eq!(CounterCodec::decode(&encoded), Some(counter));
    }

    #[test]
    fn codec_decode_rejects_garbage() {
        assert_eq!(CounterCodec::decode("not json"), None);
    }

    #[test]
    fn release_and_record_floors_at_zero() {
        let counter = Counter {
            current_requests: 0,
            current_tpm: 10,
            current_rpm: 1,
        };
        let next = counter.release_and_record(5);
        assert_eq!(next.current_requests, 0);
        assert_eq!(next.current_tpm, 15);
        assert_eq!(next.current_rpm, 2);
    }
}
