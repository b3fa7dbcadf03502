//! Writes remaining-budget headers into the outbound response.

use crate::principal::PrincipalAuth;
use ratelimit_gate_core::{scope_bucket_key, CacheStore, Clock, CounterCodec};
use std::collections::HashMap;
use std::sync::Arc;

/// A response's hidden-headers bag. Callers that don't need headers
/// surfaced (or whose response type has no such bag) simply don't pass one.
pub type HeaderBag = HashMap<String, String>;

/// Re-reads the api_key bucket after success and, when the principal has
/// rpm/tpm limits configured, annotates the response with remaining-budget
/// headers. A no-op when no header bag is supplied.
pub struct HeaderAnnotator {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl HeaderAnnotator {
    pub fn new(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    pub async fn annotate(&self, principal: &PrincipalAuth, headers: Option<&mut HeaderBag>) {
        let Some(headers) = headers else {
            return;
        };
        if principal.rpm_limit.is_none() && principal.tpm_limit.is_none() {
            return;
        }

        let precise_minute = self.clock.precise_minute();
        let key = scope_bucket_key(&principal.api_key, &precise_minute);
        let counter = match self.cache.get(&key, false).await.ok().flatten() {
            Some(raw) => CounterCodec::decode(&raw),
            None => None,
        };
        let Some(counter) = counter else {
            return;
        };

        if let Some(rpm_limit) = principal.rpm_limit {
            headers.insert(
                "x-ratelimit-limit-requests".to_string(),
                rpm_limit.to_string(),
            );
            headers.insert(
                "x-ratelimit-remaining-requests".to_string(),
                rpm_limit.saturating_sub(counter.current_rpm).to_string(),
            );
        }
        if let Some(tpm_limit) = principal.tpm_limit {
            headers.insert(
                "x-ratelimit-limit-tokens".to_string(),
                tpm_limit.to_string(),
            );
            headers.insert(
                "x-ratelimit-remaining-tokens".to_string(),
                tpm_limit.saturating_sub(counter.current_tpm).to_string(),
            );
        }
    }
}
