//! Post-call counter updates on success and failure.

use crate::events::GateEvent;
use crate::principal::{PrincipalAuth, RequestContext};
use crate::RateLimitError;
use ratelimit_gate_core::{
    model_bucket_key, scope_bucket_key, CacheStore, Clock, Counter, CounterCodec, EventListeners,
    GLOBAL_PARALLEL_KEY,
};
use std::sync::Arc;
use std::time::Duration;

const BUCKET_TTL: Duration = Duration::from_secs(60);

/// Outcome of an upstream call, as reported to the reconciliation hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOutcome {
    /// `response.usage.total_tokens`; defaults to 0 when usage is absent
    /// (the original never errors on a missing usage block).
    pub total_tokens: u64,
}

/// Reconciles the reservations an [`crate::admission::AdmissionEngine`]
/// made, releasing the slot and — on success — recording usage.
pub struct ReconciliationEngine {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationEngine {
    pub fn new(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    /// Releases the reservation for every scope that admission reserved
    /// against, plus the (api_key, model_group) scope whenever the
    /// principal carries per-model limits or a per-model max budget for
    /// it — a broader gate than admission's, and intentionally so (see
    /// module docs).
    pub async fn on_success(
        &self,
        principal: &PrincipalAuth,
        ctx: &RequestContext,
        outcome: CallOutcome,
        global_was_incremented: bool,
        events: &EventListeners<GateEvent>,
    ) {
        let precise_minute = self.clock.precise_minute();

        let mut keys: Vec<String> = vec![scope_bucket_key(&principal.api_key, &precise_minute)];
        if let Some(user_id) = &principal.user_id {
            keys.push(scope_bucket_key(user_id, &precise_minute));
        }
        if let Some(team_id) = &principal.team_id {
            keys.push(scope_bucket_key(team_id, &precise_minute));
        }
        if let Some(end_user_id) = &principal.end_user_id {
            keys.push(scope_bucket_key(end_user_id, &precise_minute));
        }
        if let Some(model) = ctx.model_group() {
            if principal.has_model_scope(model) {
                keys.push(model_bucket_key(&principal.api_key, model, &precise_minute));
            }
        }

        let reads: Vec<Option<String>> = self
            .cache
            .batch_get(&keys.iter().cloned().map(Some).collect::<Vec<_>>())
            .await
            .unwrap_or_else(|_| vec![None; keys.len()]);

        let mut writes = Vec::with_capacity(keys.len());
        for (key, raw) in keys.into_iter().zip(reads) {
            // Missing-bucket default is intentionally `{1, 0, 0}`: the
            // request is assumed to have held the one reservation it
            // otherwise can't account for. Preserved from the source even
            // though an already-expired bucket can make this fire
            // spuriously (see design notes).
            let current = raw
                .and_then(|raw| CounterCodec::decode(&raw))
                .unwrap_or_else(Counter::first_admission);
            writes.push((key, CounterCodec::encode(&current.release_and_record(outcome.total_tokens))));
        }

        let _ = self.cache.batch_set(writes, BUCKET_TTL).await;

        if global_was_incremented {
            let _ = self.cache.increment(GLOBAL_PARALLEL_KEY, -1, true).await;
        }

        events.emit(&GateEvent::Reconciled {
            scope: "all",
            success: true,
            timestamp: std::time::Instant::now(),
        });
    }

    /// Narrower than [`Self::on_success`]: only the api_key scope is
    /// touched, and only `current_requests` — `current_tpm`/`current_rpm`
    /// are left untouched since no tokens were produced. A no-op when the
    /// failure is the gate's own rejection (the request never reserved a
    /// slot to release).
    pub async fn on_failure(
        &self,
        principal: &PrincipalAuth,
        failure_message: &str,
        global_was_incremented: bool,
        events: &EventListeners<GateEvent>,
    ) {
        if RateLimitError::is_gate_rejection(failure_message) {
            return;
        }

        let precise_minute = self.clock.precise_minute();
        let key = scope_bucket_key(&principal.api_key, &precise_minute);

        let current = self
            .cache
            .get(&key, false)
            .await
            .ok()
            .flatten()
            .and_then(|raw| CounterCodec::decode(&raw))
            .unwrap_or_else(Counter::first_admission);

        let _ = self
            .cache
            .set(&key, CounterCodec::encode(&current.release_only()), BUCKET_TTL, false)
            .await;

        if global_was_incremented {
            let _ = self.cache.increment(GLOBAL_PARALLEL_KEY, -1, true).await;
        }

        events.emit(&GateEvent::Reconciled {
            scope: "api_key",
            success: false,
            timestamp: std::time::Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratelimit_gate_core::{FakeClock, LocalCacheStore};

    fn fixture() -> (ReconciliationEngine, EventListeners<GateEvent>) {
        let cache: Arc<dyn CacheStore> = Arc::new(LocalCacheStore::default());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(chrono::Local::now()));
        (ReconciliationEngine::new(cache, clock), EventListeners::new())
    }

    #[tokio::test]
    async fn success_records_tokens_and_releases_slot() {
        let (engine, events) = fixture();
        let principal = PrincipalAuth::new("sk-1");
        let ctx = RequestContext::new("completion");

        engine
            .on_success(&principal, &ctx, CallOutcome { total_tokens: 137 }, false, &events)
            .await;

        let precise_minute = engine.clock.precise_minute();
        let key = scope_bucket_key("sk-1", &precise_minute);
        let raw = engine.cache.get(&key, false).await.unwrap().unwrap();
        let counter = CounterCodec::decode(&raw).unwrap();
        assert_eq!(counter.current_requests, 0);
        assert_eq!(counter.current_tpm, 137);
        assert_eq!(counter.current_rpm, 1);
    }

    #[tokio::test]
    async fn failure_decrements_requests_only() {
        let (engine, events) = fixture();
        let principal = PrincipalAuth::new("sk-1");
        let precise_minute = engine.clock.precise_minute();
        let key = scope_bucket_key("sk-1", &precise_minute);
        engine
            .cache
            .set(&key, CounterCodec::encode(&Counter::first_admission()), BUCKET_TTL, false)
            .await
            .unwrap();

        engine
            .on_failure(&principal, "connection reset", false, &events)
            .await;

        let raw = engine.cache.get(&key, false).await.unwrap().unwrap();
        let counter = CounterCodec::decode(&raw).unwrap();
        assert_eq!(counter.current_requests, 0);
        assert_eq!(counter.current_tpm, 0);
        assert_eq!(counter.current_rpm, 0);
    }

    #[tokio::test]
    async fn failure_is_noop_when_gate_itself_rejected() {
        let (engine, events) = fixture();
        let principal = PrincipalAuth::new("sk-1");
        let precise_minute = engine.clock.precise_minute();
        let key = scope_bucket_key("sk-1", &precise_minute);

        engine
            .on_failure(
                &principal,
                "Max parallel request limit reached for api_key",
                false,
                &events,
            )
            .await;

        assert_eq!(engine.cache.get(&key, false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failure_is_noop_for_a_real_engine_produced_rejection() {
        use crate::admission::AdmissionEngine;
        use crate::limits::{LimitResolver, NoopUserDirectory};

        let (engine, events) = fixture();
        let admission = AdmissionEngine::new(Arc::clone(&engine.cache), Arc::clone(&engine.clock));
        let principal = PrincipalAuth::new("sk-1").with_rpm_limit(0);
        let mut ctx = RequestContext::new("completion");
        let directory = NoopUserDirectory;
        let limits = LimitResolver::new(&directory);

        let rejection = admission
            .admit(&principal, &mut ctx, &limits, &events)
            .await
            .expect_err("hard-zero rpm limit should reject");

        let precise_minute = engine.clock.precise_minute();
        let key = scope_bucket_key("sk-1", &precise_minute);

        engine
            .on_failure(&principal, &rejection.reason, false, &events)
            .await;

        assert_eq!(engine.cache.get(&key, false).await.unwrap(), None);
    }
}
