//! Orchestrates the three proxy-facing hooks; owns the cache handle, clock,
//! and async write dispatch for the whole gate.

use crate::admission::{Admitted, AdmissionEngine};
use crate::config::GateConfig;
use crate::events::GateEvent;
use crate::headers::{HeaderAnnotator, HeaderBag};
use crate::limits::LimitResolver;
use crate::principal::{PrincipalAuth, RequestContext};
use crate::reconciliation::{CallOutcome, ReconciliationEngine};
use crate::RateLimitError;
use ratelimit_gate_core::{CacheStore, Clock, EventListeners};
use std::sync::Arc;

/// The multi-tier parallel-request and rate-limit gate.
///
/// Consumes a `PrincipalAuth` per request and exposes the three hooks the
/// containing proxy calls around an upstream model invocation.
pub struct GateFacade {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn crate::limits::UserDirectory>,
    events: EventListeners<GateEvent>,
    admission: AdmissionEngine,
    reconciliation: ReconciliationEngine,
    headers: HeaderAnnotator,
    name: String,
}

impl GateFacade {
    pub fn new(config: GateConfig) -> Self {
        let admission = AdmissionEngine::new(Arc::clone(&config.cache), Arc::clone(&config.clock));
        let reconciliation =
            ReconciliationEngine::new(Arc::clone(&config.cache), Arc::clone(&config.clock));
        let headers = HeaderAnnotator::new(Arc::clone(&config.cache), Arc::clone(&config.clock));

        Self {
            cache: config.cache,
            clock: config.clock,
            directory: config.directory,
            events: config.event_listeners,
            admission,
            reconciliation,
            headers,
            name: config.name,
        }
    }

    /// `preCallHook`: checks and reserves against every applicable scope,
    /// mutating `ctx.metadata` with remaining-limit fields on admission.
    pub async fn pre_call_hook(
        &self,
        principal: &PrincipalAuth,
        ctx: &mut RequestContext,
    ) -> Result<(), RateLimitError> {
        let resolver = LimitResolver::new(self.directory.as_ref());
        let Admitted { metadata_patch } =
            self.admission.admit(principal, ctx, &resolver, &self.events).await?;
        ctx.metadata.extend(metadata_patch);
        #[cfg(feature = "tracing")]
        tracing::debug!(gate = %self.name, api_key = %principal.api_key, "pre_call_hook admitted");
        Ok(())
    }

    /// `onLogSuccess`: releases every reserved scope and records usage.
    pub async fn on_log_success(
        &self,
        principal: &PrincipalAuth,
        ctx: &RequestContext,
        outcome: CallOutcome,
    ) {
        self.reconciliation
            .on_success(principal, ctx, outcome, ctx.global_incremented, &self.events)
            .await;
    }

    /// `onLogFailure`: releases the api_key reservation unless the failure
    /// was the gate's own rejection.
    pub async fn on_log_failure(
        &self,
        principal: &PrincipalAuth,
        ctx: &RequestContext,
        failure_message: &str,
    ) {
        self.reconciliation
            .on_failure(principal, failure_message, ctx.global_incremented, &self.events)
            .await;
    }

    /// `postCallSuccessHook`: writes remaining-budget headers into the
    /// response's header bag, if one is supplied.
    pub async fn post_call_success_hook(
        &self,
        principal: &PrincipalAuth,
        headers: Option<&mut HeaderBag>,
    ) {
        self.headers.annotate(principal, headers).await;
    }

    /// The cache handle backing this gate, exposed for callers that need to
    /// compose additional diagnostics around it.
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::CallOutcome;
    use ratelimit_gate_core::FakeClock;
    use std::sync::Arc;

    #[tokio::test]
    async fn admit_then_success_round_trips_requests_to_zero() {
        let clock = Arc::new(FakeClock::new(chrono::Local::now()));
        let config = GateConfig::builder().clock(clock).name("test-gate").build();
        let gate = GateFacade::new(config);

        let principal = PrincipalAuth::new("sk-1");
        let mut ctx = RequestContext::new("completion");

        gate.pre_call_hook(&principal, &mut ctx).await.unwrap();
        gate.on_log_success(&principal, &ctx, CallOutcome { total_tokens: 42 })
            .await;

        let key = ratelimit_gate_core::scope_bucket_key("sk-1", &gate.clock().precise_minute());
        let raw = gate.cache().get(&key, false).await.unwrap().unwrap();
        let counter = ratelimit_gate_core::CounterCodec::decode(&raw).unwrap();
        assert_eq!(counter.current_requests, 0);
        assert_eq!(counter.current_tpm, 42);
    }

    #[tokio::test]
    async fn rejected_admission_never_reaches_upstream() {
        let config = GateConfig::builder().build();
        let gate = GateFacade::new(config);
        let principal = PrincipalAuth::new("sk-1").with_rpm_limit(0);
        let mut ctx = RequestContext::new("completion");
        assert!(gate.pre_call_hook(&principal, &mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn header_annotation_after_success() {
        let config = GateConfig::builder().build();
        let gate = GateFacade::new(config);
        let principal = PrincipalAuth::new("sk-1").with_tpm_limit(1000).with_rpm_limit(100);
        let mut ctx = RequestContext::new("completion");

        gate.pre_call_hook(&principal, &mut ctx).await.unwrap();
        gate.on_log_success(&principal, &ctx, CallOutcome { total_tokens: 10 })
            .await;

        let mut headers = HeaderBag::new();
        gate.post_call_success_hook(&principal, Some(&mut headers)).await;
        assert!(headers.contains_key("x-ratelimit-remaining-tokens"));
    }
}
