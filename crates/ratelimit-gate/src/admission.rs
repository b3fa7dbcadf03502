//! Pre-call check-and-reserve across every applicable scope.

use crate::events::GateEvent;
use crate::limits::{LimitResolver, LimitTriple};
use crate::principal::{PrincipalAuth, RequestContext};
use crate::{RateLimitError, RATE_LIMIT_ERROR_MESSAGE};
use ratelimit_gate_core::{
    scope_bucket_key, Clock, Counter, CounterCodec, EventListeners, GLOBAL_PARALLEL_KEY,
};
use ratelimit_gate_core::{model_bucket_key, CacheStore};
use std::sync::Arc;
use std::time::Duration;

const BUCKET_TTL: Duration = Duration::from_secs(60);

/// The scope axes checked in order; the first rejection wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Global,
    ApiKey,
    Model,
    User,
    Team,
    EndUser,
}

impl Scope {
    fn label(self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::ApiKey => "api_key",
            Scope::Model => "model",
            Scope::User => "user",
            Scope::Team => "team",
            Scope::EndUser => "end_user",
        }
    }
}

/// Successful admission: a metadata patch to merge into the request context.
#[derive(Debug, Clone, Default)]
pub struct Admitted {
    pub metadata_patch: std::collections::HashMap<String, serde_json::Value>,
}

struct PendingWrite {
    key: String,
    value: Counter,
}

/// Pre-call check-and-reserve, per scope, against a single batch-read
/// snapshot.
pub struct AdmissionEngine {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl AdmissionEngine {
    pub fn new(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    /// Runs the full admission algorithm. On `Ok`, every pending write has
    /// already landed in the cache — the write is still dispatched as a
    /// spawned task (so its cancellation semantics match a detached
    /// background write rather than an inline one), but `admit` awaits the
    /// `JoinHandle` before returning so the next admission on this scope
    /// always observes it. On `Err`, no scope writes are issued (the global
    /// pre-increment is the one documented exception: see module docs on
    /// `Scope::Global`).
    pub async fn admit(
        &self,
        principal: &PrincipalAuth,
        ctx: &mut RequestContext,
        limits: &LimitResolver<'_>,
        events: &EventListeners<GateEvent>,
    ) -> Result<Admitted, RateLimitError> {
        let precise_minute = self.clock.precise_minute();
        let resolved = limits.resolve(principal, ctx.model.as_deref()).await;

        if let Some(requested_cap) = ctx.global_max_parallel_requests() {
            self.check_global(requested_cap, events).await?;
            ctx.global_incremented = true;
        }

        let scope_ids = [
            Some(principal.api_key.clone()),
            principal.user_id.clone(),
            principal.team_id.clone(),
            principal.end_user_id.clone(),
        ];
        let scope_keys: Vec<Option<String>> = scope_ids
            .iter()
            .map(|id| id.as_deref().map(|id| scope_bucket_key(id, &precise_minute)))
            .collect();

        let current: Vec<Option<Counter>> = self
            .batch_read(&scope_keys)
            .await
            .into_iter()
            .map(|raw| raw.and_then(|raw| CounterCodec::decode(&raw)))
            .collect();

        let mut pending = Vec::new();

        // api_key
        self.evaluate(
            Scope::ApiKey,
            scope_keys[0].as_deref(),
            current[0],
            resolved.api_key,
            &mut pending,
            events,
        )?;

        // (api_key, model) — separate batch read, evaluated only when a
        // per-model limit applies to this model.
        let mut model_patch = std::collections::HashMap::new();
        if let Some(model) = ctx.model.as_deref() {
            if !resolved.model.is_empty() {
                let model_key = model_bucket_key(&principal.api_key, model, &precise_minute);
                let model_current = self
                    .cache
                    .get(&model_key, false)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|raw| CounterCodec::decode(&raw));

                let model_limits = LimitTriple {
                    max_parallel_requests: crate::limits::UNBOUNDED,
                    tpm_limit: resolved.model.tpm_limit_for_model.unwrap_or(crate::limits::UNBOUNDED),
                    rpm_limit: resolved.model.rpm_limit_for_model.unwrap_or(crate::limits::UNBOUNDED),
                };

                let new_counter = self.evaluate(
                    Scope::Model,
                    Some(model_key.as_str()),
                    model_current,
                    model_limits,
                    &mut pending,
                    events,
                )?;

                if let Some(new_counter) = new_counter {
                    if let Some(tpm_limit) = resolved.model.tpm_limit_for_model {
                        model_patch.insert(
                            format!("litellm-key-remaining-tokens-{model}"),
                            serde_json::json!(tpm_limit.saturating_sub(new_counter.current_tpm)),
                        );
                    }
                    if let Some(rpm_limit) = resolved.model.rpm_limit_for_model {
                        model_patch.insert(
                            format!("litellm-key-remaining-requests-{model}"),
                            serde_json::json!(rpm_limit.saturating_sub(new_counter.current_rpm)),
                        );
                    }
                }
            }
        }

        // user, team, end_user
        self.evaluate(
            Scope::User,
            scope_keys[1].as_deref(),
            current[1],
            resolved.user,
            &mut pending,
            events,
        )?;
        self.evaluate(
            Scope::Team,
            scope_keys[2].as_deref(),
            current[2],
            resolved.team,
            &mut pending,
            events,
        )?;
        self.evaluate(
            Scope::EndUser,
            scope_keys[3].as_deref(),
            current[3],
            resolved.end_user,
            &mut pending,
            events,
        )?;

        self.dispatch_writes(pending).await;

        events.emit(&GateEvent::Admitted {
            scope: "all",
            timestamp: std::time::Instant::now(),
        });
        #[cfg(feature = "tracing")]
        tracing::debug!(api_key = %principal.api_key, "admitted");
        #[cfg(feature = "metrics")]
        metrics::counter!("gate_admissions_total", "scope" => "all").increment(1);

        Ok(Admitted {
            metadata_patch: model_patch,
        })
    }

    async fn check_global(
        &self,
        requested_cap: u64,
        events: &EventListeners<GateEvent>,
    ) -> Result<(), RateLimitError> {
        let current = self
            .cache
            .get(GLOBAL_PARALLEL_KEY, true)
            .await
            .ok()
            .flatten()
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0);

        if current as u64 >= requested_cap {
            let err = RateLimitError::new(
                format!(
                    "{RATE_LIMIT_ERROR_MESSAGE}: Global Limit: current={current}, max={requested_cap}"
                ),
                self.clock.seconds_to_next_minute(),
            );
            events.emit(&GateEvent::Rejected {
                scope: "global",
                reason: err.reason.clone(),
                timestamp: std::time::Instant::now(),
            });
            #[cfg(feature = "metrics")]
            metrics::counter!("gate_rejections_total", "scope" => "global").increment(1);
            return Err(err);
        }

        // Atomic increment closes the read/increment race for this one
        // counter. Not decremented here on a later scope's rejection — see
        // the possible-bug note preserved from the original design.
        let _ = self.cache.increment(GLOBAL_PARALLEL_KEY, 1, true).await;
        Ok(())
    }

    async fn batch_read(&self, keys: &[Option<String>]) -> Vec<Option<String>> {
        self.cache.batch_get(keys).await.unwrap_or_else(|_| vec![None; keys.len()])
    }

    /// Rule R: evaluates one scope against its resolved limits, appending a
    /// pending write on success. Returns the counter that would result from
    /// the reservation, for callers that need it to compute a metadata
    /// patch (the per-model scope).
    fn evaluate(
        &self,
        scope: Scope,
        key: Option<&str>,
        current: Option<Counter>,
        limit: LimitTriple,
        pending: &mut Vec<PendingWrite>,
        events: &EventListeners<GateEvent>,
    ) -> Result<Option<Counter>, RateLimitError> {
        let Some(key) = key else {
            return Ok(None);
        };

        if limit.is_unbounded() {
            return Ok(None);
        }

        if limit.has_hard_zero() {
            let err = RateLimitError::new(
                format!(
                    "{RATE_LIMIT_ERROR_MESSAGE}: Hit limit for {}: configured limit is 0",
                    scope.label()
                ),
                self.clock.seconds_to_next_minute(),
            );
            events.emit(&GateEvent::Rejected {
                scope: scope.label(),
                reason: err.reason.clone(),
                timestamp: std::time::Instant::now(),
            });
            #[cfg(feature = "metrics")]
            metrics::counter!("gate_rejections_total", "scope" => scope.label()).increment(1);
            return Err(err);
        }

        let new_counter = match current {
            None => Counter::first_admission(),
            Some(current)
                if current.current_requests < limit.max_parallel_requests
                    && current.current_tpm < limit.tpm_limit
                    && current.current_rpm < limit.rpm_limit =>
            {
                current.reserve_one()
            }
            Some(current) => {
                let err = RateLimitError::new(
                    format!(
                        "{RATE_LIMIT_ERROR_MESSAGE}: Hit limit for {}: requests={}, tpm_limit={}, rpm_limit={}",
                        scope.label(),
                        current.current_requests,
                        limit.tpm_limit,
                        limit.rpm_limit
                    ),
                    self.clock.seconds_to_next_minute(),
                );
                events.emit(&GateEvent::Rejected {
                    scope: scope.label(),
                    reason: err.reason.clone(),
                    timestamp: std::time::Instant::now(),
                });
                #[cfg(feature = "metrics")]
                metrics::counter!("gate_rejections_total", "scope" => scope.label()).increment(1);
                return Err(err);
            }
        };

        pending.push(PendingWrite {
            key: key.to_string(),
            value: new_counter,
        });
        Ok(Some(new_counter))
    }

    /// Spawns the accumulated writes as a batch and awaits their landing
    /// before returning. Spawned (rather than run inline) so the write keeps
    /// running to completion even if the caller's own future is dropped —
    /// the `JoinHandle` is still awaited here so the *next* admission on the
    /// same scope never reads a stale snapshot.
    async fn dispatch_writes(&self, pending: Vec<PendingWrite>) {
        if pending.is_empty() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let handle = tokio::spawn(async move {
            let entries = pending
                .into_iter()
                .map(|w| (w.key, CounterCodec::encode(&w.value)))
                .collect();
            let _ = cache.batch_set(entries, BUCKET_TTL).await;
        });
        let _ = handle.await;
    }
}
