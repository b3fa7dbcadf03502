//! The request principal and per-request mutable context.
//!
//! `PrincipalAuth` is produced upstream by authentication — out of scope for
//! this crate — and handed in whole for every hook.

use std::collections::HashMap;

/// The authenticated caller's identity and configured limits.
///
/// Every `_limit`/`max_parallel_requests` field is `None` when unset, which
/// [`crate::limits::LimitResolver`] treats as unbounded; `Some(0)` means
/// "deny all" for that scope.
#[derive(Debug, Clone, Default)]
pub struct PrincipalAuth {
    pub api_key: String,
    pub user_id: Option<String>,
    pub team_id: Option<String>,
    pub end_user_id: Option<String>,

    pub max_parallel_requests: Option<u64>,
    pub tpm_limit: Option<u64>,
    pub rpm_limit: Option<u64>,

    pub user_tpm_limit: Option<u64>,
    pub user_rpm_limit: Option<u64>,
    pub team_tpm_limit: Option<u64>,
    pub team_rpm_limit: Option<u64>,
    pub end_user_tpm_limit: Option<u64>,
    pub end_user_rpm_limit: Option<u64>,

    pub model_tpm_limit: Option<HashMap<String, u64>>,
    pub model_rpm_limit: Option<HashMap<String, u64>>,

    /// Per-key per-model max budget (recovered from the system this crate's
    /// semantics were distilled from: `user_api_key_model_max_budget`).
    /// When set for a model, the (api_key, model) scope is reconciled on
    /// success even if no per-model TPM/RPM cap is configured for it.
    pub model_max_budget: Option<HashMap<String, f64>>,
}

impl PrincipalAuth {
    /// Creates a principal for the given API key with every limit unset
    /// (unbounded) and no scoped identities.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_team_id(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn with_end_user_id(mut self, end_user_id: impl Into<String>) -> Self {
        self.end_user_id = Some(end_user_id.into());
        self
    }

    pub fn with_max_parallel_requests(mut self, limit: u64) -> Self {
        self.max_parallel_requests = Some(limit);
        self
    }

    pub fn with_tpm_limit(mut self, limit: u64) -> Self {
        self.tpm_limit = Some(limit);
        self
    }

    pub fn with_rpm_limit(mut self, limit: u64) -> Self {
        self.rpm_limit = Some(limit);
        self
    }

    pub fn with_model_tpm_limit(mut self, model: impl Into<String>, limit: u64) -> Self {
        self.model_tpm_limit
            .get_or_insert_with(HashMap::new)
            .insert(model.into(), limit);
        self
    }

    pub fn with_model_rpm_limit(mut self, model: impl Into<String>, limit: u64) -> Self {
        self.model_rpm_limit
            .get_or_insert_with(HashMap::new)
            .insert(model.into(), limit);
        self
    }

    pub fn with_model_max_budget(mut self, model: impl Into<String>, budget: f64) -> Self {
        self.model_max_budget
            .get_or_insert_with(HashMap::new)
            .insert(model.into(), budget);
        self
    }

    /// `true` when the principal has any per-model TPM/RPM cap or max-budget
    /// configured for `model` — gates whether the (api_key, model) scope is
    /// reconciled on success (see `ReconciliationEngine::on_success`).
    pub(crate) fn has_model_scope(&self, model: &str) -> bool {
        self.model_tpm_limit
            .as_ref()
            .is_some_and(|m| m.contains_key(model))
            || self
                .model_rpm_limit
                .as_ref()
                .is_some_and(|m| m.contains_key(model))
            || self
                .model_max_budget
                .as_ref()
                .is_some_and(|m| m.contains_key(model))
    }
}

/// Mutable per-request context threaded through the three hooks.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub model: Option<String>,
    /// Logical model group used for the (api_key, model) reconciliation
    /// bucket; defaults to `model` when not set separately. Lets callers
    /// that alias several deployments to one logical name reconcile them
    /// under a single bucket (recovered from the original's model-group
    /// derivation).
    pub model_group: Option<String>,
    pub call_type: String,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Set by [`crate::admission::AdmissionEngine`] when the global
    /// in-flight counter was incremented for this request, so reconciliation
    /// knows whether to decrement it back.
    pub(crate) global_incremented: bool,
}

impl RequestContext {
    pub fn new(call_type: impl Into<String>) -> Self {
        Self {
            call_type: call_type.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Honors an explicit `global_max_parallel_requests` override carried
    /// in `metadata`, per the bucket-key grammar.
    pub fn global_max_parallel_requests(&self) -> Option<u64> {
        self.metadata
            .get("global_max_parallel_requests")
            .and_then(|v| v.as_u64())
    }

    /// The bucket identity for the (api_key, model) reconciliation scope:
    /// `model_group` if set, else `model`.
    pub fn model_group(&self) -> Option<&str> {
        self.model_group.as_deref().or(self.model.as_deref())
    }
}
