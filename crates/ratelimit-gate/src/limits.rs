//! Resolves effective per-scope limits from a principal, lazily consulting
//! an external user directory for user-scoped overrides.

use crate::principal::PrincipalAuth;
use async_trait::async_trait;

/// Represents "no limit configured" for a scope.
pub const UNBOUNDED: u64 = u64::MAX;

/// `(max_parallel_requests, tpm_limit, rpm_limit)` for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitTriple {
    pub max_parallel_requests: u64,
    pub tpm_limit: u64,
    pub rpm_limit: u64,
}

impl LimitTriple {
    pub fn unbounded() -> Self {
        Self {
            max_parallel_requests: UNBOUNDED,
            tpm_limit: UNBOUNDED,
            rpm_limit: UNBOUNDED,
        }
    }

    /// `true` when every limit in the triple is unbounded — the admission
    /// fast path that skips the scope entirely.
    pub fn is_unbounded(&self) -> bool {
        self.max_parallel_requests == UNBOUNDED
            && self.tpm_limit == UNBOUNDED
            && self.rpm_limit == UNBOUNDED
    }

    /// `true` when any one limit is exactly zero — the hard "deny all" rule.
    pub fn has_hard_zero(&self) -> bool {
        self.max_parallel_requests == 0 || self.tpm_limit == 0 || self.rpm_limit == 0
    }
}

/// Per-model TPM/RPM caps for the (api_key, model) scope. Each field is
/// independently optional: an absent entry disables only that sub-check.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelLimits {
    pub tpm_limit_for_model: Option<u64>,
    pub rpm_limit_for_model: Option<u64>,
}

impl ModelLimits {
    pub fn is_empty(&self) -> bool {
        self.tpm_limit_for_model.is_none() && self.rpm_limit_for_model.is_none()
    }
}

/// The fully-resolved limits for every scope of one request.
#[derive(Debug, Clone, Copy)]
pub struct ScopeLimits {
    pub api_key: LimitTriple,
    pub model: ModelLimits,
    pub user: LimitTriple,
    pub team: LimitTriple,
    pub end_user: LimitTriple,
}

/// User limits persisted outside the principal, fetched lazily.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserLimits {
    pub tpm_limit: Option<u64>,
    pub rpm_limit: Option<u64>,
}

/// External lookup for user-scoped limit overrides.
///
/// Errors and misses are indistinguishable to the caller: both are treated
/// as "no user-scoped overrides", per the gate's error-handling design —
/// a directory outage must never itself cause a rejection or a panic.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn load(&self, user_id: &str) -> Option<UserLimits>;
}

/// A [`UserDirectory`] that never has overrides — the default when the
/// containing proxy has no persisted user-limit store wired up.
pub struct NoopUserDirectory;

#[async_trait]
impl UserDirectory for NoopUserDirectory {
    async fn load(&self, _user_id: &str) -> Option<UserLimits> {
        None
    }
}

/// Resolves a [`PrincipalAuth`] plus an optional request model into
/// per-scope [`ScopeLimits`].
pub struct LimitResolver<'a> {
    directory: &'a dyn UserDirectory,
}

impl<'a> LimitResolver<'a> {
    pub fn new(directory: &'a dyn UserDirectory) -> Self {
        Self { directory }
    }

    pub async fn resolve(&self, principal: &PrincipalAuth, model: Option<&str>) -> ScopeLimits {
        let api_key = LimitTriple {
            max_parallel_requests: principal.max_parallel_requests.unwrap_or(UNBOUNDED),
            tpm_limit: principal.tpm_limit.unwrap_or(UNBOUNDED),
            rpm_limit: principal.rpm_limit.unwrap_or(UNBOUNDED),
        };

        let model = match model {
            Some(model_name) => ModelLimits {
                tpm_limit_for_model: principal
                    .model_tpm_limit
                    .as_ref()
                    .and_then(|m| m.get(model_name).copied()),
                rpm_limit_for_model: principal
                    .model_rpm_limit
                    .as_ref()
                    .and_then(|m| m.get(model_name).copied()),
            },
            None => ModelLimits::default(),
        };

        // Per spec: max_parallel is not enforced for user/team/end_user —
        // preserved faithfully (a documented TODO in the system this was
        // distilled from), not an oversight here.
        let user = self.resolve_user_scope(principal).await;

        let team = LimitTriple {
            max_parallel_requests: UNBOUNDED,
            tpm_limit: principal.team_tpm_limit.unwrap_or(UNBOUNDED),
            rpm_limit: principal.team_rpm_limit.unwrap_or(UNBOUNDED),
        };

        let end_user = LimitTriple {
            max_parallel_requests: UNBOUNDED,
            tpm_limit: principal.end_user_tpm_limit.unwrap_or(UNBOUNDED),
            rpm_limit: principal.end_user_rpm_limit.unwrap_or(UNBOUNDED),
        };

        ScopeLimits {
            api_key,
            model,
            user,
            team,
            end_user,
        }
    }

    async fn resolve_user_scope(&self, principal: &PrincipalAuth) -> LimitTriple {
        let mut tpm_limit = principal.user_tpm_limit;
        let mut rpm_limit = principal.user_rpm_limit;

        if let Some(user_id) = &principal.user_id {
            if tpm_limit.is_none() || rpm_limit.is_none() {
                if let Some(overrides) = self.directory.load(user_id).await {
                    tpm_limit = tpm_limit.or(overrides.tpm_limit);
                    rpm_limit = rpm_limit.or(overrides.rpm_limit);
                }
            }
        }

        LimitTriple {
            max_parallel_requests: UNBOUNDED,
            tpm_limit: tpm_limit.unwrap_or(UNBOUNDED),
            rpm_limit: rpm_limit.unwrap_or(UNBOUNDED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unset_limits_become_unbounded() {
        let principal = PrincipalAuth::new("sk-1");
        let resolver = LimitResolver::new(&NoopUserDirectory);
        let limits = resolver.resolve(&principal, None).await;
        assert!(limits.api_key.is_unbounded());
        assert!(limits.user.is_unbounded());
        assert!(limits.team.is_unbounded());
        assert!(limits.end_user.is_unbounded());
    }

    #[tokio::test]
    async fn zero_limit_is_hard_deny() {
        let principal = PrincipalAuth::new("sk-1").with_rpm_limit(0);
        let resolver = LimitResolver::new(&NoopUserDirectory);
        let limits = resolver.resolve(&principal, None).await;
        assert!(limits.api_key.has_hard_zero());
    }

    #[tokio::test]
    async fn model_limits_apply_only_for_matching_model() {
        let principal = PrincipalAuth::new("sk-1").with_model_rpm_limit("gpt-4", 1);
        let resolver = LimitResolver::new(&NoopUserDirectory);

        let for_gpt4 = resolver.resolve(&principal, Some("gpt-4")).await;
        assert_eq!(for_gpt4.model.rpm_limit_for_model, Some(1));

        let for_other = resolver.resolve(&principal, Some("gpt-3.5")).await;
        assert_eq!(for_other.model.rpm_limit_for_model, None);
    }

    #[tokio::test]
    async fn user_directory_overrides_only_when_principal_is_silent() {
        struct FixedDirectory;
        #[async_trait]
        impl UserDirectory for FixedDirectory {
            async fn load(&self, _user_id: &str) -> Option<UserLimits> {
                Some(UserLimits {
                    tpm_limit: Some(500),
                    rpm_limit: Some(50),
                })
            }
        }

        let principal = PrincipalAuth::new("sk-1").with_user_id("user-1");
        let resolver = LimitResolver::new(&FixedDirectory);
        let limits = resolver.resolve(&principal, None).await;
        assert_eq!(limits.user.tpm_limit, 500);
        assert_eq!(limits.user.rpm_limit, 50);
    }

    #[tokio::test]
    async fn directory_failure_is_treated_as_no_override() {
        struct FailingDirectory;
        #[async_trait]
        impl UserDirectory for FailingDirectory {
            async fn load(&self, _user_id: &str) -> Option<UserLimits> {
                None
            }
        }

        let principal = PrincipalAuth::new("sk-1").with_user_id("user-1");
        let resolver = LimitResolver::new(&FailingDirectory);
        let limits = resolver.resolve(&principal, None).await;
        assert!(limits.user.is_unbounded());
    }
}
