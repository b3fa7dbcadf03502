//! A multi-tier parallel-request and rate-limit admission gate for LLM
//! proxies.
//!
//! Every request is checked against up to six independent budgets — a
//! process-wide in-flight cap, and per-minute usage counters scoped to
//! (api_key), (api_key, model), (user), (team), (end_user). On completion
//! the gate reconciles counters: in-flight is released, and per-minute
//! request/token counts are recorded. A [`GateFacade`] exposes the four
//! hooks a containing proxy calls around each request.
//!
//! # Examples
//!
//! ```
//! use ratelimit_gate::{GateConfig, GateFacade, PrincipalAuth, RequestContext};
//!
//! # async fn example() {
//! let gate = GateFacade::new(GateConfig::builder().build());
//! let principal = PrincipalAuth::new("sk-example").with_rpm_limit(100);
//! let mut ctx = RequestContext::new("completion");
//!
//! match gate.pre_call_hook(&principal, &mut ctx).await {
//!     Ok(()) => { /* forward to the upstream model */ }
//!     Err(rejection) => { /* surface rejection.status, rejection.reason */ }
//! }
//! # }
//! ```

mod admission;
mod config;
mod error;
mod events;
mod facade;
mod headers;
mod limits;
mod principal;
mod reconciliation;

pub use admission::{Admitted, AdmissionEngine};
pub use config::{GateConfig, GateConfigBuilder};
pub use error::{RateLimitError, RATE_LIMIT_ERROR_MESSAGE};
pub use events::GateEvent;
pub use facade::GateFacade;
pub use headers::{HeaderAnnotator, HeaderBag};
pub use limits::{LimitResolver, LimitTriple, ModelLimits, NoopUserDirectory, ScopeLimits, UserDirectory, UserLimits, UNBOUNDED};
pub use principal::{PrincipalAuth, RequestContext};
pub use reconciliation::{CallOutcome, ReconciliationEngine};

pub use ratelimit_gate_core::{
    CacheStore, Clock, Counter, CounterCodec, EventListener, EventListeners, FakeClock,
    FnListener, LocalCacheStore, SystemClock, TieredCacheStore,
};
