//! Core infrastructure for `ratelimit-gate`.
//!
//! This crate provides the leaf building blocks shared by the gate:
//! - [`clock`]: wall time and the "precise minute" bucket boundary
//! - [`cache`]: the `CacheStore` trait plus a local LRU+TTL implementation
//! - [`counter`]: the counter triple, its wire codec, and bucket key grammar
//! - [`events`]: generic observability plumbing
//! - [`error`]: shared error types

pub mod cache;
pub mod clock;
pub mod counter;
pub mod error;
pub mod events;

pub use cache::{CacheStore, LocalCacheStore, TieredCacheStore};
pub use clock::{Clock, FakeClock, SystemClock};
pub use counter::{model_bucket_key, scope_bucket_key, Counter, CounterCodec, GLOBAL_PARALLEL_KEY};
pub use error::CacheStoreError;
pub use events::{EventListener, EventListeners, FnListener, GateEvent};
