//! Builder-style configuration for [`crate::facade::GateFacade`], matching
//! the `*ConfigBuilder` convention used by this codebase's other patterns.

use crate::events::GateEvent;
use crate::limits::{NoopUserDirectory, UserDirectory};
use ratelimit_gate_core::{CacheStore, Clock, EventListeners, FnListener, LocalCacheStore, SystemClock};
use std::sync::Arc;

/// Configuration for a [`crate::facade::GateFacade`].
pub struct GateConfig {
    pub(crate) cache: Arc<dyn CacheStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) directory: Arc<dyn UserDirectory>,
    pub(crate) event_listeners: EventListeners<GateEvent>,
    pub(crate) name: String,
}

impl GateConfig {
    pub fn builder() -> GateConfigBuilder {
        GateConfigBuilder::new()
    }
}

/// Builder for [`GateConfig`].
pub struct GateConfigBuilder {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn UserDirectory>,
    event_listeners: EventListeners<GateEvent>,
    name: String,
}

impl Default for GateConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GateConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - cache: a 10,000-entry [`LocalCacheStore`], no shared backend
    /// - clock: [`SystemClock`]
    /// - directory: [`NoopUserDirectory`] (no user-scoped overrides)
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            cache: Arc::new(LocalCacheStore::default()),
            clock: Arc::new(SystemClock),
            directory: Arc::new(NoopUserDirectory),
            event_listeners: EventListeners::new(),
            name: "<unnamed>".to_string(),
        }
    }

    /// Sets the cache store backing every scope's counters.
    pub fn cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the clock. Tests typically supply a `FakeClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the user directory consulted for user-scoped limit overrides.
    pub fn user_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// Sets the name used in tracing spans and metric labels.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback invoked on every emitted [`GateEvent`].
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&GateEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    pub fn build(self) -> GateConfig {
        GateConfig {
            cache: self.cache,
            clock: self.clock,
            directory: self.directory,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}
