//! Concrete events the gate emits through [`ratelimit_gate_core::EventListeners`].

use ratelimit_gate_core::GateEvent as GateEventTrait;
use std::time::Instant;

/// Observability events emitted at admission, rejection, and reconciliation.
#[derive(Debug, Clone)]
pub enum GateEvent {
    /// A scope reserved a slot.
    Admitted {
        scope: &'static str,
        timestamp: Instant,
    },
    /// A scope was over budget and the request was rejected.
    Rejected {
        scope: &'static str,
        reason: String,
        timestamp: Instant,
    },
    /// Post-call counters were reconciled for a scope.
    Reconciled {
        scope: &'static str,
        success: bool,
        timestamp: Instant,
    },
}

impl GateEventTrait for GateEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GateEvent::Admitted { .. } => "admitted",
            GateEvent::Rejected { .. } => "rejected",
            GateEvent::Reconciled { .. } => "reconciled",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            GateEvent::Admitted { timestamp, .. }
            | GateEvent::Rejected { timestamp, .. }
            | GateEvent::Reconciled { timestamp, .. } => *timestamp,
        }
    }
}
