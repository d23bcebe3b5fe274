use std::collections::VecDeque;

use fieldvisit_core::errors::SinkError;
use fieldvisit_core::state::Visit;
use fieldvisit_core::traits::{AlertNotice, VisitSink};

/// Something the engine owes the persistence sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    VisitCompleted(Visit),
    VisitCancelled(Visit),
    AlertRaised(AlertNotice),
    AlertResolved(AlertNotice),
}

impl Notification {
    pub fn deliver(&self, sink: &mut dyn VisitSink) -> Result<(), SinkError> {
        match self {
            Notification::VisitCompleted(v) => sink.visit_completed(v),
            Notification::VisitCancelled(v) => sink.visit_cancelled(v),
            Notification::AlertRaised(n) => sink.alert_raised(n),
            Notification::AlertResolved(n) => sink.alert_resolved(n),
        }
    }

    /// The visit this notification concerns.
    pub fn visit_id(&self) -> &str {
        match self {
            Notification::VisitCompleted(v) | Notification::VisitCancelled(v) => &v.id,
            Notification::AlertRaised(n) | Notification::AlertResolved(n) => &n.visit_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Notification::VisitCompleted(_) => "visit_completed",
            Notification::VisitCancelled(_) => "visit_cancelled",
            Notification::AlertRaised(_) => "alert_raised",
            Notification::AlertResolved(_) => "alert_resolved",
        }
    }
}

/// Notifications whose delivery failed, kept in order for a caller-driven retry.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: VecDeque<Notification>,
}

impl Outbox {
    /// Deliver now; on failure queue it behind anything already pending.
    pub fn send(&mut self, sink: &mut dyn VisitSink, notification: Notification) {
        if !self.pending.is_empty() {
            self.pending.push_back(notification);
            return;
        }
        if let Err(e) = notification.deliver(sink) {
            tracing::warn!(kind = notification.label(), error = %e, "sink delivery failed; queued");
            self.pending.push_back(notification);
        }
    }

    /// Retry queued notifications in order, stopping at the first failure.
    /// Returns how many were delivered.
    pub fn flush(&mut self, sink: &mut dyn VisitSink) -> Result<usize, SinkError> {
        let mut delivered = 0;
        while let Some(next) = self.pending.front() {
            next.deliver(sink)?;
            self.pending.pop_front();
            delivered += 1;
        }
        Ok(delivered)
    }

    /// True if any queued notification concerns `visit_id`.
    pub fn holds(&self, visit_id: &str) -> bool {
        self.pending.iter().any(|n| n.visit_id() == visit_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
