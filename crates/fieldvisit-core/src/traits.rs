use serde::{Deserialize, Serialize};

use crate::errors::SinkError;
use crate::geo::GeoPosition;
use crate::state::{RouteAlert, Visit};

/// Push-style event from the device position provider.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionUpdate {
    Fix(GeoPosition),
    Error(String),
}

/// Anything that can hand out a short-lived position snapshot.
pub trait PositionSource {
    /// `None` means no usable fix: none received yet or the provider errored.
    fn snapshot(&self) -> Option<GeoPosition>;
}

/// Holds the most recent fix from a position provider.
#[derive(Debug, Clone, Default)]
pub struct LatestPosition {
    current: Option<GeoPosition>,
    last_error: Option<String>,
}

impl LatestPosition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update. An error clears the held fix.
    pub fn apply(&mut self, update: PositionUpdate) {
        match update {
            PositionUpdate::Fix(pos) if pos.is_valid() => {
                self.current = Some(pos);
                self.last_error = None;
            }
            PositionUpdate::Fix(pos) => {
                self.current = None;
                self.last_error = Some(format!(
                    "invalid coordinate ({}, {})",
                    pos.latitude, pos.longitude
                ));
            }
            PositionUpdate::Error(e) => {
                self.current = None;
                self.last_error = Some(e);
            }
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl PositionSource for LatestPosition {
    fn snapshot(&self) -> Option<GeoPosition> {
        self.current
    }
}

/// The acting rep, used for attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepIdentity {
    pub id: String,
    pub display_name: String,
    pub role: String,
}

/// Supplies who is operating the engine.
pub trait IdentityContext {
    fn current_rep(&self) -> RepIdentity;
}

impl IdentityContext for RepIdentity {
    fn current_rep(&self) -> RepIdentity {
        self.clone()
    }
}

/// Alert payload with enough context for an external approver to act on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotice {
    pub rep: RepIdentity,
    pub visit_id: String,
    pub target_id: String,
    pub target_name: String,
    pub target_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub punch_in_location: Option<GeoPosition>,
    pub alert: RouteAlert,
}

/// Receives completed visits and alert lifecycle events for persistence.
pub trait VisitSink {
    fn visit_completed(&mut self, visit: &Visit) -> Result<(), SinkError>;
    fn visit_cancelled(&mut self, visit: &Visit) -> Result<(), SinkError>;
    fn alert_raised(&mut self, notice: &AlertNotice) -> Result<(), SinkError>;
    fn alert_resolved(&mut self, notice: &AlertNotice) -> Result<(), SinkError>;
}
