use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceLedger;
use crate::geo::{self, GeoPosition};
use crate::types::{
    AlertKind, ApprovalStatus, Percentage, Severity, TargetKind, ThreadAuthor, VerificationStatus,
    VisitStatus,
};

/// Template ids of the default visit checklist.
pub mod template {
    pub const PUNCH_IN: &str = "punch-in";
    pub const DEMONSTRATION: &str = "demonstration";
    pub const PRODUCT_INPUT: &str = "product-input";
    pub const STOCK_REVIEW: &str = "stock-review";
    pub const DATABASE_CONSENT: &str = "database-consent";
    pub const VIDEO_VERIFICATION: &str = "video-verification";
    pub const SIGNATURE: &str = "signature";
    pub const NOTES: &str = "notes";
}

/// An entity to be visited. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitTarget {
    pub id: String,
    pub name: String,
    pub code: String,
    pub kind: TargetKind,
    pub declared_location: GeoPosition,
    pub assigned_rep_id: String,
    pub territory: String,
}

/// One entry of the checklist seeded into every visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub template_id: String,
    pub description: String,
    #[serde(default = "default_true")]
    pub requires_verification: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub requires_verification: bool,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Supervisory judgment on a task, recorded during the end-of-visit gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskVerification {
    pub task_id: String,
    pub status: VerificationStatus,
    pub completion_percentage: Percentage,
    pub notes: String,
    pub verified_by: String,
    pub verified_at: DateTime<Utc>,
}

impl TaskVerification {
    pub fn satisfies_gate(&self) -> bool {
        self.status != VerificationStatus::NotStarted
    }
}

/// A message on an alert's approval thread. Never edited once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub from: ThreadAuthor,
    pub author_name: String,
    pub message: String,
    pub at: DateTime<Utc>,
    /// Index of the earlier entry this one corrects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amends: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteAlert {
    pub id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub location: GeoPosition,
    /// Measured value that triggered the alert (km, hours, or minutes past deadline).
    pub measured: f64,
    pub threshold: f64,
    pub approval: ApprovalStatus,
    #[serde(default)]
    pub thread: Vec<ThreadEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Aggregate root for a single visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: String,
    pub rep_id: String,
    pub target: VisitTarget,
    pub status: VisitStatus,
    /// Incremented on every committed mutation.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub punch_in_location: Option<GeoPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub punch_out_location: Option<GeoPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviation_km: Option<f64>,
    /// Active time only; paused spans are excluded.
    pub elapsed_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused_seconds: i64,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub verifications: Vec<TaskVerification>,
    #[serde(default)]
    pub evidence: EvidenceLedger,
    #[serde(default)]
    pub alerts: Vec<RouteAlert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Visit {
    pub fn new(id: String, rep_id: String, target: VisitTarget, now: DateTime<Utc>) -> Self {
        Self {
            id,
            rep_id,
            target,
            status: VisitStatus::NotStarted,
            revision: 0,
            created_at: now,
            started_at: None,
            ended_at: None,
            punch_in_location: None,
            punch_out_location: None,
            deviation_km: None,
            elapsed_seconds: 0,
            paused_at: None,
            paused_seconds: 0,
            tasks: Vec::new(),
            verifications: Vec::new(),
            evidence: EvidenceLedger::new(),
            alerts: Vec::new(),
            notes: None,
        }
    }

    pub fn elapsed_minutes(&self) -> i64 {
        self.elapsed_seconds / 60
    }

    pub fn elapsed_hours(&self) -> f64 {
        self.elapsed_seconds as f64 / 3600.0
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn verification_for(&self, task_id: &str) -> Option<&TaskVerification> {
        self.verifications.iter().find(|v| v.task_id == task_id)
    }

    pub fn alert(&self, alert_id: &str) -> Option<&RouteAlert> {
        self.alerts.iter().find(|a| a.id == alert_id)
    }

    pub fn alert_mut(&mut self, alert_id: &str) -> Option<&mut RouteAlert> {
        self.alerts.iter_mut().find(|a| a.id == alert_id)
    }

    pub fn has_alert(&self, kind: AlertKind) -> bool {
        self.alerts.iter().any(|a| a.kind == kind)
    }

    /// The most recent route deviation alert still awaiting a decision.
    pub fn pending_deviation(&self) -> Option<&RouteAlert> {
        self.alerts
            .iter()
            .rev()
            .find(|a| a.kind == AlertKind::RouteDeviation && a.approval == ApprovalStatus::Pending)
    }

    pub fn touch(&mut self) {
        self.revision += 1;
    }
}

/// Route points a rep accumulates over one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRoute {
    pub rep_id: String,
    pub day: NaiveDate,
    #[serde(default)]
    pub points: Vec<GeoPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_alert_id: Option<String>,
}

impl DailyRoute {
    pub fn new(rep_id: String, day: NaiveDate) -> Self {
        Self {
            rep_id,
            day,
            points: Vec::new(),
            distance_alert_id: None,
        }
    }

    pub fn distance_km(&self) -> f64 {
        geo::path_distance_km(&self.points)
    }

    pub fn last_point(&self) -> Option<&GeoPosition> {
        self.points.last()
    }
}

/// Dashboard view of a visit.
#[derive(Debug, Clone, Serialize)]
pub struct VisitSummary {
    pub visit_id: String,
    pub target_name: String,
    pub status: VisitStatus,
    pub elapsed_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation_km: Option<f64>,
    pub outstanding_tasks: Vec<String>,
    pub pending_alerts: usize,
    pub total_alerts: usize,
    pub evidence_count: usize,
    pub route_distance_km: f64,
}
