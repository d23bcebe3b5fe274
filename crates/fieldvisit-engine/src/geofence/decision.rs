use fieldvisit_core::types::{ApprovalStatus, Severity};
use serde::{Deserialize, Serialize};

/// Outcome of checking a punch-in against the target's declared location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceDecision {
    pub within_tolerance: bool,
    pub deviation_km: f64,
    pub tolerance_km: f64,
    /// Severity an approval request would carry.
    pub severity: Severity,
}

/// A supervisor's ruling on a pending alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Approve,
    Reject,
}

impl Resolution {
    pub fn approval(self) -> ApprovalStatus {
        match self {
            Resolution::Approve => ApprovalStatus::Approved,
            Resolution::Reject => ApprovalStatus::Rejected,
        }
    }
}
