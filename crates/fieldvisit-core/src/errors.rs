use crate::types::{ApprovalStatus, VisitStatus};

/// Typed outcome of a rejected engine operation.
///
/// The visit is left in its pre-operation state whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VisitError {
    #[error("position unavailable for {operation}")]
    PositionUnavailable { operation: String },

    #[error("rep {rep_id} already has open visit {visit_id}")]
    VisitAlreadyActive { rep_id: String, visit_id: String },

    #[error("{} mandatory task(s) not verified: {}", outstanding.len(), outstanding.join(", "))]
    GateNotSatisfied { outstanding: Vec<String> },

    #[error(
        "visit lasted {elapsed_minutes} min, minimum is {minimum_minutes} min; confirm to close early"
    )]
    DurationTooShort {
        elapsed_minutes: i64,
        minimum_minutes: i64,
    },

    #[error(
        "punch-in is {deviation_km:.3} km from target (tolerance {tolerance_km} km); a reason is required"
    )]
    DeviationReasonRequired {
        deviation_km: f64,
        tolerance_km: f64,
    },

    #[error("alert {alert_id} already resolved as {approval}")]
    AlertAlreadyResolved {
        alert_id: String,
        approval: ApprovalStatus,
    },

    #[error("target {target_id} has no valid declared location ({latitude}, {longitude})")]
    InvalidTargetLocation {
        target_id: String,
        latitude: f64,
        longitude: f64,
    },

    #[error("visit not found: {0}")]
    VisitNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("alert not found: {0}")]
    AlertNotFound(String),

    #[error("cannot {operation} while visit is {from}")]
    InvalidTransition {
        from: VisitStatus,
        operation: String,
    },

    #[error("task {0} already verified")]
    TaskAlreadyVerified(String),

    #[error("invalid evidence: {0}")]
    InvalidEvidence(String),

    #[error("thread message must not be empty")]
    EmptyMessage,

    #[error("thread entry {0} does not exist")]
    ThreadEntryNotFound(usize),

    #[error("thread entry {index} was not written by the amending party")]
    NotMessageAuthor { index: usize },
}

impl VisitError {
    pub fn position_unavailable(operation: &str) -> Self {
        VisitError::PositionUnavailable {
            operation: operation.to_string(),
        }
    }

    pub fn invalid_transition(from: VisitStatus, operation: &str) -> Self {
        VisitError::InvalidTransition {
            from,
            operation: operation.to_string(),
        }
    }

    /// True for outcomes the caller can recover from by retrying with new input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VisitError::PositionUnavailable { .. }
                | VisitError::GateNotSatisfied { .. }
                | VisitError::DurationTooShort { .. }
                | VisitError::DeviationReasonRequired { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("write failure: {0}")]
    WriteFailure(String),
    #[error("chain corruption at entry {0}")]
    ChainCorruption(u64),
}
