use chrono::{DateTime, Utc};
use fieldvisit_core::config::EngineConfig;
use fieldvisit_core::errors::VisitError;
use fieldvisit_core::geo::{self, GeoPosition};
use fieldvisit_core::state::{RouteAlert, ThreadEntry, Visit, VisitTarget};
use fieldvisit_core::traits::RepIdentity;
use fieldvisit_core::types::{AlertKind, ApprovalStatus, Severity, ThreadAuthor};

use super::decision::{GeofenceDecision, Resolution};

/// Punch-in geofence and the approval exchange for out-of-tolerance starts.
///
/// Flow:
/// 1. `evaluate` measures the deviation from the declared location
/// 2. outside tolerance, `request_approval` turns the rep's reason into a pending alert
/// 3. rep and approver exchange thread messages while the alert is pending
/// 4. `resolve` records the approver's ruling; the state machine applies it
#[derive(Debug, Clone, Copy)]
pub struct DeviationWorkflow {
    tolerance_km: f64,
    high_severity_km: f64,
}

impl DeviationWorkflow {
    pub fn new(tolerance_km: f64, high_severity_km: f64) -> Self {
        Self {
            tolerance_km,
            high_severity_km,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.tolerance_km, config.high_severity_km)
    }

    pub fn evaluate(&self, current: &GeoPosition, target: &VisitTarget) -> GeofenceDecision {
        let deviation_km = geo::distance_km(current, &target.declared_location);
        GeofenceDecision {
            within_tolerance: deviation_km <= self.tolerance_km,
            deviation_km,
            tolerance_km: self.tolerance_km,
            severity: self.severity_for(deviation_km),
        }
    }

    /// `High` strictly above the high-severity distance, otherwise `Medium`.
    pub fn severity_for(&self, deviation_km: f64) -> Severity {
        if deviation_km > self.high_severity_km {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    /// Open a pending `RouteDeviation` alert on the visit.
    ///
    /// The reason becomes the first thread entry. Nothing is attached when the
    /// reason is blank or a deviation request is already pending.
    pub fn request_approval(
        &self,
        visit: &mut Visit,
        location: GeoPosition,
        deviation_km: f64,
        reason: &str,
        rep: &RepIdentity,
        now: DateTime<Utc>,
    ) -> Result<RouteAlert, VisitError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(VisitError::DeviationReasonRequired {
                deviation_km,
                tolerance_km: self.tolerance_km,
            });
        }
        if let Some(pending) = visit.pending_deviation() {
            return Err(VisitError::invalid_transition(
                visit.status,
                &format!("request approval while {} is pending", pending.id),
            ));
        }

        let alert = RouteAlert {
            id: uuid::Uuid::new_v4().to_string(),
            kind: AlertKind::RouteDeviation,
            severity: self.severity_for(deviation_km),
            message: format!(
                "punch-in {deviation_km:.2} km from {} ({}), tolerance {} km: {reason}",
                visit.target.name, visit.target.code, self.tolerance_km
            ),
            raised_at: now,
            location,
            measured: deviation_km,
            threshold: self.tolerance_km,
            approval: ApprovalStatus::Pending,
            thread: vec![ThreadEntry {
                from: ThreadAuthor::Rep,
                author_name: rep.display_name.clone(),
                message: reason.to_string(),
                at: now,
                amends: None,
            }],
            resolved_by: None,
            resolved_at: None,
        };
        visit.alerts.push(alert.clone());
        Ok(alert)
    }

    /// Record a ruling on any pending alert of the visit.
    pub fn resolve(
        &self,
        visit: &mut Visit,
        alert_id: &str,
        resolution: Resolution,
        approver: &str,
        now: DateTime<Utc>,
    ) -> Result<RouteAlert, VisitError> {
        let alert = visit
            .alert_mut(alert_id)
            .ok_or_else(|| VisitError::AlertNotFound(alert_id.to_string()))?;
        ensure_pending(alert)?;
        alert.approval = resolution.approval();
        alert.resolved_by = Some(approver.to_string());
        alert.resolved_at = Some(now);
        Ok(alert.clone())
    }
}

/// Append a message to a pending alert's thread.
pub fn append_thread_message(
    alert: &mut RouteAlert,
    from: ThreadAuthor,
    author_name: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<(), VisitError> {
    push_entry(alert, from, author_name, message, now, None)
}

/// Correct an earlier message by appending a new entry that references it.
///
/// Only the original author may amend; the earlier entry stays as written.
pub fn amend_thread_message(
    alert: &mut RouteAlert,
    index: usize,
    from: ThreadAuthor,
    author_name: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<(), VisitError> {
    let original = alert
        .thread
        .get(index)
        .ok_or(VisitError::ThreadEntryNotFound(index))?;
    if original.from != from || original.author_name != author_name {
        return Err(VisitError::NotMessageAuthor { index });
    }
    push_entry(alert, from, author_name, message, now, Some(index))
}

fn push_entry(
    alert: &mut RouteAlert,
    from: ThreadAuthor,
    author_name: &str,
    message: &str,
    now: DateTime<Utc>,
    amends: Option<usize>,
) -> Result<(), VisitError> {
    ensure_pending(alert)?;
    let message = message.trim();
    if message.is_empty() {
        return Err(VisitError::EmptyMessage);
    }
    alert.thread.push(ThreadEntry {
        from,
        author_name: author_name.to_string(),
        message: message.to_string(),
        at: now,
        amends,
    });
    Ok(())
}

fn ensure_pending(alert: &RouteAlert) -> Result<(), VisitError> {
    if alert.approval.is_resolved() {
        return Err(VisitError::AlertAlreadyResolved {
            alert_id: alert.id.clone(),
            approval: alert.approval,
        });
    }
    Ok(())
}
