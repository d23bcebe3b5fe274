use chrono::{DateTime, NaiveTime, Timelike, Utc};
use fieldvisit_core::config::EngineConfig;
use fieldvisit_core::errors::VisitError;
use fieldvisit_core::geo::GeoPosition;
use fieldvisit_core::state::{DailyRoute, RouteAlert, Visit};
use fieldvisit_core::types::{AlertKind, ApprovalStatus, Severity, VisitStatus};

/// Route and working-hour rules evaluated while a visit is active.
///
/// Rules:
/// 1. working hours: elapsed hours in `[alert_from, required)` raises one `Medium` shortfall alert
/// 2. distance: daily route above the limit raises one `High` alert per daily route
/// 3. late check-in: activation after the configured deadline raises one `Low` alert
/// 4. minimum duration: closing under the minimum needs explicit confirmation
///
/// Only rule 4 can stop a transition, and only until the caller confirms.
#[derive(Debug, Clone)]
pub struct ComplianceMonitor {
    alert_from_hours: f64,
    required_hours: f64,
    distance_limit_km: f64,
    min_visit_minutes: i64,
    check_in_deadline: Option<NaiveTime>,
}

impl ComplianceMonitor {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            alert_from_hours: config.working_hours_alert_from_hours,
            required_hours: config.required_working_hours,
            distance_limit_km: config.daily_distance_limit_km,
            min_visit_minutes: config.min_visit_minutes,
            check_in_deadline: config.check_in_deadline,
        }
    }

    /// Active seconds since `started_at` at time `now`, excluding paused spans.
    ///
    /// Never less than what the visit already recorded.
    pub fn elapsed_seconds_at(visit: &Visit, now: DateTime<Utc>) -> i64 {
        let Some(started) = visit.started_at else {
            return visit.elapsed_seconds;
        };
        let mut paused = visit.paused_seconds;
        if let Some(paused_at) = visit.paused_at {
            paused += (now - paused_at).num_seconds().max(0);
        }
        let active = (now - started).num_seconds() - paused;
        active.max(visit.elapsed_seconds).max(0)
    }

    /// One compliance step. A no-op unless the visit is `Active`.
    pub fn tick(&self, visit: &mut Visit, route: &mut DailyRoute, now: DateTime<Utc>) -> Vec<RouteAlert> {
        if visit.status != VisitStatus::Active {
            return Vec::new();
        }
        visit.elapsed_seconds = Self::elapsed_seconds_at(visit, now);

        let mut raised = Vec::new();
        if let Some(alert) = self.working_hours_rule(visit, route, now) {
            raised.push(alert);
        }
        if let Some(alert) = self.distance_rule(visit, route, now) {
            raised.push(alert);
        }
        raised
    }

    /// Add a route point for an active visit and re-check the distance rule.
    pub fn record_position(
        &self,
        visit: &mut Visit,
        route: &mut DailyRoute,
        position: GeoPosition,
        now: DateTime<Utc>,
    ) -> Option<RouteAlert> {
        if visit.status != VisitStatus::Active || !position.is_valid() {
            return None;
        }
        route.points.push(position);
        self.distance_rule(visit, route, now)
    }

    pub fn late_check_in_rule(&self, visit: &mut Visit, now: DateTime<Utc>) -> Option<RouteAlert> {
        let deadline = self.check_in_deadline?;
        let at = now.time();
        if at <= deadline || visit.has_alert(AlertKind::LateCheckIn) {
            return None;
        }
        let minutes_of_day = |t: NaiveTime| f64::from(t.hour() * 60 + t.minute());
        let location = visit
            .punch_in_location
            .unwrap_or(visit.target.declared_location);
        let alert = new_alert(
            AlertKind::LateCheckIn,
            Severity::Low,
            format!(
                "checked in at {} UTC, after the {} deadline",
                at.format("%H:%M"),
                deadline.format("%H:%M")
            ),
            now,
            location,
            minutes_of_day(at),
            minutes_of_day(deadline),
        );
        visit.alerts.push(alert.clone());
        Some(alert)
    }

    /// `DurationTooShort` when closing early without confirmation.
    pub fn check_close_duration(&self, visit: &Visit, confirmed: bool) -> Result<(), VisitError> {
        let elapsed = visit.elapsed_minutes();
        if elapsed < self.min_visit_minutes && !confirmed {
            return Err(VisitError::DurationTooShort {
                elapsed_minutes: elapsed,
                minimum_minutes: self.min_visit_minutes,
            });
        }
        Ok(())
    }

    fn working_hours_rule(
        &self,
        visit: &mut Visit,
        route: &DailyRoute,
        now: DateTime<Utc>,
    ) -> Option<RouteAlert> {
        let hours = visit.elapsed_hours();
        if !(self.alert_from_hours..self.required_hours).contains(&hours)
            || visit.has_alert(AlertKind::WorkingHoursShortfall)
        {
            return None;
        }
        let alert = new_alert(
            AlertKind::WorkingHoursShortfall,
            Severity::Medium,
            format!(
                "worked {hours:.2} h, minimum daily requirement is {} h",
                self.required_hours
            ),
            now,
            alert_location(visit, route),
            hours,
            self.required_hours,
        );
        visit.alerts.push(alert.clone());
        Some(alert)
    }

    fn distance_rule(
        &self,
        visit: &mut Visit,
        route: &mut DailyRoute,
        now: DateTime<Utc>,
    ) -> Option<RouteAlert> {
        if route.distance_alert_id.is_some() {
            return None;
        }
        let km = route.distance_km();
        if km <= self.distance_limit_km {
            return None;
        }
        let alert = new_alert(
            AlertKind::DistanceExceeded,
            Severity::High,
            format!(
                "travelled {km:.1} km today, limit is {} km",
                self.distance_limit_km
            ),
            now,
            alert_location(visit, route),
            km,
            self.distance_limit_km,
        );
        route.distance_alert_id = Some(alert.id.clone());
        visit.alerts.push(alert.clone());
        Some(alert)
    }
}

fn alert_location(visit: &Visit, route: &DailyRoute) -> GeoPosition {
    route
        .last_point()
        .copied()
        .or(visit.punch_in_location)
        .unwrap_or(visit.target.declared_location)
}

fn new_alert(
    kind: AlertKind,
    severity: Severity,
    message: String,
    now: DateTime<Utc>,
    location: GeoPosition,
    measured: f64,
    threshold: f64,
) -> RouteAlert {
    RouteAlert {
        id: uuid::Uuid::new_v4().to_string(),
        kind,
        severity,
        message,
        raised_at: now,
        location,
        measured,
        threshold,
        approval: ApprovalStatus::Pending,
        thread: Vec::new(),
        resolved_by: None,
        resolved_at: None,
    }
}
