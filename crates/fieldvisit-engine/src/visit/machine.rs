use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use fieldvisit_core::config::EngineConfig;
use fieldvisit_core::errors::{SinkError, VisitError};
use fieldvisit_core::evidence::{EvidenceLedger, EvidencePayload, EvidenceRecord};
use fieldvisit_core::geo::GeoPosition;
use fieldvisit_core::state::{template, DailyRoute, RouteAlert, Visit, VisitSummary, VisitTarget};
use fieldvisit_core::traits::{
    AlertNotice, IdentityContext, LatestPosition, PositionSource, PositionUpdate, RepIdentity,
    VisitSink,
};
use fieldvisit_core::types::{Severity, ThreadAuthor, VisitStatus};

use crate::compliance::monitor::ComplianceMonitor;
use crate::compliance::timer::TickTimer;
use crate::geofence::decision::Resolution;
use crate::geofence::deviation::{self, DeviationWorkflow};
use crate::tasks::gate::{TaskGate, VerificationInput};

use super::outbox::{Notification, Outbox};

/// Result of a successful `start_visit`.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Active {
        visit_id: String,
        deviation_km: f64,
    },
    AwaitingApproval {
        visit_id: String,
        alert_id: String,
        deviation_km: f64,
        severity: Severity,
    },
}

impl StartOutcome {
    pub fn visit_id(&self) -> &str {
        match self {
            StartOutcome::Active { visit_id, .. } | StartOutcome::AwaitingApproval { visit_id, .. } => {
                visit_id
            }
        }
    }
}

/// Orchestrates the lifecycle of a rep's visits.
///
/// Every operation validates against a working copy of the visit and commits it
/// only on success, so a rejected call leaves the stored visit untouched.
/// Time and positions are always supplied by the caller.
///
/// Completed and cancelled visits are held only until the sink has received
/// them and their alerts are resolved; after that only the sink has them.
pub struct VisitStateMachine<S: VisitSink, I: IdentityContext> {
    config: EngineConfig,
    workflow: DeviationWorkflow,
    monitor: ComplianceMonitor,
    identity: I,
    sink: S,
    visits: BTreeMap<String, Visit>,
    routes: HashMap<String, DailyRoute>,
    timers: HashMap<String, TickTimer>,
    position: LatestPosition,
    outbox: Outbox,
}

impl<S: VisitSink, I: IdentityContext> VisitStateMachine<S, I> {
    pub fn new(config: EngineConfig, identity: I, sink: S) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            workflow: DeviationWorkflow::from_config(&config),
            monitor: ComplianceMonitor::from_config(&config),
            config,
            identity,
            sink,
            visits: BTreeMap::new(),
            routes: HashMap::new(),
            timers: HashMap::new(),
            position: LatestPosition::new(),
            outbox: Outbox::default(),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Punch in at `target`.
    ///
    /// Within tolerance the visit becomes `Active`. Outside it, a non-blank
    /// `reason` opens a pending deviation alert and the visit waits for approval;
    /// without one the call fails with `DeviationReasonRequired` and nothing is stored.
    pub fn start_visit(
        &mut self,
        target: VisitTarget,
        position: Option<GeoPosition>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StartOutcome, VisitError> {
        let rep = self.identity.current_rep();
        if let Some(open) = self.open_visit_for(&rep.id) {
            return Err(VisitError::VisitAlreadyActive {
                rep_id: rep.id.clone(),
                visit_id: open.id.clone(),
            });
        }
        let position = usable(position).ok_or_else(|| VisitError::position_unavailable("start visit"))?;
        if !target.declared_location.is_valid() {
            return Err(VisitError::InvalidTargetLocation {
                target_id: target.id.clone(),
                latitude: target.declared_location.latitude,
                longitude: target.declared_location.longitude,
            });
        }

        let retry = self
            .visits
            .values()
            .find(|v| {
                v.rep_id == rep.id && v.target.id == target.id && v.status == VisitStatus::NotStarted
            })
            .cloned();
        let mut visit = match retry {
            Some(mut v) => {
                v.target = target;
                v
            }
            None => Visit::new(uuid::Uuid::new_v4().to_string(), rep.id.clone(), target, now),
        };

        let decision = self.workflow.evaluate(&position, &visit.target);
        tracing::debug!(
            visit_id = %visit.id,
            deviation_km = decision.deviation_km,
            within_tolerance = decision.within_tolerance,
            "geofence evaluated"
        );

        if decision.within_tolerance {
            visit.punch_in_location = Some(position);
            visit.deviation_km = Some(decision.deviation_km);
            let raised = self.activate(&mut visit, now);
            visit.touch();

            let visit_id = visit.id.clone();
            tracing::info!(visit_id = %visit_id, rep_id = %rep.id, target = %visit.target.code, "visit started");
            self.visits.insert(visit_id.clone(), visit);
            self.emit_alerts(&visit_id, raised);
            return Ok(StartOutcome::Active {
                visit_id,
                deviation_km: decision.deviation_km,
            });
        }

        let alert = self.workflow.request_approval(
            &mut visit,
            position,
            decision.deviation_km,
            reason.unwrap_or_default(),
            &rep,
            now,
        )?;
        visit.status = VisitStatus::AwaitingDeviationApproval;
        visit.punch_in_location = Some(position);
        visit.deviation_km = Some(decision.deviation_km);
        visit.touch();

        let visit_id = visit.id.clone();
        tracing::info!(
            visit_id = %visit_id,
            rep_id = %rep.id,
            deviation_km = decision.deviation_km,
            severity = ?alert.severity,
            "punch-in outside tolerance; awaiting approval"
        );
        self.visits.insert(visit_id.clone(), visit);
        let outcome = StartOutcome::AwaitingApproval {
            visit_id: visit_id.clone(),
            alert_id: alert.id.clone(),
            deviation_km: decision.deviation_km,
            severity: alert.severity,
        };
        self.emit_alerts(&visit_id, vec![alert]);
        Ok(outcome)
    }

    /// Apply a supervisor's ruling to a pending alert.
    ///
    /// For the deviation alert gating a waiting visit, approval activates the visit
    /// with the deviation measured at punch-in and rejection returns it to
    /// `NotStarted`. Other alerts are simply marked resolved.
    pub fn resolve_alert(
        &mut self,
        visit_id: &str,
        alert_id: &str,
        resolution: Resolution,
        approver: &str,
        now: DateTime<Utc>,
    ) -> Result<VisitStatus, VisitError> {
        let mut visit = self.visit_ref(visit_id)?.clone();
        let gating = visit.status == VisitStatus::AwaitingDeviationApproval
            && visit.pending_deviation().is_some_and(|a| a.id == alert_id);

        let resolved = self
            .workflow
            .resolve(&mut visit, alert_id, resolution, approver, now)?;

        let mut raised = Vec::new();
        if gating {
            match resolution {
                Resolution::Approve => raised = self.activate(&mut visit, now),
                Resolution::Reject => reset_to_not_started(&mut visit),
            }
        }
        visit.touch();

        let status = visit.status;
        tracing::info!(
            visit_id = %visit_id,
            alert_id = %alert_id,
            approval = %resolved.approval,
            approver = %approver,
            status = %status,
            "alert resolved"
        );
        self.visits.insert(visit_id.to_string(), visit);
        self.emit_resolved(visit_id, resolved);
        self.emit_alerts(visit_id, raised);
        self.evict_settled();
        Ok(status)
    }

    /// Switch between `Active` and `Paused`. Elapsed time is frozen while paused.
    pub fn toggle_pause(&mut self, visit_id: &str, now: DateTime<Utc>) -> Result<VisitStatus, VisitError> {
        let mut visit = self.visit_ref(visit_id)?.clone();
        match visit.status {
            VisitStatus::Active => {
                visit.elapsed_seconds = ComplianceMonitor::elapsed_seconds_at(&visit, now);
                visit.paused_at = Some(now);
                visit.status = VisitStatus::Paused;
                self.timer(visit_id).stop();
            }
            VisitStatus::Paused => {
                if let Some(paused_at) = visit.paused_at.take() {
                    visit.paused_seconds += (now - paused_at).num_seconds().max(0);
                }
                visit.status = VisitStatus::Active;
                self.timer(visit_id).start(now);
            }
            other => return Err(VisitError::invalid_transition(other, "pause or resume")),
        }
        visit.touch();
        let status = visit.status;
        tracing::info!(visit_id = %visit_id, status = %status, "visit pause toggled");
        self.visits.insert(visit_id.to_string(), visit);
        Ok(status)
    }

    /// Rep-initiated cancellation.
    ///
    /// A visit awaiting approval withdraws its request and returns to `NotStarted`;
    /// an active or paused visit becomes `Cancelled`. Evidence is always kept.
    pub fn cancel_visit(&mut self, visit_id: &str, now: DateTime<Utc>) -> Result<VisitStatus, VisitError> {
        let rep = self.identity.current_rep();
        let mut visit = self.visit_ref(visit_id)?.clone();

        match visit.status {
            VisitStatus::AwaitingDeviationApproval => {
                let mut withdrawn = None;
                if let Some(alert_id) = visit.pending_deviation().map(|a| a.id.clone()) {
                    if let Some(alert) = visit.alert_mut(&alert_id) {
                        deviation::append_thread_message(
                            alert,
                            ThreadAuthor::Rep,
                            &rep.display_name,
                            "request withdrawn by rep",
                            now,
                        )?;
                    }
                    withdrawn = Some(self.workflow.resolve(
                        &mut visit,
                        &alert_id,
                        Resolution::Reject,
                        &rep.display_name,
                        now,
                    )?);
                }
                reset_to_not_started(&mut visit);
                visit.touch();
                tracing::info!(visit_id = %visit_id, "deviation request withdrawn");
                self.visits.insert(visit_id.to_string(), visit);
                if let Some(alert) = withdrawn {
                    self.emit_resolved(visit_id, alert);
                }
                Ok(VisitStatus::NotStarted)
            }
            VisitStatus::Active | VisitStatus::Paused => {
                freeze_clock(&mut visit, now);
                visit.status = VisitStatus::Cancelled;
                visit.ended_at = Some(now);
                visit.touch();
                self.timers.remove(visit_id);
                tracing::info!(
                    visit_id = %visit_id,
                    elapsed_minutes = visit.elapsed_minutes(),
                    evidence = visit.evidence.len(),
                    "visit cancelled"
                );
                self.outbox
                    .send(&mut self.sink, Notification::VisitCancelled(visit.clone()));
                self.visits.insert(visit_id.to_string(), visit);
                self.evict_settled();
                Ok(VisitStatus::Cancelled)
            }
            other => Err(VisitError::invalid_transition(other, "cancel")),
        }
    }

    /// Close an active visit.
    ///
    /// Checks, in order: the task gate, the minimum duration (bypassed by
    /// `confirm_short`), and a punch-out position. Returns the completed visit.
    pub fn end_visit(
        &mut self,
        visit_id: &str,
        notes: &str,
        confirm_short: bool,
        position: Option<GeoPosition>,
        now: DateTime<Utc>,
    ) -> Result<Visit, VisitError> {
        let visit = self.visit_ref(visit_id)?;
        if visit.status != VisitStatus::Active {
            return Err(VisitError::invalid_transition(visit.status, "end visit"));
        }
        TaskGate::check(visit)?;

        let mut closing = visit.clone();
        closing.elapsed_seconds = ComplianceMonitor::elapsed_seconds_at(&closing, now);
        self.monitor.check_close_duration(&closing, confirm_short)?;
        let punch_out = usable(position).ok_or_else(|| VisitError::position_unavailable("end visit"))?;

        let route = route_entry(&mut self.routes, &closing.rep_id, now.date_naive());
        let raised: Vec<RouteAlert> = self
            .monitor
            .record_position(&mut closing, route, punch_out, now)
            .into_iter()
            .collect();

        let notes = notes.trim();
        if !notes.is_empty() {
            closing.notes = Some(notes.to_string());
            TaskGate::complete_template(&mut closing, template::NOTES, now);
        }
        closing.punch_out_location = Some(punch_out);
        closing.status = VisitStatus::Completed;
        closing.ended_at = Some(now);
        closing.touch();
        self.timers.remove(visit_id);

        tracing::info!(
            visit_id = %visit_id,
            elapsed_minutes = closing.elapsed_minutes(),
            short_confirmed = confirm_short && closing.elapsed_minutes() < self.config.min_visit_minutes,
            alerts = closing.alerts.len(),
            "visit completed"
        );
        self.visits.insert(visit_id.to_string(), closing);
        self.emit_alerts(visit_id, raised);
        let completed = self.visit_ref(visit_id)?.clone();
        self.outbox
            .send(&mut self.sink, Notification::VisitCompleted(completed.clone()));
        self.evict_settled();
        Ok(completed)
    }

    // ── Deviation thread ────────────────────────────────────────

    pub fn rep_reply(
        &mut self,
        visit_id: &str,
        alert_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VisitError> {
        let rep = self.identity.current_rep();
        self.update_alert(visit_id, alert_id, |alert| {
            deviation::append_thread_message(alert, ThreadAuthor::Rep, &rep.display_name, message, now)
        })
    }

    pub fn approver_reply(
        &mut self,
        visit_id: &str,
        alert_id: &str,
        approver: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VisitError> {
        self.update_alert(visit_id, alert_id, |alert| {
            deviation::append_thread_message(alert, ThreadAuthor::Approver, approver, message, now)
        })
    }

    /// Correct one of the rep's earlier messages by appending an amendment.
    pub fn amend_rep_message(
        &mut self,
        visit_id: &str,
        alert_id: &str,
        index: usize,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VisitError> {
        let rep = self.identity.current_rep();
        self.update_alert(visit_id, alert_id, |alert| {
            deviation::amend_thread_message(
                alert,
                index,
                ThreadAuthor::Rep,
                &rep.display_name,
                message,
                now,
            )
        })
    }

    // ── Tasks ───────────────────────────────────────────────────

    /// Supervisor-added task; allowed until the visit is closed.
    pub fn add_task(
        &mut self,
        visit_id: &str,
        description: &str,
        requires_verification: bool,
    ) -> Result<String, VisitError> {
        let visit = self.visit_mut(visit_id)?;
        if visit.status.is_terminal() {
            return Err(VisitError::invalid_transition(visit.status, "add task"));
        }
        let id = TaskGate::add_task(visit, description, requires_verification)?;
        visit.touch();
        tracing::debug!(visit_id = %visit_id, task_id = %id, "ad hoc task added");
        Ok(id)
    }

    /// Returns false if the task was already complete.
    pub fn complete_task(
        &mut self,
        visit_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, VisitError> {
        let visit = self.visit_mut(visit_id)?;
        require_in_progress(visit, "complete task")?;
        let changed = TaskGate::complete(visit, task_id, now)?;
        if changed {
            visit.touch();
        }
        Ok(changed)
    }

    pub fn verify_task(
        &mut self,
        visit_id: &str,
        input: VerificationInput,
        now: DateTime<Utc>,
    ) -> Result<(), VisitError> {
        self.verify_tasks(visit_id, vec![input], now).map(|_| ())
    }

    pub fn verify_tasks(
        &mut self,
        visit_id: &str,
        inputs: Vec<VerificationInput>,
        now: DateTime<Utc>,
    ) -> Result<usize, VisitError> {
        let verifier = self.identity.current_rep().display_name;
        let visit = self.visit_mut(visit_id)?;
        require_in_progress(visit, "verify tasks")?;
        let n = TaskGate::verify_batch(visit, inputs, &verifier, now)?;
        visit.touch();
        tracing::debug!(visit_id = %visit_id, verified = n, "tasks verified");
        Ok(n)
    }

    // ── Evidence ────────────────────────────────────────────────

    /// Append evidence captured at `position`; completes the matching checklist task.
    pub fn capture_evidence(
        &mut self,
        visit_id: &str,
        payload: EvidencePayload,
        position: Option<GeoPosition>,
        now: DateTime<Utc>,
    ) -> Result<String, VisitError> {
        let captured_by = self.identity.current_rep().display_name;
        let visit = self.visit_mut(visit_id)?;
        if !visit.status.is_open() {
            return Err(VisitError::invalid_transition(visit.status, "capture evidence"));
        }
        let location =
            usable(position).ok_or_else(|| VisitError::position_unavailable("capture evidence"))?;

        let record = EvidenceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            captured_at: now,
            location,
            captured_by,
            payload,
        };
        EvidenceLedger::check(&record)?;
        let template_id = record.payload.template_id();
        let id = visit.evidence.append(record)?.id.clone();
        if matches!(visit.status, VisitStatus::Active | VisitStatus::Paused) {
            TaskGate::complete_template(visit, template_id, now);
        }
        visit.touch();
        tracing::debug!(visit_id = %visit_id, evidence_id = %id, template = template_id, "evidence captured");
        Ok(id)
    }

    // ── Position and clock ──────────────────────────────────────

    /// Feed a position provider event. Fixes extend the active visit's route.
    pub fn on_position(&mut self, update: PositionUpdate, now: DateTime<Utc>) -> Vec<RouteAlert> {
        self.position.apply(update.clone());
        let PositionUpdate::Fix(fix) = update else {
            return Vec::new();
        };
        let Some(visit_id) = self.active_visit_id() else {
            return Vec::new();
        };
        let Some(visit) = self.visits.get_mut(&visit_id) else {
            return Vec::new();
        };
        let route = route_entry(&mut self.routes, &visit.rep_id, now.date_naive());
        let raised: Vec<RouteAlert> = self
            .monitor
            .record_position(visit, route, fix, now)
            .into_iter()
            .collect();
        if !raised.is_empty() {
            visit.touch();
        }
        self.emit_alerts(&visit_id, raised.clone());
        raised
    }

    /// Latest usable position from the provider, if any.
    pub fn position_snapshot(&self) -> Option<GeoPosition> {
        self.position.snapshot()
    }

    /// Run one compliance step for the rep's active visit.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<RouteAlert> {
        let Some(visit_id) = self.active_visit_id() else {
            return Vec::new();
        };
        let Some(visit) = self.visits.get_mut(&visit_id) else {
            return Vec::new();
        };
        let route = route_entry(&mut self.routes, &visit.rep_id, now.date_naive());
        let raised = self.monitor.tick(visit, route, now);
        if !raised.is_empty() {
            visit.touch();
        }
        self.emit_alerts(&visit_id, raised.clone());
        raised
    }

    /// Tick only if the compliance timer is due. Hosts may call this at any cadence.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<RouteAlert> {
        let Some(visit_id) = self.active_visit_id() else {
            return Vec::new();
        };
        if self.timers.get_mut(&visit_id).is_some_and(|t| t.poll(now)) {
            self.tick(now)
        } else {
            Vec::new()
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn visit(&self, visit_id: &str) -> Option<&Visit> {
        self.visits.get(visit_id)
    }

    pub fn visits(&self) -> impl Iterator<Item = &Visit> {
        self.visits.values()
    }

    /// The current rep's visit that is awaiting approval, active, or paused.
    pub fn open_visit(&self) -> Option<&Visit> {
        self.open_visit_for(&self.identity.current_rep().id)
    }

    /// Today's route for the current rep, if one has been recorded.
    pub fn route(&self) -> Option<&DailyRoute> {
        self.routes.get(&self.identity.current_rep().id)
    }

    pub fn is_ticking(&self, visit_id: &str) -> bool {
        self.timers.get(visit_id).is_some_and(TickTimer::is_running)
    }

    pub fn summary(&self, visit_id: &str) -> Result<VisitSummary, VisitError> {
        let visit = self.visit_ref(visit_id)?;
        let route_distance_km = self
            .routes
            .get(&visit.rep_id)
            .map(DailyRoute::distance_km)
            .unwrap_or(0.0);
        Ok(VisitSummary {
            visit_id: visit.id.clone(),
            target_name: visit.target.name.clone(),
            status: visit.status,
            elapsed_minutes: visit.elapsed_minutes(),
            deviation_km: visit.deviation_km,
            outstanding_tasks: TaskGate::outstanding(visit),
            pending_alerts: visit.alerts.iter().filter(|a| !a.approval.is_resolved()).count(),
            total_alerts: visit.alerts.len(),
            evidence_count: visit.evidence.len(),
            route_distance_km,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn pending_notifications(&self) -> usize {
        self.outbox.len()
    }

    /// Retry notifications the sink previously rejected.
    pub fn flush_outbox(&mut self) -> Result<usize, SinkError> {
        let flushed = self.outbox.flush(&mut self.sink);
        self.evict_settled();
        flushed
    }

    // ── Internals ───────────────────────────────────────────────

    /// Move a visit into `Active`: start the clock, seed tasks, record the
    /// punch-in as a route point, and start ticking. Returns alerts raised.
    fn activate(&mut self, visit: &mut Visit, now: DateTime<Utc>) -> Vec<RouteAlert> {
        visit.status = VisitStatus::Active;
        visit.started_at = Some(now);
        visit.elapsed_seconds = 0;
        visit.paused_seconds = 0;
        visit.paused_at = None;

        TaskGate::seed_default_tasks(visit, &self.config.checklist);
        TaskGate::complete_template(visit, template::PUNCH_IN, now);

        let mut raised = Vec::new();
        if let Some(punch_in) = visit.punch_in_location {
            let route = route_entry(&mut self.routes, &visit.rep_id, now.date_naive());
            raised.extend(self.monitor.record_position(visit, route, punch_in, now));
        }
        raised.extend(self.monitor.late_check_in_rule(visit, now));
        self.timer(&visit.id).start(now);
        raised
    }

    /// Drop closed visits the sink has fully received and that have no pending alerts.
    fn evict_settled(&mut self) {
        let settled: Vec<String> = self
            .visits
            .values()
            .filter(|v| v.status.is_terminal())
            .filter(|v| v.alerts.iter().all(|a| a.approval.is_resolved()))
            .filter(|v| !self.outbox.holds(&v.id))
            .map(|v| v.id.clone())
            .collect();
        for visit_id in settled {
            self.visits.remove(&visit_id);
            self.timers.remove(&visit_id);
            tracing::debug!(visit_id = %visit_id, "settled visit evicted");
        }
    }

    fn timer(&mut self, visit_id: &str) -> &mut TickTimer {
        let interval = self.config.tick_seconds;
        self.timers
            .entry(visit_id.to_string())
            .or_insert_with(|| TickTimer::new(interval))
    }

    fn open_visit_for(&self, rep_id: &str) -> Option<&Visit> {
        self.visits
            .values()
            .find(|v| v.rep_id == rep_id && v.status.is_open())
    }

    fn active_visit_id(&self) -> Option<String> {
        let rep = self.identity.current_rep();
        self.visits
            .values()
            .find(|v| v.rep_id == rep.id && v.status == VisitStatus::Active)
            .map(|v| v.id.clone())
    }

    fn visit_ref(&self, visit_id: &str) -> Result<&Visit, VisitError> {
        self.visits
            .get(visit_id)
            .ok_or_else(|| VisitError::VisitNotFound(visit_id.to_string()))
    }

    fn visit_mut(&mut self, visit_id: &str) -> Result<&mut Visit, VisitError> {
        self.visits
            .get_mut(visit_id)
            .ok_or_else(|| VisitError::VisitNotFound(visit_id.to_string()))
    }

    fn update_alert(
        &mut self,
        visit_id: &str,
        alert_id: &str,
        apply: impl FnOnce(&mut RouteAlert) -> Result<(), VisitError>,
    ) -> Result<(), VisitError> {
        let visit = self.visit_mut(visit_id)?;
        let alert = visit
            .alert_mut(alert_id)
            .ok_or_else(|| VisitError::AlertNotFound(alert_id.to_string()))?;
        apply(alert)?;
        visit.touch();
        Ok(())
    }

    fn emit_alerts(&mut self, visit_id: &str, alerts: Vec<RouteAlert>) {
        let Some(visit) = self.visits.get(visit_id) else {
            return;
        };
        let rep = self.identity.current_rep();
        for alert in alerts {
            tracing::warn!(
                visit_id = %visit_id,
                alert_id = %alert.id,
                alert_kind = ?alert.kind,
                severity = ?alert.severity,
                measured = alert.measured,
                threshold = alert.threshold,
                "{}",
                alert.message
            );
            let notice = notice_for(&rep, visit, alert);
            self.outbox
                .send(&mut self.sink, Notification::AlertRaised(notice));
        }
    }

    fn emit_resolved(&mut self, visit_id: &str, alert: RouteAlert) {
        let Some(visit) = self.visits.get(visit_id) else {
            return;
        };
        let notice = notice_for(&self.identity.current_rep(), visit, alert);
        self.outbox
            .send(&mut self.sink, Notification::AlertResolved(notice));
    }
}

fn notice_for(rep: &RepIdentity, visit: &Visit, alert: RouteAlert) -> AlertNotice {
    AlertNotice {
        rep: rep.clone(),
        visit_id: visit.id.clone(),
        target_id: visit.target.id.clone(),
        target_name: visit.target.name.clone(),
        target_code: visit.target.code.clone(),
        deviation_km: visit.deviation_km,
        punch_in_location: visit.punch_in_location,
        alert,
    }
}

/// The rep's route for `day`, replacing a route left over from an earlier day.
fn route_entry<'a>(
    routes: &'a mut HashMap<String, DailyRoute>,
    rep_id: &str,
    day: NaiveDate,
) -> &'a mut DailyRoute {
    let route = routes
        .entry(rep_id.to_string())
        .or_insert_with(|| DailyRoute::new(rep_id.to_string(), day));
    if route.day != day {
        *route = DailyRoute::new(rep_id.to_string(), day);
    }
    route
}

fn usable(position: Option<GeoPosition>) -> Option<GeoPosition> {
    position.filter(GeoPosition::is_valid)
}

fn require_in_progress(visit: &Visit, operation: &str) -> Result<(), VisitError> {
    match visit.status {
        VisitStatus::Active | VisitStatus::Paused => Ok(()),
        other => Err(VisitError::invalid_transition(other, operation)),
    }
}

fn reset_to_not_started(visit: &mut Visit) {
    visit.status = VisitStatus::NotStarted;
    visit.punch_in_location = None;
    visit.deviation_km = None;
}

/// Fold any open pause into the totals and fix elapsed time at `now`.
fn freeze_clock(visit: &mut Visit, now: DateTime<Utc>) {
    visit.elapsed_seconds = ComplianceMonitor::elapsed_seconds_at(visit, now);
    if let Some(paused_at) = visit.paused_at.take() {
        visit.paused_seconds += (now - paused_at).num_seconds().max(0);
    }
}
