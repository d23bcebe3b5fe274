//! End-to-end visit scenarios driven through the state machine.


use chrono::{Duration, NaiveTime, TimeZone, Utc};
use fieldvisit_core::config::EngineConfig;
use fieldvisit_core::errors::VisitError;
use fieldvisit_core::evidence::EvidencePayload;
use fieldvisit_core::geo;
use fieldvisit_core::state::template;
use fieldvisit_core::traits::PositionUpdate;
use fieldvisit_core::types::{
    AlertKind, ApprovalStatus, ConsentParty, MediaKind, Percentage, Severity, ThreadAuthor,
    VerificationStatus, VisitStatus,
};
use fieldvisit_engine::geofence::decision::Resolution;
use fieldvisit_engine::geofence::deviation::DeviationWorkflow;
use fieldvisit_engine::tasks::gate::VerificationInput;
use fieldvisit_engine::visit::machine::StartOutcome;
use test_helpers::*;

fn verification(task_id: &str, status: VerificationStatus) -> VerificationInput {
    VerificationInput {
        task_id: task_id.into(),
        status,
        completion_percentage: Percentage::full(),
        notes: String::new(),
    }
}

fn photo() -> EvidencePayload {
    EvidencePayload::MediaCapture {
        media: MediaKind::Photo,
        size_bytes: 48_213,
        duration_seconds: None,
        reference: "blob://demo/0001.jpg".into(),
    }
}

// ── Geofence ────────────────────────────────────────────────────

#[test]
fn haversine_is_bitwise_symmetric() {
    let t = target("t-1");
    let a = north_of(&t, 0.0, morning());
    let b = a.destination(137.0, 42.5);
    assert_eq!(
        geo::distance_km(&a, &b).to_bits(),
        geo::distance_km(&b, &a).to_bits()
    );
}

#[test]
fn just_outside_tolerance_without_reason_is_rejected() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let here = north_of(&t, 5.0001, now);

    let err = e.start_visit(t.clone(), Some(here), None, now).unwrap_err();
    match err {
        VisitError::DeviationReasonRequired {
            deviation_km,
            tolerance_km,
        } => {
            assert!(deviation_km > 5.0);
            assert_eq!(tolerance_km, 5.0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(e.visits().count(), 0);
    assert!(e.open_visit().is_none());

    let blank = e.start_visit(t, Some(here), Some("   "), now).unwrap_err();
    assert!(matches!(blank, VisitError::DeviationReasonRequired { .. }));
    assert!(e.sink().raised.is_empty());
}

#[test]
fn just_outside_tolerance_with_reason_awaits_approval() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let outcome = e
        .start_visit(t.clone(), Some(north_of(&t, 5.0001, now)), Some("gate locked"), now)
        .unwrap();

    let StartOutcome::AwaitingApproval {
        visit_id,
        alert_id,
        deviation_km,
        severity,
    } = outcome
    else {
        panic!("expected approval request, got {outcome:?}");
    };
    assert!(deviation_km > 5.0);
    assert_eq!(severity, Severity::Medium);

    let v = e.visit(&visit_id).unwrap();
    assert_eq!(v.status, VisitStatus::AwaitingDeviationApproval);
    assert_eq!(v.alerts.len(), 1);
    assert_eq!(v.alerts[0].id, alert_id);
    assert_eq!(v.alerts[0].approval, ApprovalStatus::Pending);
    assert!(!e.is_ticking(&visit_id));
    assert_eq!(e.sink().raised.len(), 1);
}

#[test]
fn target_without_valid_location_is_rejected() {
    let mut e = engine();
    let mut t = target("t-1");
    let now = morning();
    let here = north_of(&t, 0.0, now);
    t.declared_location.latitude = f64::NAN;

    let err = e.start_visit(t, Some(here), Some("gate locked"), now).unwrap_err();
    assert!(matches!(
        err,
        VisitError::InvalidTargetLocation { ref target_id, .. } if target_id == "t-1"
    ));
    assert_eq!(e.visits().count(), 0);
    assert!(e.open_visit().is_none());
    assert!(e.sink().raised.is_empty());
}

#[test]
fn punch_in_at_declared_location_has_zero_deviation() {
    let mut e = engine();
    let t = target("t-1");
    let outcome = e
        .start_visit(t.clone(), Some(t.declared_location), None, morning())
        .unwrap();
    assert_eq!(
        outcome,
        StartOutcome::Active {
            visit_id: outcome.visit_id().to_string(),
            deviation_km: 0.0,
        }
    );
}

#[test]
fn just_inside_tolerance_activates() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let outcome = e
        .start_visit(t.clone(), Some(north_of(&t, 4.9999, now)), None, now)
        .unwrap();

    let StartOutcome::Active { visit_id, deviation_km } = outcome else {
        panic!("expected active visit, got {outcome:?}");
    };
    assert!((deviation_km - 4.9999).abs() < 1e-6);

    let v = e.visit(&visit_id).unwrap();
    assert_eq!(v.status, VisitStatus::Active);
    assert_eq!(v.started_at, Some(now));
    assert!(v.task(template::PUNCH_IN).unwrap().completed);
    assert_eq!(v.tasks.len(), 8);
    assert!(e.is_ticking(&visit_id));
}

#[test]
fn severity_boundary_is_strict() {
    let wf = DeviationWorkflow::new(5.0, 10.0);
    assert_eq!(wf.severity_for(10.0), Severity::Medium);
    assert_eq!(wf.severity_for(10.0001), Severity::High);

    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let outcome = e
        .start_visit(t.clone(), Some(north_of(&t, 10.0001, now)), Some("road closed"), now)
        .unwrap();
    let StartOutcome::AwaitingApproval { severity, .. } = outcome else {
        panic!("expected approval request, got {outcome:?}");
    };
    assert_eq!(severity, Severity::High);
}

#[test]
fn missing_position_blocks_start() {
    let mut e = engine();
    let err = e
        .start_visit(target("t-1"), e.position_snapshot(), None, morning())
        .unwrap_err();
    assert_eq!(err, VisitError::position_unavailable("start visit"));
    assert_eq!(e.visits().count(), 0);

    let t = target("t-1");
    e.on_position(PositionUpdate::Fix(north_of(&t, 0.2, morning())), morning());
    assert!(e.position_snapshot().is_some());
    e.on_position(PositionUpdate::Error("gps timeout".into()), morning());
    assert!(e.position_snapshot().is_none());
}

#[test]
fn one_open_visit_per_rep() {
    let mut e = engine();
    let now = morning();
    let first = start_at_target(&mut e, &target("t-1"), now);

    let other = target("t-2");
    let err = e
        .start_visit(other.clone(), Some(north_of(&other, 0.0, now)), None, now)
        .unwrap_err();
    assert_eq!(
        err,
        VisitError::VisitAlreadyActive {
            rep_id: "rep-7".into(),
            visit_id: first,
        }
    );
}

// ── Deviation approval ──────────────────────────────────────────

#[test]
fn approved_deviation_activates_with_measured_distance() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();

    let outcome = e
        .start_visit(t.clone(), Some(north_of(&t, 8.0, now)), Some("vehicle breakdown"), now)
        .unwrap();
    let StartOutcome::AwaitingApproval {
        visit_id,
        alert_id,
        severity,
        ..
    } = outcome
    else {
        panic!("expected approval request, got {outcome:?}");
    };
    assert_eq!(severity, Severity::Medium);

    let v = e.visit(&visit_id).unwrap();
    assert_eq!(v.status, VisitStatus::AwaitingDeviationApproval);
    let alert = v.alert(&alert_id).unwrap();
    assert_eq!(alert.kind, AlertKind::RouteDeviation);
    assert_eq!(alert.approval, ApprovalStatus::Pending);
    assert_eq!(alert.thread[0].message, "vehicle breakdown");
    assert_eq!(e.sink().raised.len(), 1);
    assert!(!e.is_ticking(&visit_id));

    let approved_at = now + Duration::minutes(12);
    let status = e
        .resolve_alert(&visit_id, &alert_id, Resolution::Approve, "Meera Joshi", approved_at)
        .unwrap();
    assert_eq!(status, VisitStatus::Active);

    let v = e.visit(&visit_id).unwrap();
    assert!((v.deviation_km.unwrap() - 8.0).abs() < 1e-6);
    assert_eq!(v.started_at, Some(approved_at));
    assert!(v.task(template::PUNCH_IN).unwrap().completed);
    let alert = v.alert(&alert_id).unwrap();
    assert_eq!(alert.approval, ApprovalStatus::Approved);
    assert_eq!(alert.resolved_by.as_deref(), Some("Meera Joshi"));
    assert_eq!(e.sink().resolved.len(), 1);
    assert!(e.is_ticking(&visit_id));
}

#[test]
fn rejected_deviation_allows_retry_on_same_visit() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let outcome = e
        .start_visit(t.clone(), Some(north_of(&t, 8.0, now)), Some("traffic diversion"), now)
        .unwrap();
    let StartOutcome::AwaitingApproval { visit_id, alert_id, .. } = outcome else {
        panic!("expected approval request");
    };

    let status = e
        .resolve_alert(&visit_id, &alert_id, Resolution::Reject, "Meera Joshi", now)
        .unwrap();
    assert_eq!(status, VisitStatus::NotStarted);
    let v = e.visit(&visit_id).unwrap();
    assert!(v.punch_in_location.is_none());
    assert!(v.deviation_km.is_none());
    assert!(e.open_visit().is_none());

    let later = now + Duration::minutes(30);
    let retry = e
        .start_visit(t.clone(), Some(north_of(&t, 0.5, later)), None, later)
        .unwrap();
    assert_eq!(retry.visit_id(), visit_id);
    let v = e.visit(&visit_id).unwrap();
    assert_eq!(v.status, VisitStatus::Active);
    assert_eq!(v.alerts.len(), 1);
    assert_eq!(v.alerts[0].approval, ApprovalStatus::Rejected);
}

#[test]
fn thread_is_append_only_and_closes_on_resolution() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let outcome = e
        .start_visit(t.clone(), Some(north_of(&t, 7.0, now)), Some("bridge closed"), now)
        .unwrap();
    let StartOutcome::AwaitingApproval { visit_id, alert_id, .. } = outcome else {
        panic!("expected approval request");
    };

    e.approver_reply(&visit_id, &alert_id, "Meera Joshi", "share a photo of the closure", now)
        .unwrap();
    e.rep_reply(&visit_id, &alert_id, "photo attached", now).unwrap();
    e.amend_rep_message(&visit_id, &alert_id, 0, "bridge on NH48 closed", now)
        .unwrap();
    assert_eq!(
        e.amend_rep_message(&visit_id, &alert_id, 1, "not mine", now),
        Err(VisitError::NotMessageAuthor { index: 1 })
    );
    assert_eq!(
        e.rep_reply(&visit_id, &alert_id, "  ", now),
        Err(VisitError::EmptyMessage)
    );

    let thread = &e.visit(&visit_id).unwrap().alert(&alert_id).unwrap().thread;
    assert_eq!(thread.len(), 4);
    assert_eq!(thread[0].message, "bridge closed");
    assert_eq!(thread[1].from, ThreadAuthor::Approver);
    assert_eq!(thread[3].amends, Some(0));

    e.resolve_alert(&visit_id, &alert_id, Resolution::Approve, "Meera Joshi", now)
        .unwrap();
    assert!(matches!(
        e.rep_reply(&visit_id, &alert_id, "thanks", now),
        Err(VisitError::AlertAlreadyResolved { .. })
    ));
    assert_eq!(
        e.resolve_alert(&visit_id, &alert_id, Resolution::Reject, "Meera Joshi", now),
        Err(VisitError::AlertAlreadyResolved {
            alert_id: alert_id.clone(),
            approval: ApprovalStatus::Approved,
        })
    );
    assert_eq!(e.visit(&visit_id).unwrap().status, VisitStatus::Active);
}

// ── Task gate and closure ───────────────────────────────────────

#[test]
fn gate_blocks_until_mandatory_task_verified() {
    let mut e = engine_with(single_task_config(template::SIGNATURE));
    let now = morning();
    let id = start_at_target(&mut e, &target("t-1"), now);
    let end_at = now + Duration::minutes(40);
    let t = target("t-1");

    let err = e
        .end_visit(&id, "", false, Some(north_of(&t, 0.0, end_at)), end_at)
        .unwrap_err();
    assert_eq!(
        err,
        VisitError::GateNotSatisfied {
            outstanding: vec![template::SIGNATURE.into()]
        }
    );

    e.verify_task(&id, verification(template::SIGNATURE, VerificationStatus::NotStarted), now)
        .unwrap();
    assert!(matches!(
        e.end_visit(&id, "", false, Some(north_of(&t, 0.0, end_at)), end_at),
        Err(VisitError::GateNotSatisfied { .. })
    ));

    e.verify_task(&id, verification(template::SIGNATURE, VerificationStatus::Skipped), now)
        .unwrap();
    assert_eq!(
        e.verify_task(&id, verification(template::SIGNATURE, VerificationStatus::Completed), now),
        Err(VisitError::TaskAlreadyVerified(template::SIGNATURE.into()))
    );

    let v = e
        .end_visit(&id, "", false, Some(north_of(&t, 0.0, end_at)), end_at)
        .unwrap();
    assert_eq!(v.status, VisitStatus::Completed);
}

#[test]
fn clean_visit_completes_without_alerts() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);
    verify_all(&mut e, &id, now + Duration::minutes(40));

    let end_at = now + Duration::minutes(45);
    let v = e
        .end_visit(
            &id,
            "Demo plot looks healthy",
            false,
            Some(north_of(&t, 0.05, end_at)),
            end_at,
        )
        .unwrap();
    assert_eq!(v.status, VisitStatus::Completed);
    assert_eq!(v.elapsed_minutes(), 45);
    assert!(v.alerts.is_empty());
    assert_eq!(v.ended_at, Some(end_at));
    assert_eq!(v.notes.as_deref(), Some("Demo plot looks healthy"));
    assert!(v.task(template::NOTES).unwrap().completed);
    assert!(v.punch_out_location.is_some());

    assert_eq!(e.sink().completed.len(), 1);
    assert!(e.sink().raised.is_empty());
    assert!(!e.is_ticking(&id));
    assert!(e.open_visit().is_none());
}

#[test]
fn short_visit_needs_confirmation_and_pause_is_excluded() {
    let mut e = engine_with(single_task_config(template::STOCK_REVIEW));
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);
    verify_all(&mut e, &id, now);

    assert_eq!(e.toggle_pause(&id, now + Duration::minutes(10)).unwrap(), VisitStatus::Paused);
    assert!(!e.is_ticking(&id));
    assert!(e.tick(now + Duration::minutes(20)).is_empty());
    assert!(e.poll(now + Duration::minutes(20)).is_empty());
    assert_eq!(e.toggle_pause(&id, now + Duration::minutes(40)).unwrap(), VisitStatus::Active);

    let end_at = now + Duration::minutes(50);
    let err = e
        .end_visit(&id, "", false, Some(north_of(&t, 0.0, end_at)), end_at)
        .unwrap_err();
    assert_eq!(
        err,
        VisitError::DurationTooShort {
            elapsed_minutes: 20,
            minimum_minutes: 30
        }
    );
    assert_eq!(e.visit(&id).unwrap().status, VisitStatus::Active);

    let err = e.end_visit(&id, "", true, None, end_at).unwrap_err();
    assert_eq!(err, VisitError::position_unavailable("end visit"));

    let v = e
        .end_visit(&id, "", true, Some(north_of(&t, 0.0, end_at)), end_at)
        .unwrap();
    assert_eq!(v.status, VisitStatus::Completed);
    assert_eq!(v.elapsed_minutes(), 20);
    assert_eq!(v.paused_seconds, 30 * 60);
}

#[test]
fn end_requires_active_visit() {
    let mut e = engine();
    let now = morning();
    let id = start_at_target(&mut e, &target("t-1"), now);
    e.toggle_pause(&id, now).unwrap();
    assert_eq!(
        e.end_visit(&id, "", true, Some(north_of(&target("t-1"), 0.0, now)), now),
        Err(VisitError::invalid_transition(VisitStatus::Paused, "end visit"))
    );
}

// ── Evidence ────────────────────────────────────────────────────

#[test]
fn evidence_completes_matching_task() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);

    let here = Some(north_of(&t, 0.01, now));
    e.capture_evidence(&id, photo(), here, now).unwrap();
    e.capture_evidence(
        &id,
        EvidencePayload::SignatureCapture {
            signer_name: "Ramesh Shinde".into(),
            signer_role: Some("owner".into()),
            reference: "blob://sig/77.png".into(),
        },
        here,
        now,
    )
    .unwrap();

    let v = e.visit(&id).unwrap();
    assert_eq!(v.evidence.len(), 2);
    assert!(v.task(template::DEMONSTRATION).unwrap().completed);
    assert!(v.task(template::SIGNATURE).unwrap().completed);
    assert!(!v.task(template::DATABASE_CONSENT).unwrap().completed);
    assert_eq!(v.evidence.iter().next().unwrap().captured_by, "Anil Patil");
}

#[test]
fn invalid_evidence_is_not_recorded() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);
    let revision = e.visit(&id).unwrap().revision;

    let refused = EvidencePayload::ConsentCapture {
        party: ConsentParty::Farmer,
        name: "Sunita Pawar".into(),
        phone: "+91 98220 11223".into(),
        village: Some("Khed".into()),
        consent_given: false,
    };
    let err = e
        .capture_evidence(&id, refused, Some(north_of(&t, 0.0, now)), now)
        .unwrap_err();
    assert!(matches!(err, VisitError::InvalidEvidence(_)));

    let v = e.visit(&id).unwrap();
    assert!(v.evidence.is_empty());
    assert_eq!(v.revision, revision);
    assert!(!v.task(template::DATABASE_CONSENT).unwrap().completed);
}

// ── Compliance monitoring ───────────────────────────────────────

#[test]
fn two_sixty_km_legs_raise_one_distance_alert() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);

    let p1 = north_of(&t, 60.0, now);
    let p2 = p1.destination(0.0, 60.0);
    assert!(e.on_position(PositionUpdate::Fix(p1), now + Duration::minutes(60)).is_empty());
    let raised = e.on_position(PositionUpdate::Fix(p2), now + Duration::minutes(120));
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].kind, AlertKind::DistanceExceeded);
    assert_eq!(raised[0].severity, Severity::High);

    let p3 = p2.destination(0.0, 5.0);
    assert!(e.on_position(PositionUpdate::Fix(p3), now + Duration::minutes(130)).is_empty());
    assert!(e.tick(now + Duration::minutes(131)).is_empty());

    let v = e.visit(&id).unwrap();
    let distance_alerts = v
        .alerts
        .iter()
        .filter(|a| a.kind == AlertKind::DistanceExceeded)
        .count();
    assert_eq!(distance_alerts, 1);
    assert_eq!(e.sink().raised.len(), 1);
    assert!((e.route().unwrap().distance_km() - 125.0).abs() < 1e-6);
}

#[test]
fn working_hours_advisory_fires_on_poll() {
    let mut e = engine();
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap();
    let id = start_at_target(&mut e, &target("t-1"), start);

    assert!(e.poll(start).is_empty());
    assert!(e.poll(start + Duration::hours(8)).is_empty());

    let raised = e.poll(start + Duration::minutes(8 * 60 + 30));
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].kind, AlertKind::WorkingHoursShortfall);
    assert_eq!(raised[0].severity, Severity::Medium);
    assert!(e.poll(start + Duration::minutes(8 * 60 + 40)).is_empty());

    let v = e.visit(&id).unwrap();
    assert_eq!(v.elapsed_minutes(), 8 * 60 + 40);
    assert_eq!(v.status, VisitStatus::Active);
}

#[test]
fn late_check_in_is_flagged_once() {
    let config = EngineConfig {
        check_in_deadline: NaiveTime::from_hms_opt(10, 0, 0),
        ..EngineConfig::default()
    };
    let mut e = engine_with(config);
    let late = Utc.with_ymd_and_hms(2026, 3, 2, 11, 15, 0).unwrap();
    let id = start_at_target(&mut e, &target("t-1"), late);

    let v = e.visit(&id).unwrap();
    assert_eq!(v.alerts.len(), 1);
    assert_eq!(v.alerts[0].kind, AlertKind::LateCheckIn);
    assert_eq!(v.alerts[0].severity, Severity::Low);
    assert_eq!(e.sink().raised.len(), 1);
}

#[test]
fn daily_route_resets_on_new_day() {
    let mut e = engine();
    let t1 = target("t-1");
    let day_one = Utc.with_ymd_and_hms(2026, 3, 2, 17, 0, 0).unwrap();
    let first = start_at_target(&mut e, &t1, day_one);
    e.on_position(PositionUpdate::Fix(north_of(&t1, 60.0, day_one)), day_one);
    assert!((e.route().unwrap().distance_km() - 60.0).abs() < 1e-6);
    e.cancel_visit(&first, day_one + Duration::hours(1)).unwrap();

    let day_two = day_one + Duration::hours(16);
    start_at_target(&mut e, &target("t-2"), day_two);
    let route = e.route().unwrap();
    assert_eq!(route.day, day_two.date_naive());
    assert_eq!(route.points.len(), 1);
    assert!(route.distance_alert_id.is_none());
}

// ── Cancellation ────────────────────────────────────────────────

#[test]
fn cancel_while_awaiting_withdraws_request() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let outcome = e
        .start_visit(t.clone(), Some(north_of(&t, 8.0, now)), Some("vehicle breakdown"), now)
        .unwrap();
    let StartOutcome::AwaitingApproval { visit_id, alert_id, .. } = outcome else {
        panic!("expected approval request");
    };

    assert_eq!(e.cancel_visit(&visit_id, now).unwrap(), VisitStatus::NotStarted);
    let v = e.visit(&visit_id).unwrap();
    let alert = v.alert(&alert_id).unwrap();
    assert_eq!(alert.approval, ApprovalStatus::Rejected);
    assert_eq!(alert.resolved_by.as_deref(), Some("Anil Patil"));
    assert_eq!(alert.thread.len(), 2);
    assert!(v.punch_in_location.is_none());
    assert_eq!(e.sink().resolved.len(), 1);
    assert!(e.sink().cancelled.is_empty());
}

#[test]
fn cancel_active_visit_keeps_evidence() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);
    e.capture_evidence(&id, photo(), Some(north_of(&t, 0.0, now)), now)
        .unwrap();

    let at = now + Duration::minutes(15);
    assert_eq!(e.cancel_visit(&id, at).unwrap(), VisitStatus::Cancelled);
    assert_eq!(e.sink().cancelled.len(), 1);
    let v = &e.sink().cancelled[0];
    assert_eq!(v.evidence.len(), 1);
    assert_eq!(v.elapsed_minutes(), 15);
    assert_eq!(v.ended_at, Some(at));
    assert!(!e.is_ticking(&id));

    // Delivered with no pending alerts, so it is no longer held.
    assert!(e.visit(&id).is_none());
    assert_eq!(e.cancel_visit(&id, at), Err(VisitError::VisitNotFound(id.clone())));
    assert_eq!(
        e.capture_evidence(&id, photo(), Some(north_of(&t, 0.0, at)), at),
        Err(VisitError::VisitNotFound(id.clone()))
    );
}

#[test]
fn closed_visit_is_held_until_delivered() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);
    verify_all(&mut e, &id, now + Duration::minutes(40));

    let end_at = now + Duration::minutes(45);
    e.sink_mut().fail_next(1);
    e.end_visit(&id, "", false, Some(north_of(&t, 0.0, end_at)), end_at)
        .unwrap();
    assert_eq!(e.pending_notifications(), 1);
    assert_eq!(e.visit(&id).unwrap().status, VisitStatus::Completed);

    assert_eq!(e.flush_outbox().unwrap(), 1);
    assert_eq!(e.sink().completed[0].id, id);
    assert!(e.visit(&id).is_none());
    assert_eq!(e.visits().count(), 0);
}

#[test]
fn closed_visit_is_held_until_alerts_resolved() {
    let mut e = engine_with(EngineConfig {
        daily_distance_limit_km: 5.0,
        ..EngineConfig::default()
    });
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);
    verify_all(&mut e, &id, now + Duration::minutes(40));

    let end_at = now + Duration::minutes(45);
    let v = e
        .end_visit(&id, "", false, Some(north_of(&t, 6.0, end_at)), end_at)
        .unwrap();
    assert_eq!(v.status, VisitStatus::Completed);
    let pending: Vec<_> = v
        .alerts
        .iter()
        .filter(|a| !a.approval.is_resolved())
        .map(|a| a.id.clone())
        .collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(v.alerts[0].kind, AlertKind::DistanceExceeded);
    assert_eq!(e.visit(&id).unwrap().status, VisitStatus::Completed);

    for alert_id in &pending {
        e.resolve_alert(&id, alert_id, Resolution::Approve, "Meera Joshi", end_at)
            .unwrap();
    }
    assert_eq!(e.sink().resolved.len(), pending.len());
    assert!(e.visit(&id).is_none());
}

// ── Tasks and summary ───────────────────────────────────────────

#[test]
fn ad_hoc_task_joins_the_gate() {
    let mut e = engine_with(single_task_config(template::NOTES));
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);
    let task_id = e.add_task(&id, "Check shelf placement", true).unwrap();
    assert!(task_id.starts_with("adhoc-"));

    assert!(e.complete_task(&id, &task_id, now).unwrap());
    assert!(!e.complete_task(&id, &task_id, now).unwrap());

    let summary = e.summary(&id).unwrap();
    assert_eq!(summary.outstanding_tasks, vec![template::NOTES.to_string(), task_id.clone()]);
    assert_eq!(summary.evidence_count, 0);
    assert_eq!(summary.pending_alerts, 0);

    let n = e
        .verify_tasks(
            &id,
            vec![
                verification(template::NOTES, VerificationStatus::Completed),
                verification(&task_id, VerificationStatus::PartiallyCompleted),
            ],
            now,
        )
        .unwrap();
    assert_eq!(n, 2);
    assert!(e.summary(&id).unwrap().outstanding_tasks.is_empty());
}

#[test]
fn revision_increases_with_each_change() {
    let mut e = engine();
    let t = target("t-1");
    let now = morning();
    let id = start_at_target(&mut e, &t, now);
    let r0 = e.visit(&id).unwrap().revision;
    e.toggle_pause(&id, now + Duration::minutes(1)).unwrap();
    e.toggle_pause(&id, now + Duration::minutes(2)).unwrap();
    assert_eq!(e.visit(&id).unwrap().revision, r0 + 2);
}
