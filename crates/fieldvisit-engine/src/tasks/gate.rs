use chrono::{DateTime, Utc};
use fieldvisit_core::errors::VisitError;
use fieldvisit_core::state::{ChecklistItem, Task, TaskVerification, Visit};
use fieldvisit_core::types::{Percentage, VerificationStatus};
use serde::{Deserialize, Serialize};

/// Supervisor input for one task verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationInput {
    pub task_id: String,
    pub status: VerificationStatus,
    pub completion_percentage: Percentage,
    #[serde(default)]
    pub notes: String,
}

/// Keeps a visit from closing while mandatory tasks are unverified.
pub struct TaskGate;

impl TaskGate {
    /// Populate the checklist. Templates already present on the visit are skipped,
    /// so ad hoc tasks added before activation survive and re-seeding is a no-op.
    pub fn seed_default_tasks(visit: &mut Visit, checklist: &[ChecklistItem]) {
        for item in checklist {
            let exists = visit
                .tasks
                .iter()
                .any(|t| t.template_id.as_deref() == Some(item.template_id.as_str()));
            if exists {
                continue;
            }
            visit.tasks.push(Task {
                id: item.template_id.clone(),
                description: item.description.clone(),
                template_id: Some(item.template_id.clone()),
                requires_verification: item.requires_verification,
                completed: false,
                completed_at: None,
            });
        }
    }

    /// Append an ad hoc task and return its id.
    pub fn add_task(
        visit: &mut Visit,
        description: &str,
        requires_verification: bool,
    ) -> Result<String, VisitError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(VisitError::invalid_transition(
                visit.status,
                "add a task without a description",
            ));
        }
        let id = format!("adhoc-{}", uuid::Uuid::new_v4());
        visit.tasks.push(Task {
            id: id.clone(),
            description: description.to_string(),
            template_id: None,
            requires_verification,
            completed: false,
            completed_at: None,
        });
        Ok(id)
    }

    /// Mark a task completed. Returns false if it already was.
    pub fn complete(visit: &mut Visit, task_id: &str, now: DateTime<Utc>) -> Result<bool, VisitError> {
        let task = visit
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| VisitError::TaskNotFound(task_id.to_string()))?;
        if task.completed {
            return Ok(false);
        }
        task.completed = true;
        task.completed_at = Some(now);
        Ok(true)
    }

    /// Complete the task seeded from `template_id`, if any. Returns its id when newly completed.
    pub fn complete_template(
        visit: &mut Visit,
        template_id: &str,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let task = visit
            .tasks
            .iter_mut()
            .find(|t| t.template_id.as_deref() == Some(template_id))?;
        if task.completed {
            return None;
        }
        task.completed = true;
        task.completed_at = Some(now);
        Some(task.id.clone())
    }

    /// Record one verification.
    ///
    /// A prior verification with status `NotStarted` is superseded; any other is final.
    pub fn verify(
        visit: &mut Visit,
        input: VerificationInput,
        verified_by: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VisitError> {
        Self::check_input(visit, &input)?;
        Self::apply(visit, input, verified_by, now);
        Ok(())
    }

    /// Validate every input first, then record them all.
    pub fn verify_batch(
        visit: &mut Visit,
        inputs: Vec<VerificationInput>,
        verified_by: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, VisitError> {
        for (i, input) in inputs.iter().enumerate() {
            Self::check_input(visit, input)?;
            if inputs[..i].iter().any(|earlier| earlier.task_id == input.task_id) {
                return Err(VisitError::TaskAlreadyVerified(input.task_id.clone()));
            }
        }
        let count = inputs.len();
        for input in inputs {
            Self::apply(visit, input, verified_by, now);
        }
        Ok(count)
    }

    /// True iff every mandatory task has a verification other than `NotStarted`.
    pub fn can_close(visit: &Visit) -> bool {
        Self::outstanding(visit).is_empty()
    }

    /// Ids of mandatory tasks still blocking closure, in checklist order.
    pub fn outstanding(visit: &Visit) -> Vec<String> {
        visit
            .tasks
            .iter()
            .filter(|t| t.requires_verification)
            .filter(|t| {
                !visit
                    .verification_for(&t.id)
                    .is_some_and(TaskVerification::satisfies_gate)
            })
            .map(|t| t.id.clone())
            .collect()
    }

    /// `GateNotSatisfied` listing the outstanding tasks, if any.
    pub fn check(visit: &Visit) -> Result<(), VisitError> {
        let outstanding = Self::outstanding(visit);
        if outstanding.is_empty() {
            Ok(())
        } else {
            Err(VisitError::GateNotSatisfied { outstanding })
        }
    }

    fn check_input(visit: &Visit, input: &VerificationInput) -> Result<(), VisitError> {
        if visit.task(&input.task_id).is_none() {
            return Err(VisitError::TaskNotFound(input.task_id.clone()));
        }
        if visit
            .verification_for(&input.task_id)
            .is_some_and(TaskVerification::satisfies_gate)
        {
            return Err(VisitError::TaskAlreadyVerified(input.task_id.clone()));
        }
        Ok(())
    }

    fn apply(visit: &mut Visit, input: VerificationInput, verified_by: &str, now: DateTime<Utc>) {
        visit.verifications.retain(|v| v.task_id != input.task_id);
        visit.verifications.push(TaskVerification {
            task_id: input.task_id,
            status: input.status,
            completion_percentage: input.completion_percentage,
            notes: input.notes,
            verified_by: verified_by.to_string(),
            verified_at: now,
        });
    }
}
