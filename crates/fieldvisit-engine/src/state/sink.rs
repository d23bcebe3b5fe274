use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fieldvisit_core::errors::SinkError;
use fieldvisit_core::state::Visit;
use fieldvisit_core::traits::{AlertNotice, VisitSink};

use super::atomic::{atomic_write, AdvisoryLock};
use super::ledger::HashChainLedger;

/// File-backed sink.
///
/// Layout under the root directory:
/// - `visits/<visit_id>.json`: archived completed or cancelled visit, written atomically
/// - `alerts.audit.jsonl`: hash-chained alert raise/resolve events
pub struct JsonlSink {
    root: PathBuf,
    alerts: HashChainLedger,
}

impl JsonlSink {
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root.join("visits"))
            .with_context(|| format!("cannot create sink directory {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            alerts: HashChainLedger::new(root.join("alerts.audit.jsonl")),
        })
    }

    pub fn visit_path(&self, visit_id: &str) -> PathBuf {
        self.root.join("visits").join(format!("{visit_id}.json"))
    }

    pub fn alert_ledger(&self) -> &HashChainLedger {
        &self.alerts
    }

    /// Load an archived visit.
    pub fn load_visit(&self, visit_id: &str) -> Result<Visit> {
        let path = self.visit_path(visit_id);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read visit {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("{}: invalid visit JSON", path.display()))
    }

    fn archive(&self, visit: &Visit) -> Result<()> {
        let path = self.visit_path(&visit.id);
        let lock = AdvisoryLock::acquire(&path)?;
        let json = serde_json::to_string_pretty(visit)?;
        atomic_write(&path, json.as_bytes())?;
        lock.release()
    }

    /// Append to the alert ledger, refusing to extend a broken chain.
    fn record(&self, event_type: &str, notice: &AlertNotice) -> Result<(), SinkError> {
        let _lock = AdvisoryLock::acquire(self.alerts.path()).map_err(write_failure)?;
        if let Some(index) = self.alerts.first_break().map_err(write_failure)? {
            return Err(SinkError::ChainCorruption(index));
        }
        let payload = serde_json::to_value(notice).map_err(|e| write_failure(e.into()))?;
        self.alerts
            .append(event_type, &payload)
            .map_err(write_failure)?;
        Ok(())
    }
}

fn write_failure(e: anyhow::Error) -> SinkError {
    SinkError::WriteFailure(format!("{e:#}"))
}

impl VisitSink for JsonlSink {
    fn visit_completed(&mut self, visit: &Visit) -> Result<(), SinkError> {
        self.archive(visit).map_err(write_failure)
    }

    fn visit_cancelled(&mut self, visit: &Visit) -> Result<(), SinkError> {
        self.archive(visit).map_err(write_failure)
    }

    fn alert_raised(&mut self, notice: &AlertNotice) -> Result<(), SinkError> {
        self.record("AlertRaised", notice)
    }

    fn alert_resolved(&mut self, notice: &AlertNotice) -> Result<(), SinkError> {
        self.record("AlertResolved", notice)
    }
}

/// In-memory sink that keeps every notification it receives.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub completed: Vec<Visit>,
    pub cancelled: Vec<Visit>,
    pub raised: Vec<AlertNotice>,
    pub resolved: Vec<AlertNotice>,
    failures_left: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` deliveries fail, as an unreachable backend would.
    pub fn fail_next(&mut self, n: usize) {
        self.failures_left = n;
    }

    fn gate(&mut self) -> Result<(), SinkError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(SinkError::WriteFailure("backend unavailable".into()));
        }
        Ok(())
    }
}

impl VisitSink for MemorySink {
    fn visit_completed(&mut self, visit: &Visit) -> Result<(), SinkError> {
        self.gate()?;
        self.completed.push(visit.clone());
        Ok(())
    }

    fn visit_cancelled(&mut self, visit: &Visit) -> Result<(), SinkError> {
        self.gate()?;
        self.cancelled.push(visit.clone());
        Ok(())
    }

    fn alert_raised(&mut self, notice: &AlertNotice) -> Result<(), SinkError> {
        self.gate()?;
        self.raised.push(notice.clone());
        Ok(())
    }

    fn alert_resolved(&mut self, notice: &AlertNotice) -> Result<(), SinkError> {
        self.gate()?;
        self.resolved.push(notice.clone());
        Ok(())
    }
}
