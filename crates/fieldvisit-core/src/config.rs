use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::state::{template, ChecklistItem};

/// Longest accepted compliance tick interval (one day).
pub const MAX_TICK_SECONDS: u64 = 86_400;

/// Thresholds and checklist driving the compliance engine.
///
/// Every field has a default, so `{}` is a complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum punch-in distance from the target that needs no approval.
    #[serde(default = "default_tolerance_km")]
    pub tolerance_km: f64,

    /// Deviations strictly above this are `High` severity.
    #[serde(default = "default_high_severity_km")]
    pub high_severity_km: f64,

    /// Start of the working-hours advisory window, in hours.
    #[serde(default = "default_working_hours_alert_from")]
    pub working_hours_alert_from_hours: f64,

    /// Minimum daily requirement; end of the advisory window (exclusive).
    #[serde(default = "default_required_working_hours")]
    pub required_working_hours: f64,

    #[serde(default = "default_daily_distance_limit_km")]
    pub daily_distance_limit_km: f64,

    #[serde(default = "default_min_visit_minutes")]
    pub min_visit_minutes: i64,

    /// Cadence at which hosts are expected to call `tick`.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,

    /// Visits activated after this UTC time of day raise `LateCheckIn`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in_deadline: Option<NaiveTime>,

    #[serde(default = "default_checklist")]
    pub checklist: Vec<ChecklistItem>,
}

fn default_tolerance_km() -> f64 {
    5.0
}

fn default_high_severity_km() -> f64 {
    10.0
}

fn default_working_hours_alert_from() -> f64 {
    8.5
}

fn default_required_working_hours() -> f64 {
    9.0
}

fn default_daily_distance_limit_km() -> f64 {
    110.0
}

fn default_min_visit_minutes() -> i64 {
    30
}

fn default_tick_seconds() -> u64 {
    1
}

pub fn default_checklist() -> Vec<ChecklistItem> {
    [
        (template::PUNCH_IN, "Confirm punch-in at the target"),
        (
            template::DEMONSTRATION,
            "Capture demonstration or field evidence photos",
        ),
        (template::PRODUCT_INPUT, "Record product inputs used"),
        (template::STOCK_REVIEW, "Review stock and liquidation"),
        (template::DATABASE_CONSENT, "Capture database consent"),
        (template::VIDEO_VERIFICATION, "Record verification video"),
        (template::SIGNATURE, "Capture signature"),
        (template::NOTES, "Write visit notes"),
    ]
    .into_iter()
    .map(|(id, description)| ChecklistItem {
        template_id: id.to_string(),
        description: description.to_string(),
        requires_verification: true,
    })
    .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance_km: default_tolerance_km(),
            high_severity_km: default_high_severity_km(),
            working_hours_alert_from_hours: default_working_hours_alert_from(),
            required_working_hours: default_required_working_hours(),
            daily_distance_limit_km: default_daily_distance_limit_km(),
            min_visit_minutes: default_min_visit_minutes(),
            tick_seconds: default_tick_seconds(),
            check_in_deadline: None,
            checklist: default_checklist(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("tolerance_km", self.tolerance_km),
            ("high_severity_km", self.high_severity_km),
            ("daily_distance_limit_km", self.daily_distance_limit_km),
            (
                "working_hours_alert_from_hours",
                self.working_hours_alert_from_hours,
            ),
            ("required_working_hours", self.required_working_hours),
        ] {
            if !v.is_finite() || v <= 0.0 {
                bail!("{name} must be a positive number, got {v}");
            }
        }
        if self.high_severity_km < self.tolerance_km {
            bail!(
                "high_severity_km ({}) is below tolerance_km ({})",
                self.high_severity_km,
                self.tolerance_km
            );
        }
        if self.working_hours_alert_from_hours >= self.required_working_hours {
            bail!(
                "working-hours window is empty: [{}, {})",
                self.working_hours_alert_from_hours,
                self.required_working_hours
            );
        }
        if self.min_visit_minutes < 0 {
            bail!("min_visit_minutes must not be negative");
        }
        if self.tick_seconds == 0 || self.tick_seconds > MAX_TICK_SECONDS {
            bail!(
                "tick_seconds must be between 1 and {MAX_TICK_SECONDS}, got {}",
                self.tick_seconds
            );
        }
        let mut seen = std::collections::HashSet::new();
        for item in &self.checklist {
            if !seen.insert(item.template_id.as_str()) {
                bail!("duplicate checklist template '{}'", item.template_id);
            }
        }
        Ok(())
    }
}

/// Load and validate engine configuration from a JSON file.
pub fn load_config(path: &str) -> Result<EngineConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read config {path}"))?;
    let config: EngineConfig =
        serde_json::from_str(&content).with_context(|| format!("{path}: invalid config JSON"))?;
    config
        .validate()
        .with_context(|| format!("{path}: invalid config"))?;
    Ok(config)
}
