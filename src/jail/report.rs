//! Run Reporting
//!
//! The summary of one reconciliation run and the sink it is handed to.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::error::{FailureKind, FailureReason};
use super::planner::ActionKind;
use crate::logging::RunId;

/// Whether every tenant was visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    /// Cancelled before every tenant was dispatched
    Incomplete,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::Incomplete => "incomplete",
        }
    }
}

/// Per-action counts. A tenant is counted once: under `failed` if its
/// reconciliation failed, otherwise under the action it took.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub noop: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &TenantOutcome) {
        if outcome.result.is_err() {
            self.failed += 1;
            return;
        }
        match outcome.action {
            ActionKind::Create => self.created += 1,
            ActionKind::Update => self.updated += 1,
            ActionKind::Remove => self.removed += 1,
            ActionKind::NoOp => self.noop += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.removed + self.noop + self.failed + self.skipped
    }
}

/// What happened to one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantOutcome {
    pub tenant_id: u64,
    pub login_name: String,
    pub action: ActionKind,
    pub result: Result<(), FailureReason>,
}

impl TenantOutcome {
    pub fn failure(&self) -> Option<TenantFailure> {
        self.result.as_ref().err().map(|reason| TenantFailure {
            tenant_id: self.tenant_id,
            login_name: self.login_name.clone(),
            action: self.action,
            kind: reason.kind(),
            reason: reason.to_string(),
            retriable: reason.is_retriable(),
        })
    }
}

/// A failed tenant with a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantFailure {
    pub tenant_id: u64,
    pub login_name: String,
    pub action: ActionKind,
    pub kind: FailureKind,
    pub reason: String,
    pub retriable: bool,
}

/// Result of one reconciliation run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub summary: RunSummary,
    /// Sorted by tenant id
    pub outcomes: Vec<TenantOutcome>,
    pub failures: Vec<TenantFailure>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Complete && self.failures.is_empty() && self.summary.failed == 0
    }

    pub fn duration(&self) -> std::time::Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn outcome(&self, tenant_id: u64) -> Option<&TenantOutcome> {
        self.outcomes.iter().find(|o| o.tenant_id == tenant_id)
    }
}

/// Receives run lifecycle events
pub trait ReportSink: Send + Sync {
    fn run_started(&self, run_id: &RunId, host: &str, tenants: usize);
    fn tenant_action(&self, run_id: &RunId, outcome: &TenantOutcome);
    fn run_completed(&self, report: &RunReport);
}

/// Emits run events as structured log records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn run_started(&self, run_id: &RunId, host: &str, tenants: usize) {
        info!(run_id = %run_id, host, tenants, "Reconciliation run started");
    }

    fn tenant_action(&self, run_id: &RunId, outcome: &TenantOutcome) {
        match &outcome.result {
            Ok(()) => info!(
                run_id = %run_id,
                tenant_id = outcome.tenant_id,
                login = %outcome.login_name,
                action = outcome.action.as_str(),
                result = "success",
                "Tenant reconciled"
            ),
            Err(reason @ FailureReason::Persist(_)) => error!(
                run_id = %run_id,
                tenant_id = outcome.tenant_id,
                login = %outcome.login_name,
                action = outcome.action.as_str(),
                result = "failed",
                "Tenant state not persisted: {}",
                reason
            ),
            Err(reason) => warn!(
                run_id = %run_id,
                tenant_id = outcome.tenant_id,
                login = %outcome.login_name,
                action = outcome.action.as_str(),
                result = "failed",
                retriable = reason.is_retriable(),
                "Tenant failed: {}",
                reason
            ),
        }
    }

    fn run_completed(&self, report: &RunReport) {
        let s = &report.summary;
        info!(
            run_id = %report.run_id,
            status = report.status.as_str(),
            created = s.created,
            updated = s.updated,
            removed = s.removed,
            noop = s.noop,
            failed = s.failed,
            skipped = s.skipped,
            duration_ms = report.duration().as_millis() as u64,
            "Reconciliation run completed"
        );
    }
}
