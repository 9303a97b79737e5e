//! Reconciliation Loop
//!
//! One run: load the tenant snapshot, then for every tenant
//! validate -> probe -> plan -> execute -> persist, and report.
//!
//! Tenants are independent. Each one runs on a bounded worker pool and every
//! failure is converted to a [`TenantOutcome`] at the tenant boundary, so only
//! a failing config source aborts the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{FailureReason, PersistError, ProcessError, ReconcileError, ValidationError};
use super::executor::{Execution, JailExecutor};
use super::planner::{self, Action, ActionKind};
use super::probe::{FilesystemProber, JailFilesystemState};
use super::report::{ReportSink, RunReport, RunStatus, RunSummary, TenantOutcome};
use super::source::ConfigSource;
use super::store::{JailStateRecord, JailStateStore};
use super::tenant::TenantJailConfig;
use crate::logging::RunId;
use crate::metrics;

/// Default size of the worker pool
pub const DEFAULT_MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Tenants reconciled concurrently
    pub max_workers: usize,

    /// Probe and plan only. Nothing is executed or persisted.
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            dry_run: false,
        }
    }
}

/// Drives tenant jails toward the configured state
pub struct Reconciler {
    source: Arc<dyn ConfigSource>,
    worker: Arc<TenantWorker>,
    sink: Arc<dyn ReportSink>,
    options: ReconcileOptions,
    host: String,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        store: Arc<dyn JailStateStore>,
        prober: Arc<dyn FilesystemProber>,
        executor: Arc<JailExecutor>,
        sink: Arc<dyn ReportSink>,
        options: ReconcileOptions,
    ) -> Self {
        let worker = TenantWorker {
            store,
            prober,
            executor,
            sink: sink.clone(),
            dry_run: options.dry_run,
        };

        Self {
            source,
            worker: Arc::new(worker),
            sink,
            options,
            host: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
        }
    }

    /// Execute one reconciliation run.
    ///
    /// Cancelling `cancel` stops dispatch: tenants already started finish,
    /// the rest are counted as skipped and the run is `Incomplete`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport, ReconcileError> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let clock = Instant::now();

        let tenants = match self.source.list_tenants_with_jail_config().await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!(run_id = %run_id, "Failed to load tenant configuration: {}", e);
                metrics::record_run("fatal", clock.elapsed(), 0);
                return Err(e.into());
            }
        };

        self.sink.run_started(&run_id, &self.host, tenants.len());
        if self.options.dry_run {
            info!(run_id = %run_id, "Dry run: nothing will be executed or persisted");
        }

        let mut conflicts = find_conflicts(&tenants);
        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let mut workers = JoinSet::new();
        let mut in_flight: HashMap<task::Id, (u64, String)> = HashMap::new();
        let mut summary = RunSummary::default();
        let mut status = RunStatus::Complete;

        let total = tenants.len();
        for (index, tenant) in tenants.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                summary.skipped = total - index;
                status = RunStatus::Incomplete;
                warn!(run_id = %run_id, skipped = summary.skipped, "Run cancelled, remaining tenants skipped");
                break;
            };

            let conflict = conflicts.remove(&index);
            let worker = self.worker.clone();
            let identity = (tenant.tenant_id, tenant.login_name.clone());
            let handle = workers.spawn(async move {
                let _permit = permit;
                worker.reconcile(run_id, tenant, conflict).await
            });
            in_flight.insert(handle.id(), identity);
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = workers.join_next_with_id().await {
            let outcome = match joined {
                Ok((id, outcome)) => {
                    in_flight.remove(&id);
                    outcome
                }
                Err(e) => {
                    // A worker that dies still yields a failed outcome
                    let (tenant_id, login_name) = in_flight.remove(&e.id()).unwrap_or_default();
                    error!(run_id = %run_id, tenant_id, login = %login_name, "Tenant worker aborted: {}", e);
                    let outcome = TenantOutcome {
                        tenant_id,
                        login_name,
                        action: ActionKind::NoOp,
                        result: Err(ProcessError::Aborted {
                            message: e.to_string(),
                        }
                        .into()),
                    };
                    self.sink.tenant_action(&run_id, &outcome);
                    outcome
                }
            };
            summary.record(&outcome);
            outcomes.push(outcome);
        }
        outcomes.sort_by_key(|o| o.tenant_id);

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            status,
            summary,
            failures: outcomes.iter().filter_map(TenantOutcome::failure).collect(),
            outcomes,
        };

        metrics::record_run(status.as_str(), clock.elapsed(), report.summary.failed);
        self.sink.run_completed(&report);
        Ok(report)
    }
}

/// Per-tenant pipeline, shared by all workers of a run
struct TenantWorker {
    store: Arc<dyn JailStateStore>,
    prober: Arc<dyn FilesystemProber>,
    executor: Arc<JailExecutor>,
    sink: Arc<dyn ReportSink>,
    dry_run: bool,
}

impl TenantWorker {
    async fn reconcile(
        &self,
        run_id: RunId,
        tenant: TenantJailConfig,
        conflict: Option<ValidationError>,
    ) -> TenantOutcome {
        let (action, result) = self.converge(&tenant, conflict).await;

        if !self.dry_run && action != ActionKind::NoOp {
            metrics::record_action(action, result.is_ok());
        }

        let outcome = TenantOutcome {
            tenant_id: tenant.tenant_id,
            login_name: tenant.login_name,
            action,
            result,
        };
        self.sink.tenant_action(&run_id, &outcome);
        outcome
    }

    async fn converge(
        &self,
        tenant: &TenantJailConfig,
        conflict: Option<ValidationError>,
    ) -> (ActionKind, Result<(), FailureReason>) {
        let tenant_id = tenant.tenant_id;

        if let Some(conflict) = conflict {
            return (ActionKind::NoOp, Err(conflict.into()));
        }
        if let Err(e) = tenant.validate() {
            return (ActionKind::NoOp, Err(e.into()));
        }

        let fs = match self.prober.probe(tenant_id, &tenant.login_name).await {
            Ok(fs) => fs,
            Err(e) => JailFilesystemState::failed(tenant_id, e),
        };

        let record = match self.store.load(tenant_id).await {
            Ok(record) => record,
            Err(e) => return (ActionKind::NoOp, Err(e.into())),
        };

        let plan = planner::plan(tenant, record.as_ref(), &fs);
        let kind = plan.action.kind();
        if let Some(e) = plan.probe_error {
            return (kind, Err(e.into()));
        }

        debug!(
            tenant_id,
            login = %tenant.login_name,
            action = kind.as_str(),
            exists = fs.directory_exists,
            mounts = fs.mount_points.len(),
            "Planned"
        );

        if self.dry_run || kind == ActionKind::NoOp {
            return (kind, Ok(()));
        }

        let execution = self.executor.execute(&plan.action, tenant, &fs).await;
        let persisted = self.persist(&plan.action, record, &execution).await;

        let result = match (execution.result, persisted) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => Err(e.into()),
            (Err(reason), Ok(())) => Err(reason),
            (Err(reason), Err(e)) => {
                error!(tenant_id, "Failed to record failed {} attempt: {}", kind, e);
                Err(reason)
            }
        };
        (kind, result)
    }

    /// Write what the execution changed. The record only ever claims a
    /// fingerprint that was fully provisioned.
    async fn persist(
        &self,
        action: &Action,
        record: Option<JailStateRecord>,
        execution: &Execution,
    ) -> Result<(), PersistError> {
        let tenant_id = action.tenant_id();
        let kind = action.kind();

        match (&execution.result, action) {
            (Ok(()), Action::Create { fingerprint, .. } | Action::Update { fingerprint, .. }) => {
                self.store
                    .save(&JailStateRecord::applied(tenant_id, fingerprint.clone(), kind))
                    .await
            }
            (Ok(()), Action::Remove { .. }) => self.store.delete(tenant_id).await,
            (Ok(()), Action::NoOp { .. }) => Ok(()),
            (Err(reason), _) => {
                // A tenant that never had a jail gets no record for a failed attempt
                let Some(mut record) = record else {
                    return Ok(());
                };
                if execution.torn_down || kind == ActionKind::Create {
                    record.mark_torn_down();
                }
                record.record_failure(kind, reason);
                self.store.save(&record).await
            }
        }
    }
}

/// Tenants that share a tenant id or a login name (and so a jail root)
/// cannot be reconciled safely; all of them are rejected.
fn find_conflicts(tenants: &[TenantJailConfig]) -> HashMap<usize, ValidationError> {
    let mut by_id: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut by_login: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, tenant) in tenants.iter().enumerate() {
        by_id.entry(tenant.tenant_id).or_default().push(index);
        by_login
            .entry(tenant.login_name.as_str())
            .or_default()
            .push(index);
    }

    let mut conflicts = HashMap::new();
    for (tenant_id, indices) in by_id.iter().filter(|(_, v)| v.len() > 1) {
        for &index in indices {
            conflicts.insert(
                index,
                ValidationError::Duplicate {
                    tenant_id: *tenant_id,
                    reason: format!("tenant id appears {} times", indices.len()),
                },
            );
        }
    }
    for (login, indices) in by_login.iter().filter(|(_, v)| v.len() > 1) {
        let ids: Vec<u64> = indices.iter().map(|&i| tenants[i].tenant_id).collect();
        for &index in indices {
            conflicts.entry(index).or_insert_with(|| ValidationError::Duplicate {
                tenant_id: tenants[index].tenant_id,
                reason: format!("login name {:?} is shared by tenants {:?}", login, ids),
            });
        }
    }

    conflicts
}
