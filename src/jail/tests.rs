// Reconciliation Loop Tests
//
// End-to-end runs against an in-memory host that plays both the filesystem
// prober and the privileged helper runner.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::config::JailConfig;
use super::error::{
    FailureKind, FailureReason, PersistError, ProbeError, ProcessError, ReconcileError,
    SourceError,
};
use super::executor::JailExecutor;
use super::planner::ActionKind;
use super::probe::{FilesystemProber, JailFilesystemState};
use super::reconciler::{ReconcileOptions, Reconciler};
use super::report::{RunReport, RunStatus, TracingSink};
use super::runner::{Helper, Invocation, PrivilegedRunner, ProcessOutput};
use super::source::{ConfigSource, StaticSource};
use super::store::{ActionOutcome, JailStateRecord, JailStateStore, MemoryStateStore};
use super::tenant::{test_tenant, LoginName, TenantJailConfig};

#[derive(Default)]
struct HostState {
    jail_roots: BTreeSet<PathBuf>,
    mounts: BTreeSet<PathBuf>,
    failing_probes: HashSet<String>,
    panicking_probes: HashSet<String>,
    cancel_on_create: Option<CancellationToken>,
    failing_creates: HashSet<String>,
    failing_unmounts: HashSet<PathBuf>,
    failing_removes: HashSet<PathBuf>,
    probed: Vec<String>,
    calls: Vec<Invocation>,
}

/// A host whose jails and mounts live in memory
struct FakeHost {
    base: PathBuf,
    state: Mutex<HostState>,
    creates_in_flight: AtomicUsize,
    max_creates_in_flight: AtomicUsize,
}

impl FakeHost {
    fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            state: Mutex::new(HostState::default()),
            creates_in_flight: AtomicUsize::new(0),
            max_creates_in_flight: AtomicUsize::new(0),
        }
    }

    fn root(&self, login: &str) -> PathBuf {
        self.base.join(login)
    }

    fn add_jail(&self, login: &str, mounts: &[&str]) {
        let root = self.root(login);
        let mut state = self.state.lock().unwrap();
        for mount in mounts {
            state.mounts.insert(root.join(mount));
        }
        state.jail_roots.insert(root);
    }

    /// Someone deleted the jail behind the reconciler's back
    fn wipe_jail(&self, login: &str) {
        let root = self.root(login);
        let mut state = self.state.lock().unwrap();
        state.mounts.retain(|m| !m.starts_with(&root));
        state.jail_roots.remove(&root);
    }

    fn has_jail(&self, login: &str) -> bool {
        self.state.lock().unwrap().jail_roots.contains(&self.root(login))
    }

    fn is_mounted(&self, path: &Path) -> bool {
        self.state.lock().unwrap().mounts.contains(path)
    }

    fn calls(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().calls.clone()
    }

    fn helpers(&self) -> Vec<Helper> {
        self.calls().iter().map(|c| c.helper).collect()
    }

    fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn with_state(&self, f: impl FnOnce(&mut HostState)) {
        f(&mut self.state.lock().unwrap());
    }

    fn failure(stderr: &str) -> ProcessError {
        ProcessError::Exit {
            program: "fake".to_string(),
            code: Some(1),
            stderr: stderr.to_string(),
        }
    }

    fn operand(invocation: &Invocation) -> PathBuf {
        invocation
            .args
            .last()
            .map(PathBuf::from)
            .unwrap_or_default()
    }
}

#[async_trait]
impl FilesystemProber for FakeHost {
    async fn probe(
        &self,
        tenant_id: u64,
        login_name: &str,
    ) -> Result<JailFilesystemState, ProbeError> {
        let login = LoginName::parse(login_name)
            .map_err(|_| ProbeError::InvalidIdentifier(login_name.to_string()))?;
        let root = self.root(login.as_str());
        let panics = self.state.lock().unwrap().panicking_probes.contains(login_name);
        if panics {
            panic!("prober crashed on {}", login_name);
        }
        let mut state = self.state.lock().unwrap();
        state.probed.push(login_name.to_string());

        if state.failing_probes.contains(login_name) {
            return Err(ProbeError::Io {
                path: root,
                message: "Permission denied".to_string(),
            });
        }
        if !state.jail_roots.contains(&root) {
            return Ok(JailFilesystemState::absent(tenant_id));
        }
        let mounts = state
            .mounts
            .iter()
            .filter(|m| m.starts_with(&root))
            .cloned()
            .collect::<Vec<_>>();
        Ok(JailFilesystemState::present(tenant_id, mounts))
    }
}

#[async_trait]
impl PrivilegedRunner for FakeHost {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        self.state.lock().unwrap().calls.push(invocation.clone());
        let operand = Self::operand(invocation);

        match invocation.helper {
            Helper::Create => {
                let cancel = self.state.lock().unwrap().cancel_on_create.take();
                if let Some(cancel) = cancel {
                    cancel.cancel();
                }
                let now = self.creates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_creates_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.creates_in_flight.fetch_sub(1, Ordering::SeqCst);

                let root = PathBuf::from(&invocation.args[0]);
                let login = operand.to_string_lossy().into_owned();
                let mut state = self.state.lock().unwrap();
                if state.failing_creates.contains(&login) {
                    return Err(Self::failure("make_jail.sh: debootstrap failed"));
                }
                state.jail_roots.insert(root);
            }
            Helper::Mount => {
                self.state.lock().unwrap().mounts.insert(operand);
            }
            Helper::Unmount => {
                let mut state = self.state.lock().unwrap();
                if state.failing_unmounts.contains(&operand) {
                    return Err(Self::failure("umount: target is busy."));
                }
                if !state.mounts.remove(&operand) {
                    return Err(Self::failure("umount: not mounted."));
                }
            }
            Helper::Remove => {
                let mut state = self.state.lock().unwrap();
                if state.failing_removes.contains(&operand) {
                    return Err(Self::failure("rm: cannot remove: Permission denied"));
                }
                if state.mounts.iter().any(|m| m.starts_with(&operand)) {
                    return Err(Self::failure("rm: skipping mount point"));
                }
                state.jail_roots.remove(&operand);
            }
            Helper::Export => {}
        }

        Ok(ProcessOutput::default())
    }
}

/// Store that accepts reads but refuses every write
struct ReadOnlyStore;

#[async_trait]
impl JailStateStore for ReadOnlyStore {
    async fn load(&self, _tenant_id: u64) -> Result<Option<JailStateRecord>, PersistError> {
        Ok(None)
    }

    async fn save(&self, record: &JailStateRecord) -> Result<(), PersistError> {
        Err(PersistError::Write {
            tenant_id: record.tenant_id,
            message: "Read-only file system".to_string(),
        })
    }

    async fn delete(&self, tenant_id: u64) -> Result<(), PersistError> {
        Err(PersistError::Delete {
            tenant_id,
            message: "Read-only file system".to_string(),
        })
    }

    async fn list(&self) -> Result<Vec<JailStateRecord>, PersistError> {
        Ok(Vec::new())
    }
}

struct BrokenSource;

#[async_trait]
impl ConfigSource for BrokenSource {
    async fn list_tenants_with_jail_config(&self) -> Result<Vec<TenantJailConfig>, SourceError> {
        Err(SourceError::Read {
            path: PathBuf::from("/var/lib/panel/tenants.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        })
    }
}

struct Harness {
    _dir: TempDir,
    host: Arc<FakeHost>,
    store: Arc<MemoryStateStore>,
    config: JailConfig,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("jails");
        Self {
            host: Arc::new(FakeHost::new(&base)),
            store: Arc::new(MemoryStateStore::new()),
            config: JailConfig::with_base_dir(base),
            _dir: dir,
        }
    }

    fn reconciler_with(
        &self,
        source: Arc<dyn ConfigSource>,
        store: Arc<dyn JailStateStore>,
        options: ReconcileOptions,
    ) -> Reconciler {
        let executor = JailExecutor::new(self.config.clone(), self.host.clone());
        Reconciler::new(
            source,
            store,
            self.host.clone(),
            Arc::new(executor),
            Arc::new(TracingSink),
            options,
        )
    }

    async fn run_with(&self, tenants: &[TenantJailConfig], options: ReconcileOptions) -> RunReport {
        self.reconciler_with(
            Arc::new(StaticSource::new(tenants.to_vec())),
            self.store.clone(),
            options,
        )
        .run(CancellationToken::new())
        .await
        .unwrap()
    }

    async fn run(&self, tenants: &[TenantJailConfig]) -> RunReport {
        self.run_with(tenants, ReconcileOptions::default()).await
    }

    async fn record(&self, tenant_id: u64) -> Option<JailStateRecord> {
        self.store.load(tenant_id).await.unwrap()
    }
}

fn failure_kind(report: &RunReport, tenant_id: u64) -> Option<FailureKind> {
    report
        .outcome(tenant_id)
        .and_then(|o| o.result.as_ref().err())
        .map(FailureReason::kind)
}

#[tokio::test]
async fn test_convergence_creates_jail_and_records_fingerprint() {
    let h = Harness::new();
    let tenant = test_tenant(1, "web1", true);

    let report = h.run(std::slice::from_ref(&tenant)).await;

    assert!(report.is_clean());
    assert_eq!(report.summary.created, 1);
    assert!(h.host.has_jail("web1"));
    assert!(h.host.is_mounted(&h.host.root("web1").join("home/web1")));

    let record = h.record(1).await.unwrap();
    assert_eq!(record.applied_fingerprint, Some(tenant.config_fingerprint()));
    assert!(record.jail_present);
    assert_eq!(record.last_action, ActionKind::Create);
    assert_eq!(record.last_action_result, ActionOutcome::Success);
}

#[tokio::test]
async fn test_second_run_is_all_noop() {
    let h = Harness::new();
    let tenants = vec![
        test_tenant(1, "web1", true),
        test_tenant(2, "web2", true),
        test_tenant(3, "web3", false),
    ];

    h.run(&tenants).await;
    h.host.clear_calls();

    let report = h.run(&tenants).await;
    assert_eq!(report.summary.noop, 3);
    assert_eq!(report.summary.total(), 3);
    assert!(h.host.calls().is_empty());
}

#[tokio::test]
async fn test_externally_deleted_jail_is_recreated() {
    let h = Harness::new();
    let tenants = vec![test_tenant(1, "web1", true)];
    h.run(&tenants).await;

    h.host.wipe_jail("web1");
    assert!(h.record(1).await.unwrap().jail_present);

    let report = h.run(&tenants).await;
    assert_eq!(report.outcome(1).unwrap().action, ActionKind::Create);
    assert!(report.is_clean());
    assert!(h.host.has_jail("web1"));
}

#[tokio::test]
async fn test_manually_created_jail_without_record_is_rebuilt() {
    let h = Harness::new();
    h.host.add_jail("web1", &[]);

    let report = h.run(&[test_tenant(1, "web1", true)]).await;
    assert_eq!(report.outcome(1).unwrap().action, ActionKind::Update);
    assert!(report.is_clean());
    assert!(h.record(1).await.unwrap().applied_fingerprint.is_some());
}

#[tokio::test]
async fn test_disable_unmounts_deepest_first_then_removes() {
    let h = Harness::new();
    let enabled = test_tenant(1, "web1", true);
    h.run(std::slice::from_ref(&enabled)).await;
    h.host.add_jail("web1", &["home"]);
    h.host.clear_calls();

    let mut disabled = enabled.clone();
    disabled.jail_enabled = false;
    let report = h.run(&[disabled]).await;

    assert_eq!(report.summary.removed, 1);
    let root = h.host.root("web1");
    let calls = h.host.calls();
    let operands: Vec<PathBuf> = calls.iter().map(FakeHost::operand).collect();
    assert_eq!(
        h.host.helpers(),
        vec![Helper::Unmount, Helper::Unmount, Helper::Remove]
    );
    assert_eq!(
        operands,
        vec![root.join("home/web1"), root.join("home"), root.clone()]
    );
    assert!(!h.host.has_jail("web1"));
    assert!(h.record(1).await.is_none());
}

#[tokio::test]
async fn test_unmount_failure_keeps_tree_and_state() {
    let h = Harness::new();
    let enabled = test_tenant(1, "web1", true);
    h.run(std::slice::from_ref(&enabled)).await;
    h.host.add_jail("web1", &["home"]);
    let root = h.host.root("web1");
    h.host.with_state(|s| {
        s.failing_unmounts.insert(root.join("home"));
    });
    h.host.clear_calls();

    let mut disabled = enabled.clone();
    disabled.jail_enabled = false;
    let report = h.run(&[disabled]).await;

    assert_eq!(failure_kind(&report, 1), Some(FailureKind::Process));
    assert!(!h.host.helpers().contains(&Helper::Remove));
    assert!(h.host.has_jail("web1"));

    let record = h.record(1).await.unwrap();
    assert!(record.jail_present);
    assert_eq!(record.last_action, ActionKind::Remove);
    assert!(matches!(
        record.last_action_result,
        ActionOutcome::Failed {
            kind: FailureKind::Process,
            ..
        }
    ));
}

#[tokio::test]
async fn test_update_with_failing_remove_keeps_applied_state() {
    let h = Harness::new();
    let tenant = test_tenant(1, "web1", true);
    h.run(std::slice::from_ref(&tenant)).await;
    let before = h.record(1).await.unwrap();

    let root = h.host.root("web1");
    h.host.with_state(|s| {
        s.failing_removes.insert(root.clone());
    });
    h.host.clear_calls();

    let mut changed = tenant.clone();
    changed.disk_quota *= 2;
    let report = h.run(std::slice::from_ref(&changed)).await;

    assert_eq!(report.outcome(1).unwrap().action, ActionKind::Update);
    assert_eq!(failure_kind(&report, 1), Some(FailureKind::Process));
    assert!(!h.host.helpers().contains(&Helper::Create));

    let after = h.record(1).await.unwrap();
    assert_eq!(after.applied_fingerprint, before.applied_fingerprint);
    assert_eq!(after.jail_present, before.jail_present);
    assert_eq!(after.last_action, ActionKind::Update);
}

#[tokio::test]
async fn test_update_rebuilds_with_new_fingerprint() {
    let h = Harness::new();
    let tenant = test_tenant(1, "web1", true);
    h.run(std::slice::from_ref(&tenant)).await;
    h.host.clear_calls();

    let mut changed = tenant.clone();
    changed.allowed_runtime_configs = vec![1, 2];
    let report = h.run(std::slice::from_ref(&changed)).await;

    assert_eq!(report.summary.updated, 1);
    assert_eq!(
        h.host.helpers(),
        vec![
            Helper::Unmount,
            Helper::Remove,
            Helper::Create,
            Helper::Mount
        ]
    );
    let record = h.record(1).await.unwrap();
    assert_eq!(record.applied_fingerprint, Some(changed.config_fingerprint()));
    assert_eq!(record.last_action, ActionKind::Update);
}

#[tokio::test]
async fn test_update_with_failing_create_records_teardown() {
    let h = Harness::new();
    let tenant = test_tenant(1, "web1", true);
    h.run(std::slice::from_ref(&tenant)).await;
    h.host.with_state(|s| {
        s.failing_creates.insert("web1".to_string());
    });

    let mut changed = tenant.clone();
    changed.disk_quota += 1;
    let report = h.run(std::slice::from_ref(&changed)).await;
    assert_eq!(failure_kind(&report, 1), Some(FailureKind::Process));

    let record = h.record(1).await.unwrap();
    assert_eq!(record.applied_fingerprint, None);
    assert!(!record.jail_present);

    // Helper fixed: next run recreates
    h.host.with_state(|s| s.failing_creates.clear());
    let report = h.run(std::slice::from_ref(&changed)).await;
    assert_eq!(report.outcome(1).unwrap().action, ActionKind::Create);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_failed_create_of_new_tenant_is_not_persisted() {
    let h = Harness::new();
    h.host.with_state(|s| {
        s.failing_creates.insert("web1".to_string());
    });

    let report = h.run(&[test_tenant(1, "web1", true)]).await;
    assert_eq!(failure_kind(&report, 1), Some(FailureKind::Process));
    assert!(h.record(1).await.is_none());
    assert!(!h.host.has_jail("web1"));
}

#[tokio::test]
async fn test_invalid_identifiers_rejected_before_any_side_effect() {
    let h = Harness::new();
    let tenants = vec![
        test_tenant(1, "../../etc", true),
        test_tenant(2, "web2/../../root", false),
        test_tenant(3, "web3;rm -rf /", true),
        test_tenant(4, "$(reboot)", false),
        test_tenant(5, "..", true),
    ];

    let report = h.run(&tenants).await;

    assert_eq!(report.summary.failed, 5);
    for id in 1..=5 {
        assert_eq!(failure_kind(&report, id), Some(FailureKind::Validation));
    }
    assert!(report.failures.iter().all(|f| !f.retriable));
    assert!(h.host.calls().is_empty());
    h.host.with_state(|s| assert!(s.probed.is_empty()));
}

#[tokio::test]
async fn test_invalid_document_root_rejected() {
    let h = Harness::new();
    let mut tenant = test_tenant(1, "web1", true);
    tenant.document_root = PathBuf::from("relative/webs/web1");

    let report = h.run(&[tenant]).await;
    assert_eq!(failure_kind(&report, 1), Some(FailureKind::Validation));
    assert!(h.host.calls().is_empty());
}

#[tokio::test]
async fn test_probe_failure_is_isolated() {
    let h = Harness::new();
    let tenants: Vec<_> = (1..=10)
        .map(|id| test_tenant(id, &format!("web{}", id), true))
        .collect();
    h.host.with_state(|s| {
        s.failing_probes.insert("web3".to_string());
    });

    let report = h.run(&tenants).await;

    assert_eq!(report.summary.created, 9);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].tenant_id, 3);
    assert_eq!(report.failures[0].kind, FailureKind::Probe);
    assert_eq!(report.outcome(3).unwrap().action, ActionKind::NoOp);
    assert!(!h.host.has_jail("web3"));
    assert!(h.record(3).await.is_none());
    for id in (1..=10).filter(|id| *id != 3) {
        assert!(h.host.has_jail(&format!("web{}", id)));
    }
}

#[tokio::test]
async fn test_duplicate_login_names_rejected() {
    let h = Harness::new();
    let tenants = vec![
        test_tenant(1, "web1", true),
        test_tenant(2, "web1", false),
        test_tenant(3, "web3", true),
    ];

    let report = h.run(&tenants).await;

    assert_eq!(failure_kind(&report, 1), Some(FailureKind::Validation));
    assert_eq!(failure_kind(&report, 2), Some(FailureKind::Validation));
    assert_eq!(report.summary.created, 1);
    assert!(!h.host.has_jail("web1"));
}

#[tokio::test]
async fn test_persist_failure_is_reported() {
    let h = Harness::new();
    let reconciler = h.reconciler_with(
        Arc::new(StaticSource::new(vec![test_tenant(1, "web1", true)])),
        Arc::new(ReadOnlyStore),
        ReconcileOptions::default(),
    );

    let report = reconciler.run(CancellationToken::new()).await.unwrap();
    assert_eq!(failure_kind(&report, 1), Some(FailureKind::Persist));
    assert!(report.failures[0].retriable);
    assert!(h.host.has_jail("web1"));
}

#[tokio::test]
async fn test_config_source_failure_aborts_run() {
    let h = Harness::new();
    let reconciler = h.reconciler_with(
        Arc::new(BrokenSource),
        h.store.clone(),
        ReconcileOptions::default(),
    );

    let err = reconciler.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::FatalConfig(_)));
    assert!(h.host.calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_skips_everything() {
    let h = Harness::new();
    let tenants: Vec<_> = (1..=4)
        .map(|id| test_tenant(id, &format!("web{}", id), true))
        .collect();
    let reconciler = h.reconciler_with(
        Arc::new(StaticSource::new(tenants)),
        h.store.clone(),
        ReconcileOptions::default(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = reconciler.run(cancel).await.unwrap();

    assert_eq!(report.status, RunStatus::Incomplete);
    assert_eq!(report.summary.skipped, 4);
    assert!(report.outcomes.is_empty());
    assert!(!report.is_clean());
    assert!(h.host.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_mid_run_finishes_in_flight_tenant() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    h.host.with_state(|s| s.cancel_on_create = Some(cancel.clone()));
    let tenants: Vec<_> = (1..=3)
        .map(|id| test_tenant(id, &format!("web{}", id), true))
        .collect();
    let reconciler = h.reconciler_with(
        Arc::new(StaticSource::new(tenants)),
        h.store.clone(),
        ReconcileOptions {
            max_workers: 1,
            ..Default::default()
        },
    );

    let report = reconciler.run(cancel).await.unwrap();

    assert_eq!(report.status, RunStatus::Incomplete);
    assert_eq!(report.summary.created, 1);
    assert_eq!(report.summary.skipped, 2);
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.outcome(1).unwrap().result.is_ok());
    assert!(h.host.has_jail("web1"));
    assert!(!h.host.has_jail("web2"));
    assert!(!h.host.has_jail("web3"));

    let record = h.record(1).await.unwrap();
    assert_eq!(
        record.applied_fingerprint,
        Some(test_tenant(1, "web1", true).config_fingerprint())
    );
    assert!(h.record(2).await.is_none());
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_panicking_worker_is_reported_as_failure() {
    let h = Harness::new();
    h.host.with_state(|s| {
        s.panicking_probes.insert("web2".to_string());
    });
    let tenants = vec![test_tenant(1, "web1", true), test_tenant(2, "web2", true)];

    let report = h.run(&tenants).await;

    assert_eq!(report.summary.created, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].tenant_id, 2);
    assert_eq!(report.failures[0].login_name, "web2");
    assert_eq!(report.failures[0].kind, FailureKind::Process);
    assert!(matches!(
        report.outcome(2).unwrap().result,
        Err(FailureReason::Process(ProcessError::Aborted { .. }))
    ));
    assert!(!report.is_clean());
    assert!(h.host.has_jail("web1"));
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let h = Harness::new();
    h.host.add_jail("web2", &["home/web2"]);
    let tenants = vec![test_tenant(1, "web1", true), test_tenant(2, "web2", false)];

    let report = h
        .run_with(
            &tenants,
            ReconcileOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(report.outcome(1).unwrap().action, ActionKind::Create);
    assert_eq!(report.outcome(2).unwrap().action, ActionKind::Remove);
    assert!(h.host.calls().is_empty());
    assert!(h.store.list().await.unwrap().is_empty());
    assert!(h.host.has_jail("web2"));
}

#[tokio::test]
async fn test_worker_pool_is_bounded() {
    let h = Harness::new();
    let tenants: Vec<_> = (1..=8)
        .map(|id| test_tenant(id, &format!("web{}", id), true))
        .collect();

    let report = h
        .run_with(
            &tenants,
            ReconcileOptions {
                max_workers: 2,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(report.summary.created, 8);
    assert!(h.host.max_creates_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_outcomes_sorted_by_tenant_id() {
    let h = Harness::new();
    let tenants = vec![
        test_tenant(30, "web30", true),
        test_tenant(10, "web10", true),
        test_tenant(20, "web20", false),
    ];

    let report = h.run(&tenants).await;
    let ids: Vec<u64> = report.outcomes.iter().map(|o| o.tenant_id).collect();
    assert_eq!(ids, vec![10, 20, 30]);
}
