// Jail Executor
//
// Side-effecting half of the reconciler. Each operation works on a single
// tenant, is safe to re-run after a partial failure, and always returns a
// result instead of raising.
//
// Ordering rules:
// - Create: validate -> creation helper -> (optional) home bind mount.
//   A failed create is left as is; the next probe sees what remains.
// - Remove: unmount deepest first -> remove tree. Any real unmount failure
//   skips the tree removal, so data behind a live mount is never deleted.
// - Update: Remove, then Create only if Remove succeeded.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::JailConfig;
use super::error::{FailureReason, ProcessError};
use super::planner::Action;
use super::probe::JailFilesystemState;
use super::runner::PrivilegedRunner;
use super::tenant::{LoginName, TenantJailConfig};

/// Outcome of one executed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub result: Result<(), FailureReason>,

    /// The jail tree was removed during this action. True after a
    /// successful Remove, and after an Update whose Remove half succeeded
    /// even if the Create half then failed.
    pub torn_down: bool,
}

impl Execution {
    fn success(torn_down: bool) -> Self {
        Self {
            result: Ok(()),
            torn_down,
        }
    }

    fn failed(reason: impl Into<FailureReason>, torn_down: bool) -> Self {
        Self {
            result: Err(reason.into()),
            torn_down,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Performs privileged jail operations through a [`PrivilegedRunner`]
pub struct JailExecutor {
    config: JailConfig,
    runner: Arc<dyn PrivilegedRunner>,
}

impl JailExecutor {
    pub fn new(config: JailConfig, runner: Arc<dyn PrivilegedRunner>) -> Self {
        Self { config, runner }
    }

    /// Carry out a planned action
    pub async fn execute(
        &self,
        action: &Action,
        tenant: &TenantJailConfig,
        fs: &JailFilesystemState,
    ) -> Execution {
        match action {
            Action::NoOp { .. } => Execution::success(false),
            Action::Create { .. } => self.create(tenant).await,
            Action::Update { .. } => self.update(tenant, fs).await,
            Action::Remove { .. } => self.remove(tenant, fs).await,
        }
    }

    /// Provision a jail for a tenant whose jail root does not exist
    pub async fn create(&self, tenant: &TenantJailConfig) -> Execution {
        let login = match tenant.validate() {
            Ok(login) => login,
            Err(e) => return Execution::failed(e, false),
        };

        match self.provision(tenant, &login).await {
            Ok(()) => Execution::success(false),
            Err(e) => Execution::failed(e, false),
        }
    }

    /// Tear down a tenant's jail: unmount everything, then delete the tree
    pub async fn remove(&self, tenant: &TenantJailConfig, fs: &JailFilesystemState) -> Execution {
        let login = match LoginName::parse(&tenant.login_name) {
            Ok(login) => login,
            Err(e) => return Execution::failed(e, false),
        };

        match self.teardown(&login, fs).await {
            Ok(()) => Execution::success(true),
            Err(e) => Execution::failed(e, false),
        }
    }

    /// Rebuild a stale jail. Create is never attempted if Remove failed.
    pub async fn update(&self, tenant: &TenantJailConfig, fs: &JailFilesystemState) -> Execution {
        let login = match tenant.validate() {
            Ok(login) => login,
            Err(e) => return Execution::failed(e, false),
        };

        if let Err(e) = self.teardown(&login, fs).await {
            warn!(tenant_id = tenant.tenant_id, login = %login, "Update aborted, jail left in place: {}", e);
            return Execution::failed(e, false);
        }

        match self.provision(tenant, &login).await {
            Ok(()) => Execution::success(true),
            Err(e) => Execution::failed(e, true),
        }
    }

    async fn provision(&self, tenant: &TenantJailConfig, login: &LoginName) -> Result<(), ProcessError> {
        let root = self.config.jail_root(login);
        info!(tenant_id = tenant.tenant_id, login = %login, root = %root.display(), "Creating jail");

        self.runner
            .run(&self.config.create_invocation(tenant, login))
            .await?;

        if self.config.bind_home {
            let home = self.config.home_mount(login);
            tokio::fs::create_dir_all(&home)
                .await
                .map_err(|e| ProcessError::Io {
                    operation: "create home mount point",
                    path: home.clone(),
                    message: e.to_string(),
                })?;

            debug!(tenant_id = tenant.tenant_id, source = %tenant.document_root.display(), mount_point = %home.display(), "Binding tenant home");
            self.runner
                .run(&self.config.bind_invocation(&tenant.document_root, &home))
                .await?;
        }

        Ok(())
    }

    async fn teardown(&self, login: &LoginName, fs: &JailFilesystemState) -> Result<(), ProcessError> {
        let root = self.config.jail_root(login);

        for mount in fs.unmount_order() {
            // Only mounts under this tenant's jail root are ours to touch
            if !mount.starts_with(&root) {
                warn!(login = %login, mount = %mount.display(), "Ignoring mount outside jail root");
                continue;
            }

            match self.runner.run(&self.config.unmount_invocation(&mount)).await {
                Ok(_) => debug!(login = %login, mount = %mount.display(), "Unmounted"),
                Err(e) if e.is_not_mounted() => {
                    debug!(login = %login, mount = %mount.display(), "Already unmounted")
                }
                Err(e) => {
                    warn!(login = %login, mount = %mount.display(), "Unmount failed, keeping jail tree: {}", e);
                    return Err(e);
                }
            }
        }

        info!(login = %login, root = %root.display(), "Removing jail tree");
        self.runner
            .run(&self.config.remove_invocation(&root))
            .await?;

        Ok(())
    }
}
