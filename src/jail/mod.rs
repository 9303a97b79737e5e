// Tenant Chroot Jails
//
// Converges the chroot jails on a hosting server with the jail settings of
// the hosting panel's tenants. Each run:
// - loads the tenant snapshot from a config source
// - probes the filesystem and mount table for every tenant
// - plans one action per tenant (create, update, remove or nothing)
// - runs the privileged helpers for that action
// - persists what was applied, one record per tenant
//
// The filesystem is the source of truth for existence; the state store is
// the source of truth for which configuration was applied.

pub mod config;
pub mod error;
pub mod executor;
pub mod lock;
pub mod planner;
pub mod probe;
pub mod reconciler;
pub mod report;
pub mod runner;
pub mod source;
pub mod store;
pub mod tenant;

#[cfg(test)]
mod tests;

pub use config::JailConfig;
pub use error::{FailureKind, FailureReason, ReconcileError};
pub use executor::JailExecutor;
pub use planner::{plan, Action, ActionKind, Plan};
pub use probe::{FilesystemProber, HostProber, JailFilesystemState};
pub use reconciler::{ReconcileOptions, Reconciler};
pub use report::{RunReport, RunStatus, RunSummary, TracingSink};
pub use runner::{HostRunner, PrivilegedRunner};
pub use source::{CommandSource, ConfigSource, FileSource, StaticSource};
pub use store::{FileStateStore, JailStateRecord, JailStateStore, MemoryStateStore};
pub use tenant::{Fingerprint, LoginName, TenantJailConfig};

use anyhow::Result;
use std::path::Path;

/// Verify that every configured helper program exists
pub fn verify_helpers_installed(config: &JailConfig) -> Result<()> {
    let programs = config
        .privilege_wrapper
        .first()
        .into_iter()
        .chain(
            [
                &config.create_command,
                &config.mount_command,
                &config.unmount_command,
                &config.remove_command,
            ]
            .into_iter()
            .filter_map(|command| command.first()),
        );

    let missing: Vec<&String> = programs.filter(|p| !Path::new(p).exists()).collect();
    if !missing.is_empty() {
        anyhow::bail!("Jail helper programs not found: {:?}", missing);
    }

    Ok(())
}
