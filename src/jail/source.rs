//! Tenant Config Sources
//!
//! Where the desired state comes from. A source either returns the complete
//! snapshot or fails; a partial snapshot would make the reconciler remove
//! jails for tenants that merely went missing from a truncated read.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::error::{ProcessError, SourceError};
use super::runner::{Helper, Invocation, PrivilegedRunner};
use super::tenant::{TenantJailConfig, TenantSnapshot};

/// Read-only view of the hosting panel's tenant configuration
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn list_tenants_with_jail_config(&self) -> Result<Vec<TenantJailConfig>, SourceError>;
}

/// JSON snapshot file: `{"tenants": [...]}`
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn list_tenants_with_jail_config(&self) -> Result<Vec<TenantJailConfig>, SourceError> {
        let contents = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Read {
                path: self.path.clone(),
                source,
            })?;
        let snapshot = parse_snapshot(&contents)?;
        debug!(path = %self.path.display(), tenants = snapshot.len(), "Loaded tenant snapshot");
        Ok(snapshot)
    }
}

/// Runs an exporter and parses the snapshot from its stdout
pub struct CommandSource {
    argv: Vec<String>,
    runner: Arc<dyn PrivilegedRunner>,
}

impl CommandSource {
    pub fn new(argv: Vec<String>, runner: Arc<dyn PrivilegedRunner>) -> Self {
        Self { argv, runner }
    }
}

#[async_trait]
impl ConfigSource for CommandSource {
    async fn list_tenants_with_jail_config(&self) -> Result<Vec<TenantJailConfig>, SourceError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(SourceError::Command(ProcessError::Spawn {
                program: String::new(),
                message: "empty export command".to_string(),
            }));
        };

        let invocation = Invocation {
            helper: Helper::Export,
            program: program.into(),
            args: args.iter().map(Into::into).collect(),
            env: Vec::new(),
        };

        let output = self.runner.run(&invocation).await?;
        let snapshot = parse_snapshot(&output.stdout)?;
        debug!(program = %program, tenants = snapshot.len(), "Loaded tenant snapshot from exporter");
        Ok(snapshot)
    }
}

/// Fixed tenant list, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    tenants: Vec<TenantJailConfig>,
}

impl StaticSource {
    pub fn new(tenants: Vec<TenantJailConfig>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl ConfigSource for StaticSource {
    async fn list_tenants_with_jail_config(&self) -> Result<Vec<TenantJailConfig>, SourceError> {
        Ok(self.tenants.clone())
    }
}

fn parse_snapshot(bytes: &[u8]) -> Result<Vec<TenantJailConfig>, SourceError> {
    let snapshot: TenantSnapshot = serde_json::from_slice(bytes)?;
    Ok(snapshot.tenants)
}
