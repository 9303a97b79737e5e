// Tenant Jail Configuration
//
// Desired per-tenant jail state as exported by the hosting panel, plus the
// identifier validation every path-building step goes through.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use super::error::ValidationError;

/// Maximum login name length (matches the Linux user name limit)
pub const MAX_LOGIN_NAME_LEN: usize = 32;

/// Desired jail configuration for one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantJailConfig {
    /// Unique tenant identifier
    pub tenant_id: u64,

    /// Login name, used to derive the jail root. Untrusted input.
    pub login_name: String,

    /// Whether the tenant should have a jail at all
    pub jail_enabled: bool,

    /// Tenant web data, bind-mounted into the jail home
    pub document_root: PathBuf,

    /// Disk quota in KiB (0 = unlimited)
    #[serde(default)]
    pub disk_quota: u64,

    /// Runtime configurations (e.g. PHP-FPM pools) the jail must provide
    #[serde(default)]
    pub allowed_runtime_configs: Vec<u32>,
}

/// Fields that determine jail contents, in canonical form
#[derive(Serialize)]
struct FingerprintInput<'a> {
    login_name: &'a str,
    document_root: Cow<'a, str>,
    disk_quota: u64,
    allowed_runtime_configs: Vec<u32>,
}

impl TenantJailConfig {
    /// Stable hash over everything that affects jail contents.
    ///
    /// `jail_enabled` is excluded, and the order of
    /// `allowed_runtime_configs` does not matter.
    pub fn config_fingerprint(&self) -> Fingerprint {
        let mut runtime_configs = self.allowed_runtime_configs.clone();
        runtime_configs.sort_unstable();
        runtime_configs.dedup();

        let input = FingerprintInput {
            login_name: &self.login_name,
            document_root: self.document_root.to_string_lossy(),
            disk_quota: self.disk_quota,
            allowed_runtime_configs: runtime_configs,
        };

        // Only strings and integers, so serialization cannot fail
        let canonical = serde_json::to_vec(&input).unwrap_or_default();
        Fingerprint(format!("sha256:{}", hex::encode(Sha256::digest(&canonical))))
    }

    /// Validate every untrusted field before it touches a path or a process
    pub fn validate(&self) -> Result<LoginName, ValidationError> {
        let login = LoginName::parse(&self.login_name)?;
        validate_document_root(&self.document_root)?;
        Ok(login)
    }

    /// Runtime config ids as passed to the creation helper (`1,4,7`)
    pub fn runtime_configs_arg(&self) -> String {
        let mut ids = self.allowed_runtime_configs.clone();
        ids.sort_unstable();
        ids.dedup();
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Hash of the jail-relevant tenant configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A login name that is safe to use as a single path component and as a
/// discrete process argument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoginName(String);

impl LoginName {
    /// Validate a login name.
    ///
    /// Accepts 1 to 32 ASCII characters: an alphanumeric first character,
    /// then alphanumerics, `-` or `_`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = |reason| ValidationError::InvalidLoginName {
            login: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(invalid("cannot be empty"));
        }

        if raw.len() > MAX_LOGIN_NAME_LEN {
            return Err(invalid("too long (max 32 characters)"));
        }

        if !raw.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(invalid("must start with an alphanumeric character"));
        }

        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "can only contain alphanumeric characters, hyphens and underscores",
            ));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LoginName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document roots are bind-mount sources, so they must be absolute and
/// free of `..`
pub fn validate_document_root(path: &Path) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidDocumentRoot {
        path: path.to_path_buf(),
        reason,
    };

    if !path.is_absolute() {
        return Err(invalid("must be an absolute path"));
    }

    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(invalid("must not contain '..'"));
    }

    if path.as_os_str().as_encoded_bytes().contains(&0) {
        return Err(invalid("must not contain NUL bytes"));
    }

    Ok(())
}

/// Tenant snapshot as exported by the panel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub tenants: Vec<TenantJailConfig>,
}

#[cfg(test)]
pub(crate) fn test_tenant(tenant_id: u64, login: &str, enabled: bool) -> TenantJailConfig {
    TenantJailConfig {
        tenant_id,
        login_name: login.to_string(),
        jail_enabled: enabled,
        document_root: PathBuf::from(format!("/var/customers/webs/{}", login)),
        disk_quota: 1_048_576,
        allowed_runtime_configs: vec![1],
    }
}
