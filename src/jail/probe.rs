//! Filesystem Prober
//!
//! Establishes what actually exists on the host for a tenant: whether the
//! jail root is there and which mounts are live under it. The prober is
//! read-only and independent of the state store, so it catches jails that
//! were deleted or created behind the reconciler's back.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::error::ProbeError;
use super::tenant::LoginName;

/// Field index of the mount point in /proc/self/mountinfo.
/// Format: ID PARENT_ID MAJOR:MINOR ROOT MOUNT_POINT OPTIONS ...
const MOUNTINFO_MOUNT_POINT_FIELD: usize = 4;

/// What the host filesystem says about one tenant's jail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailFilesystemState {
    pub tenant_id: u64,
    pub directory_exists: bool,
    pub mount_points: BTreeSet<PathBuf>,
    pub probe_error: Option<ProbeError>,
}

impl JailFilesystemState {
    pub fn absent(tenant_id: u64) -> Self {
        Self {
            tenant_id,
            directory_exists: false,
            mount_points: BTreeSet::new(),
            probe_error: None,
        }
    }

    pub fn present(tenant_id: u64, mount_points: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            tenant_id,
            directory_exists: true,
            mount_points: mount_points.into_iter().collect(),
            probe_error: None,
        }
    }

    /// A probe that failed; planned as NoOp with the error surfaced
    pub fn failed(tenant_id: u64, error: ProbeError) -> Self {
        Self {
            tenant_id,
            directory_exists: false,
            mount_points: BTreeSet::new(),
            probe_error: Some(error),
        }
    }

    /// Mount points ordered for teardown: deepest first
    pub fn unmount_order(&self) -> Vec<PathBuf> {
        let mut mounts: Vec<PathBuf> = self.mount_points.iter().cloned().collect();
        mounts.sort_by(|a, b| {
            b.components()
                .count()
                .cmp(&a.components().count())
                .then_with(|| b.cmp(a))
        });
        mounts
    }
}

/// Seam between the reconciler and the host filesystem
#[async_trait]
pub trait FilesystemProber: Send + Sync {
    /// Inspect a tenant's jail. `login_name` is re-validated before any path
    /// is built from it.
    async fn probe(&self, tenant_id: u64, login_name: &str)
        -> Result<JailFilesystemState, ProbeError>;
}

/// Probes the real host filesystem and kernel mount table
#[derive(Debug, Clone)]
pub struct HostProber {
    base_dir: PathBuf,
    mountinfo_path: PathBuf,
}

impl HostProber {
    pub fn new(base_dir: impl Into<PathBuf>, mountinfo_path: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            mountinfo_path: mountinfo_path.into(),
        }
    }

    async fn live_mounts_under(&self, root: &Path) -> Result<BTreeSet<PathBuf>, ProbeError> {
        let contents = tokio::fs::read(&self.mountinfo_path)
            .await
            .map_err(|e| ProbeError::MountTable {
                path: self.mountinfo_path.clone(),
                message: e.to_string(),
            })?;

        Ok(parse_mount_points(&contents)
            .into_iter()
            .filter(|mount| mount.starts_with(root))
            .collect())
    }
}

#[async_trait]
impl FilesystemProber for HostProber {
    async fn probe(
        &self,
        tenant_id: u64,
        login_name: &str,
    ) -> Result<JailFilesystemState, ProbeError> {
        let login = LoginName::parse(login_name)
            .map_err(|_| ProbeError::InvalidIdentifier(login_name.to_string()))?;
        let root = self.base_dir.join(login.as_str());

        match tokio::fs::symlink_metadata(&root).await {
            Ok(metadata) if metadata.is_dir() => {
                let mounts = self.live_mounts_under(&root).await?;
                debug!(tenant_id, root = %root.display(), mounts = mounts.len(), "Jail root present");
                Ok(JailFilesystemState::present(tenant_id, mounts))
            }
            Ok(_) => Err(ProbeError::NotADirectory(root)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(tenant_id, root = %root.display(), "Jail root absent");
                Ok(JailFilesystemState::absent(tenant_id))
            }
            Err(e) => Err(ProbeError::Io {
                path: root,
                message: e.to_string(),
            }),
        }
    }
}

/// Extract mount points from mountinfo contents.
///
/// Paths are kept as raw bytes: a mount point that is not valid UTF-8 must
/// still name the real mount, or teardown would skip it as "not mounted".
pub fn parse_mount_points(contents: &[u8]) -> Vec<PathBuf> {
    contents
        .split(|&b| b == b'\n')
        .filter_map(|line| {
            line.split(u8::is_ascii_whitespace)
                .filter(|field| !field.is_empty())
                .nth(MOUNTINFO_MOUNT_POINT_FIELD)
        })
        .map(|field| PathBuf::from(unescape_mountinfo(field)))
        .collect()
}

/// Decode the octal escapes (`\040` etc.) the kernel uses in mountinfo
fn unescape_mountinfo(bytes: &[u8]) -> OsString {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let code = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    OsString::from_vec(out)
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}
