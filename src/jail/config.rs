// Jail Configuration
//
// Host-side settings for tenant jails: where jail roots live and which
// privileged helpers create, mount, unmount and remove them.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::runner::{Helper, Invocation};
use super::tenant::{LoginName, TenantJailConfig};

/// Environment variables handed to the creation helper
pub const ENV_DOCUMENT_ROOT: &str = "JAIL_DOCUMENT_ROOT";
pub const ENV_DISK_QUOTA: &str = "JAIL_DISK_QUOTA_KIB";
pub const ENV_RUNTIME_CONFIGS: &str = "JAIL_RUNTIME_CONFIGS";

/// Jail host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JailConfig {
    /// Directory holding one jail root per tenant (default: /var/jails)
    pub base_dir: PathBuf,

    /// Creation helper; invoked as `<cmd...> <jail_root> <login_name>`
    pub create_command: Vec<String>,

    /// Unmount helper; invoked as `<cmd...> <mount_path>`
    pub unmount_command: Vec<String>,

    /// Recursive removal helper; invoked as `<cmd...> <jail_root>`
    pub remove_command: Vec<String>,

    /// Bind mount helper; invoked as `<cmd...> <document_root> <home_mount>`
    pub mount_command: Vec<String>,

    /// Optional argv prefix for every helper (e.g. `["sudo", "-n"]`).
    /// With sudo, add `--preserve-env=JAIL_DOCUMENT_ROOT,...` so the
    /// creation helper still sees its payload.
    pub privilege_wrapper: Vec<String>,

    /// Bind-mount the document root at `<jail_root>/home/<login>` after
    /// creating the jail
    pub bind_home: bool,

    /// Upper bound for a single helper invocation
    pub process_timeout_secs: u64,

    /// Kernel mount table consulted by the prober
    pub mountinfo_path: PathBuf,
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/var/jails"),
            create_command: vec!["/usr/local/lib/jailkeeper/make_jail.sh".to_string()],
            unmount_command: vec!["/bin/umount".to_string()],
            remove_command: vec![
                "/bin/rm".to_string(),
                "-r".to_string(),
                "--one-file-system".to_string(),
                "--".to_string(),
            ],
            mount_command: vec!["/bin/mount".to_string(), "--bind".to_string()],
            privilege_wrapper: Vec::new(),
            bind_home: true,
            process_timeout_secs: 300,
            mountinfo_path: PathBuf::from("/proc/self/mountinfo"),
        }
    }
}

impl JailConfig {
    /// Create a config rooted at a custom base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.base_dir.is_absolute() {
            anyhow::bail!("Jail base directory must be absolute: {:?}", self.base_dir);
        }

        if self.base_dir == Path::new("/") {
            anyhow::bail!("Jail base directory cannot be the filesystem root");
        }

        for (name, command) in [
            ("create_command", &self.create_command),
            ("unmount_command", &self.unmount_command),
            ("remove_command", &self.remove_command),
            ("mount_command", &self.mount_command),
        ] {
            let Some(program) = command.first() else {
                anyhow::bail!("jail.{} cannot be empty", name);
            };
            if !Path::new(program).is_absolute() {
                anyhow::bail!("jail.{} program must be an absolute path: {}", name, program);
            }
        }

        if self.privilege_wrapper.first().is_some_and(|p| p.is_empty()) {
            anyhow::bail!("jail.privilege_wrapper program cannot be empty");
        }

        if self.process_timeout_secs == 0 {
            anyhow::bail!("jail.process_timeout_secs must be > 0");
        }

        Ok(())
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    /// Get the jail root for a validated login name
    pub fn jail_root(&self, login: &LoginName) -> PathBuf {
        self.base_dir.join(login.as_str())
    }

    /// Get the tenant home mount point inside the jail
    pub fn home_mount(&self, login: &LoginName) -> PathBuf {
        self.jail_root(login).join("home").join(login.as_str())
    }

    pub fn create_invocation(&self, tenant: &TenantJailConfig, login: &LoginName) -> Invocation {
        let mut invocation = self.invocation(
            Helper::Create,
            &self.create_command,
            vec![self.jail_root(login).into(), login.as_str().into()],
        );
        invocation.env = vec![
            (
                ENV_DOCUMENT_ROOT.to_string(),
                tenant.document_root.clone().into_os_string(),
            ),
            (ENV_DISK_QUOTA.to_string(), tenant.disk_quota.to_string().into()),
            (ENV_RUNTIME_CONFIGS.to_string(), tenant.runtime_configs_arg().into()),
        ];
        invocation
    }

    pub fn bind_invocation(&self, source: &Path, target: &Path) -> Invocation {
        self.invocation(
            Helper::Mount,
            &self.mount_command,
            vec![source.into(), target.into()],
        )
    }

    pub fn unmount_invocation(&self, mount_point: &Path) -> Invocation {
        self.invocation(Helper::Unmount, &self.unmount_command, vec![mount_point.into()])
    }

    pub fn remove_invocation(&self, jail_root: &Path) -> Invocation {
        self.invocation(Helper::Remove, &self.remove_command, vec![jail_root.into()])
    }

    /// Build `wrapper... command... operands...` as a single argv
    fn invocation(&self, helper: Helper, command: &[String], operands: Vec<OsString>) -> Invocation {
        let mut argv: Vec<OsString> = self
            .privilege_wrapper
            .iter()
            .chain(command.iter())
            .map(OsString::from)
            .collect();
        argv.extend(operands);

        let program = if argv.is_empty() {
            OsString::new()
        } else {
            argv.remove(0)
        };

        Invocation {
            helper,
            program,
            args: argv,
            env: Vec::new(),
        }
    }
}
