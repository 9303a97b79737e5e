//! Privileged Helper Runner
//!
//! Runs jail helpers as argument vectors, never through a shell, with a hard
//! timeout and captured output. A helper that outlives its timeout is killed.
//! Stdout is returned whole since exporters print the tenant snapshot there;
//! only stderr, which ends up in error messages, is capped.

use async_trait::async_trait;
use std::ffi::OsString;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::ProcessError;
use crate::metrics;

/// Maximum captured stderr in bytes (64 KiB)
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Which helper an invocation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    Create,
    Mount,
    Unmount,
    Remove,
    Export,
}

impl Helper {
    pub fn as_str(&self) -> &'static str {
        match self {
            Helper::Create => "create",
            Helper::Mount => "mount",
            Helper::Unmount => "unmount",
            Helper::Remove => "remove",
            Helper::Export => "export",
        }
    }
}

/// A fully built helper command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub helper: Helper,
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(String, OsString)>,
}

impl Invocation {
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// The argv as lossy strings, for logs and assertions
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// Output of a successful helper run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Raw stdout, never truncated
    pub stdout: Vec<u8>,
    pub duration: Duration,
}

/// Seam between the executor and the host's process table
#[async_trait]
pub trait PrivilegedRunner: Send + Sync {
    /// Run a helper to completion. Non-zero exit is an error.
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;
}

/// Runs helpers on the host with `tokio::process`
#[derive(Debug, Clone)]
pub struct HostRunner {
    timeout: Duration,
}

impl HostRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PrivilegedRunner for HostRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        let program = invocation.program_name();
        let start = Instant::now();
        debug!(helper = invocation.helper.as_str(), argv = ?invocation.argv(), "Running helper");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| ProcessError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;

        // On timeout the wait future is dropped, taking the child with it;
        // kill_on_drop sends SIGKILL.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ProcessError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?,
            Err(_) => {
                warn!(helper = invocation.helper.as_str(), program = %program, "Helper timed out after {:?}", self.timeout);
                metrics::observe_helper(invocation.helper, start.elapsed(), false);
                return Err(ProcessError::Timeout {
                    program,
                    after: self.timeout,
                });
            }
        };

        let duration = start.elapsed();

        if output.status.success() {
            metrics::observe_helper(invocation.helper, duration, true);
            debug!(helper = invocation.helper.as_str(), "Helper succeeded in {:?}", duration);
            Ok(ProcessOutput {
                stdout: output.stdout,
                duration,
            })
        } else {
            metrics::observe_helper(invocation.helper, duration, false);
            Err(ProcessError::Exit {
                program,
                code: output.status.code(),
                stderr: truncate_output(&output.stderr).trim_end().to_string(),
            })
        }
    }
}

/// Lossy-decode and cap captured stderr on a char boundary
fn truncate_output(bytes: &[u8]) -> String {
    let mut s = String::from_utf8_lossy(bytes).into_owned();
    if s.len() > MAX_OUTPUT_SIZE {
        let mut cut = MAX_OUTPUT_SIZE.saturating_sub(3);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}
