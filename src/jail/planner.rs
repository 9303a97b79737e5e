//! Action Planner
//!
//! Pure decision table from (desired config, last applied fingerprint,
//! probed filesystem state) to the single action that converges a tenant.
//!
//! | enabled | fs exists | fingerprint matches | action |
//! |---------|-----------|---------------------|--------|
//! | true    | false     | -                   | Create |
//! | true    | true      | yes                 | NoOp   |
//! | true    | true      | no                  | Update |
//! | false   | true      | -                   | Remove |
//! | false   | false     | -                   | NoOp   |
//!
//! Existence comes from the filesystem; freshness comes from the state
//! record. A failed probe always plans NoOp.

use serde::{Deserialize, Serialize};

use super::error::ProbeError;
use super::probe::JailFilesystemState;
use super::store::JailStateRecord;
use super::tenant::{Fingerprint, TenantJailConfig};

/// What the executor should do for one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NoOp { tenant_id: u64 },
    Create { tenant_id: u64, fingerprint: Fingerprint },
    Update { tenant_id: u64, fingerprint: Fingerprint },
    Remove { tenant_id: u64 },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::NoOp { .. } => ActionKind::NoOp,
            Action::Create { .. } => ActionKind::Create,
            Action::Update { .. } => ActionKind::Update,
            Action::Remove { .. } => ActionKind::Remove,
        }
    }

    pub fn tenant_id(&self) -> u64 {
        match self {
            Action::NoOp { tenant_id }
            | Action::Create { tenant_id, .. }
            | Action::Update { tenant_id, .. }
            | Action::Remove { tenant_id } => *tenant_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    NoOp,
    Create,
    Update,
    Remove,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::NoOp => "noop",
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Remove => "remove",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Planner output: the action plus the probe error that forced a NoOp, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub action: Action,
    pub probe_error: Option<ProbeError>,
}

/// Decide the converging action for a tenant
pub fn plan(
    desired: &TenantJailConfig,
    record: Option<&JailStateRecord>,
    fs: &JailFilesystemState,
) -> Plan {
    let tenant_id = desired.tenant_id;

    if let Some(error) = &fs.probe_error {
        return Plan {
            action: Action::NoOp { tenant_id },
            probe_error: Some(error.clone()),
        };
    }

    let action = match (desired.jail_enabled, fs.directory_exists) {
        (true, false) => Action::Create {
            tenant_id,
            fingerprint: desired.config_fingerprint(),
        },
        (true, true) => {
            let fingerprint = desired.config_fingerprint();
            let applied = record.and_then(|r| r.applied_fingerprint.as_ref());
            if applied == Some(&fingerprint) {
                Action::NoOp { tenant_id }
            } else {
                Action::Update {
                    tenant_id,
                    fingerprint,
                }
            }
        }
        (false, true) => Action::Remove { tenant_id },
        (false, false) => Action::NoOp { tenant_id },
    };

    Plan {
        action,
        probe_error: None,
    }
}
