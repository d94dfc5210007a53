//! Hook phases and release operation types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of release operation being reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployType {
    /// First install of a release that never existed
    Initial,
    /// Install over a release whose previous revisions all failed
    Install,
    /// Upgrade of a deployed release
    Upgrade,
    /// Rollback to an older revision
    Rollback,
    /// Removal of the release
    Uninstall,
}

impl DeployType {
    /// Hook phases that run during this operation
    pub fn hook_phases(&self) -> &'static [HookPhase] {
        match self {
            DeployType::Initial | DeployType::Install => {
                &[HookPhase::PreInstall, HookPhase::PostInstall]
            }
            DeployType::Upgrade => &[HookPhase::PreUpgrade, HookPhase::PostUpgrade],
            DeployType::Rollback => &[HookPhase::PreRollback, HookPhase::PostRollback],
            DeployType::Uninstall => &[HookPhase::PreDelete, HookPhase::PostDelete],
        }
    }

    pub fn is_uninstall(&self) -> bool {
        matches!(self, DeployType::Uninstall)
    }
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployType::Initial => "initial",
            DeployType::Install => "install",
            DeployType::Upgrade => "upgrade",
            DeployType::Rollback => "rollback",
            DeployType::Uninstall => "uninstall",
        };
        f.write_str(s)
    }
}

/// Hook execution phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    PreDelete,
    PostDelete,
    /// Test hooks (run on demand, never during a deploy)
    Test,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HookPhase::PreInstall => "pre-install",
            HookPhase::PostInstall => "post-install",
            HookPhase::PreUpgrade => "pre-upgrade",
            HookPhase::PostUpgrade => "post-upgrade",
            HookPhase::PreRollback => "pre-rollback",
            HookPhase::PostRollback => "post-rollback",
            HookPhase::PreDelete => "pre-delete",
            HookPhase::PostDelete => "post-delete",
            HookPhase::Test => "test",
        };
        f.write_str(s)
    }
}

impl FromStr for HookPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pre-install" => Ok(HookPhase::PreInstall),
            "post-install" => Ok(HookPhase::PostInstall),
            "pre-upgrade" => Ok(HookPhase::PreUpgrade),
            "post-upgrade" => Ok(HookPhase::PostUpgrade),
            "pre-rollback" => Ok(HookPhase::PreRollback),
            "post-rollback" => Ok(HookPhase::PostRollback),
            "pre-delete" => Ok(HookPhase::PreDelete),
            "post-delete" => Ok(HookPhase::PostDelete),
            "test" | "test-success" => Ok(HookPhase::Test),
            other => Err(format!("unknown hook phase \"{}\"", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_round_trip_display() {
        for phase in [
            HookPhase::PreInstall,
            HookPhase::PostUpgrade,
            HookPhase::PreDelete,
            HookPhase::Test,
        ] {
            assert_eq!(phase.to_string().parse::<HookPhase>(), Ok(phase));
        }
    }

    #[test]
    fn test_helm_test_success_alias() {
        assert_eq!("test-success".parse::<HookPhase>(), Ok(HookPhase::Test));
    }

    #[test]
    fn test_deploy_type_hook_phases() {
        assert_eq!(
            DeployType::Initial.hook_phases(),
            DeployType::Install.hook_phases()
        );
        assert!(DeployType::Upgrade.hook_phases().contains(&HookPhase::PreUpgrade));
        assert!(!DeployType::Upgrade.hook_phases().contains(&HookPhase::PreInstall));
        assert!(DeployType::Uninstall.is_uninstall());
    }
}
