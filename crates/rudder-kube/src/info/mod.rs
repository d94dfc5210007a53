//! Per-resource decisions
//!
//! Every category of resource gets an info object built by the same recipe:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Resource-info construction                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  get (cached) ──► fix managedFields ──► dry-run ──► classify │
//! │      │                   │                 │           │     │
//! │   absent?           changed? patch     immutable?   Yes/No/  │
//! │   ─► info with      and use the        recreate:    Unknown  │
//! │      exists=false   patched object     swallow,              │
//! │                                        else fail             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The infos are immutable. Predicates are pure functions of the observed
//! state (`exists`, `up_to_date`) and the resource's declared [`Policy`].
//!
//! - **General** (`general`) and **Hook** (`hook`): full predicate set
//! - **Previous release** (`prev_general`, `prev_hook`): only deletion decisions
//! - **Standalone CRD** (`crd`) and **Release namespace** (`namespace`):
//!   never recreated nor cleaned up

mod crd;
mod general;
mod hook;
mod namespace;
mod prev_general;
mod prev_hook;

pub use crd::{StandaloneCrdInfo, build_standalone_crd_info};
pub use general::{GeneralResourceInfo, build_general_resource_info};
pub use hook::{HookResourceInfo, build_hook_resource_info};
pub use namespace::{ReleaseNamespaceInfo, build_release_namespace_info};
pub use prev_general::{PrevGeneralResourceInfo, build_prev_general_resource_info};
pub use prev_hook::{PrevHookResourceInfo, build_prev_hook_resource_info};

use std::collections::HashSet;

use rudder_core::{DeployType, RemoteResource, ResourceIdentity, ResourceSpec, TrackTerminationMode};

use crate::client::{ApplyOptions, ClusterClient, GetOptions};
use crate::diff;
use crate::error::Result;
use crate::managed_fields;

/// Whether the live object already matches what we would apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpToDateStatus {
    Yes,
    No,
    /// The dry-run failed, so nothing can be claimed
    Unknown,
}

/// Declared lifecycle flags of a desired resource
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Policy {
    pub recreate: bool,
    pub delete_on_succeeded: bool,
    pub delete_on_failed: bool,
    pub keep_on_delete: bool,
    pub replicas_on_creation: Option<i32>,
    pub never_tracked: bool,
}

impl Policy {
    /// CRDs and non-blocking resources are never waited for
    pub(crate) fn never_tracked(identity: &ResourceIdentity, mode: TrackTerminationMode) -> bool {
        identity.is_crd() || mode == TrackTerminationMode::NonBlocking
    }
}

/// What the cluster told us about one desired resource
#[derive(Debug, Clone)]
pub(crate) struct Observation {
    pub live: Option<RemoteResource>,
    pub dry_run: Option<RemoteResource>,
    pub dry_run_error: Option<String>,
    pub up_to_date: UpToDateStatus,
}

impl Observation {
    fn absent() -> Self {
        Self {
            live: None,
            dry_run: None,
            dry_run_error: None,
            up_to_date: UpToDateStatus::No,
        }
    }

    pub fn exists(&self) -> bool {
        self.live.is_some()
    }

    pub fn live_uid(&self) -> Option<&str> {
        self.live.as_ref().and_then(RemoteResource::uid)
    }

    pub fn should_create(&self) -> bool {
        !self.exists()
    }

    pub fn should_recreate(&self, policy: &Policy) -> bool {
        self.exists() && policy.recreate
    }

    pub fn should_update(&self, policy: &Policy) -> bool {
        self.exists() && self.up_to_date == UpToDateStatus::No && !policy.recreate
    }

    pub fn should_apply(&self, policy: &Policy) -> bool {
        self.exists() && self.up_to_date == UpToDateStatus::Unknown && !policy.recreate
    }

    pub fn any_deploy(&self, policy: &Policy) -> bool {
        self.should_create()
            || self.should_recreate(policy)
            || self.should_update(policy)
            || self.should_apply(policy)
    }

    pub fn should_keep_on_delete(&self, policy: &Policy, release_namespace: &str) -> bool {
        policy.keep_on_delete
            || self
                .live
                .as_ref()
                .is_some_and(|live| live.keep_on_delete(release_namespace))
    }

    pub fn should_track_readiness(&self, policy: &Policy, prev_release_failed: bool) -> bool {
        if policy.never_tracked {
            return false;
        }
        self.any_deploy(policy) || (prev_release_failed && self.exists())
    }

    pub fn should_cleanup(&self, policy: &Policy, release_namespace: &str) -> bool {
        (self.exists() || self.any_deploy(policy))
            && policy.delete_on_succeeded
            && !self.should_keep_on_delete(policy, release_namespace)
    }

    pub fn should_cleanup_on_failed(
        &self,
        policy: &Policy,
        prev_release_failed: bool,
        release_namespace: &str,
    ) -> bool {
        self.should_track_readiness(policy, prev_release_failed)
            && policy.delete_on_failed
            && !self.should_keep_on_delete(policy, release_namespace)
    }

    pub fn force_replicas(&self, policy: &Policy) -> Option<i32> {
        if self.should_create() || self.should_recreate(policy) {
            policy.replicas_on_creation
        } else {
            None
        }
    }
}

/// Retrieve the live object and repair its ledger; `None` when absent
pub(crate) async fn fetch_live(
    client: &ClusterClient,
    identity: &ResourceIdentity,
) -> Result<Option<RemoteResource>> {
    let live = match client.get(identity, GetOptions::cached()).await {
        Ok(live) => live,
        Err(err) if err.is_absent() => return Ok(None),
        Err(err) => return Err(err),
    };

    let resource = identity.human_id();
    let fix = managed_fields::reconcile(&live)
        .map_err(|e| e.for_resource("fix managed fields", &resource))?;
    if !fix.changed {
        return Ok(Some(live));
    }

    tracing::debug!(resource = %identity, "fixing managed fields");
    let patch = fix
        .patch()
        .map_err(|e| e.for_resource("fix managed fields", &resource))?;
    match client.merge_patch(identity, &patch).await {
        Ok(patched) => Ok(Some(patched)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Live object only, for resources we will not apply again
pub(crate) async fn observe_live(client: &ClusterClient, identity: &ResourceIdentity) -> Result<Option<RemoteResource>> {
    match client.get(identity, GetOptions::cached()).await {
        Ok(live) => Ok(Some(live)),
        Err(err) if err.is_absent() => Ok(None),
        Err(err) => Err(err),
    }
}

/// The full recipe: get, fix, dry-run, classify
pub(crate) async fn observe(client: &ClusterClient, spec: &ResourceSpec, recreate: bool) -> Result<Observation> {
    let identity = spec.identity();

    let Some(live) = fetch_live(client, identity).await? else {
        return Ok(Observation::absent());
    };

    match client.apply(identity, spec.object(), ApplyOptions::dry_run()).await {
        Ok(dry_run) => {
            let diff = diff::diff_declared_fields(&live, &dry_run, spec.object())
                .map_err(|e| e.for_resource("diff", &identity.human_id()))?;
            let up_to_date = if diff.is_different() {
                tracing::debug!(resource = %identity, paths = ?diff.changed_paths, "resource is outdated");
                UpToDateStatus::No
            } else {
                UpToDateStatus::Yes
            };
            Ok(Observation {
                live: Some(live),
                dry_run: Some(dry_run),
                dry_run_error: None,
                up_to_date,
            })
        }
        Err(err) if err.is_immutable() && !recreate => Err(err),
        Err(err) if err.is_immutable() => {
            tracing::debug!(resource = %identity, "immutable change, resource will be recreated");
            Ok(Observation {
                live: Some(live),
                dry_run: None,
                dry_run_error: Some(err.to_string()),
                up_to_date: UpToDateStatus::No,
            })
        }
        Err(err) => {
            tracing::warn!(resource = %identity, error = %err, "dry-run apply failed");
            Ok(Observation {
                live: Some(live),
                dry_run: None,
                dry_run_error: Some(err.to_string()),
                up_to_date: UpToDateStatus::Unknown,
            })
        }
    }
}

/// Deletion decision for a resource of the previous release
pub(crate) fn should_delete_previous(
    live: Option<&RemoteResource>,
    keep_declared: bool,
    release_namespace: &str,
    current_release_uids: &HashSet<String>,
    deploy_type: DeployType,
) -> bool {
    let Some(live) = live else {
        return false;
    };
    if keep_declared || live.keep_on_delete(release_namespace) {
        return false;
    }
    if deploy_type.is_uninstall() {
        return true;
    }
    match live.uid() {
        Some(uid) => !current_release_uids.contains(uid),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn live() -> RemoteResource {
        let id = ResourceIdentity::new("", "v1", "ConfigMap", Some("app".into()), "cfg");
        RemoteResource::new(id, json!({ "metadata": { "name": "cfg", "uid": "u1" } }))
    }

    fn observation(exists: bool, up_to_date: UpToDateStatus) -> Observation {
        Observation {
            live: exists.then(live),
            dry_run: None,
            dry_run_error: None,
            up_to_date,
        }
    }

    #[test]
    fn test_decisions_are_exclusive() {
        for exists in [false, true] {
            for up_to_date in [UpToDateStatus::Yes, UpToDateStatus::No, UpToDateStatus::Unknown] {
                for recreate in [false, true] {
                    let policy = Policy {
                        recreate,
                        ..Default::default()
                    };
                    let obs = observation(exists, up_to_date);
                    let truths = [
                        obs.should_create(),
                        obs.should_recreate(&policy),
                        obs.should_update(&policy),
                        obs.should_apply(&policy),
                    ];
                    assert!(
                        truths.iter().filter(|t| **t).count() <= 1,
                        "exists={} up_to_date={:?} recreate={}",
                        exists,
                        up_to_date,
                        recreate
                    );
                }
            }
        }
    }

    #[test]
    fn test_force_replicas_only_on_creation() {
        let policy = Policy {
            replicas_on_creation: Some(3),
            ..Default::default()
        };
        assert_eq!(observation(false, UpToDateStatus::No).force_replicas(&policy), Some(3));
        assert_eq!(observation(true, UpToDateStatus::No).force_replicas(&policy), None);

        let recreate = Policy {
            recreate: true,
            ..policy
        };
        assert_eq!(observation(true, UpToDateStatus::Yes).force_replicas(&recreate), Some(3));
    }

    #[test]
    fn test_track_readiness_after_failed_release() {
        let policy = Policy::default();
        let obs = observation(true, UpToDateStatus::Yes);
        assert!(!obs.should_track_readiness(&policy, false));
        assert!(obs.should_track_readiness(&policy, true));

        let untracked = Policy {
            never_tracked: true,
            ..Default::default()
        };
        assert!(!observation(false, UpToDateStatus::No).should_track_readiness(&untracked, true));
    }

    #[test]
    fn test_should_delete_previous() {
        let live = live();
        let mut uids = HashSet::new();

        assert!(!should_delete_previous(None, false, "app", &uids, DeployType::Upgrade));
        assert!(should_delete_previous(Some(&live), false, "app", &uids, DeployType::Upgrade));
        assert!(!should_delete_previous(Some(&live), true, "app", &uids, DeployType::Uninstall));

        uids.insert("u1".to_string());
        assert!(!should_delete_previous(Some(&live), false, "app", &uids, DeployType::Upgrade));
        assert!(should_delete_previous(Some(&live), false, "app", &uids, DeployType::Uninstall));
    }
}
