//! Rudder Core - resource model for the Rudder reconciliation engine
//!
//! This crate provides the cluster-agnostic types used throughout Rudder:
//! - `ResourceIdentity`: who an object is (GVK, namespace, name)
//! - `HookResource` / `GeneralResource` / `StandaloneCrd` / `ReleaseNamespace`:
//!   what a release wants on the cluster, with its declared policies
//! - `RemoteResource`: what the cluster currently has
//! - `annotations`: Helm-compatible annotation keys and parsers

pub mod annotations;
pub mod error;
pub mod identity;
pub mod phase;
pub mod remote;
pub mod resource;

pub use annotations::{DeletePolicy, ResourceRef, TrackTerminationMode};
pub use error::{CoreError, Result};
pub use identity::{ResourceIdentity, is_cluster_scoped_kind, is_list_manifest, split_api_version};
pub use phase::{DeployType, HookPhase};
pub use remote::RemoteResource;
pub use resource::{GeneralResource, HookResource, ReleaseNamespace, ResourceSpec, StandaloneCrd};
