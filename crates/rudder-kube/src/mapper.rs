//! Resolution of resource kinds to REST endpoints
//!
//! The mapper turns a (group, version, kind) into the REST resource name and
//! its scope. Discovery runs once and is reused until [`ClusterMapper::reset`]
//! is called, which the cluster client does after writing a CRD: a new CRD
//! adds kinds the previous discovery run could not know about.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use kube::{
    Client,
    core::GroupVersionKind,
    discovery::{ApiResource, Discovery, Scope},
};

use rudder_core::ResourceIdentity;

use crate::error::{KubeError, Result};

/// REST endpoint of a kind
#[derive(Debug, Clone)]
pub struct ResolvedKind {
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

/// Maps kinds to REST endpoints
#[async_trait]
pub trait ClusterMapper: Send + Sync {
    /// Resolve the kind of an identity, failing with `NoSuchKind` on a miss
    async fn resolve(&self, identity: &ResourceIdentity) -> Result<ResolvedKind>;

    /// Forget everything discovered so far
    fn reset(&self);
}

/// Mapper backed by the cluster's discovery API
pub struct DiscoveryMapper {
    client: Client,
    discovery: RwLock<Option<Arc<Discovery>>>,
}

impl DiscoveryMapper {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: RwLock::new(None),
        }
    }

    /// Run discovery now unless a result is already held
    pub async fn warm(&self) -> Result<()> {
        self.discovery().await.map(|_| ())
    }

    async fn discovery(&self) -> Result<Arc<Discovery>> {
        let cached = self
            .discovery
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(discovery) = cached {
            return Ok(discovery);
        }

        tracing::debug!("running API discovery");
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|source| KubeError::Api {
                operation: "discover",
                resource: "API resources".to_string(),
                source,
            })?;
        let discovery = Arc::new(discovery);

        *self
            .discovery
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(discovery.clone());
        Ok(discovery)
    }
}

#[async_trait]
impl ClusterMapper for DiscoveryMapper {
    async fn resolve(&self, identity: &ResourceIdentity) -> Result<ResolvedKind> {
        let (group, version, kind) = identity.gvk();
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let discovery = self.discovery().await?;

        discovery
            .resolve_gvk(&gvk)
            .map(|(api_resource, caps)| ResolvedKind {
                api_resource,
                namespaced: matches!(caps.scope, Scope::Namespaced),
            })
            .ok_or_else(|| KubeError::NoSuchKind {
                api_version: identity.api_version(),
                kind: identity.kind().to_string(),
            })
    }

    fn reset(&self) {
        tracing::debug!("resetting API discovery");
        *self
            .discovery
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}
