//! Process-wide cluster access
//!
//! One [`ClientFactory`] per process owns the kube client, the shared kind
//! mapper and the [`ClusterClient`] built on them, so every reconciliation
//! pass shares one cache and one lock registry.

use std::sync::Arc;

use kube::Client;
use tokio::sync::OnceCell;

use crate::backend::{ClusterBackend, KubeBackend, connect_error};
use crate::client::ClusterClient;
use crate::error::{KubeError, Result};
use crate::mapper::DiscoveryMapper;

pub struct ClientFactory {
    mapper: Option<Arc<DiscoveryMapper>>,
    client: Arc<ClusterClient>,
    initialized: OnceCell<()>,
}

impl ClientFactory {
    /// Connect using the ambient kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.map_err(connect_error)?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        let mapper = Arc::new(DiscoveryMapper::new(client.clone()));
        let backend = KubeBackend::new(client, mapper.clone());
        Self {
            mapper: Some(mapper),
            client: Arc::new(ClusterClient::new(Arc::new(backend))),
            initialized: OnceCell::new(),
        }
    }

    /// Factory over any backend; initialization has nothing to warm
    pub fn from_backend(backend: Arc<dyn ClusterBackend>) -> Self {
        Self {
            mapper: None,
            client: Arc::new(ClusterClient::new(backend)),
            initialized: OnceCell::new(),
        }
    }

    /// Warm API discovery; later calls return immediately
    pub async fn initialize(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                if let Some(mapper) = &self.mapper {
                    tracing::debug!("initializing cluster access");
                    mapper.warm().await?;
                }
                Ok::<(), KubeError>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Initialize if needed and hand out the shared client
    pub async fn client(&self) -> Result<Arc<ClusterClient>> {
        self.initialize().await?;
        Ok(self.client.clone())
    }
}
