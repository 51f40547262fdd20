use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Certificate;
use tonic::transport::Channel;
use tonic::transport::ClientTlsConfig;
use tonic::transport::Endpoint;
use tracing::debug;
use tracing::trace;

use crate::NetworkConfig;
use crate::NetworkError;
use crate::NodeId;
use crate::Result;

/// Cached gRPC channel with the credentials it was built for
#[derive(Clone)]
pub(crate) struct CachedChannel {
    pub(crate) channel: Channel,
    pub(crate) macaroon: AsciiMetadataValue,
    pub(crate) address: String,
    pub(crate) last_used: Instant,
}

/// Connection credentials of one local node
#[derive(Debug, Clone)]
pub(crate) struct NodeEndpoint {
    pub(crate) address: String,
    pub(crate) tls_cert_path: PathBuf,
    pub(crate) macaroon_path: PathBuf,
}

/// One lazily created channel per local node, never closed on idle
pub(crate) struct ConnectionCache {
    cache: DashMap<NodeId, CachedChannel>,
    config: NetworkConfig,
}

impl ConnectionCache {
    pub(crate) fn new(config: NetworkConfig) -> Self {
        Self {
            cache: DashMap::new(),
            config,
        }
    }

    /// Get or create the channel of `node_id`; a changed address rebuilds it.
    pub(crate) async fn get_channel(
        &self,
        node_id: NodeId,
        endpoint: &NodeEndpoint,
    ) -> Result<(Channel, AsciiMetadataValue)> {
        // Fast path
        if let Some(mut entry) = self.cache.get_mut(&node_id) {
            let cached = entry.value_mut();
            if cached.address == endpoint.address {
                cached.last_used = Instant::now();
                return Ok((cached.channel.clone(), cached.macaroon.clone()));
            }
        }

        debug!(node_id, address = %endpoint.address, "Establishing new gRPC connection");
        let channel = self.create_channel(endpoint).await?;
        let macaroon = load_macaroon(&endpoint.macaroon_path).await?;

        trace!(node_id, "Connection cache updated");
        self.cache.insert(
            node_id,
            CachedChannel {
                channel: channel.clone(),
                macaroon: macaroon.clone(),
                address: endpoint.address.clone(),
                last_used: Instant::now(),
            },
        );

        Ok((channel, macaroon))
    }

    async fn create_channel(
        &self,
        endpoint: &NodeEndpoint,
    ) -> Result<Channel> {
        let pem = tokio::fs::read(&endpoint.tls_cert_path).await.map_err(|e| {
            NetworkError::TlsConfig(format!("{}: {}", endpoint.tls_cert_path.display(), e))
        })?;
        // The daemon's self-signed certificate always lists localhost
        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(pem))
            .domain_name("localhost");

        let params = &self.config;
        Endpoint::from_shared(endpoint.address.clone())
            .map_err(|_| NetworkError::InvalidURI(endpoint.address.clone()))?
            .tls_config(tls)
            .map_err(|e| NetworkError::TlsConfig(e.to_string()))?
            .connect_timeout(Duration::from_millis(params.connect_timeout_in_ms))
            .tcp_keepalive(Some(Duration::from_secs(params.tcp_keepalive_in_secs)))
            .http2_keep_alive_interval(Duration::from_secs(
                params.http2_keep_alive_interval_in_secs,
            ))
            .keep_alive_timeout(Duration::from_secs(params.http2_keep_alive_timeout_in_secs))
            .keep_alive_while_idle(true)
            .connect()
            .await
            .map_err(|e| NetworkError::ConnectError(e.to_string()).into())
    }

    /// Drop the channel of a node so the next call reconnects
    pub(crate) fn remove_node(
        &self,
        node_id: NodeId,
    ) {
        self.cache.remove(&node_id);
    }
}

async fn load_macaroon(path: &Path) -> Result<AsciiMetadataValue> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| NetworkError::Macaroon(format!("{}: {}", path.display(), e)))?;
    AsciiMetadataValue::try_from(hex::encode(bytes))
        .map_err(|e| NetworkError::Macaroon(e.to_string()).into())
}
