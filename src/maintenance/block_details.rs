use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use tonic::async_trait;
use tracing::debug;

use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetailsRequest {
    pub transaction_hash: String,
    /// Approximate time the transaction was seen, narrows the search
    pub unix_time: i64,
    /// Local node asking, for per-node quotas on the service side
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetails {
    pub block_height: u32,
    pub block_timestamp: i64,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlockDetailsClient: Send + Sync + 'static {
    /// `None` while the transaction is unknown or unconfirmed.
    async fn block_details(
        &self,
        request: BlockDetailsRequest,
    ) -> Result<Option<BlockDetails>>;
}

pub struct HttpBlockDetailsClient {
    url: String,
    client: Client,
}

impl HttpBlockDetailsClient {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl BlockDetailsClient for HttpBlockDetailsClient {
    async fn block_details(
        &self,
        request: BlockDetailsRequest,
    ) -> Result<Option<BlockDetails>> {
        let response = self.client.post(&self.url).json(&request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(tx = %request.transaction_hash, "transaction not confirmed yet");
            return Ok(None);
        }
        let details = response.error_for_status()?.json::<BlockDetails>().await?;
        Ok(Some(details))
    }
}
