use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use tokio::time::interval;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::BlockDetails;
use super::BlockDetailsClient;
use super::BlockDetailsRequest;
use crate::time_from_secs;
use crate::Channel;
use crate::MaintenanceConfig;
use crate::Plane;
use crate::Result;

pub struct Maintenance {
    plane: Plane,
    client: Arc<dyn BlockDetailsClient>,
    config: MaintenanceConfig,
}

impl Maintenance {
    pub fn new(
        plane: Plane,
        client: Arc<dyn BlockDetailsClient>,
    ) -> Self {
        let config = plane.settings.maintenance.clone();
        Self {
            plane,
            client,
            config,
        }
    }

    /// One pass right away, then one per interval until `token` fires.
    #[instrument(skip_all)]
    pub async fn run(
        self,
        token: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("maintenance started");
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("maintenance stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            match self.pass(&token).await {
                Ok(0) => {}
                Ok(completed) => info!(completed, "block details backfilled"),
                Err(e) => warn!("maintenance pass failed: {}", e),
            }
        }
    }

    /// Completes every channel still missing block details. Queries are spaced
    /// by the configured interval; a failed query only skips its channel.
    /// Returns how many rows were updated.
    pub async fn pass(
        &self,
        token: &CancellationToken,
    ) -> Result<usize> {
        let candidates: Vec<Channel> = self
            .plane
            .store
            .all_channels()?
            .into_iter()
            .filter(Channel::needs_block_details)
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }
        debug!(candidates = candidates.len(), "channels without block details");

        let mut throttle = Throttle::new(self.config.query_spacing());
        let mut completed = 0;
        for channel in candidates {
            match self.backfill(channel, &mut throttle, token).await {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => warn!("block details query failed: {}", e),
            }
            if token.is_cancelled() {
                break;
            }
        }
        Ok(completed)
    }

    async fn backfill(
        &self,
        mut channel: Channel,
        throttle: &mut Throttle,
        token: &CancellationToken,
    ) -> Result<bool> {
        let Some(local) = self.plane.store.get_node(channel.first_node_id)? else {
            return Ok(false);
        };
        let mut changed = false;

        if channel.funding_block_height.is_none() || channel.funded_on.is_none() {
            let hash = channel.channel_point.funding_transaction_hash.clone();
            if let Some(details) =
                self.query(hash, channel.created_on, &local.public_key, throttle, token).await?
            {
                channel.funding_block_height = Some(details.block_height);
                channel.funded_on = Some(time_from_secs(details.block_timestamp));
                changed = true;
            }
        }

        let closing_missing = channel.closing_block_height.is_none() || channel.closed_on.is_none();
        if let (Some(hash), true) = (channel.closing_transaction_hash.clone(), closing_missing) {
            if let Some(details) =
                self.query(hash, channel.updated_on, &local.public_key, throttle, token).await?
            {
                channel.closing_block_height = Some(details.block_height);
                channel.closed_on = Some(time_from_secs(details.block_timestamp));
                changed = true;
            }
        }

        if !changed {
            return Ok(false);
        }
        channel.updated_on = Utc::now();
        self.plane.store.update_channel(&channel)?;
        debug!(channel_id = channel.channel_id, "block details stored");
        self.plane.caches.channels.add(channel).await?;
        Ok(true)
    }

    async fn query(
        &self,
        transaction_hash: String,
        seen: DateTime<Utc>,
        public_key: &str,
        throttle: &mut Throttle,
        token: &CancellationToken,
    ) -> Result<Option<BlockDetails>> {
        if !throttle.wait(token).await {
            return Ok(None);
        }
        self.client
            .block_details(BlockDetailsRequest {
                transaction_hash,
                unix_time: seen.timestamp(),
                public_key: public_key.to_string(),
            })
            .await
    }
}

/// Keeps consecutive queries at least `spacing` apart.
struct Throttle {
    spacing: Duration,
    last: Option<Instant>,
}

impl Throttle {
    fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last: None,
        }
    }

    /// False when cancelled while waiting.
    async fn wait(
        &mut self,
        token: &CancellationToken,
    ) -> bool {
        if let Some(last) = self.last {
            let remaining = self.spacing.saturating_sub(last.elapsed());
            if !remaining.is_zero() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return false,
                    _ = sleep(remaining) => {}
                }
            }
        }
        self.last = Some(Instant::now());
        true
    }
}
