use tonic::async_trait;
use tracing::debug;

use super::Poller;
use super::WorkerContext;
use crate::htlc_from_proto;
use crate::BalanceSnapshot;
use crate::ChannelPoint;
use crate::Result;

/// Keeps per-peer aggregates current and, every few ticks, re-reads absolute
/// balances from the daemon.
pub struct BalanceCoordinator {
    full_refresh_ticks: u32,
    ticks: u32,
}

impl BalanceCoordinator {
    pub fn new(full_refresh_ticks: u32) -> Self {
        Self {
            full_refresh_ticks: full_refresh_ticks.max(1),
            ticks: 0,
        }
    }

    async fn refresh(
        &self,
        ctx: &WorkerContext,
    ) -> Result<usize> {
        let listed = ctx.client()?.list_channels().await?;
        let channels = &ctx.plane.caches.channels;
        let mut refreshed = 0;
        for channel in listed {
            let mut channel_id = channels.by_lnd_short_channel_id(channel.chan_id).await?;
            if channel_id.is_none() {
                let point: ChannelPoint = channel.channel_point.parse()?;
                channel_id = channels.by_channel_point(&point).await?;
            }
            let Some(channel_id) = channel_id else {
                continue;
            };
            ctx.plane
                .caches
                .channel_states
                .update_balance(
                    ctx.node_id,
                    BalanceSnapshot {
                        channel_id,
                        active: channel.active,
                        local_balance: channel.local_balance,
                        remote_balance: channel.remote_balance,
                        commit_fee: channel.commit_fee,
                        pending_htlcs: channel.pending_htlcs.iter().map(htlc_from_proto).collect(),
                    },
                )
                .await?;
            refreshed += 1;
        }
        Ok(refreshed)
    }
}

#[async_trait]
impl Poller for BalanceCoordinator {
    async fn bootstrap(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<()> {
        self.refresh(ctx).await?;
        ctx.plane.caches.channel_states.recompute_aggregates(ctx.node_id).await?;
        Ok(())
    }

    async fn poll(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<()> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.full_refresh_ticks == 0 {
            let refreshed = self.refresh(ctx).await?;
            debug!(refreshed, "balances re-read");
        }
        let changed = ctx.plane.caches.channel_states.recompute_aggregates(ctx.node_id).await?;
        if changed > 0 {
            debug!(changed, "peer aggregates moved");
        }
        Ok(())
    }
}
