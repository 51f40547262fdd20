use std::time::Duration;

use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tonic::async_trait;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::WorkerContext;
use crate::Result;
use crate::ServiceStatus;

/// A source read by periodic unary calls instead of a subscription.
#[async_trait]
pub trait Poller: Send + 'static {
    /// First catch-up before the worker reports Active; one poll by default.
    async fn bootstrap(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<()> {
        self.poll(ctx).await
    }

    async fn poll(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<()>;
}

/// Bootstraps until it succeeds, then polls every `period`. A failed poll
/// leaves the worker Pending until the next successful one.
#[instrument(skip_all, fields(node_id = ctx.node_id, service_type = %ctx.service_type))]
pub async fn run_poller<P: Poller>(
    ctx: WorkerContext,
    mut poller: P,
    period: Duration,
) -> Result<()> {
    ctx.mark(ServiceStatus::Initializing).await?;
    loop {
        if ctx.token.is_cancelled() {
            return Ok(());
        }
        match poller.bootstrap(&ctx).await {
            Ok(()) => break,
            Err(e) => {
                warn!("bootstrap failed: {}", e);
                ctx.count_reconnect();
                if !ctx.pause(ctx.plane.settings.workers.reconnect_interval()).await {
                    return Ok(());
                }
            }
        }
    }
    ctx.mark(ServiceStatus::Active).await?;
    info!("poller active");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut degraded = false;
    loop {
        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        match poller.poll(&ctx).await {
            Ok(()) if degraded => {
                ctx.mark(ServiceStatus::Active).await?;
                degraded = false;
            }
            Ok(()) => {}
            Err(e) => {
                warn!("poll failed: {}", e);
                ctx.count_reconnect();
                if !degraded {
                    ctx.mark(ServiceStatus::Pending).await?;
                    degraded = true;
                }
            }
        }
    }
}
