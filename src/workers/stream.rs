use futures::StreamExt;
use tokio::time::Instant;
use tonic::async_trait;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::WorkerContext;
use crate::Result;
use crate::ServiceStatus;
use crate::UpstreamStream;

/// One upstream subscription, opened and consumed by [`run_stream`].
#[async_trait]
pub trait StreamProcessor: Send + 'static {
    type Item: Send + 'static;

    async fn open(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<UpstreamStream<Self::Item>>;

    /// Runs after the stream is open and before the first record is read.
    async fn bootstrap(
        &mut self,
        _ctx: &WorkerContext,
    ) -> Result<()> {
        Ok(())
    }

    async fn process(
        &mut self,
        ctx: &WorkerContext,
        item: Self::Item,
    ) -> Result<()>;
}

/// Reconnect loop of one subscription. Records are processed strictly in
/// receipt order; a record that fails to process is skipped after a Pending
/// blip. Reopens are spaced by the configured reconnect interval.
#[instrument(skip_all, fields(node_id = ctx.node_id, service_type = %ctx.service_type))]
pub async fn run_stream<P: StreamProcessor>(
    ctx: WorkerContext,
    mut processor: P,
) -> Result<()> {
    let spacing = ctx.plane.settings.workers.reconnect_interval();
    let mut last_open: Option<Instant> = None;
    loop {
        if let Some(at) = last_open {
            let wait = spacing.saturating_sub(at.elapsed());
            if !wait.is_zero() && !ctx.pause(wait).await {
                return Ok(());
            }
        }
        if ctx.token.is_cancelled() {
            return Ok(());
        }
        last_open = Some(Instant::now());
        ctx.mark(ServiceStatus::Pending).await?;

        let opened = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return Ok(()),
            opened = processor.open(&ctx) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!("subscription failed: {}", e);
                ctx.count_reconnect();
                continue;
            }
        };

        ctx.mark(ServiceStatus::Initializing).await?;
        if let Err(e) = processor.bootstrap(&ctx).await {
            warn!("bootstrap failed: {}", e);
            ctx.count_reconnect();
            continue;
        }
        ctx.mark(ServiceStatus::Active).await?;
        info!("stream active");

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.token.cancelled() => return Ok(()),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(item)) => {
                    if let Err(e) = processor.process(&ctx, item).await {
                        warn!("record skipped: {}", e);
                        ctx.mark(ServiceStatus::Pending).await?;
                        ctx.mark(ServiceStatus::Active).await?;
                    }
                }
                Some(Err(e)) => {
                    warn!("stream failed, reconnecting: {}", e);
                    break;
                }
                None => {
                    debug!("stream ended, reconnecting");
                    break;
                }
            }
        }
        ctx.count_reconnect();
    }
}
