//! Connection service of one local node.
//!
//! Verifies the daemon is the node we expect, runs the bootstrap import and
//! then checks liveness. Node streams are only started while this service is
//! Active, so losing the daemon takes them down with it.

use std::sync::Arc;

use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::WorkerContext;
use crate::utils::async_task::with_timeout;
use crate::Error;
use crate::LightningClient;
use crate::Result;
use crate::ServiceStatus;
use crate::UpstreamError;

#[instrument(skip_all, fields(node_id = ctx.node_id))]
pub async fn run_lnd_service(ctx: WorkerContext) -> Result<()> {
    let expected = ctx.local_node().await?.public_key;
    let result = serve(&ctx, &expected).await;
    go_offline(&ctx).await?;
    result
}

async fn serve(
    ctx: &WorkerContext,
    expected: &str,
) -> Result<()> {
    let reconnect = ctx.plane.settings.workers.reconnect_interval();
    let liveness = ctx.plane.settings.workers.liveness_interval();
    loop {
        if ctx.token.is_cancelled() {
            return Ok(());
        }
        ctx.mark(ServiceStatus::Pending).await?;
        match connect(ctx, expected).await {
            Ok(()) => {}
            Err(e @ Error::Upstream(UpstreamError::IdentityMismatch { .. })) => return Err(e),
            Err(e) => {
                warn!("node not reachable: {}", e);
                ctx.count_reconnect();
                if !ctx.pause(reconnect).await {
                    return Ok(());
                }
                continue;
            }
        }

        ctx.plane.caches.nodes.set_active(ctx.node_id, true).await?;
        ctx.plane
            .caches
            .channel_states
            .set_node_status(ctx.node_id, ServiceStatus::Active)
            .await?;
        ctx.mark(ServiceStatus::Active).await?;
        info!("node online");

        let client = ctx.client()?;
        loop {
            if !ctx.pause(liveness).await {
                return Ok(());
            }
            if let Err(e) = check_liveness(ctx, client.as_ref(), expected).await {
                warn!("node went away: {}", e);
                break;
            }
        }
        go_offline(ctx).await?;
        ctx.count_reconnect();
    }
}

async fn connect(
    ctx: &WorkerContext,
    expected: &str,
) -> Result<()> {
    let client: Arc<dyn LightningClient> = ctx.client()?;
    check_liveness(ctx, client.as_ref(), expected).await?;
    ctx.mark(ServiceStatus::Initializing).await?;
    with_timeout(
        ctx.plane.settings.gateway.import_timeout(),
        ctx.plane.importer.import_all(&ctx.plane, ctx.node_id, false),
    )
    .await
}

async fn check_liveness(
    ctx: &WorkerContext,
    client: &dyn LightningClient,
    expected: &str,
) -> Result<()> {
    let info = with_timeout(ctx.plane.settings.gateway.control_timeout(), client.get_info()).await?;
    if !info.identity_pubkey.eq_ignore_ascii_case(expected) {
        return Err(UpstreamError::IdentityMismatch {
            expected: expected.to_string(),
            actual: info.identity_pubkey,
        }
        .into());
    }
    Ok(())
}

async fn go_offline(ctx: &WorkerContext) -> Result<()> {
    ctx.plane.caches.nodes.set_active(ctx.node_id, false).await?;
    ctx.plane
        .caches
        .channel_states
        .set_node_status(ctx.node_id, ServiceStatus::Inactive)
        .await
}
