use tonic::async_trait;
use tracing::debug;

use super::Poller;
use super::WorkerContext;
use crate::proto::lnrpc;
use crate::time_from_nanos;
use crate::EventPayload;
use crate::ForwardRecord;
use crate::Result;

/// Forwarding history, read page by page past a `time_ns` cursor.
pub struct ForwardsPoller {
    page_size: u32,
    cursor_ns: Option<u64>,
}

impl ForwardsPoller {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            cursor_ns: None,
        }
    }

    /// `time_ns` of the newest stored forward.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor_ns
    }
}

#[async_trait]
impl Poller for ForwardsPoller {
    async fn poll(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<()> {
        let plane = &ctx.plane;
        let client = ctx.client()?;
        let mut cursor = match self.cursor_ns {
            Some(cursor) => cursor,
            None => plane.store.last_forward_time_ns(ctx.node_id)?,
        };
        let start_time = cursor / 1_000_000_000;
        let mut offset = 0;
        let mut stored = 0;
        loop {
            let page = client
                .forwarding_history(lnrpc::ForwardingHistoryRequest {
                    start_time,
                    index_offset: offset,
                    num_max_events: self.page_size,
                    ..Default::default()
                })
                .await?;
            let fetched = page.forwarding_events.len();
            let mut records = Vec::with_capacity(fetched);
            for event in &page.forwarding_events {
                if event.timestamp_ns <= cursor {
                    continue;
                }
                records.push(forward_record(ctx, event).await?);
            }
            if !records.is_empty() {
                stored += plane.store.add_forwards(&records)?;
                for record in records {
                    cursor = cursor.max(record.time_ns);
                    plane.bus.publish(ctx.node_id, EventPayload::Forward(record));
                }
            }
            self.cursor_ns = Some(cursor);
            if fetched < self.page_size as usize || page.last_offset_index <= offset {
                break;
            }
            offset = page.last_offset_index;
        }
        if stored > 0 {
            debug!(stored, cursor, "forwards stored");
        }
        Ok(())
    }
}

async fn forward_record(
    ctx: &WorkerContext,
    event: &lnrpc::ForwardingEvent,
) -> Result<ForwardRecord> {
    let channels = &ctx.plane.caches.channels;
    Ok(ForwardRecord {
        node_id: ctx.node_id,
        time: time_from_nanos(event.timestamp_ns),
        time_ns: event.timestamp_ns,
        incoming_channel_id: channels
            .by_lnd_short_channel_id(event.chan_id_in)
            .await?
            .unwrap_or(0),
        outgoing_channel_id: channels
            .by_lnd_short_channel_id(event.chan_id_out)
            .await?
            .unwrap_or(0),
        fee_msat: event.fee_msat,
        incoming_amount_msat: event.amt_in_msat,
        outgoing_amount_msat: event.amt_out_msat,
    })
}
