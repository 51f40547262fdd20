use tonic::async_trait;
use tracing::debug;

use super::StreamProcessor;
use super::WorkerContext;
use crate::invoice_state;
use crate::proto::lnrpc;
use crate::time_from_secs;
use crate::EventPayload;
use crate::InvoiceRecord;
use crate::InvoiceState;
use crate::LightningClient;
use crate::Result;
use crate::UpstreamStream;

/// Invoice subscription resumed from the stored `(add_index, settle_index)`
/// marks; history older than the subscription is paged in on bootstrap.
pub struct InvoiceProcessor {
    page_size: u64,
    add_index: u64,
}

impl InvoiceProcessor {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size,
            add_index: 0,
        }
    }
}

#[async_trait]
impl StreamProcessor for InvoiceProcessor {
    type Item = lnrpc::Invoice;

    async fn open(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<UpstreamStream<Self::Item>> {
        let (add_index, settle_index) = ctx.plane.store.last_invoice_indexes(ctx.node_id)?;
        self.add_index = add_index;
        ctx.client()?.subscribe_invoices(add_index, settle_index).await
    }

    async fn bootstrap(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<()> {
        let client = ctx.client()?;
        let mut index_offset = self.add_index;
        let mut stored = 0;
        loop {
            let page = client
                .list_invoices(lnrpc::ListInvoiceRequest {
                    index_offset,
                    num_max_invoices: self.page_size,
                    ..Default::default()
                })
                .await?;
            for invoice in &page.invoices {
                let record = invoice_record(ctx, client.as_ref(), invoice).await;
                ctx.plane.store.upsert_invoice(&record)?;
                stored += 1;
            }
            if (page.invoices.len() as u64) < self.page_size || page.last_index_offset <= index_offset
            {
                break;
            }
            index_offset = page.last_index_offset;
        }
        debug!(stored, "invoice history caught up");
        Ok(())
    }

    async fn process(
        &mut self,
        ctx: &WorkerContext,
        invoice: Self::Item,
    ) -> Result<()> {
        let client = ctx.client()?;
        let record = invoice_record(ctx, client.as_ref(), &invoice).await;
        ctx.plane.store.upsert_invoice(&record)?;
        if matches!(record.state, InvoiceState::Settled | InvoiceState::Accepted) {
            ctx.plane.bus.publish(ctx.node_id, EventPayload::Invoice(record));
        }
        Ok(())
    }
}

/// Maps an invoice; an undecodable payment request only loses the payee key.
async fn invoice_record(
    ctx: &WorkerContext,
    client: &dyn LightningClient,
    invoice: &lnrpc::Invoice,
) -> InvoiceRecord {
    let destination_pub_key = if invoice.payment_request.is_empty() || invoice.is_keysend {
        None
    } else {
        match client.decode_pay_req(invoice.payment_request.clone()).await {
            Ok(decoded) => Some(decoded.destination),
            Err(e) => {
                debug!(add_index = invoice.add_index, "payment request not decoded: {}", e);
                None
            }
        }
    };
    InvoiceRecord {
        node_id: ctx.node_id,
        add_index: invoice.add_index,
        settle_index: invoice.settle_index,
        r_hash: hex::encode(&invoice.r_hash),
        memo: invoice.memo.clone(),
        payment_request: invoice.payment_request.clone(),
        value_msat: invoice.value_msat,
        amt_paid_msat: invoice.amt_paid_msat,
        state: invoice_state(invoice.state),
        creation_date: time_from_secs(invoice.creation_date),
        settle_date: Some(invoice.settle_date).filter(|d| *d > 0).map(time_from_secs),
        expiry_secs: invoice.expiry,
        is_keysend: invoice.is_keysend,
        destination_pub_key,
    }
}
