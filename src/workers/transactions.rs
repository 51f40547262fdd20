use tonic::async_trait;
use tracing::debug;

use super::StreamProcessor;
use super::WorkerContext;
use crate::proto::lnrpc;
use crate::time_from_secs;
use crate::EventPayload;
use crate::Result;
use crate::TransactionRecord;
use crate::UpstreamStream;

/// On-chain wallet transactions; bootstrap reads everything from the highest
/// stored block height on.
pub struct TransactionProcessor;

#[async_trait]
impl StreamProcessor for TransactionProcessor {
    type Item = lnrpc::Transaction;

    async fn open(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<UpstreamStream<Self::Item>> {
        ctx.client()?.subscribe_transactions().await
    }

    async fn bootstrap(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<()> {
        let start_height = ctx.plane.store.last_transaction_height(ctx.node_id)?;
        let transactions = ctx.client()?.get_transactions(start_height).await?;
        let mut added = 0;
        for transaction in &transactions {
            if ctx.plane.store.add_transaction(&transaction_record(ctx, transaction))? {
                added += 1;
            }
        }
        debug!(start_height, added, "transactions caught up");
        Ok(())
    }

    async fn process(
        &mut self,
        ctx: &WorkerContext,
        transaction: Self::Item,
    ) -> Result<()> {
        let record = transaction_record(ctx, &transaction);
        if ctx.plane.store.add_transaction(&record)? {
            ctx.plane.bus.publish(ctx.node_id, EventPayload::Transaction(record));
        }
        Ok(())
    }
}

fn transaction_record(
    ctx: &WorkerContext,
    transaction: &lnrpc::Transaction,
) -> TransactionRecord {
    TransactionRecord {
        node_id: ctx.node_id,
        tx_hash: transaction.tx_hash.clone(),
        amount: transaction.amount,
        num_confirmations: transaction.num_confirmations,
        block_height: transaction.block_height,
        time_stamp: time_from_secs(transaction.time_stamp),
        total_fees: transaction.total_fees,
        dest_addresses: transaction.dest_addresses.clone(),
        label: transaction.label.clone(),
    }
}
