use std::time::Duration;

use chrono::Utc;
use tonic::async_trait;
use tracing::info;

use super::Poller;
use super::WorkerContext;
use crate::failure_reason;
use crate::payment_status;
use crate::proto::lnrpc;
use crate::PaymentFailureReason;
use crate::PaymentRecord;
use crate::PaymentStatus;
use crate::Result;

/// Invoice expiry assumed when the payment request carried none.
const DEFAULT_EXPIRY_SECS: i64 = 3_600;

/// Re-reads payments still stored as in flight until they resolve or time out.
pub struct InFlightPoller {
    grace: Duration,
}

impl InFlightPoller {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Whether creation time plus invoice expiry plus grace has passed.
    pub fn expired(
        &self,
        payment: &PaymentRecord,
    ) -> bool {
        let expiry = payment.expiry_secs.filter(|e| *e > 0).unwrap_or(DEFAULT_EXPIRY_SECS);
        let deadline = payment.creation_time
            + chrono::Duration::seconds(expiry)
            + chrono::Duration::seconds(self.grace.as_secs() as i64);
        deadline < Utc::now()
    }
}

#[async_trait]
impl Poller for InFlightPoller {
    async fn poll(
        &mut self,
        ctx: &WorkerContext,
    ) -> Result<()> {
        let store = &ctx.plane.store;
        let pending = store.in_flight_payments(ctx.node_id)?;
        if pending.is_empty() {
            return Ok(());
        }
        let client = ctx.client()?;
        for payment in pending {
            let (status, reason) = if self.expired(&payment) {
                (PaymentStatus::Failed, PaymentFailureReason::Timeout)
            } else {
                let listed = client
                    .list_payments(lnrpc::ListPaymentsRequest {
                        include_incomplete: true,
                        index_offset: payment.payment_index.saturating_sub(1),
                        max_payments: 1,
                        ..Default::default()
                    })
                    .await?;
                match listed.payments.iter().find(|p| p.payment_index == payment.payment_index) {
                    None => (PaymentStatus::Failed, PaymentFailureReason::DetailsUnavailable),
                    Some(upstream) => {
                        let status = payment_status(upstream.status);
                        if status == PaymentStatus::InFlight {
                            continue;
                        }
                        (status, failure_reason(upstream.failure_reason))
                    }
                }
            };
            let payment_index = payment.payment_index;
            info!(payment_index, ?status, ?reason, "in-flight payment resolved");
            store.update_payment_status(ctx.node_id, payment_index, status, reason)?;
        }
        Ok(())
    }
}
