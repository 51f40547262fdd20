use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use futures::StreamExt;
use tokio::time::timeout;

use super::*;
use crate::proto::lnrpc;
use crate::proto::lnrpc::invoice::InvoiceState as UpstreamState;
use crate::test_utils::test_plane;
use crate::test_utils::test_settings;
use crate::test_utils::TestPlane;
use crate::test_utils::LOCAL_KEY;
use crate::EventKind;
use crate::EventPayload;
use crate::InvoiceState;
use crate::MockLightningClient;
use crate::ServiceScope;
use crate::ServiceStatus;
use crate::ServiceType;

fn ctx(test: &TestPlane) -> WorkerContext {
    WorkerContext::new(
        test.plane.clone(),
        test.node_id,
        ServiceType::InvoiceStream,
        test.token.child_token(),
    )
}

fn invoice(
    add_index: u64,
    settle_index: u64,
    state: UpstreamState,
) -> lnrpc::Invoice {
    lnrpc::Invoice {
        memo: format!("invoice {add_index}"),
        r_hash: vec![add_index as u8; 32],
        payment_request: format!("lnbcrt10u1invoice{add_index}"),
        value_msat: 1_000_000,
        creation_date: 1_700_000_000,
        expiry: 3_600,
        add_index,
        settle_index,
        state: state as i32,
        ..Default::default()
    }
}

fn decoding(client: &mut MockLightningClient) {
    client.expect_decode_pay_req().returning(|_| {
        Ok(lnrpc::PayReq {
            destination: LOCAL_KEY.to_string(),
            ..Default::default()
        })
    });
}

#[tokio::test]
async fn test_bootstrap_pages_invoice_history() {
    let history = Arc::new(vec![
        invoice(1, 0, UpstreamState::Canceled),
        invoice(2, 1, UpstreamState::Settled),
        invoice(3, 0, UpstreamState::Open),
    ]);
    let mut client = MockLightningClient::new();
    client.expect_list_invoices().returning(move |req| {
        let invoices: Vec<_> = history
            .iter()
            .filter(|i| i.add_index > req.index_offset)
            .take(req.num_max_invoices as usize)
            .cloned()
            .collect();
        let last_index_offset = invoices.last().map(|i| i.add_index).unwrap_or(req.index_offset);
        Ok(lnrpc::ListInvoiceResponse {
            invoices,
            last_index_offset,
            ..Default::default()
        })
    });
    decoding(&mut client);
    let test = test_plane(test_settings(), client).await;
    let ctx = ctx(&test);

    InvoiceProcessor::new(2).bootstrap(&ctx).await.unwrap();

    assert_eq!(test.plane.store.last_invoice_indexes(test.node_id).unwrap(), (3, 1));
}

#[tokio::test]
async fn test_settled_invoice_is_stored_and_published() {
    let mut client = MockLightningClient::new();
    decoding(&mut client);
    let test = test_plane(test_settings(), client).await;
    let mut events = test.plane.bus.subscribe("test", &[EventKind::Invoice]);
    let ctx = ctx(&test);
    let mut processor = InvoiceProcessor::new(10);

    processor.process(&ctx, invoice(7, 0, UpstreamState::Open)).await.unwrap();
    processor.process(&ctx, invoice(7, 4, UpstreamState::Settled)).await.unwrap();

    assert_eq!(test.plane.store.last_invoice_indexes(test.node_id).unwrap(), (7, 4));
    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    let EventPayload::Invoice(record) = &event.payload else {
        panic!("unexpected payload {:?}", event.payload);
    };
    assert_eq!(record.state, InvoiceState::Settled);
    assert_eq!(record.r_hash, hex::encode([7u8; 32]));
    assert_eq!(record.destination_pub_key.as_deref(), Some(LOCAL_KEY));
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_keysend_invoice_is_not_decoded() {
    let mut client = MockLightningClient::new();
    client.expect_decode_pay_req().never();
    let test = test_plane(test_settings(), client).await;
    let ctx = ctx(&test);
    let mut keysend = invoice(2, 0, UpstreamState::Open);
    keysend.is_keysend = true;

    InvoiceProcessor::new(10).process(&ctx, keysend).await.unwrap();

    assert_eq!(test.plane.store.last_invoice_indexes(test.node_id).unwrap(), (2, 0));
}

#[tokio::test]
async fn test_subscription_resumes_from_stored_indexes() {
    let mut client = MockLightningClient::new();
    decoding(&mut client);
    client
        .expect_subscribe_invoices()
        .withf(|add_index, settle_index| *add_index == 5 && *settle_index == 2)
        .returning(|_, _| Ok(stream::pending::<crate::Result<lnrpc::Invoice>>().boxed()));
    client.expect_list_invoices().returning(|_| Ok(lnrpc::ListInvoiceResponse::default()));
    let test = test_plane(test_settings(), client).await;
    let ctx = ctx(&test);
    let mut processor = InvoiceProcessor::new(10);
    processor.process(&ctx, invoice(5, 2, UpstreamState::Settled)).await.unwrap();

    let token = ctx.token.clone();
    let worker = tokio::spawn(run_stream(ctx, processor));
    let services = test.plane.caches.services.clone();
    let scope = ServiceScope::Node(test.node_id);
    timeout(Duration::from_secs(2), async {
        loop {
            let view = services.get(scope, ServiceType::InvoiceStream).await.unwrap();
            if view.current == ServiceStatus::Active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    token.cancel();
    worker.await.unwrap().unwrap();
}
