use std::path::Path;

use chrono::DateTime;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::ConflictableTransactionError;
use sled::transaction::TransactionError;
use sled::transaction::TransactionalTree;
use sled::Transactional;
use tracing::debug;
use tracing::info;

use super::RebalanceLog;
use super::Store;
use crate::Chain;
use crate::Channel;
use crate::ChannelEventRecord;
use crate::ChannelId;
use crate::ChannelPoint;
use crate::Error;
use crate::ForwardRecord;
use crate::HtlcEventRecord;
use crate::InvoiceRecord;
use crate::Network;
use crate::Node;
use crate::NodeEventRecord;
use crate::NodeId;
use crate::PaymentFailureReason;
use crate::PaymentRecord;
use crate::PaymentStatus;
use crate::PeerEventRecord;
use crate::RebalanceRequest;
use crate::RebalanceResult;
use crate::Result;
use crate::RoutingPolicyRecord;
use crate::StorageError;
use crate::TagAssignment;
use crate::TagTarget;
use crate::TransactionRecord;

const NODE_SEQ: &[u8] = b"node_seq";
const CHANNEL_SEQ: &[u8] = b"channel_seq";
const REBALANCE_SEQ: &[u8] = b"rebalance_seq";
const INVOICE_SETTLE_CURSOR: &[u8] = b"invoice_settle/";
const TRANSACTION_HEIGHT_CURSOR: &[u8] = b"transaction_height/";

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<StorageError>>;

/// Sled-backed store. Rows are bincode encoded; keys are big-endian so
/// prefix scans come back in natural order.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    meta: sled::Tree,
    nodes: sled::Tree,
    node_keys: sled::Tree,
    channels: sled::Tree,
    channel_points: sled::Tree,
    channel_events: sled::Tree,
    routing_policies: sled::Tree,
    node_events: sled::Tree,
    htlc_events: sled::Tree,
    forwards: sled::Tree,
    payments: sled::Tree,
    invoices: sled::Tree,
    transactions: sled::Tree,
    peer_events: sled::Tree,
    tags: sled::Tree,
    rebalance_logs: sled::Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("nodes", &self.nodes.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::Config::default()
            .path(path.as_ref())
            .use_compression(true)
            .open()?;
        info!(path = %path.as_ref().display(), "Opened store");
        Self::with_db(db)
    }

    /// In-memory store that vanishes on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::default().temporary(true).open()?;
        Self::with_db(db)
    }

    fn with_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            meta: db.open_tree("meta")?,
            nodes: db.open_tree("nodes")?,
            node_keys: db.open_tree("node_keys")?,
            channels: db.open_tree("channels")?,
            channel_points: db.open_tree("channel_points")?,
            channel_events: db.open_tree("channel_events")?,
            routing_policies: db.open_tree("routing_policies")?,
            node_events: db.open_tree("node_events")?,
            htlc_events: db.open_tree("htlc_events")?,
            forwards: db.open_tree("forwards")?,
            payments: db.open_tree("payments")?,
            invoices: db.open_tree("invoices")?,
            transactions: db.open_tree("transactions")?,
            peer_events: db.open_tree("peer_events")?,
            tags: db.open_tree("tags")?,
            rebalance_logs: db.open_tree("rebalance_logs")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }

    /// Appends a row under `prefix` with a process-unique suffix.
    fn append<T: Serialize>(
        &self,
        tree: &sled::Tree,
        prefix: &[u8],
        value: &T,
    ) -> Result<()> {
        let mut key = prefix.to_vec();
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        tree.insert(key, encode(value)?)?;
        Ok(())
    }

    /// Node-scoped high-water mark kept in `meta`. A missing mark is rebuilt
    /// once from `rebuild`.
    fn cursor(
        &self,
        name: &[u8],
        node_id: NodeId,
        rebuild: impl FnOnce() -> Result<u64>,
    ) -> Result<u64> {
        let key = cursor_key(name, node_id);
        if let Some(value) = self.meta.get(&key)? {
            return Ok(be_u64(&value));
        }
        let value = rebuild()?;
        self.raise_cursor(name, node_id, value)?;
        Ok(value)
    }

    fn raise_cursor(
        &self,
        name: &[u8],
        node_id: NodeId,
        value: u64,
    ) -> Result<()> {
        self.meta.fetch_and_update(cursor_key(name, node_id), |old| {
            let current = old.map(be_u64).unwrap_or(0);
            Some(current.max(value).to_be_bytes().to_vec())
        })?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(
        tree: &sled::Tree,
        prefix: &[u8],
    ) -> Result<Vec<T>> {
        tree.scan_prefix(prefix)
            .values()
            .map(|v| decode(&v?))
            .collect()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn tx_encode<T: Serialize>(value: &T) -> TxResult<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| ConflictableTransactionError::Abort(StorageError::BincodeError(e)))
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    u32::from_be_bytes(buf)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_be_bytes(buf)
}

fn next_id(
    meta: &TransactionalTree,
    key: &[u8],
) -> TxResult<u64> {
    let current = meta.get(key)?.map(|v| be_u64(&v)).unwrap_or(0);
    let next = current + 1;
    meta.insert(key, next.to_be_bytes().to_vec())?;
    Ok(next)
}

fn from_tx_error(e: TransactionError<StorageError>) -> Error {
    match e {
        TransactionError::Abort(e) => e.into(),
        TransactionError::Storage(e) => e.into(),
    }
}

fn node_key(
    public_key: &str,
    chain: Chain,
    network: Network,
) -> Vec<u8> {
    format!("{}|{:?}|{:?}", public_key.to_lowercase(), chain, network).into_bytes()
}

fn pair_key(
    first: u32,
    second: u64,
) -> Vec<u8> {
    let mut key = first.to_be_bytes().to_vec();
    key.extend_from_slice(&second.to_be_bytes());
    key
}

fn cursor_key(
    name: &[u8],
    node_id: NodeId,
) -> Vec<u8> {
    let mut key = name.to_vec();
    key.extend_from_slice(&node_id.to_be_bytes());
    key
}

fn policy_prefix(
    channel_id: ChannelId,
    announcing_node_id: NodeId,
) -> Vec<u8> {
    let mut key = channel_id.to_be_bytes().to_vec();
    key.extend_from_slice(&announcing_node_id.to_be_bytes());
    key
}

fn nanos(ts: &DateTime<Utc>) -> u64 {
    ts.timestamp_nanos_opt().unwrap_or(0).max(0) as u64
}

fn tag_key(assignment: &TagAssignment) -> Vec<u8> {
    let (kind, id) = match assignment.target {
        TagTarget::Node(id) => (b'n', id),
        TagTarget::Channel(id) => (b'c', id),
    };
    let mut key = assignment.tag_id.to_be_bytes().to_vec();
    key.push(kind);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

impl Store for SledStore {
    fn add_node(
        &self,
        public_key: &str,
        chain: Chain,
        network: Network,
    ) -> Result<Node> {
        let key = node_key(public_key, chain, network);
        let public_key = public_key.to_lowercase();
        let node = (&self.nodes, &self.node_keys, &self.meta)
            .transaction(|(nodes, keys, meta)| {
                if let Some(existing) = keys.get(&key)? {
                    let id = be_u32(&existing);
                    if let Some(row) = nodes.get(id.to_be_bytes())? {
                        return bincode::deserialize::<Node>(&row).map_err(|e| {
                            ConflictableTransactionError::Abort(StorageError::BincodeError(e))
                        });
                    }
                }
                let node = Node {
                    node_id: next_id(meta, NODE_SEQ)? as NodeId,
                    public_key: public_key.clone(),
                    chain,
                    network,
                };
                nodes.insert(node.node_id.to_be_bytes().to_vec(), tx_encode(&node)?)?;
                keys.insert(key.as_slice(), node.node_id.to_be_bytes().to_vec())?;
                Ok(node)
            })
            .map_err(from_tx_error)?;
        debug!(node_id = node.node_id, "Node resolved");
        Ok(node)
    }

    fn get_node(
        &self,
        node_id: NodeId,
    ) -> Result<Option<Node>> {
        self.nodes
            .get(node_id.to_be_bytes())?
            .map(|v| decode(&v))
            .transpose()
    }

    fn all_nodes(&self) -> Result<Vec<Node>> {
        Self::scan(&self.nodes, &[])
    }

    fn add_channel(
        &self,
        channel: &Channel,
    ) -> Result<ChannelId> {
        let point = channel.channel_point.to_string();
        (&self.channels, &self.channel_points, &self.meta)
            .transaction(|(channels, points, meta)| {
                if let Some(existing) = points.get(point.as_bytes())? {
                    return Ok(be_u32(&existing));
                }
                let mut row = channel.clone();
                row.channel_id = next_id(meta, CHANNEL_SEQ)? as ChannelId;
                channels.insert(row.channel_id.to_be_bytes().to_vec(), tx_encode(&row)?)?;
                points.insert(point.as_bytes(), row.channel_id.to_be_bytes().to_vec())?;
                Ok(row.channel_id)
            })
            .map_err(from_tx_error)
    }

    fn update_channel(
        &self,
        channel: &Channel,
    ) -> Result<()> {
        let key = channel.channel_id.to_be_bytes();
        if !self.channels.contains_key(key)? {
            return Err(StorageError::NotFound(format!("channel {}", channel.channel_id)).into());
        }
        self.channels.insert(key, encode(channel)?)?;
        Ok(())
    }

    fn get_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<Channel>> {
        self.channels
            .get(channel_id.to_be_bytes())?
            .map(|v| decode(&v))
            .transpose()
    }

    fn get_channel_id(
        &self,
        channel_point: &ChannelPoint,
    ) -> Result<Option<ChannelId>> {
        Ok(self
            .channel_points
            .get(channel_point.to_string().as_bytes())?
            .map(|v| be_u32(&v)))
    }

    fn all_channels(&self) -> Result<Vec<Channel>> {
        Self::scan(&self.channels, &[])
    }

    fn add_channel_event(
        &self,
        event: &ChannelEventRecord,
    ) -> Result<()> {
        self.append(&self.channel_events, &event.channel_id.to_be_bytes(), event)
    }

    fn channel_events(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<ChannelEventRecord>> {
        Self::scan(&self.channel_events, &channel_id.to_be_bytes())
    }

    fn latest_routing_policy(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
    ) -> Result<Option<RoutingPolicyRecord>> {
        self.routing_policies
            .scan_prefix(policy_prefix(channel_id, announcing_node_id))
            .values()
            .next_back()
            .transpose()?
            .map(|v| decode(&v))
            .transpose()
    }

    fn add_routing_policy(
        &self,
        record: &RoutingPolicyRecord,
    ) -> Result<()> {
        let mut prefix = policy_prefix(record.channel_id, record.announcing_node_id);
        prefix.extend_from_slice(&nanos(&record.ts).to_be_bytes());
        self.append(&self.routing_policies, &prefix, record)
    }

    fn routing_policies_since(
        &self,
        channel_id: ChannelId,
        announcing_node_id: NodeId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RoutingPolicyRecord>> {
        let prefix = policy_prefix(channel_id, announcing_node_id);
        let mut start = prefix.clone();
        start.extend_from_slice(&nanos(&since).to_be_bytes());
        let mut end = prefix;
        end.extend_from_slice(&u64::MAX.to_be_bytes());
        end.extend_from_slice(&u64::MAX.to_be_bytes());
        self.routing_policies
            .range(start..=end)
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    fn add_node_event(
        &self,
        event: &NodeEventRecord,
    ) -> Result<()> {
        self.append(&self.node_events, &event.node_id.to_be_bytes(), event)
    }

    fn add_htlc_event(
        &self,
        event: &HtlcEventRecord,
    ) -> Result<()> {
        self.append(&self.htlc_events, &event.node_id.to_be_bytes(), event)
    }

    fn last_forward_time_ns(
        &self,
        node_id: NodeId,
    ) -> Result<u64> {
        match self.forwards.scan_prefix(node_id.to_be_bytes()).keys().next_back() {
            Some(key) => Ok(be_u64(&key?[4..])),
            None => Ok(0),
        }
    }

    fn add_forwards(
        &self,
        forwards: &[ForwardRecord],
    ) -> Result<usize> {
        let mut inserted = 0;
        for forward in forwards {
            let key = pair_key(forward.node_id, forward.time_ns);
            let swapped =
                self.forwards.compare_and_swap(key, None::<&[u8]>, Some(encode(forward)?))?;
            if swapped.is_ok() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn forwards(
        &self,
        node_id: NodeId,
    ) -> Result<Vec<ForwardRecord>> {
        Self::scan(&self.forwards, &node_id.to_be_bytes())
    }

    fn last_payment_index(
        &self,
        node_id: NodeId,
    ) -> Result<u64> {
        match self.payments.scan_prefix(node_id.to_be_bytes()).keys().next_back() {
            Some(key) => Ok(be_u64(&key?[4..])),
            None => Ok(0),
        }
    }

    fn add_payment(
        &self,
        payment: &PaymentRecord,
    ) -> Result<bool> {
        let key = pair_key(payment.node_id, payment.payment_index);
        let swapped =
            self.payments.compare_and_swap(key, None::<&[u8]>, Some(encode(payment)?))?;
        Ok(swapped.is_ok())
    }

    fn get_payment(
        &self,
        node_id: NodeId,
        payment_index: u64,
    ) -> Result<Option<PaymentRecord>> {
        self.payments
            .get(pair_key(node_id, payment_index))?
            .map(|v| decode(&v))
            .transpose()
    }

    fn in_flight_payments(
        &self,
        node_id: NodeId,
    ) -> Result<Vec<PaymentRecord>> {
        let all: Vec<PaymentRecord> = Self::scan(&self.payments, &node_id.to_be_bytes())?;
        Ok(all
            .into_iter()
            .filter(|p| p.status == PaymentStatus::InFlight)
            .collect())
    }

    fn update_payment_status(
        &self,
        node_id: NodeId,
        payment_index: u64,
        status: PaymentStatus,
        failure_reason: PaymentFailureReason,
    ) -> Result<()> {
        let key = pair_key(node_id, payment_index);
        let mut payment: PaymentRecord = match self.payments.get(&key)? {
            Some(v) => decode(&v)?,
            None => {
                return Err(StorageError::NotFound(format!(
                    "payment {payment_index} of node {node_id}"
                ))
                .into())
            }
        };
        payment.status = status;
        payment.failure_reason = failure_reason;
        self.payments.insert(key, encode(&payment)?)?;
        Ok(())
    }

    fn last_invoice_indexes(
        &self,
        node_id: NodeId,
    ) -> Result<(u64, u64)> {
        let add_index = match self.invoices.scan_prefix(node_id.to_be_bytes()).keys().next_back() {
            Some(key) => be_u64(&key?[4..]),
            None => 0,
        };
        let settle_index = self.cursor(INVOICE_SETTLE_CURSOR, node_id, || {
            let invoices: Vec<InvoiceRecord> =
                Self::scan(&self.invoices, &node_id.to_be_bytes())?;
            Ok(invoices.iter().map(|i| i.settle_index).max().unwrap_or(0))
        })?;
        Ok((add_index, settle_index))
    }

    fn upsert_invoice(
        &self,
        invoice: &InvoiceRecord,
    ) -> Result<()> {
        self.invoices
            .insert(pair_key(invoice.node_id, invoice.add_index), encode(invoice)?)?;
        self.raise_cursor(INVOICE_SETTLE_CURSOR, invoice.node_id, invoice.settle_index)
    }

    fn last_transaction_height(
        &self,
        node_id: NodeId,
    ) -> Result<i32> {
        let height = self.cursor(TRANSACTION_HEIGHT_CURSOR, node_id, || {
            let transactions: Vec<TransactionRecord> =
                Self::scan(&self.transactions, &node_id.to_be_bytes())?;
            Ok(transactions.iter().map(|t| t.block_height.max(0) as u64).max().unwrap_or(0))
        })?;
        Ok(i32::try_from(height).unwrap_or(i32::MAX))
    }

    fn add_transaction(
        &self,
        transaction: &TransactionRecord,
    ) -> Result<bool> {
        let mut key = transaction.node_id.to_be_bytes().to_vec();
        key.extend_from_slice(transaction.tx_hash.as_bytes());
        let previous = self.transactions.insert(key, encode(transaction)?)?;
        self.raise_cursor(
            TRANSACTION_HEIGHT_CURSOR,
            transaction.node_id,
            transaction.block_height.max(0) as u64,
        )?;
        Ok(previous.is_none())
    }

    fn add_peer_event(
        &self,
        event: &PeerEventRecord,
    ) -> Result<()> {
        self.append(&self.peer_events, &event.node_id.to_be_bytes(), event)
    }

    fn all_tags(&self) -> Result<Vec<TagAssignment>> {
        Self::scan(&self.tags, &[])
    }

    fn add_tag(
        &self,
        assignment: &TagAssignment,
    ) -> Result<()> {
        self.tags.insert(tag_key(assignment), encode(assignment)?)?;
        Ok(())
    }

    fn remove_tag(
        &self,
        assignment: &TagAssignment,
    ) -> Result<()> {
        self.tags.remove(tag_key(assignment))?;
        Ok(())
    }

    fn add_rebalance_log(
        &self,
        request: &RebalanceRequest,
        result: &RebalanceResult,
    ) -> Result<u64> {
        (&self.rebalance_logs, &self.meta)
            .transaction(|(logs, meta)| {
                let log = RebalanceLog {
                    id: next_id(meta, REBALANCE_SEQ)?,
                    request: request.clone(),
                    result: result.clone(),
                };
                logs.insert(log.id.to_be_bytes().to_vec(), tx_encode(&log)?)?;
                Ok(log.id)
            })
            .map_err(from_tx_error)
    }

    fn rebalance_logs(&self) -> Result<Vec<RebalanceLog>> {
        Self::scan(&self.rebalance_logs, &[])
    }
}
