//! Change counting for the policy rate limiter and the status flap limiter.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use parking_lot::Mutex;

use crate::ChannelId;
use crate::NodeId;
use crate::PolicyField;
use crate::RoutingPolicyRecord;

/// Entries older than this are dropped whatever window a caller asks for.
const LEDGER_RETENTION_HOURS: i64 = 24;

/// Policy changes this process pushed upstream, per local node and channel.
///
/// The graph stream persists the same changes once the daemon gossips them;
/// the ledger covers the gap until it does. A change is reserved before the
/// upstream call and kept only when the call succeeds, so concurrent requests
/// for one channel share a single budget.
#[derive(Debug, Default)]
pub(crate) struct ChangeLedger {
    entries: Mutex<HashMap<(NodeId, ChannelId), Vec<Change>>>,
    next_id: AtomicU64,
}

#[derive(Debug)]
struct Change {
    id: u64,
    at: DateTime<Utc>,
    fields: Vec<PolicyField>,
}

impl ChangeLedger {
    /// Counts each of `fields` changed since `since`, taking the larger of the
    /// `persisted` count and the ledger's own. When every count stays below
    /// `limit` the change is recorded under the same lock; otherwise the first
    /// field over budget is returned with its count.
    pub(crate) fn reserve(
        &self,
        node_id: NodeId,
        channel_id: ChannelId,
        fields: Vec<PolicyField>,
        persisted: &[usize],
        since: DateTime<Utc>,
        limit: usize,
    ) -> std::result::Result<Reservation<'_>, (PolicyField, usize)> {
        let at = Utc::now();
        let horizon = at - Duration::hours(LEDGER_RETENTION_HOURS);
        let key = (node_id, channel_id);
        let mut entries = self.entries.lock();
        let changes = entries.entry(key).or_default();
        changes.retain(|change| change.at >= horizon);

        for (i, field) in fields.iter().enumerate() {
            let stored = persisted.get(i).copied().unwrap_or(0);
            let count = stored.max(count_since(changes, *field, since));
            if count >= limit {
                return Err((*field, count));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        changes.push(Change { id, at, fields });
        Ok(Reservation {
            ledger: self,
            key,
            id,
            kept: false,
        })
    }

    fn release(
        &self,
        key: (NodeId, ChannelId),
        id: u64,
    ) {
        if let Some(changes) = self.entries.lock().get_mut(&key) {
            changes.retain(|change| change.id != id);
        }
    }
}

fn count_since(
    changes: &[Change],
    field: PolicyField,
    since: DateTime<Utc>,
) -> usize {
    changes
        .iter()
        .filter(|change| change.at >= since && change.fields.contains(&field))
        .count()
}

/// A change held in the ledger; released on drop unless kept.
#[derive(Debug)]
pub(crate) struct Reservation<'a> {
    ledger: &'a ChangeLedger,
    key: (NodeId, ChannelId),
    id: u64,
    kept: bool,
}

impl Reservation<'_> {
    pub(crate) fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.ledger.release(self.key, self.id);
        }
    }
}

/// How often each field changed between consecutive rows of `history`,
/// which is ordered oldest first.
pub(crate) fn field_changes(history: &[RoutingPolicyRecord]) -> HashMap<PolicyField, usize> {
    let mut counts = HashMap::new();
    for pair in history.windows(2) {
        for field in pair[1].policy.changed_fields(&pair[0].policy) {
            *counts.entry(field).or_insert(0) += 1;
        }
    }
    counts
}
