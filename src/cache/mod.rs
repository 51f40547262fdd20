//! Serialized in-memory caches.
//!
//! Each cache is a single-writer actor: a task owning its map, dequeuing typed
//! ops from a bounded mailbox and answering on the reply channel supplied with
//! the op. Handles are cheap to clone and are the only way in; nothing inside
//! an actor's map is ever shared with a caller. Absent entries answer with
//! `None`, an empty collection, or `false`.

mod channel_cache;
mod channel_state_cache;
mod node_alias_cache;
mod node_cache;
mod service_state_cache;
mod settings_cache;
mod tag_cache;

pub use channel_cache::*;
pub use channel_state_cache::*;
pub use node_alias_cache::*;
pub use node_cache::*;
pub use service_state_cache::*;
pub use settings_cache::*;
pub use tag_cache::*;

#[cfg(test)]
mod channel_cache_test;
#[cfg(test)]
mod node_alias_cache_test;
#[cfg(test)]
mod service_state_cache_test;
#[cfg(test)]
mod tag_cache_test;

use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::Result;
use crate::SystemError;

/// Sends the op built around a fresh reply channel and waits for the answer.
pub(crate) async fn ask<Op, T>(
    mailbox: &mpsc::Sender<Op>,
    actor: &'static str,
    build: impl FnOnce(oneshot::Sender<T>) -> Op,
) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    mailbox
        .send(build(reply))
        .await
        .map_err(|_| SystemError::ActorGone(actor))?;
    rx.await.map_err(|_| SystemError::ActorGone(actor).into())
}

/// Fire-and-forget write; the actor applies it in mailbox order.
pub(crate) async fn tell<Op>(
    mailbox: &mpsc::Sender<Op>,
    actor: &'static str,
    op: Op,
) -> Result<()> {
    mailbox
        .send(op)
        .await
        .map_err(|_| SystemError::ActorGone(actor).into())
}
