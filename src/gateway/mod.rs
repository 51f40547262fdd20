//! Outbound control requests.
//!
//! Requests reach the [`Gateway`] through a bounded queue whose send side is
//! the [`GatewayHandle`]. Every request is validated and checked against the
//! cached channel state before a semaphore admits it to the daemon.

mod gateway;
mod rate_limit;
mod request;

pub use gateway::*;
pub(crate) use rate_limit::*;
pub use request::*;

#[cfg(test)]
mod rate_limit_test;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Receive side of a request queue; the serving task holds the lock while it runs.
pub type RequestQueue<T> = Arc<Mutex<mpsc::Receiver<T>>>;

pub fn request_queue<T>(size: usize) -> (mpsc::Sender<T>, RequestQueue<T>) {
    let (tx, rx) = mpsc::channel(size);
    (tx, Arc::new(Mutex::new(rx)))
}
