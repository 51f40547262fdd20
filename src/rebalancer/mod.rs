//! Rebalance admission, bookkeeping and execution.

mod registry;
mod service;

pub use registry::*;
pub use service::*;

#[cfg(test)]
mod service_test;
