//! Backfill of on-chain details for known channels.
//!
//! Channels learned from the daemon carry their funding and closing
//! transactions but not the blocks that confirmed them. A periodic pass asks
//! an external block-details service for those and completes the rows.

mod backfill;
mod block_details;

pub use backfill::*;
pub use block_details::*;
