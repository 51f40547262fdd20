//! Bootstrap import of channels, policies and node information.
//!
//! Each mode is idempotent and skipped when it last succeeded less than the
//! freshness window ago, unless forced. Imports of one node never overlap.

mod identity;
mod importer;

pub(crate) use identity::*;
pub use importer::*;

#[cfg(test)]
mod importer_test;
