//! Control and telemetry plane for Lightning routing nodes.
//!
//! A [`Supervisor`] reconciles the desired and current state of every
//! service; per-node workers mirror the daemon's streams into the [`Store`],
//! the cache actors and the [`EventBusHandle`]; outbound policy, channel and
//! rebalance requests go through the [`GatewayHandle`] and the
//! [`RebalancerHandle`]. [`PlaneBuilder`] wires all of it together.

mod bus;
mod cache;
mod config;
mod errors;
mod gateway;
mod importer;
mod lightning;
mod maintenance;
mod metrics;
mod plane;
mod proto;
mod rebalancer;
mod store;
mod supervisor;
mod types;
mod workers;
pub mod utils;

pub use bus::*;
pub use cache::*;
pub use config::*;
pub use errors::*;
pub use gateway::*;
pub use importer::*;
pub use lightning::*;
pub use maintenance::*;
pub use metrics::*;
pub use plane::*;
pub use proto::*;
pub use rebalancer::*;
pub use store::*;
pub use supervisor::*;
pub use types::*;
pub use workers::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;

//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms100, ObjectivePercentile::P99);
