use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::sleep;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::ServiceFactory;
use crate::utils::async_task::catch_panic;
use crate::utils::time::elapsed_since;
use crate::NodeFlags;
use crate::NodeId;
use crate::Result;
use crate::ServiceScope;
use crate::ServiceStateCacheHandle;
use crate::ServiceStateView;
use crate::ServiceStatus;
use crate::ServiceType;
use crate::SettingsCacheHandle;
use crate::ShutdownTier;
use crate::SupervisorConfig;
use crate::SUPERVISOR_RESTARTS;

type ServiceKey = (ServiceScope, ServiceType);

struct RunningService {
    handle: JoinHandle<()>,
    /// Ticks spent waiting for the worker to honour a cancel
    cancel_ticks: u32,
}

pub struct Supervisor {
    services: ServiceStateCacheHandle,
    settings: SettingsCacheHandle,
    factory: Arc<dyn ServiceFactory>,
    config: SupervisorConfig,
    /// Parent of every worker token
    root: CancellationToken,
    running: HashMap<ServiceKey, RunningService>,
    declared: HashMap<NodeId, NodeFlags>,
    process_declared: bool,
}

impl Supervisor {
    pub fn new(
        services: ServiceStateCacheHandle,
        settings: SettingsCacheHandle,
        factory: Arc<dyn ServiceFactory>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            services,
            settings,
            factory,
            config,
            root: CancellationToken::new(),
            running: HashMap::new(),
            declared: HashMap::new(),
            process_declared: false,
        }
    }

    /// Reconciles on every tick until `shutdown` fires, then stops every
    /// worker tier by tier.
    pub async fn run(
        mut self,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("supervisor started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("supervisor tick failed: {}", e);
                    }
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// One reconciliation step over every known service.
    pub(crate) async fn tick(&mut self) -> Result<()> {
        self.declare().await?;
        self.running.retain(|_, r| !r.handle.is_finished());

        let snapshot: BTreeMap<ServiceKey, ServiceStateView> = self
            .services
            .snapshot()
            .await?
            .into_iter()
            .map(|v| ((v.scope, v.service_type), v))
            .collect();

        for (key, view) in &snapshot {
            if !view.service_type.is_supervised() {
                continue;
            }
            let gated = view.service_type.is_node_stream()
                && snapshot
                    .get(&(view.scope, ServiceType::LndService))
                    .map(|lnd| lnd.current != ServiceStatus::Active)
                    .unwrap_or(true);
            let wanted = view.desired == ServiceStatus::Active && !gated;

            if wanted {
                if view.current == ServiceStatus::Inactive
                    && !self.running.contains_key(key)
                    && self.backoff_elapsed(view)
                {
                    self.start(*key).await?;
                }
            } else if self.running.contains_key(key) {
                self.stop(*key).await?;
            }
        }
        Ok(())
    }

    /// Publishes desired states: process services once, node services
    /// whenever the node's flags change.
    async fn declare(&mut self) -> Result<()> {
        if !self.process_declared {
            for service_type in ServiceType::PROCESS_SERVICES {
                self.services
                    .set_desired(ServiceScope::Process, service_type, ServiceStatus::Active)
                    .await?;
            }
            self.process_declared = true;
        }

        for node in self.settings.nodes().await? {
            let flags = NodeFlags::from(&node.config);
            if self.declared.get(&node.node_id) == Some(&flags) {
                continue;
            }
            let scope = ServiceScope::Node(node.node_id);
            let status = |on: bool| {
                if on {
                    ServiceStatus::Active
                } else {
                    ServiceStatus::Inactive
                }
            };
            self.services
                .set_desired(scope, ServiceType::LndService, status(flags.enabled))
                .await?;
            for stream in ServiceType::NODE_STREAMS {
                let on = flags.enabled && stream.enabled_by(&flags.streams);
                self.services.set_desired(scope, stream, status(on)).await?;
            }
            debug!(node_id = node.node_id, ?flags, "node services declared");
            self.declared.insert(node.node_id, flags);
        }
        Ok(())
    }

    fn backoff_elapsed(
        &self,
        view: &ServiceStateView,
    ) -> bool {
        if view.failure_time.is_none() {
            return true;
        }
        let delay = self.config.restart_backoff.delay_for(view.consecutive_failures);
        view.inactive_since
            .map(|since| elapsed_since(since) >= delay)
            .unwrap_or(true)
    }

    #[instrument(skip(self))]
    async fn start(
        &mut self,
        key: ServiceKey,
    ) -> Result<()> {
        let (scope, service_type) = key;
        let token = self.root.child_token();
        if !self.services.init_cancel(scope, service_type, token.clone()).await? {
            debug!("service already claimed");
            return Ok(());
        }
        let Some(service) = self.factory.create(scope, service_type, token.clone()) else {
            info!("service not offered, declaring it inactive");
            self.services.set_desired(scope, service_type, ServiceStatus::Inactive).await?;
            self.services.set_current(scope, service_type, ServiceStatus::Inactive, false).await?;
            return Ok(());
        };

        let services = self.services.clone();
        let name = format!("{scope:?}/{service_type}");
        let handle = tokio::spawn(async move {
            let result = catch_panic(&name, service).await;
            let failed = match &result {
                Ok(()) => false,
                Err(e) if token.is_cancelled() => {
                    debug!("{} stopped with {}", name, e);
                    false
                }
                Err(e) => {
                    warn!("{} failed: {}", name, e);
                    true
                }
            };
            if let Err(e) =
                services.set_current(scope, service_type, ServiceStatus::Inactive, failed).await
            {
                warn!("{} final status not recorded: {}", name, e);
            }
        });
        SUPERVISOR_RESTARTS.with_label_values(&[&service_type.to_string()]).inc();
        info!("service started");
        self.running.insert(
            key,
            RunningService {
                handle,
                cancel_ticks: 0,
            },
        );
        Ok(())
    }

    /// Cancels the worker; one that ignores the cancel past
    /// `shutdown_ticks_per_tier` ticks is aborted.
    async fn stop(
        &mut self,
        key: ServiceKey,
    ) -> Result<()> {
        let (scope, service_type) = key;
        let Some(running) = self.running.get_mut(&key) else {
            return Ok(());
        };
        running.cancel_ticks += 1;
        if running.cancel_ticks > self.config.shutdown_ticks_per_tier {
            warn!(?scope, %service_type, "worker ignored cancel, aborting");
            running.handle.abort();
            self.running.remove(&key);
            self.services.set_current(scope, service_type, ServiceStatus::Inactive, false).await?;
            return Ok(());
        }
        if running.cancel_ticks == 1 {
            info!(?scope, %service_type, "stopping service");
        }
        self.services.cancel(scope, service_type).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("supervisor shutting down");
        for tier in [ShutdownTier::Streams, ShutdownTier::Importer, ShutdownTier::Process] {
            let keys: Vec<ServiceKey> = self
                .running
                .keys()
                .filter(|(_, service_type)| service_type.shutdown_tier() == tier)
                .copied()
                .collect();
            for (scope, service_type) in &keys {
                if let Err(e) = self.services.cancel(*scope, *service_type).await {
                    warn!("cancel of {:?}/{} failed: {}", scope, service_type, e);
                }
            }
            for _ in 0..self.config.shutdown_ticks_per_tier {
                let done = keys
                    .iter()
                    .all(|k| self.running.get(k).map(|r| r.handle.is_finished()).unwrap_or(true));
                if done {
                    break;
                }
                sleep(self.config.tick_interval()).await;
            }
            for key in keys {
                if let Some(running) = self.running.remove(&key) {
                    if !running.handle.is_finished() {
                        warn!(scope = ?key.0, service_type = %key.1, "aborting worker at shutdown");
                        running.handle.abort();
                    }
                }
            }
            debug!(?tier, "tier stopped");
        }
        self.root.cancel();
        info!("supervisor stopped");
    }
}
