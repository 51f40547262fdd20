//! Service-state book: desired and current status of every supervised service.
//!
//! The book holds the cancellation token of the running worker. A worker can
//! only be started through [`ServiceStateCacheHandle::init_cancel`], which
//! succeeds only when the entry is `Inactive` and holds no token, so at most
//! one worker owns a (scope, service type) pair at any time.

use std::collections::BTreeMap;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ask;
use super::tell;
use crate::EventBusHandle;
use crate::EventPayload;
use crate::Result;
use crate::ServiceEvent;
use crate::ServiceScope;
use crate::ServiceStateView;
use crate::ServiceStatus;
use crate::ServiceType;
use crate::SERVICE_STATUS;

const ACTOR: &str = "service_state_cache";

type ServiceKey = (ServiceScope, ServiceType);

#[derive(Debug)]
pub enum ServiceStateOp {
    SetDesired {
        scope: ServiceScope,
        service_type: ServiceType,
        status: ServiceStatus,
    },
    InitCancel {
        scope: ServiceScope,
        service_type: ServiceType,
        token: CancellationToken,
        reply: oneshot::Sender<bool>,
    },
    SetCurrent {
        scope: ServiceScope,
        service_type: ServiceType,
        status: ServiceStatus,
        failed: bool,
    },
    Cancel {
        scope: ServiceScope,
        service_type: ServiceType,
        reply: oneshot::Sender<bool>,
    },
    Get {
        scope: ServiceScope,
        service_type: ServiceType,
        reply: oneshot::Sender<ServiceStateView>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ServiceStateView>>,
    },
}

struct Entry {
    view: ServiceStateView,
    token: Option<CancellationToken>,
}

pub struct ServiceStateCache {
    mailbox: mpsc::Receiver<ServiceStateOp>,
    entries: BTreeMap<ServiceKey, Entry>,
    bus: Option<EventBusHandle>,
}

impl ServiceStateCache {
    pub fn spawn(
        mailbox_size: usize,
        bus: Option<EventBusHandle>,
        token: CancellationToken,
    ) -> ServiceStateCacheHandle {
        let (tx, rx) = mpsc::channel(mailbox_size);
        let actor = ServiceStateCache {
            mailbox: rx,
            entries: BTreeMap::new(),
            bus,
        };
        tokio::spawn(actor.run(token));
        ServiceStateCacheHandle { mailbox: tx }
    }

    async fn run(
        mut self,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("service state cache stopped");
                    return;
                }
                op = self.mailbox.recv() => match op {
                    Some(op) => self.handle(op),
                    None => return,
                }
            }
        }
    }

    fn entry(
        &mut self,
        scope: ServiceScope,
        service_type: ServiceType,
    ) -> &mut Entry {
        self.entries
            .entry((scope, service_type))
            .or_insert_with(|| Entry {
                view: ServiceStateView::new(scope, service_type),
                token: None,
            })
    }

    fn handle(
        &mut self,
        op: ServiceStateOp,
    ) {
        match op {
            ServiceStateOp::SetDesired {
                scope,
                service_type,
                status,
            } => {
                let entry = self.entry(scope, service_type);
                if entry.view.desired != status {
                    info!(?scope, %service_type, ?status, "Desired status changed");
                    entry.view.desired = status;
                }
            }
            ServiceStateOp::InitCancel {
                scope,
                service_type,
                token,
                reply,
            } => {
                let entry = self.entry(scope, service_type);
                let granted =
                    entry.view.current == ServiceStatus::Inactive && entry.token.is_none();
                if granted {
                    entry.token = Some(token);
                    entry.view.cancel_requested = false;
                }
                let _ = reply.send(granted);
                if granted {
                    self.set_current(scope, service_type, ServiceStatus::Pending, false);
                }
            }
            ServiceStateOp::SetCurrent {
                scope,
                service_type,
                status,
                failed,
            } => self.set_current(scope, service_type, status, failed),
            ServiceStateOp::Cancel {
                scope,
                service_type,
                reply,
            } => {
                let entry = self.entry(scope, service_type);
                let cancelled = match &entry.token {
                    Some(token) => {
                        token.cancel();
                        entry.view.cancel_requested = true;
                        true
                    }
                    None => false,
                };
                let _ = reply.send(cancelled);
            }
            ServiceStateOp::Get {
                scope,
                service_type,
                reply,
            } => {
                let view = self
                    .entries
                    .get(&(scope, service_type))
                    .map(|e| e.view.clone())
                    .unwrap_or_else(|| ServiceStateView::new(scope, service_type));
                let _ = reply.send(view);
            }
            ServiceStateOp::Snapshot { reply } => {
                let _ = reply.send(self.entries.values().map(|e| e.view.clone()).collect());
            }
        }
    }

    fn set_current(
        &mut self,
        scope: ServiceScope,
        service_type: ServiceType,
        status: ServiceStatus,
        failed: bool,
    ) {
        let now = Utc::now();
        let entry = self.entry(scope, service_type);
        let previous = entry.view.current;
        let view = &mut entry.view;
        view.current = status;
        match status {
            ServiceStatus::Pending => view.pending_since = Some(now),
            ServiceStatus::Initializing => view.initializing_since = Some(now),
            ServiceStatus::Active => {
                view.active_since = Some(now);
                view.consecutive_failures = 0;
            }
            ServiceStatus::Inactive => {
                view.inactive_since = Some(now);
                view.cancel_requested = false;
                entry.token = None;
            }
        }
        if failed {
            view.consecutive_failures += 1;
            warn!(?scope, %service_type, failures = view.consecutive_failures, "Service failed");
        }
        // Only a failed stop leaves a failure time behind; any later transition clears it.
        view.failure_time = (failed && status == ServiceStatus::Inactive).then_some(now);

        if previous == status {
            return;
        }
        debug!(?scope, %service_type, ?previous, ?status, "Service status changed");
        SERVICE_STATUS
            .with_label_values(&[&scope_label(scope), &service_type.to_string()])
            .set(status as i64);
        if let Some(bus) = &self.bus {
            bus.publish(
                scope.node_id().unwrap_or(0),
                EventPayload::Service(ServiceEvent {
                    scope,
                    service_type,
                    status,
                    previous_status: previous,
                }),
            );
        }
    }
}

fn scope_label(scope: ServiceScope) -> String {
    match scope {
        ServiceScope::Process => "process".to_string(),
        ServiceScope::Node(node_id) => format!("node_{node_id}"),
    }
}

#[derive(Debug, Clone)]
pub struct ServiceStateCacheHandle {
    mailbox: mpsc::Sender<ServiceStateOp>,
}

impl ServiceStateCacheHandle {
    pub async fn set_desired(
        &self,
        scope: ServiceScope,
        service_type: ServiceType,
        status: ServiceStatus,
    ) -> Result<()> {
        tell(
            &self.mailbox,
            ACTOR,
            ServiceStateOp::SetDesired {
                scope,
                service_type,
                status,
            },
        )
        .await
    }

    /// Claims the service for a new worker; on success the entry is `Pending`
    /// and holds `token`.
    pub async fn init_cancel(
        &self,
        scope: ServiceScope,
        service_type: ServiceType,
        token: CancellationToken,
    ) -> Result<bool> {
        ask(&self.mailbox, ACTOR, |reply| ServiceStateOp::InitCancel {
            scope,
            service_type,
            token,
            reply,
        })
        .await
    }

    pub async fn set_current(
        &self,
        scope: ServiceScope,
        service_type: ServiceType,
        status: ServiceStatus,
        failed: bool,
    ) -> Result<()> {
        tell(
            &self.mailbox,
            ACTOR,
            ServiceStateOp::SetCurrent {
                scope,
                service_type,
                status,
                failed,
            },
        )
        .await
    }

    /// Fires the held token; false when no worker holds one.
    pub async fn cancel(
        &self,
        scope: ServiceScope,
        service_type: ServiceType,
    ) -> Result<bool> {
        ask(&self.mailbox, ACTOR, |reply| ServiceStateOp::Cancel {
            scope,
            service_type,
            reply,
        })
        .await
    }

    pub async fn get(
        &self,
        scope: ServiceScope,
        service_type: ServiceType,
    ) -> Result<ServiceStateView> {
        ask(&self.mailbox, ACTOR, |reply| ServiceStateOp::Get {
            scope,
            service_type,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<Vec<ServiceStateView>> {
        ask(&self.mailbox, ACTOR, |reply| ServiceStateOp::Snapshot { reply }).await
    }
}
