//! Desired/current reconciliation of every supervised service.
//!
//! The [`Supervisor`] declares which services should run, starts the missing
//! ones through a [`ServiceFactory`], restarts failed ones with backoff and
//! cancels the unwanted ones. The service-state cache holds the cancellation
//! token of each running worker; the supervisor only keeps join handles.

mod supervisor;

pub use supervisor::*;


use futures::future::BoxFuture;
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::ServiceScope;
use crate::ServiceType;

/// A service run, returning when `token` fires or when it gives up.
pub type ServiceFuture = BoxFuture<'static, Result<()>>;

#[cfg_attr(test, automock)]
pub trait ServiceFactory: Send + Sync + 'static {
    /// Builds the worker for one service; `None` when this process does not
    /// offer it.
    fn create(
        &self,
        scope: ServiceScope,
        service_type: ServiceType,
        token: CancellationToken,
    ) -> Option<ServiceFuture>;
}
