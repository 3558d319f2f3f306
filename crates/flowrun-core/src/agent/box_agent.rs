//! BoxAgent -- object-safe dynamic dispatch wrapper for `Agent`.
//!
//! 1. Define an object-safe `AgentDyn` trait with boxed futures
//! 2. Blanket-impl `AgentDyn` for all `T: Agent`
//! 3. `BoxAgent` wraps `Arc<dyn AgentDyn>` and delegates
//!
//! The handle is cheaply cloneable so a step keeps the handle it resolved at
//! dispatch even if the registry entry is replaced or removed meanwhile.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowrun_types::workflow::OutputMap;
use tokio_util::sync::CancellationToken;

use super::invoke::{Agent, AgentError, AgentRequest};

/// Object-safe version of [`Agent`] with boxed futures.
pub trait AgentDyn: Send + Sync {
    fn invoke_boxed(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<OutputMap, AgentError>> + Send + '_>>;

    fn health_check_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), AgentError>> + Send + '_>>;
}

impl<T: Agent> AgentDyn for T {
    fn invoke_boxed(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<OutputMap, AgentError>> + Send + '_>> {
        Box::pin(self.invoke(request, cancel))
    }

    fn health_check_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), AgentError>> + Send + '_>> {
        Box::pin(self.health_check())
    }
}

/// Type-erased agent handle.
#[derive(Clone)]
pub struct BoxAgent {
    inner: Arc<dyn AgentDyn>,
}

impl BoxAgent {
    pub fn new<T: Agent + 'static>(agent: T) -> Self {
        Self {
            inner: Arc::new(agent),
        }
    }

    pub async fn invoke(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Result<OutputMap, AgentError> {
        self.inner.invoke_boxed(request, cancel).await
    }

    pub async fn health_check(&self) -> Result<(), AgentError> {
        self.inner.health_check_boxed().await
    }

    /// Whether two handles point at the same agent instance.
    #[cfg(test)]
    pub(crate) fn same_agent(&self, other: &BoxAgent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for BoxAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAgent").finish_non_exhaustive()
    }
}
