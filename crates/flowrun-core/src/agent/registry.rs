//! Agent registry: concurrent name -> agent mapping.
//!
//! Backed by a `DashMap`, whose sharded read/write locks let resolutions
//! proceed concurrently while registrations are exclusive per shard. An entry
//! is inserted fully built, so a resolution never observes half a descriptor.
//!
//! Resolution hands out a cloned `BoxAgent`. Replacing or removing an entry
//! later does not affect a step that already resolved its handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowrun_types::agent::{AgentInfo, AgentMetadata};
use flowrun_types::config::EngineConfig;
use futures_util::FutureExt;
use thiserror::Error;

use super::box_agent::BoxAgent;

/// Default consecutive failed health checks before auto-deregistration.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default upper bound on a single health check.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("agent '{0}' is not registered")]
    UnknownAgent(String),
}

/// What `register` does when the name is already bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterMode {
    /// Fail with `DuplicateAgent`.
    #[default]
    Reject,
    /// Replace the existing entry.
    Replace,
}

/// A registered agent.
#[derive(Debug)]
pub struct AgentDescriptor {
    pub name: String,
    pub agent: BoxAgent,
    pub metadata: AgentMetadata,
    consecutive_failures: AtomicU32,
}

impl AgentDescriptor {
    fn new(name: String, agent: BoxAgent, metadata: AgentMetadata) -> Self {
        Self {
            name,
            agent,
            metadata,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }
}

/// Explicitly constructed registry, shared by reference with the engine.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<AgentDescriptor>>,
    failure_threshold: u32,
    check_timeout: Duration,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::with_health_policy(DEFAULT_FAILURE_THRESHOLD, DEFAULT_CHECK_TIMEOUT)
    }

    /// `failure_threshold` of 0 is treated as 1.
    pub fn with_health_policy(failure_threshold: u32, check_timeout: Duration) -> Self {
        Self {
            agents: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            check_timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_health_policy(
            config.health_failure_threshold,
            Duration::from_millis(config.health_check_timeout_ms),
        )
    }

    /// Register an agent under `name`, failing if the name is taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        agent: BoxAgent,
        metadata: AgentMetadata,
    ) -> Result<(), RegistryError> {
        self.register_with(name, agent, metadata, RegisterMode::Reject)
    }

    pub fn register_with(
        &self,
        name: impl Into<String>,
        agent: BoxAgent,
        metadata: AgentMetadata,
        mode: RegisterMode,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let descriptor = Arc::new(AgentDescriptor::new(name.clone(), agent, metadata));

        match self.agents.entry(name) {
            Entry::Occupied(mut entry) => match mode {
                RegisterMode::Reject => Err(RegistryError::DuplicateAgent(entry.key().clone())),
                RegisterMode::Replace => {
                    tracing::info!(agent = %entry.key(), "replacing registered agent");
                    entry.insert(descriptor);
                    Ok(())
                }
            },
            Entry::Vacant(entry) => {
                tracing::debug!(agent = %entry.key(), "registered agent");
                entry.insert(descriptor);
                Ok(())
            }
        }
    }

    /// Remove an agent. Removing an unknown name is a no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.agents.remove(name).is_some();
        if removed {
            tracing::info!(agent = name, "deregistered agent");
        }
        removed
    }

    /// Resolve the invocation handle for `name`.
    pub fn resolve(&self, name: &str) -> Result<BoxAgent, RegistryError> {
        self.agents
            .get(name)
            .map(|entry| entry.agent.clone())
            .ok_or_else(|| RegistryError::UnknownAgent(name.to_string()))
    }

    pub fn metadata(&self, name: &str) -> Option<AgentMetadata> {
        self.agents.get(name).map(|entry| entry.metadata.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Snapshot of every entry, sorted by name.
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self
            .agents
            .iter()
            .map(|entry| AgentInfo {
                name: entry.name.clone(),
                metadata: entry.metadata.clone(),
                consecutive_failures: entry.consecutive_failures(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    // -----------------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------------

    /// Check `name` and report whether it is healthy. Never fails.
    ///
    /// Check errors, panics, and timeouts all count as a failed check. Once
    /// the consecutive failure count reaches the threshold the agent is
    /// deregistered, unless the entry was replaced while probing.
    pub async fn health_check(&self, name: &str) -> bool {
        // Clone the descriptor out so no map guard is held across the check.
        let Some(descriptor) = self.agents.get(name).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };

        let check = std::panic::AssertUnwindSafe(descriptor.agent.health_check()).catch_unwind();
        let healthy = match tokio::time::timeout(self.check_timeout, check).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                tracing::warn!(agent = name, error = %e, "health check failed");
                false
            }
            Ok(Err(_)) => {
                tracing::warn!(agent = name, "health check panicked");
                false
            }
            Err(_) => {
                tracing::warn!(
                    agent = name,
                    timeout_ms = self.check_timeout.as_millis() as u64,
                    "health check timed out"
                );
                false
            }
        };

        if healthy {
            descriptor.consecutive_failures.store(0, Ordering::Release);
            return true;
        }

        let failures = descriptor.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold {
            let removed = self
                .agents
                .remove_if(name, |_, current| Arc::ptr_eq(current, &descriptor))
                .is_some();
            if removed {
                tracing::warn!(
                    agent = name,
                    failures,
                    "deregistered agent after consecutive failed health checks"
                );
            }
        }
        false
    }

    /// Check every registered agent. Returns `(name, healthy)` sorted by name.
    pub async fn sweep_health(&self) -> Vec<(String, bool)> {
        let mut names: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        names.sort();

        let checks = names.iter().map(|name| self.health_check(name));
        let results = futures_util::future::join_all(checks).await;
        names.into_iter().zip(results).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::builtin::EchoAgent;
    use crate::agent::invoke::{Agent, AgentError, AgentRequest};
    use flowrun_types::workflow::OutputMap;
    use std::sync::atomic::AtomicBool;
    use tokio_util::sync::CancellationToken;

    /// Health is controlled by a shared flag; `panic` makes the check panic.
    struct Flaky {
        healthy: Arc<AtomicBool>,
        panic: bool,
        hang: bool,
    }

    impl Flaky {
        fn new(healthy: bool) -> (Self, Arc<AtomicBool>) {
            let flag = Arc::new(AtomicBool::new(healthy));
            (
                Self {
                    healthy: Arc::clone(&flag),
                    panic: false,
                    hang: false,
                },
                flag,
            )
        }
    }

    impl Agent for Flaky {
        async fn invoke(
            &self,
            _request: AgentRequest,
            _cancel: CancellationToken,
        ) -> Result<OutputMap, AgentError> {
            Ok(OutputMap::new())
        }

        async fn health_check(&self) -> Result<(), AgentError> {
            if self.panic {
                panic!("health check exploded");
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AgentError::Failed("down".to_string()))
            }
        }
    }

    #[test]
    fn register_rejects_duplicate_by_default() {
        let registry = AgentRegistry::new();
        registry
            .register("echo", BoxAgent::new(EchoAgent), AgentMetadata::default())
            .unwrap();
        let err = registry
            .register("echo", BoxAgent::new(EchoAgent), AgentMetadata::default())
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateAgent("echo".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_replace_swaps_handle() {
        let registry = AgentRegistry::new();
        let first = BoxAgent::new(EchoAgent);
        registry
            .register("echo", first.clone(), AgentMetadata::default())
            .unwrap();
        let resolved_before = registry.resolve("echo").unwrap();

        registry
            .register_with(
                "echo",
                BoxAgent::new(EchoAgent),
                AgentMetadata::default(),
                RegisterMode::Replace,
            )
            .unwrap();

        let resolved_after = registry.resolve("echo").unwrap();
        assert!(resolved_before.same_agent(&first));
        assert!(!resolved_after.same_agent(&first));
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = AgentRegistry::new();
        registry
            .register("echo", BoxAgent::new(EchoAgent), AgentMetadata::default())
            .unwrap();
        assert!(registry.deregister("echo"));
        assert!(!registry.deregister("echo"));
        assert_eq!(
            registry.resolve("echo").unwrap_err(),
            RegistryError::UnknownAgent("echo".to_string())
        );
    }

    #[test]
    fn list_is_sorted_with_metadata() {
        let registry = AgentRegistry::new();
        let meta = AgentMetadata {
            description: Some("summarizes".to_string()),
            capabilities: vec!["summarize".to_string()],
            required_config: vec!["model".to_string()],
        };
        registry.register("zeta", BoxAgent::new(EchoAgent), AgentMetadata::default()).unwrap();
        registry.register("alpha", BoxAgent::new(EchoAgent), meta.clone()).unwrap();

        let list = registry.list();
        assert_eq!(list[0].name, "alpha");
        assert_eq!(list[0].metadata, meta);
        assert_eq!(list[1].name, "zeta");
        assert_eq!(registry.metadata("alpha"), Some(meta));
    }

    #[tokio::test]
    async fn concurrent_registration_loses_nothing() {
        let registry = Arc::new(AgentRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .register(format!("agent-{i}"), BoxAgent::new(EchoAgent), AgentMetadata::default())
                    .unwrap();
                registry.resolve(&format!("agent-{i}")).is_ok()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(registry.len(), 32);
    }

    #[tokio::test]
    async fn health_check_unknown_agent_is_false() {
        let registry = AgentRegistry::new();
        assert!(!registry.health_check("missing").await);
    }

    #[tokio::test]
    async fn failed_checks_deregister_at_threshold() {
        let registry = AgentRegistry::with_health_policy(2, Duration::from_secs(1));
        let (agent, flag) = Flaky::new(false);
        registry.register("flaky", BoxAgent::new(agent), AgentMetadata::default()).unwrap();

        assert!(!registry.health_check("flaky").await);
        assert!(registry.contains("flaky"));
        assert_eq!(registry.list()[0].consecutive_failures, 1);

        // A success in between resets the count.
        flag.store(true, Ordering::SeqCst);
        assert!(registry.health_check("flaky").await);
        flag.store(false, Ordering::SeqCst);
        assert!(!registry.health_check("flaky").await);
        assert!(registry.contains("flaky"));

        assert!(!registry.health_check("flaky").await);
        assert!(!registry.contains("flaky"));
    }

    #[tokio::test]
    async fn panicking_check_is_captured() {
        let registry = AgentRegistry::new();
        let (mut agent, _flag) = Flaky::new(true);
        agent.panic = true;
        registry.register("boom", BoxAgent::new(agent), AgentMetadata::default()).unwrap();
        assert!(!registry.health_check("boom").await);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_check_times_out() {
        let registry = AgentRegistry::with_health_policy(1, Duration::from_millis(50));
        let (mut agent, _flag) = Flaky::new(true);
        agent.hang = true;
        registry.register("slow", BoxAgent::new(agent), AgentMetadata::default()).unwrap();
        assert!(!registry.health_check("slow").await);
        assert!(!registry.contains("slow"));
    }

    #[tokio::test]
    async fn sweep_checks_every_agent() {
        let registry = AgentRegistry::new();
        let (down, _flag) = Flaky::new(false);
        registry.register("echo", BoxAgent::new(EchoAgent), AgentMetadata::default()).unwrap();
        registry.register("down", BoxAgent::new(down), AgentMetadata::default()).unwrap();

        let results = registry.sweep_health().await;
        assert_eq!(
            results,
            vec![("down".to_string(), false), ("echo".to_string(), true)]
        );
    }
}
