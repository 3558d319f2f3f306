//! Agent adapters and configuration wiring.
//!
//! - `http` -- `HttpAgent`, an agent reached over HTTP
//!
//! [`build_registry`] turns the `[[agents]]` entries of `config.toml` into a
//! populated [`AgentRegistry`].

pub mod http;

use std::time::Duration;

use flowrun_core::agent::{AgentRegistry, BoxAgent, EchoAgent, RegistryError};
use flowrun_types::agent::AgentMetadata;
use flowrun_types::config::{AgentConfigEntry, AgentKind, EngineConfig};
use thiserror::Error;

pub use http::HttpAgent;

#[derive(Debug, Error)]
pub enum AgentWiringError {
    #[error("agent '{0}' is of kind http but has no url")]
    MissingUrl(String),

    #[error("agent '{name}': failed to build HTTP client: {source}")]
    Client {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Build the agent behind one config entry.
pub fn build_agent(entry: &AgentConfigEntry) -> Result<BoxAgent, AgentWiringError> {
    match entry.kind {
        AgentKind::Echo => Ok(BoxAgent::new(EchoAgent)),
        AgentKind::Http => {
            let url = entry
                .url
                .clone()
                .ok_or_else(|| AgentWiringError::MissingUrl(entry.name.clone()))?;
            let agent = HttpAgent::new(
                url,
                entry.health_url.clone(),
                entry.timeout_secs.map(Duration::from_secs),
            )
            .map_err(|source| AgentWiringError::Client {
                name: entry.name.clone(),
                source,
            })?;
            Ok(BoxAgent::new(agent))
        }
    }
}

fn metadata_for(entry: &AgentConfigEntry) -> AgentMetadata {
    AgentMetadata {
        description: entry.description.clone(),
        capabilities: entry.capabilities.clone(),
        required_config: entry.required_config.clone(),
    }
}

/// Create a registry with the engine's health policy and register every
/// configured agent. Duplicate names are an error.
pub fn build_registry(config: &EngineConfig) -> Result<AgentRegistry, AgentWiringError> {
    let registry = AgentRegistry::from_config(config);
    for entry in &config.agents {
        let agent = build_agent(entry)?;
        registry.register(entry.name.clone(), agent, metadata_for(entry))?;
        tracing::debug!(agent = %entry.name, kind = ?entry.kind, "registered configured agent");
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: AgentKind, url: Option<&str>) -> AgentConfigEntry {
        AgentConfigEntry {
            name: name.into(),
            kind,
            url: url.map(String::from),
            health_url: None,
            timeout_secs: Some(5),
            description: Some(format!("{name} agent")),
            capabilities: vec!["text".into()],
            required_config: vec![],
        }
    }

    #[test]
    fn build_registry_registers_every_entry() {
        let config = EngineConfig {
            agents: vec![
                entry("echo", AgentKind::Echo, None),
                entry("remote", AgentKind::Http, Some("http://localhost:9/invoke")),
            ],
            ..EngineConfig::default()
        };
        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.resolve("remote").is_ok());
        let metadata = registry.metadata("echo").unwrap();
        assert_eq!(metadata.description.as_deref(), Some("echo agent"));
        assert_eq!(metadata.capabilities, vec!["text"]);
    }

    #[test]
    fn http_entry_without_url_is_rejected() {
        let config = EngineConfig {
            agents: vec![entry("remote", AgentKind::Http, None)],
            ..EngineConfig::default()
        };
        assert!(matches!(
            build_registry(&config),
            Err(AgentWiringError::MissingUrl(name)) if name == "remote"
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let config = EngineConfig {
            agents: vec![
                entry("echo", AgentKind::Echo, None),
                entry("echo", AgentKind::Echo, None),
            ],
            ..EngineConfig::default()
        };
        assert!(matches!(
            build_registry(&config),
            Err(AgentWiringError::Registry(RegistryError::DuplicateAgent(_)))
        ));
    }
}
