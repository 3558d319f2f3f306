//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.flowrun/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::Path;

use flowrun_types::config::EngineConfig;

use crate::filesystem::config_path;

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let path = config_path(data_dir);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    parse_engine_config(&content).unwrap_or_else(|err| {
        tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
        EngineConfig::default()
    })
}

/// Parse a `config.toml` body.
pub fn parse_engine_config(content: &str) -> Result<EngineConfig, toml::de::Error> {
    toml::from_str(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_types::config::AgentKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
default_max_attempts = 5
max_parallel_steps = 4
workflow_dir = "flows"

[[agents]]
name = "summarizer"
kind = "http"
url = "http://localhost:9000/invoke"
health_url = "http://localhost:9000/health"
required_config = ["model"]

[[agents]]
name = "echo"
kind = "echo"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_max_attempts, 5);
        assert_eq!(config.max_parallel_steps, Some(4));
        assert_eq!(config.default_step_timeout_secs, 300);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].kind, AgentKind::Http);
        assert_eq!(config.agents[0].required_config, vec!["model"]);
        assert_eq!(config.agents[1].kind, AgentKind::Echo);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn parse_engine_config_rejects_unknown_agent_kind() {
        let err = parse_engine_config(
            r#"
[[agents]]
name = "x"
kind = "grpc"
"#,
        );
        assert!(err.is_err());
    }
}
