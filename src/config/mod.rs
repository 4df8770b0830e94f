//! Configuration loaded from `config.yaml`.
//!
//! Every field has a default, so a missing config file yields a working
//! instance pointed at OpenRouter. The API key supports env-var
//! indirection: a value starting with `$` names the variable to read.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the gateway listens on.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// SQLite database path. Defaults to `<home>/chunkmill.db`.
    #[serde(default)]
    pub database: Option<String>,
    /// Chat-completion provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// How long the model catalog stays cached, in seconds.
    #[serde(default = "default_catalog_ttl_secs")]
    pub catalog_ttl_secs: u64,
}

/// Provider endpoint + credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key — plain string or env-var reference like `$OPENROUTER_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8791".to_string()
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_catalog_ttl_secs() -> u64 {
    3_600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database: None,
            provider: ProviderConfig::default(),
            catalog_ttl_secs: default_catalog_ttl_secs(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the defaults when the file does
    /// not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_yaml_ng::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Resolve the database path, defaulting under the chunkmill home.
    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(p) => PathBuf::from(p),
            None => crate::chunkmill_home().join("chunkmill.db"),
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key: `$VAR` indirection, then the literal value,
    /// then the `OPENROUTER_API_KEY` / `CHUNKMILL_API_KEY` env vars,
    /// then empty (local servers need none).
    pub fn resolve_api_key(&self) -> String {
        if let Some(k) = &self.api_key {
            if let Some(var) = k.strip_prefix('$') {
                return std::env::var(var).unwrap_or_default();
            }
            if !k.is_empty() {
                return k.clone();
            }
        }
        std::env::var("OPENROUTER_API_KEY")
            .or_else(|_| std::env::var("CHUNKMILL_API_KEY"))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = Config::default();
        assert!(cfg.bind.contains(':'));
        assert!(cfg.provider.endpoint.starts_with("https://"));
        assert_eq!(cfg.catalog_ttl_secs, 3_600);
    }

    #[test]
    fn parses_full_yaml() {
        let yaml = r#"
bind: 0.0.0.0:9000
database: /tmp/jobs.db
provider:
  endpoint: http://localhost:11434/v1
  api_key: $MY_KEY
catalog_ttl_secs: 60
"#;
        let cfg: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:9000");
        assert_eq!(cfg.database_path(), PathBuf::from("/tmp/jobs.db"));
        assert_eq!(cfg.provider.endpoint, "http://localhost:11434/v1");
        assert_eq!(cfg.catalog_ttl_secs, 60);
    }

    #[test]
    fn api_key_env_indirection() {
        std::env::set_var("TEST_CHUNKMILL_KEY_1", "from_env");
        let p = ProviderConfig {
            endpoint: default_endpoint(),
            api_key: Some("$TEST_CHUNKMILL_KEY_1".into()),
        };
        assert_eq!(p.resolve_api_key(), "from_env");
        std::env::remove_var("TEST_CHUNKMILL_KEY_1");
    }

    #[test]
    fn api_key_plain_value() {
        let p = ProviderConfig {
            endpoint: default_endpoint(),
            api_key: Some("sk-plain".into()),
        };
        assert_eq!(p.resolve_api_key(), "sk-plain");
    }
}
