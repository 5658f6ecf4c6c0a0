//! Agent configuration
//!
//! Values come from, in increasing priority: built-in defaults, an optional
//! JSON config file (`--config`), then command-line flags or their `REMORA_*`
//! environment variables.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::IndexPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Bind address of the HTTP listener
    pub host: String,
    pub port: u16,
    /// Agent name, also the base of the index name
    pub name: String,
    /// Zipkin v2 span endpoint
    pub zipkin_endpoint: String,
    /// Address of the paired service, reported as the span endpoint
    pub endpoint: String,
    /// Service name on reported spans
    pub service_name: String,
    pub elastic_url: String,
    /// Grace period for in-flight requests on shutdown
    pub wait_secs: u64,
    pub verbose: bool,
    /// Forward span events to the collector
    pub tracing: bool,
    /// Write documents to the store; when off they are only logged
    pub store: bool,
    pub index_policy: IndexPolicy,
    /// Finish spans left open longer than this
    pub span_ttl_secs: Option<u64>,
    /// How long to wait for the store at startup
    pub store_wait_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8484,
            name: "vdc".to_string(),
            zipkin_endpoint: "http://localhost:9411/api/v2/spans".to_string(),
            endpoint: "http://0.0.0.0:0".to_string(),
            service_name: "vdc-agent".to_string(),
            elastic_url: "http://127.0.0.1:9200".to_string(),
            wait_secs: 15,
            verbose: false,
            tracing: true,
            store: true,
            index_policy: IndexPolicy::Daily,
            span_ttl_secs: None,
            store_wait_secs: 30,
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn store_wait(&self) -> Duration {
        Duration::from_secs(self.store_wait_secs)
    }

    pub fn span_ttl(&self) -> Option<Duration> {
        self.span_ttl_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("name cannot be empty".to_string()));
        }

        // index names must be lowercase
        if self.name.chars().any(|c| c.is_uppercase() || c.is_whitespace()) {
            return Err(ConfigError::Invalid(format!(
                "name '{}' must be lowercase without whitespace",
                self.name
            )));
        }

        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be greater than 0".to_string()));
        }

        if self.tracing {
            check_url("zipkin_endpoint", &self.zipkin_endpoint)?;
        }

        if self.store {
            check_url("elastic_url", &self.elastic_url)?;
        }

        if self.span_ttl_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "span_ttl_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_url(field: &str, value: &str) -> Result<(), ConfigError> {
    reqwest::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid(format!("{} '{}' is not a valid url: {}", field, value, e)))
}

/// Command line of the agent binary
#[derive(Debug, Default, Parser)]
#[command(name = "remora", version, about = "Telemetry sidecar agent")]
pub struct Cli {
    /// JSON config file
    #[arg(short, long, env = "REMORA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "REMORA_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "REMORA_PORT")]
    pub port: Option<u16>,

    /// Agent name, used as the index name
    #[arg(short, long, env = "REMORA_NAME")]
    pub name: Option<String>,

    /// Zipkin span endpoint
    #[arg(long, env = "REMORA_ZIPKIN")]
    pub zipkin: Option<String>,

    /// Address of the paired service, reported on spans
    #[arg(long, env = "REMORA_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Service name reported on spans
    #[arg(long, env = "REMORA_SERVICE_NAME")]
    pub service_name: Option<String>,

    /// Elasticsearch address
    #[arg(long, env = "REMORA_ELASTIC")]
    pub elastic: Option<String>,

    /// Seconds to wait for in-flight requests on shutdown
    #[arg(long, env = "REMORA_WAIT")]
    pub wait: Option<u64>,

    /// Log request bodies and keep raw meter payloads
    #[arg(short, long, env = "REMORA_VERBOSE")]
    pub verbose: bool,

    /// Accept span events but do not forward them
    #[arg(long, env = "REMORA_NO_TRACING")]
    pub no_tracing: bool,

    /// Log documents instead of writing them to the store
    #[arg(long, env = "REMORA_NO_STORE")]
    pub no_store: bool,

    /// Index naming policy
    #[arg(long, value_enum, env = "REMORA_INDEX_POLICY")]
    pub index_policy: Option<IndexPolicy>,

    /// Finish spans left open longer than this many seconds
    #[arg(long, env = "REMORA_SPAN_TTL")]
    pub span_ttl: Option<u64>,

    /// Seconds to wait for the store to come up at startup
    #[arg(long, env = "REMORA_STORE_WAIT")]
    pub store_wait: Option<u64>,
}

impl Cli {
    /// Build and validate the effective configuration
    pub fn load(&self) -> Result<AgentConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)?,
            None => AgentConfig::default(),
        };

        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut AgentConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(zipkin) = &self.zipkin {
            config.zipkin_endpoint = zipkin.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(service_name) = &self.service_name {
            config.service_name = service_name.clone();
        }
        if let Some(elastic) = &self.elastic {
            config.elastic_url = elastic.clone();
        }
        if let Some(wait) = self.wait {
            config.wait_secs = wait;
        }
        if self.verbose {
            config.verbose = true;
        }
        if self.no_tracing {
            config.tracing = false;
        }
        if self.no_store {
            config.store = false;
        }
        if let Some(policy) = self.index_policy {
            config.index_policy = policy;
        }
        if let Some(ttl) = self.span_ttl {
            config.span_ttl_secs = Some(ttl);
        }
        if let Some(store_wait) = self.store_wait {
            config.store_wait_secs = store_wait;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 8484);
        assert_eq!(config.wait(), Duration::from_secs(15));
        assert_eq!(config.span_ttl(), None);
    }

    #[test]
    fn test_file_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name": "patients", "port": 9000, "index_policy": "static", "verbose": true}}"#
        )
        .unwrap();

        let cli = Cli::parse_from([
            "remora",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "9100",
            "--span-ttl",
            "600",
        ]);
        let config = cli.load().unwrap();

        assert_eq!(config.name, "patients");
        assert_eq!(config.port, 9100);
        assert_eq!(config.index_policy, IndexPolicy::Static);
        assert!(config.verbose);
        assert_eq!(config.span_ttl(), Some(Duration::from_secs(600)));
        // untouched keys keep their defaults
        assert_eq!(config.elastic_url, "http://127.0.0.1:9200");
    }

    #[test]
    fn test_switches() {
        let cli = Cli::parse_from(["remora", "--no-tracing", "--no-store", "--zipkin", "bogus"]);
        let config = cli.load().unwrap();
        assert!(!config.tracing);
        assert!(!config.store);
    }

    #[test]
    fn test_invalid_values() {
        let config = AgentConfig {
            name: "VDC".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = AgentConfig {
            elastic_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AgentConfig {
            span_ttl_secs: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/remora.json")),
            ..Default::default()
        };
        assert!(matches!(cli.load(), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            AgentConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
