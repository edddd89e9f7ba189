//! Configuration for the Atelier agent core.
//!
//! Every section has defaults, so an empty environment yields a valid but
//! unconfigured setup: the server starts and explains that the backend
//! endpoint is missing instead of failing.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::agent::ids::WorkerId;
use crate::worker::provisioning::{WorkerSpec, WorkerStrategy};
use crate::worker::resources::{
    DEFAULT_SERVER_LABEL, McpToolResource, RequireApproval, ToolDefinition, ToolResources,
    normalize_mcp_url,
};

/// Environment variable prefix.
const ENV_PREFIX: &str = "ATELIER_";

/// Configuration errors. These are the only fatal errors, raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidEnv {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// URL parse error.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    /// A built-in text pattern failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    /// The backend client could not be built.
    #[error("backend setup failed: {0}")]
    Backend(String),
}

/// Convenience result alias for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AtelierConfig {
    /// Agent backend connection.
    pub backend: BackendConfig,
    /// Worker selection and tools.
    pub worker: WorkerConfig,
    /// Run polling.
    pub poller: PollerConfig,
    /// Transcript cache.
    pub cache: CacheConfig,
    /// History fetching.
    pub history: HistoryConfig,
    /// Tool-call approval policy.
    pub approval: ApprovalConfig,
    /// HTTP server.
    pub server: ServerConfig,
}

impl AtelierConfig {
    /// Load configuration from `ATELIER_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is present but malformed.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Keys are passed with the `ATELIER_` prefix, e.g. `ATELIER_ENDPOINT`.
    ///
    /// # Errors
    /// Returns an error if a value is present but malformed.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let parse_u64 = |name: &str| -> ConfigResult<Option<u64>> {
            get(name)
                .map(|value| {
                    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
                        key: format!("{ENV_PREFIX}{name}"),
                        value,
                    })
                })
                .transpose()
        };

        let mut config = Self::default();

        config.backend.endpoint = get("ENDPOINT");
        config.backend.api_key = get("API_KEY");
        if let Some(version) = get("API_VERSION") {
            config.backend.api_version = version;
        }

        config.worker.strategy = match get("WORKER_MODE").as_deref() {
            None | Some("persistent") => WorkerStrategy::Persistent {
                worker_id: get("WORKER_ID").map(WorkerId::new),
            },
            Some("per_request") => WorkerStrategy::PerRequest(WorkerSpec {
                model: get("MODEL").unwrap_or_default(),
                name: get("WORKER_NAME").unwrap_or_else(|| "Atelier Assistant".to_string()),
                instructions: get("WORKER_INSTRUCTIONS").unwrap_or_default(),
                tools: Vec::new(),
            }),
            Some(other) => {
                return Err(ConfigError::InvalidEnv {
                    key: format!("{ENV_PREFIX}WORKER_MODE"),
                    value: other.to_string(),
                });
            }
        };
        config.worker.external_tool_url = get("EXTERNAL_TOOL_URL");
        if let Some(label) = get("MCP_SERVER_LABEL") {
            config.worker.mcp_server_label = label;
        }

        if let Some(secs) = parse_u64("RUN_TIMEOUT_SECS")? {
            config.poller.run_timeout = Duration::from_secs(secs);
        }
        if let Some(millis) = parse_u64("POLL_INTERVAL_MS")? {
            config.poller.poll_interval = Duration::from_millis(millis);
        }
        if let Some(capacity) = parse_u64("CACHE_CAPACITY")? {
            config.cache.capacity = usize::try_from(capacity).map_err(|_| {
                ConfigError::Invalid("ATELIER_CACHE_CAPACITY is too large".to_string())
            })?;
        }
        if let Some(secs) = parse_u64("CACHE_WINDOW_SECS")? {
            config.cache.freshness_window = Duration::from_secs(secs);
        }
        if let Some(port) = parse_u64("PORT")? {
            config.server.port = u16::try_from(port).map_err(|_| ConfigError::InvalidEnv {
                key: format!("{ENV_PREFIX}PORT"),
                value: port.to_string(),
            })?;
        }
        if let Some(policy) = get("APPROVAL_POLICY") {
            config.approval.policy = match policy.as_str() {
                "auto" => ApprovalPolicy::Auto,
                "allow_list" => ApprovalPolicy::AllowList,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: format!("{ENV_PREFIX}APPROVAL_POLICY"),
                        value: policy,
                    });
                }
            };
        }

        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(endpoint) = &self.backend.endpoint {
            Url::parse(endpoint)?;
        }
        if self.backend.api_version.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "backend.api_version must not be empty".to_string(),
            ));
        }
        if let Some(url) = &self.worker.external_tool_url {
            Url::parse(url)?;
        }

        if self.poller.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poller.poll_interval must be > 0".to_string(),
            ));
        }
        if self.poller.run_timeout <= self.poller.poll_interval {
            return Err(ConfigError::Invalid(
                "poller.run_timeout must exceed poller.poll_interval".to_string(),
            ));
        }

        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache.capacity must be > 0".to_string(),
            ));
        }
        if self.cache.cleanup_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "cache.cleanup_interval must be > 0".to_string(),
            ));
        }
        let window = self.cache.freshness_window;
        if window < Duration::from_secs(1) || window > Duration::from_secs(300) {
            return Err(ConfigError::Invalid(
                "cache.freshness_window must be between 1 and 300 seconds".to_string(),
            ));
        }

        if self.history.page_size == 0 || self.history.page_size > 100 {
            return Err(ConfigError::Invalid(
                "history.page_size must be between 1 and 100".to_string(),
            ));
        }
        if self.history.max_pages == 0 {
            return Err(ConfigError::Invalid(
                "history.max_pages must be > 0".to_string(),
            ));
        }

        if self.approval.policy == ApprovalPolicy::AllowList && self.approval.allowed_tools.is_empty()
        {
            return Err(ConfigError::Invalid(
                "approval.allowed_tools must not be empty with the allow_list policy".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the backend endpoint and a worker are both known.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.backend
            .endpoint
            .as_deref()
            .is_some_and(|endpoint| !endpoint.trim().is_empty())
            && self.worker.strategy.is_configured()
    }
}

/// Agent backend connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project endpoint URL; `None` means unconfigured.
    pub endpoint: Option<String>,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Value of the `api-version` query parameter.
    pub api_version: String,
    /// Per-request timeout.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_version: "v1".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Worker selection and tool settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How runs obtain a worker.
    pub strategy: WorkerStrategy,
    /// Base URL of the external inventory tool server.
    pub external_tool_url: Option<String>,
    /// Label of the external tool server.
    pub mcp_server_label: String,
    /// Approval setting sent with each run.
    pub require_approval: RequireApproval,
    /// Headers forwarded to the tool server with approvals.
    #[serde(default)]
    pub mcp_headers: BTreeMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            strategy: WorkerStrategy::default(),
            external_tool_url: None,
            mcp_server_label: DEFAULT_SERVER_LABEL.to_string(),
            require_approval: RequireApproval::default(),
            mcp_headers: BTreeMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Tool definitions for workers created on demand.
    #[must_use]
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.external_tool_url
            .as_deref()
            .map(|url| ToolDefinition::Mcp {
                server_label: self.mcp_server_label.clone(),
                server_url: normalize_mcp_url(url),
            })
            .into_iter()
            .collect()
    }

    /// Run-time tool resources, present only with an external tool server.
    #[must_use]
    pub fn tool_resources(&self) -> Option<ToolResources> {
        self.external_tool_url.as_ref()?;
        Some(ToolResources {
            mcp: vec![McpToolResource {
                server_label: self.mcp_server_label.clone(),
                require_approval: self.require_approval.clone(),
                headers: self.mcp_headers.clone(),
            }],
        })
    }

    /// Strategy with tool definitions filled in for per-request workers.
    #[must_use]
    pub fn resolved_strategy(&self) -> WorkerStrategy {
        match &self.strategy {
            WorkerStrategy::PerRequest(spec) if spec.tools.is_empty() => {
                let mut spec = spec.clone();
                spec.tools = self.tool_definitions();
                WorkerStrategy::PerRequest(spec)
            }
            other => other.clone(),
        }
    }
}

/// Run polling settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Delay between status refreshes.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Overall deadline measured from submission.
    #[serde(with = "duration_secs")]
    pub run_timeout: Duration,
    /// Extra delay after a failed pending-action round.
    #[serde(with = "duration_millis")]
    pub action_retry_delay: Duration,
    /// Upper bound for the best-effort cancel call.
    #[serde(with = "duration_secs")]
    pub cancel_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            run_timeout: Duration::from_secs(120),
            action_retry_delay: Duration::from_millis(500),
            cancel_timeout: Duration::from_secs(10),
        }
    }
}

/// Transcript cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached conversations.
    pub capacity: usize,
    /// Entries younger than this are served without refetching.
    #[serde(with = "duration_secs")]
    pub freshness_window: Duration,
    /// Stale entries older than this are dropped by `cleanup_stale`.
    #[serde(with = "duration_secs")]
    pub max_stale_age: Duration,
    /// Interval of the background maintenance task.
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            freshness_window: Duration::from_secs(10),
            max_stale_age: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// History fetching settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages per page.
    pub page_size: usize,
    /// Upper bound on pages per fetch.
    pub max_pages: usize,
    /// Deadline for a whole history fetch.
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 20,
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

/// Which approval policy decides pending actions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// Approve everything.
    #[default]
    Auto,
    /// Approve only listed tools with valid arguments.
    AllowList,
}

/// Kind selector for allow-list rules.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedKind {
    /// External tool server calls.
    External,
    /// Function calls.
    Function,
}

/// One allow-list rule.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AllowedTool {
    /// Tool name.
    pub name: String,
    /// Kind of call the rule applies to.
    pub kind: AllowedKind,
    /// Argument keys that must be present.
    #[serde(default)]
    pub required_args: Vec<String>,
}

/// Tool-call approval settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Active policy.
    pub policy: ApprovalPolicy,
    /// Rules for the allow-list policy.
    #[serde(default)]
    pub allowed_tools: Vec<AllowedTool>,
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Serde module for whole-second durations.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde module for millisecond durations.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid_but_unconfigured() {
        let config = AtelierConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.is_configured());
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.poller.poll_interval, Duration::from_secs(1));
        assert_eq!(config.poller.run_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_env_lookup() {
        let config = AtelierConfig::from_lookup(lookup(&[
            ("ATELIER_ENDPOINT", "https://example.ai/api/projects/shop"),
            ("ATELIER_WORKER_ID", "asst_main"),
            ("ATELIER_RUN_TIMEOUT_SECS", "60"),
            ("ATELIER_POLL_INTERVAL_MS", "250"),
            ("ATELIER_CACHE_WINDOW_SECS", "20"),
            ("ATELIER_EXTERNAL_TOOL_URL", "https://inventory.example.com"),
        ]))
        .unwrap();

        assert!(config.is_configured());
        assert!(config.validate().is_ok());
        assert_eq!(config.poller.run_timeout, Duration::from_secs(60));
        assert_eq!(config.poller.poll_interval, Duration::from_millis(250));
        assert_eq!(config.cache.freshness_window, Duration::from_secs(20));
        assert!(config.worker.tool_resources().is_some());
    }

    #[test]
    fn test_malformed_env_value() {
        let result = AtelierConfig::from_lookup(lookup(&[("ATELIER_CACHE_CAPACITY", "lots")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AtelierConfig::default();
        config.cache.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AtelierConfig::default();
        config.cache.freshness_window = Duration::from_secs(3600);
        assert!(config.validate().is_err());

        let mut config = AtelierConfig::default();
        config.approval.policy = ApprovalPolicy::AllowList;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_per_request_strategy_gets_tools() {
        let config = AtelierConfig::from_lookup(lookup(&[
            ("ATELIER_WORKER_MODE", "per_request"),
            ("ATELIER_MODEL", "gpt-4o"),
            ("ATELIER_EXTERNAL_TOOL_URL", "https://inventory.example.com/"),
        ]))
        .unwrap();

        match config.worker.resolved_strategy() {
            WorkerStrategy::PerRequest(spec) => {
                assert_eq!(spec.tools.len(), 1);
                assert_eq!(
                    spec.tools[0],
                    ToolDefinition::Mcp {
                        server_label: "inventory_mcp".to_string(),
                        server_url: "https://inventory.example.com/mcp".to_string(),
                    }
                );
            }
            WorkerStrategy::Persistent { .. } => panic!("expected per-request strategy"),
        }
    }

    #[test]
    fn test_config_serde_round_trip_keeps_durations() {
        let config = AtelierConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poller"]["poll_interval"], 1000);
        assert_eq!(json["cache"]["freshness_window"], 10);
        let back: AtelierConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.poller.run_timeout, Duration::from_secs(120));
    }
}
