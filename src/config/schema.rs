use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level coordinator configuration, loaded from `config.toml`.
///
/// Resolution order: `--config` flag → `MAS_COORDINATOR_CONFIG_DIR` env →
/// `~/.mas-coordinator/config.toml`. A missing file means defaults.
/// Environment variables override file values.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Environment overrides that were ignored while loading. Reported by the
    /// caller once logging is initialized.
    #[serde(skip)]
    pub ignored_overrides: Vec<String>,

    /// Model backend used for classification and synthesis (`[backend]`).
    #[serde(default)]
    pub backend: BackendConfig,

    /// Downstream agent endpoints (`[agents]`).
    #[serde(default)]
    pub agents: AgentsConfig,

    /// HTTP server exposing the coordinator (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Outbound HTTP client settings (`[http]`).
    #[serde(default)]
    pub http: HttpConfig,

    /// Log filter used when `RUST_LOG` is unset. Default: `"info"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

// ── Model backend ────────────────────────────────────────────────

/// Model backend configuration (`[backend]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL of the DIAL / OpenAI-compatible backend. Default: `http://localhost:8080`.
    #[serde(default = "default_backend_endpoint")]
    pub endpoint: String,
    /// Deployment (model) used for classification and synthesis. Default: `gpt-4o`.
    #[serde(default = "default_backend_deployment")]
    pub deployment: String,
    /// `api-version` query parameter. Default: `2025-01-01-preview`.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_backend_endpoint() -> String {
    "http://localhost:8080".into()
}

fn default_backend_deployment() -> String {
    "gpt-4o".into()
}

fn default_api_version() -> String {
    "2025-01-01-preview".into()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_backend_endpoint(),
            deployment: default_backend_deployment(),
            api_version: default_api_version(),
        }
    }
}

// ── Downstream agents ────────────────────────────────────────────

/// Downstream agent configuration (`[agents]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AgentsConfig {
    /// Deployment name of the general purpose agent on the model backend.
    /// Default: `general-purpose-agent`.
    #[serde(default = "default_gpa_deployment")]
    pub gpa_deployment: String,
    /// Base URL of the user management agent. Default: `http://localhost:8042`.
    #[serde(default = "default_ums_endpoint")]
    pub ums_endpoint: String,
}

fn default_gpa_deployment() -> String {
    "general-purpose-agent".into()
}

fn default_ums_endpoint() -> String {
    "http://localhost:8042".into()
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            gpa_deployment: default_gpa_deployment(),
            ums_endpoint: default_ums_endpoint(),
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────

/// Gateway server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Gateway host (default: 0.0.0.0)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Gateway port (default: 8055)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Deployment name the coordinator answers to (default: mas-coordinator)
    #[serde(default = "default_deployment_name")]
    pub deployment_name: String,
    /// Maximum accepted request body in bytes (default: 1 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_gateway_host() -> String {
    "0.0.0.0".into()
}

fn default_gateway_port() -> u16 {
    8055
}

fn default_deployment_name() -> String {
    "mas-coordinator".into()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            deployment_name: default_deployment_name(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ── Outbound HTTP ────────────────────────────────────────────────

/// Outbound HTTP client configuration (`[http]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct HttpConfig {
    /// Longest silence allowed between two reads of a response, so a long
    /// agent run keeps streaming as long as data flows. Default: `120`.
    #[serde(default = "default_read_timeout_secs", alias = "request_timeout_secs")]
    pub read_timeout_secs: u64,
    /// TCP connect timeout. Default: `10`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_read_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let config_path = default_config_dir()
            .map(|dir| dir.join("config.toml"))
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self {
            config_path,
            ignored_overrides: Vec::new(),
            backend: BackendConfig::default(),
            agents: AgentsConfig::default(),
            gateway: GatewayConfig::default(),
            http: HttpConfig::default(),
            log_level: default_log_level(),
        }
    }
}

const CONFIG_DIR_ENV: &str = "MAS_COORDINATOR_CONFIG_DIR";

fn default_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        let dir = dir.trim();
        if !dir.is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(dir).into_owned()));
        }
    }
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".mas-coordinator"))
}

fn is_http_url(raw: &str) -> bool {
    reqwest::Url::parse(raw).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

impl Config {
    /// Load configuration from `path` (or the default location), apply
    /// environment overrides, and validate.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned()),
            None => default_config_dir()?.join("config.toml"),
        };

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            Self::from_toml(&contents)?
        } else if path.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        } else {
            Config::default()
        };
        config.config_path = config_path;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; absent sections fall back to defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents).context("Failed to parse config file")?;
        config.config_path = Config::default().config_path;
        Ok(config)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.backend.endpoint) {
            anyhow::bail!(
                "backend.endpoint must be an http(s) URL, got '{}'",
                self.backend.endpoint
            );
        }
        if self.backend.deployment.trim().is_empty() {
            anyhow::bail!("backend.deployment must not be empty");
        }
        if self.agents.gpa_deployment.trim().is_empty() {
            anyhow::bail!("agents.gpa_deployment must not be empty");
        }
        if !is_http_url(&self.agents.ums_endpoint) {
            anyhow::bail!(
                "agents.ums_endpoint must be an http(s) URL, got '{}'",
                self.agents.ums_endpoint
            );
        }
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.deployment_name.trim().is_empty() {
            anyhow::bail!("gateway.deployment_name must not be empty");
        }
        if self.gateway.max_body_bytes == 0 {
            anyhow::bail!("gateway.max_body_bytes must be greater than 0");
        }
        if self.http.read_timeout_secs == 0 || self.http.connect_timeout_secs == 0 {
            anyhow::bail!("http timeouts must be greater than 0");
        }
        Ok(())
    }

    /// Apply environment variable overrides to config.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup. Empty values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|value| !value.trim().is_empty()))
                .map(|value| value.trim().to_string())
        };

        if let Some(endpoint) = var(&["DIAL_ENDPOINT"]) {
            self.backend.endpoint = endpoint;
        }
        if let Some(deployment) = var(&["DEPLOYMENT_NAME"]) {
            self.backend.deployment = deployment;
        }
        if let Some(version) = var(&["DIAL_API_VERSION"]) {
            self.backend.api_version = version;
        }
        if let Some(gpa) = var(&["GPA_DEPLOYMENT_NAME"]) {
            self.agents.gpa_deployment = gpa;
        }
        if let Some(ums) = var(&["UMS_AGENT_ENDPOINT"]) {
            self.agents.ums_endpoint = ums;
        }
        if let Some(host) = var(&["MAS_GATEWAY_HOST"]) {
            self.gateway.host = host;
        }
        if let Some(port_str) = var(&["MAS_GATEWAY_PORT", "PORT"]) {
            match port_str.parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(_) => self
                    .ignored_overrides
                    .push(format!("gateway port override '{port_str}' is not a valid port")),
            }
        }
        if let Some(name) = var(&["MAS_DEPLOYMENT_NAME"]) {
            self.gateway.deployment_name = name;
        }
        if let Some(level) = var(&["LOG_LEVEL"]) {
            self.log_level = level.to_ascii_lowercase();
        }
    }
}
