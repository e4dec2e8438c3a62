use serde::{Deserialize, Serialize};

use crate::clients::openrouter::OPENROUTER_URL;
use crate::clients::traits::DEFAULT_MODEL;

/// Accepted range for the per-call upstream timeout.
pub const MIN_UPSTREAM_TIMEOUT_MS: u64 = 1_000;
pub const MAX_UPSTREAM_TIMEOUT_MS: u64 = 600_000;

/// Log filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "soma_ai=info,tower_http=info";

/// Main configuration structure loaded from soma.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub cosmic: CosmicConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Completion endpoint settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    pub title: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: OPENROUTER_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: 30_000,
            title: "SymptomAI".to_string(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: std::net::SocketAddr,
    pub allowed_origin: String,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: std::net::SocketAddr::from(([127, 0, 0, 1], 5000)),
            allowed_origin: "http://localhost:5173".to_string(),
            body_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Rate limits and token lifetimes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Window for the coarse limit applied to every /api route
    pub api_window_sec: u64,
    pub api_max_requests: u32,
    /// Window for the strict limit applied to model-backed routes
    pub ai_window_sec: u64,
    pub ai_max_requests: u32,
    pub sweep_interval_sec: u64,
    pub csrf_ttl_sec: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            api_window_sec: 15 * 60,
            api_max_requests: 100,
            ai_window_sec: 60,
            ai_max_requests: 10,
            sweep_interval_sec: 5 * 60,
            csrf_ttl_sec: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CosmicConfig {
    pub enabled: bool,
    pub probability: f64,
}

impl Default for CosmicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.35,
        }
    }
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub openrouter_api_key: Option<String>,
    pub frontend_url: Option<String>,
    pub model_override: Option<String>,
    pub upstream_timeout_ms: u64,
    pub dev_logging: bool,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            frontend_url: None,
            model_override: None,
            upstream_timeout_ms: 30_000,
            dev_logging: false,
            log_level: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env(upstream: &UpstreamConfig) -> Self {
        Self {
            openrouter_api_key: std::env::var("OPENROUTER_API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            frontend_url: std::env::var("FRONTEND_URL").ok().filter(|u| !u.is_empty()),
            model_override: std::env::var("SOMA_MODEL").ok().filter(|m| !m.is_empty()),
            upstream_timeout_ms: std::env::var("SOMA_UPSTREAM_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(upstream.timeout_ms),
            dev_logging: std::env::var("SOMA_DEV")
                .ok()
                .is_some_and(|v| v == "true" || v == "1")
                || std::env::var("NODE_ENV").ok().as_deref() == Some("development"),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses SOMA_CONFIG environment variable or defaults to "soma.toml"
    pub fn load() -> anyhow::Result<Self> {
        load_env_files();
        let config_path =
            std::env::var("SOMA_CONFIG").unwrap_or_else(|_| "soma.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Same as [`Config::load`] with an explicit TOML path.
    pub fn load_with_env(config_path: &str) -> anyhow::Result<Self> {
        load_env_files();
        Self::load_from(config_path)
    }

    /// Load from an explicit TOML path, then apply environment overrides.
    pub fn load_from(config_path: &str) -> anyhow::Result<Self> {
        let mut config: Config = if let Ok(content) = std::fs::read_to_string(config_path) {
            toml::from_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.runtime = RuntimeConfig::load_from_env(&config.upstream);

        if let Ok(v) = std::env::var("SOMA_HTTP_BIND")
            && let Ok(bind) = v.parse::<std::net::SocketAddr>()
        {
            config.server.bind = bind;
            tracing::debug!("SOMA_HTTP_BIND env override applied");
        } else if let Some(port) = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            config.server.bind.set_port(port);
            tracing::debug!("PORT env override applied");
        }

        config.validate()?;
        Ok(config)
    }

    /// Origin the frontend is served from; env wins over the file.
    pub fn allowed_origin(&self) -> &str {
        self.runtime
            .frontend_url
            .as_deref()
            .unwrap_or(&self.server.allowed_origin)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "upstream.base_url '{}' must start with http:// or https://",
                self.upstream.base_url
            );
        }
        if !(MIN_UPSTREAM_TIMEOUT_MS..=MAX_UPSTREAM_TIMEOUT_MS)
            .contains(&self.runtime.upstream_timeout_ms)
        {
            anyhow::bail!(
                "upstream timeout must be within {MIN_UPSTREAM_TIMEOUT_MS}..={MAX_UPSTREAM_TIMEOUT_MS}ms"
            );
        }
        if self.limits.api_window_sec == 0 || self.limits.ai_window_sec == 0 {
            anyhow::bail!("rate limit windows must be > 0");
        }
        if self.limits.api_max_requests == 0 || self.limits.ai_max_requests == 0 {
            anyhow::bail!("rate limit request caps must be > 0");
        }
        if self.limits.sweep_interval_sec == 0 || self.limits.csrf_ttl_sec == 0 {
            anyhow::bail!("sweep interval and CSRF TTL must be > 0");
        }
        if !(0.0..=1.0).contains(&self.cosmic.probability) {
            anyhow::bail!("cosmic.probability must be within 0.0..=1.0");
        }
        if self.allowed_origin().trim().is_empty() {
            anyhow::bail!("allowed origin must not be empty");
        }
        Ok(())
    }
}

// Load env with smart fallbacks:
// 1) SOMA_ENV_FILE if set
// 2) ./.env
// 3) ../.env (repo root when running from a subdirectory)
// Existing variables win, so calling this more than once is harmless.
pub fn load_env_files() {
    if let Ok(env_path) = std::env::var("SOMA_ENV_FILE") {
        let _ = dotenvy::from_path(env_path);
    } else if dotenvy::from_path(".env").is_err() {
        let _ = dotenvy::from_path("../.env");
    }
}
