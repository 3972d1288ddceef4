// config.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{env, fmt, time::Duration};

pub const DEFAULT_CONFIG_FILE: &str = "eventsub-gateway.config.json";
pub const CONFIG_FILE_ENV: &str = "GATEWAY_CONFIG_FILE";
pub const ENV_PREFIX: &str = "GATEWAY";

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Name of an environment variable holding the secret, read on every verification.
    #[serde(default)]
    pub secret_env: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_dedupe_ttl_secs")]
    pub dedupe_ttl_secs: u64,
    #[serde(default = "default_dedupe_capacity")]
    pub dedupe_capacity: usize,
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
    /// Handlers allowed to wait for a free slot before new notifications get a 503.
    #[serde(default = "default_max_queued_dispatches")]
    pub max_queued_dispatches: usize,
    /// 0 disables the handler deadline.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub enable_request_logging: bool,
    #[serde(default = "default_chat_command_prefix")]
    pub chat_command_prefix: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:7000".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_dedupe_ttl_secs() -> u64 {
    300
}

fn default_dedupe_capacity() -> usize {
    2000
}

fn default_freshness_window_secs() -> u64 {
    600
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_max_concurrent_dispatches() -> usize {
    64
}

fn default_max_queued_dispatches() -> usize {
    1024
}

fn default_handler_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_shutdown_timeout_secs() -> u64 {
    15
}

fn default_chat_command_prefix() -> String {
    "!".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: default_bind_address(),
            webhook_path: default_webhook_path(),
            webhook_secret: None,
            secret_env: None,
            log_level: default_log_level(),
            dedupe_ttl_secs: default_dedupe_ttl_secs(),
            dedupe_capacity: default_dedupe_capacity(),
            freshness_window_secs: default_freshness_window_secs(),
            max_body_bytes: default_max_body_bytes(),
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
            max_queued_dispatches: default_max_queued_dispatches(),
            handler_timeout_secs: default_handler_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            enable_request_logging: false,
            chat_command_prefix: default_chat_command_prefix(),
        }
    }
}

impl Config {
    /// Loads the optional JSON file, then `GATEWAY__*` environment overrides.
    pub fn load() -> Result<Self> {
        let path = env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_layered(&path, environment())
    }

    // Env values stay strings; numeric fields are parsed during deserialization
    // so secrets such as "0042" are kept verbatim.
    fn load_layered(path: &str, env_source: config::Environment) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Json).required(false))
            .add_source(env_source)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to read configuration: {}", e))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("failed to parse configuration: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.webhook_secret.as_deref().map_or(true, str::is_empty) && self.secret_env.is_none() {
            anyhow::bail!("either webhook_secret or secret_env must be set");
        }
        if self.dedupe_capacity == 0 {
            anyhow::bail!("dedupe_capacity must be greater than zero");
        }
        if self.dedupe_ttl_secs == 0 {
            anyhow::bail!("dedupe_ttl_secs must be greater than zero");
        }
        if self.freshness_window_secs == 0 {
            anyhow::bail!("freshness_window_secs must be greater than zero");
        }
        if self.max_concurrent_dispatches == 0 {
            anyhow::bail!("max_concurrent_dispatches must be greater than zero");
        }
        if !self.webhook_path.starts_with('/') {
            anyhow::bail!("webhook_path must start with '/'");
        }
        Ok(())
    }

    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_secs)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.handler_timeout_secs > 0).then(|| Duration::from_secs(self.handler_timeout_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX).separator("__")
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("webhook_path", &self.webhook_path)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<REDACTED>"))
            .field("secret_env", &self.secret_env)
            .field("log_level", &self.log_level)
            .field("dedupe_ttl_secs", &self.dedupe_ttl_secs)
            .field("dedupe_capacity", &self.dedupe_capacity)
            .field("freshness_window_secs", &self.freshness_window_secs)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_concurrent_dispatches", &self.max_concurrent_dispatches)
            .field("max_queued_dispatches", &self.max_queued_dispatches)
            .field("handler_timeout_secs", &self.handler_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field("enable_request_logging", &self.enable_request_logging)
            .field("chat_command_prefix", &self.chat_command_prefix)
            .finish()
    }
}
