use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub state_store: StateStoreConfig,
    pub workflow: WorkflowConfig,
    pub negotiation: NegotiationConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub notifier: NotifierConfig,
    pub payment: PaymentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct StateStoreConfig {
    pub url: String,
    pub max_connections_per_pool: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_hours: i64,
}

#[derive(Clone, Debug)]
pub struct NegotiationConfig {
    pub horizon_hours: i64,
    pub reminder_cadence_hours: i64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub api_requests_per_minute: u32,
    pub messages_per_minute: u32,
    pub max_connections_per_user: u32,
}

#[derive(Clone, Debug)]
pub struct NotifierConfig {
    pub from_address: String,
    pub api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub api_key: Option<SecretString>,
    pub default_currency: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub state_store_url: Option<String>,
    pub log_level: Option<String>,
    pub negotiation_horizon_hours: Option<i64>,
    pub workflow_max_retries: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_store: StateStoreConfig {
                url: "sqlite://procura.db".to_string(),
                max_connections_per_pool: 5,
                acquire_timeout_secs: 30,
            },
            workflow: WorkflowConfig { max_retries: 3, retry_base_delay_ms: 500, timeout_hours: 168 },
            negotiation: NegotiationConfig {
                horizon_hours: 48,
                reminder_cadence_hours: 12,
                sweep_interval_secs: 600,
            },
            session: SessionConfig { ttl_minutes: 60 },
            rate_limit: RateLimitConfig {
                api_requests_per_minute: 60,
                messages_per_minute: 20,
                max_connections_per_user: 5,
            },
            notifier: NotifierConfig {
                from_address: "procurement@localhost".to_string(),
                api_key: None,
            },
            payment: PaymentConfig { api_key: None, default_currency: "USD".to_string() },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("procura.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(store) = patch.state_store {
            if let Some(url) = store.url {
                self.state_store.url = url;
            }
            if let Some(value) = store.max_connections_per_pool {
                self.state_store.max_connections_per_pool = value;
            }
            if let Some(value) = store.acquire_timeout_secs {
                self.state_store.acquire_timeout_secs = value;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(value) = workflow.max_retries {
                self.workflow.max_retries = value;
            }
            if let Some(value) = workflow.retry_base_delay_ms {
                self.workflow.retry_base_delay_ms = value;
            }
            if let Some(value) = workflow.timeout_hours {
                self.workflow.timeout_hours = value;
            }
        }

        if let Some(negotiation) = patch.negotiation {
            if let Some(value) = negotiation.horizon_hours {
                self.negotiation.horizon_hours = value;
            }
            if let Some(value) = negotiation.reminder_cadence_hours {
                self.negotiation.reminder_cadence_hours = value;
            }
            if let Some(value) = negotiation.sweep_interval_secs {
                self.negotiation.sweep_interval_secs = value;
            }
        }

        if let Some(session) = patch.session {
            if let Some(value) = session.ttl_minutes {
                self.session.ttl_minutes = value;
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(value) = rate_limit.api_requests_per_minute {
                self.rate_limit.api_requests_per_minute = value;
            }
            if let Some(value) = rate_limit.messages_per_minute {
                self.rate_limit.messages_per_minute = value;
            }
            if let Some(value) = rate_limit.max_connections_per_user {
                self.rate_limit.max_connections_per_user = value;
            }
        }

        if let Some(notifier) = patch.notifier {
            if let Some(value) = notifier.from_address {
                self.notifier.from_address = value;
            }
            if let Some(value) = notifier.api_key {
                self.notifier.api_key = Some(value.into());
            }
        }

        if let Some(payment) = patch.payment {
            if let Some(value) = payment.api_key {
                self.payment.api_key = Some(value.into());
            }
            if let Some(value) = payment.default_currency {
                self.payment.default_currency = value;
            }
        }

        if let Some(server) = patch.server {
            if let Some(value) = server.bind_address {
                self.server.bind_address = value;
            }
            if let Some(value) = server.health_check_port {
                self.server.health_check_port = value;
            }
            if let Some(value) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = value;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(value) = logging.level {
                self.logging.level = value;
            }
            if let Some(value) = logging.format {
                self.logging.format = value;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PROCURA_STATE_STORE_URL") {
            self.state_store.url = value;
        }
        if let Some(value) = read_env("PROCURA_STATE_STORE_MAX_CONNECTIONS_PER_POOL") {
            self.state_store.max_connections_per_pool =
                parse_u32("PROCURA_STATE_STORE_MAX_CONNECTIONS_PER_POOL", &value)?;
        }
        if let Some(value) = read_env("PROCURA_STATE_STORE_ACQUIRE_TIMEOUT_SECS") {
            self.state_store.acquire_timeout_secs =
                parse_u64("PROCURA_STATE_STORE_ACQUIRE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PROCURA_WORKFLOW_MAX_RETRIES") {
            self.workflow.max_retries = parse_u32("PROCURA_WORKFLOW_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("PROCURA_WORKFLOW_RETRY_BASE_DELAY_MS") {
            self.workflow.retry_base_delay_ms =
                parse_u64("PROCURA_WORKFLOW_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PROCURA_WORKFLOW_TIMEOUT_HOURS") {
            self.workflow.timeout_hours = parse_i64("PROCURA_WORKFLOW_TIMEOUT_HOURS", &value)?;
        }

        if let Some(value) = read_env("PROCURA_NEGOTIATION_HORIZON_HOURS") {
            self.negotiation.horizon_hours =
                parse_i64("PROCURA_NEGOTIATION_HORIZON_HOURS", &value)?;
        }
        if let Some(value) = read_env("PROCURA_NEGOTIATION_REMINDER_CADENCE_HOURS") {
            self.negotiation.reminder_cadence_hours =
                parse_i64("PROCURA_NEGOTIATION_REMINDER_CADENCE_HOURS", &value)?;
        }
        if let Some(value) = read_env("PROCURA_NEGOTIATION_SWEEP_INTERVAL_SECS") {
            self.negotiation.sweep_interval_secs =
                parse_u64("PROCURA_NEGOTIATION_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("PROCURA_SESSION_TTL_MINUTES") {
            self.session.ttl_minutes = parse_i64("PROCURA_SESSION_TTL_MINUTES", &value)?;
        }

        if let Some(value) = read_env("PROCURA_RATE_LIMIT_API_REQUESTS_PER_MINUTE") {
            self.rate_limit.api_requests_per_minute =
                parse_u32("PROCURA_RATE_LIMIT_API_REQUESTS_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("PROCURA_RATE_LIMIT_MESSAGES_PER_MINUTE") {
            self.rate_limit.messages_per_minute =
                parse_u32("PROCURA_RATE_LIMIT_MESSAGES_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("PROCURA_RATE_LIMIT_MAX_CONNECTIONS_PER_USER") {
            self.rate_limit.max_connections_per_user =
                parse_u32("PROCURA_RATE_LIMIT_MAX_CONNECTIONS_PER_USER", &value)?;
        }

        if let Some(value) = read_env("PROCURA_NOTIFIER_FROM_ADDRESS") {
            self.notifier.from_address = value;
        }
        if let Some(value) = read_env("PROCURA_NOTIFIER_API_KEY") {
            self.notifier.api_key = Some(value.into());
        }
        if let Some(value) = read_env("PROCURA_PAYMENT_API_KEY") {
            self.payment.api_key = Some(value.into());
        }
        if let Some(value) = read_env("PROCURA_PAYMENT_DEFAULT_CURRENCY") {
            self.payment.default_currency = value;
        }

        if let Some(value) = read_env("PROCURA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PROCURA_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("PROCURA_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("PROCURA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PROCURA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PROCURA_LOGGING_LEVEL").or_else(|| read_env("PROCURA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PROCURA_LOGGING_FORMAT").or_else(|| read_env("PROCURA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.state_store_url {
            self.state_store.url = url;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(hours) = overrides.negotiation_horizon_hours {
            self.negotiation.horizon_hours = hours;
        }
        if let Some(retries) = overrides.workflow_max_retries {
            self.workflow.max_retries = retries;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.state_store.url.trim();
        let sqlite_url =
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
        if !sqlite_url {
            return Err(ConfigError::Validation(
                "state_store.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                    .to_string(),
            ));
        }
        if self.state_store.max_connections_per_pool == 0 {
            return Err(ConfigError::Validation(
                "state_store.max_connections_per_pool must be greater than zero".to_string(),
            ));
        }
        if self.state_store.acquire_timeout_secs == 0 || self.state_store.acquire_timeout_secs > 300
        {
            return Err(ConfigError::Validation(
                "state_store.acquire_timeout_secs must be in range 1..=300".to_string(),
            ));
        }

        if self.workflow.max_retries > 10 {
            return Err(ConfigError::Validation(
                "workflow.max_retries must be at most 10".to_string(),
            ));
        }
        if self.workflow.timeout_hours <= 0 {
            return Err(ConfigError::Validation(
                "workflow.timeout_hours must be greater than zero".to_string(),
            ));
        }

        if self.negotiation.horizon_hours <= 0 {
            return Err(ConfigError::Validation(
                "negotiation.horizon_hours must be greater than zero".to_string(),
            ));
        }
        if self.negotiation.reminder_cadence_hours <= 0
            || self.negotiation.reminder_cadence_hours >= self.negotiation.horizon_hours
        {
            return Err(ConfigError::Validation(
                "negotiation.reminder_cadence_hours must be positive and shorter than the horizon"
                    .to_string(),
            ));
        }
        if self.negotiation.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "negotiation.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.session.ttl_minutes <= 0 {
            return Err(ConfigError::Validation(
                "session.ttl_minutes must be greater than zero".to_string(),
            ));
        }

        if self.rate_limit.api_requests_per_minute == 0
            || self.rate_limit.messages_per_minute == 0
            || self.rate_limit.max_connections_per_user == 0
        {
            return Err(ConfigError::Validation(
                "rate_limit values must all be greater than zero".to_string(),
            ));
        }

        if self.notifier.from_address.trim().is_empty() {
            return Err(ConfigError::Validation(
                "notifier.from_address must not be empty".to_string(),
            ));
        }
        if let Some(key) = &self.notifier.api_key {
            if key.expose_secret().trim().is_empty() {
                return Err(ConfigError::Validation(
                    "notifier.api_key must not be empty when set".to_string(),
                ));
            }
        }
        if let Some(key) = &self.payment.api_key {
            if key.expose_secret().trim().is_empty() {
                return Err(ConfigError::Validation(
                    "payment.api_key must not be empty when set".to_string(),
                ));
            }
        }
        if self.payment.default_currency.trim().len() != 3 {
            return Err(ConfigError::Validation(
                "payment.default_currency must be a 3-letter code".to_string(),
            ));
        }

        if self.server.health_check_port == 0 {
            return Err(ConfigError::Validation(
                "server.health_check_port must be greater than zero".to_string(),
            ));
        }
        if self.server.graceful_shutdown_secs == 0 {
            return Err(ConfigError::Validation(
                "server.graceful_shutdown_secs must be greater than zero".to_string(),
            ));
        }

        let level = self.logging.level.trim().to_ascii_lowercase();
        match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(ConfigError::Validation(
                "logging.level must be one of trace|debug|info|warn|error".to_string(),
            )),
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("procura.toml"), PathBuf::from("config/procura.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    state_store: Option<StateStorePatch>,
    workflow: Option<WorkflowPatch>,
    negotiation: Option<NegotiationPatch>,
    session: Option<SessionPatch>,
    rate_limit: Option<RateLimitPatch>,
    notifier: Option<NotifierPatch>,
    payment: Option<PaymentPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct StateStorePatch {
    url: Option<String>,
    max_connections_per_pool: Option<u32>,
    acquire_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    timeout_hours: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct NegotiationPatch {
    horizon_hours: Option<i64>,
    reminder_cadence_hours: Option<i64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    ttl_minutes: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    api_requests_per_minute: Option<u32>,
    messages_per_minute: Option<u32>,
    max_connections_per_user: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct NotifierPatch {
    from_address: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentPatch {
    api_key: Option<String>,
    default_currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_and_match_spec_cadences() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.workflow.max_retries == 3, "default max_retries should be 3")?;
        ensure(config.negotiation.horizon_hours == 48, "default horizon should be 48h")?;
        ensure(config.negotiation.reminder_cadence_hours == 12, "default cadence should be 12h")?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PROCURA_NOTIFIER_KEY", "nk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("procura.toml");
            fs::write(
                &path,
                r#"
[notifier]
from_address = "buyer@example.org"
api_key = "${TEST_PROCURA_NOTIFIER_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .notifier
                    .api_key
                    .as_ref()
                    .map(|key| key.expose_secret() == "nk-from-env")
                    .unwrap_or(false),
                "notifier key should be interpolated from environment",
            )?;
            ensure(
                config.notifier.from_address == "buyer@example.org",
                "from_address should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_PROCURA_NOTIFIER_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PROCURA_STATE_STORE_URL", "sqlite://from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("procura.toml");
            fs::write(
                &path,
                r#"
[state_store]
url = "sqlite://from-file.db"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.state_store.url == "sqlite://from-env.db",
                "env url should win over file and defaults",
            )?;
            ensure(config.logging.level == "debug", "override log level should win over file")?;
            Ok(())
        })();

        clear_vars(&["PROCURA_STATE_STORE_URL"]);
        result
    }

    #[test]
    fn validation_rejects_cadence_longer_than_horizon() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PROCURA_NEGOTIATION_HORIZON_HOURS", "10");
        env::set_var("PROCURA_NEGOTIATION_REMINDER_CADENCE_HOURS", "12");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("reminder_cadence_hours")
            );
            ensure(has_message, "validation failure should mention reminder_cadence_hours")
        })();

        clear_vars(&[
            "PROCURA_NEGOTIATION_HORIZON_HOURS",
            "PROCURA_NEGOTIATION_REMINDER_CADENCE_HOURS",
        ]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PROCURA_PAYMENT_API_KEY", "pk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("pk-secret-value"), "debug output should not contain the key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["PROCURA_PAYMENT_API_KEY"]);
        result
    }
}
