use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Checkout pricing rules
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Orders above this amount cannot be paid cash-on-delivery
    #[serde(default = "default_cod_limit")]
    pub cod_limit: Decimal,

    /// Currency every catalog price is expressed in
    #[serde(default = "default_store_currency")]
    #[validate(length(equal = 3))]
    pub store_currency: String,

    /// Maximum quantity of a single product in one cart
    #[serde(default = "default_max_line_quantity")]
    #[validate(range(min = 1))]
    pub max_line_quantity: i32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cod_limit: default_cod_limit(),
            store_currency: default_store_currency(),
            max_line_quantity: default_max_line_quantity(),
        }
    }
}

/// External payment gateway (PayPal Orders v2)
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_base_url")]
    #[validate(url)]
    pub base_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Currency the processor settles in; cart totals are converted before intent creation
    #[serde(default = "default_settlement_currency")]
    #[validate(length(equal = 3))]
    pub settlement_currency: String,

    #[serde(default = "default_return_url")]
    #[validate(url)]
    pub return_url: String,

    #[serde(default = "default_cancel_url")]
    #[validate(url)]
    pub cancel_url: String,

    /// Upper bound on any single processor call
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,

    /// Upper bound on the capture call made from the callback
    #[serde(default = "default_capture_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub capture_timeout_secs: u64,

    /// Pending payments older than this are abandoned and their stock released
    #[serde(default = "default_pending_payment_ttl_secs")]
    #[validate(range(min = 60))]
    pub pending_payment_ttl_secs: u64,

    /// How often the abandonment sweep runs
    #[serde(default = "default_sweep_interval_secs")]
    #[validate(range(min = 1))]
    pub sweep_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            settlement_currency: default_settlement_currency(),
            return_url: default_return_url(),
            cancel_url: default_cancel_url(),
            request_timeout_secs: default_request_timeout_secs(),
            capture_timeout_secs: default_capture_timeout_secs(),
            pending_payment_ttl_secs: default_pending_payment_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn pending_payment_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_payment_ttl_secs)
    }
}

/// Exchange-rate lookup service
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ExchangeRateConfig {
    #[serde(default = "default_exchange_rate_url")]
    #[validate(url)]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,
}

impl Default for ExchangeRateConfig {
    fn default() -> Self {
        Self {
            base_url: default_exchange_rate_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key used to verify bearer tokens
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: usize,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub pricing: PricingConfig,

    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    #[validate]
    pub exchange_rates: ExchangeRateConfig,
}

impl AppConfig {
    /// Builds a configuration with every optional section at its default.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration: default_jwt_expiration(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            request_timeout_secs: default_request_timeout_secs(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            pricing: PricingConfig::default(),
            gateway: GatewayConfig::default(),
            exchange_rates: ExchangeRateConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Checks that span more than one field.
    pub fn validate_additional_constraints(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if self.pricing.cod_limit <= Decimal::ZERO {
            let mut err = ValidationError::new("cod_limit");
            err.message = Some("pricing.cod_limit must be positive".into());
            errors.add("pricing", err);
        }

        if self.is_production()
            && (self.gateway.client_id.is_empty() || self.gateway.client_secret.is_empty())
        {
            let mut err = ValidationError::new("gateway_credentials");
            err.message = Some("gateway client_id and client_secret are required in production".into());
            errors.add("gateway", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_jwt_expiration() -> usize {
    3600
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_cod_limit() -> Decimal {
    dec!(1000)
}

fn default_store_currency() -> String {
    "INR".to_string()
}

fn default_max_line_quantity() -> i32 {
    5
}

fn default_gateway_base_url() -> String {
    "https://api-m.sandbox.paypal.com".to_string()
}

fn default_settlement_currency() -> String {
    "USD".to_string()
}

fn default_return_url() -> String {
    "http://localhost:8080/api/v1/payments/gateway/confirm".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:8080/api/v1/payments/gateway/cancel".to_string()
}

fn default_capture_timeout_secs() -> u64 {
    15
}

fn default_pending_payment_ttl_secs() -> u64 {
    3 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_exchange_rate_url() -> String {
    "https://api.exchangerate-api.com/v4".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    if ["changeme", "your-secret-key", "default-secret-key"]
        .iter()
        .any(|pattern| lower.contains(pattern))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to a random string of at least 32 characters.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "k9Vq2xR7mLp4Tz8Wn3Bc6Hd1Fs5Gj0Ya".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn defaults_carry_checkout_rules() {
        let cfg = base_config();
        assert_eq!(cfg.pricing.cod_limit, dec!(1000));
        assert_eq!(cfg.pricing.max_line_quantity, 5);
        assert_eq!(cfg.gateway.settlement_currency, "USD");
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn rejects_weak_jwt_secret() {
        let mut cfg = base_config();
        cfg.jwt_secret = "a".repeat(40);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn production_requires_gateway_credentials() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.gateway.client_id = "client".into();
        cfg.gateway.client_secret = "secret".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_positive_cod_limit_is_rejected() {
        let mut cfg = base_config();
        cfg.pricing.cod_limit = Decimal::ZERO;
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn splits_cors_origins() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://a.example, https://b.example,".into());
        assert_eq!(
            cfg.allowed_origins(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }
}
