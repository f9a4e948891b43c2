use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Payment gateway settings: merchant credentials, endpoints, and the
/// request knobs used when building signed create-payment requests.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Label recorded as the order's payment method on reconciliation.
    #[serde(default = "default_gateway_provider")]
    pub provider: String,

    #[validate(length(min = 1, message = "Gateway partner code is required"))]
    pub partner_code: String,

    #[validate(length(min = 1, message = "Gateway access key is required"))]
    pub access_key: String,

    /// Shared secret used for HMAC-SHA256 signing of outbound requests and
    /// verification of inbound callbacks.
    #[validate(length(min = 1, message = "Gateway secret key is required"))]
    pub secret_key: String,

    /// Create-payment endpoint of the provider.
    #[validate(url(message = "Gateway create endpoint must be a valid URL"))]
    pub create_endpoint: String,

    /// Where the provider redirects the payer after the attempt.
    pub redirect_url: String,

    /// Callback (IPN) URL the provider posts outcomes to.
    pub ipn_url: String,

    #[serde(default = "default_request_type")]
    pub request_type: String,

    /// Bound on every outbound gateway HTTP call, in seconds.
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,

    /// Reject inbound callbacks whose signature does not verify.
    #[serde(default = "default_true")]
    pub verify_ipn_signature: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: default_gateway_provider(),
            partner_code: "VENDORA".to_string(),
            access_key: "dev_access_key".to_string(),
            secret_key: "dev_secret_key".to_string(),
            create_endpoint: "https://payment.example.com/v2/gateway/api/create".to_string(),
            redirect_url: "http://localhost:3000/checkout/result".to_string(),
            ipn_url: "http://localhost:8080/api/v1/payments/callback".to_string(),
            request_type: default_request_type(),
            timeout_secs: default_gateway_timeout_secs(),
            verify_ipn_signature: true,
        }
    }
}

/// Flat fee and tax rate applied when an order's totals are computed.
#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub shipping_fee: Decimal,
    pub tax_rate: Decimal,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Flat shipping fee applied to every order.
    #[serde(default = "default_shipping_fee")]
    pub shipping_fee: Decimal,

    /// Tax rate as a decimal fraction of the subtotal (e.g. 0.1 for 10%).
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,

    /// Capacity of the in-process event channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[validate]
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_shipping_fee() -> Decimal {
    dec!(10000)
}

fn default_tax_rate() -> Decimal {
    dec!(0.1)
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_gateway_provider() -> String {
    "wallet".to_string()
}

fn default_request_type() -> String {
    "captureWallet".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling; file/env-based setups
    /// go through [`load_config`].
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: default_port(),
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            shipping_fee: default_shipping_fee(),
            tax_rate: default_tax_rate(),
            event_channel_capacity: default_event_channel_capacity(),
            gateway: GatewayConfig::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            shipping_fee: self.shipping_fee,
            tax_rate: self.tax_rate,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Loads configuration from `config/default`, an environment-specific file,
/// and `APP__`-prefixed environment variables (later sources win).
pub fn load_config() -> Result<AppConfig, ConfigurationError> {
    let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let settings = Config::builder()
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = settings.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| ConfigurationError::Validation(e.to_string()))?;

    Ok(app_config)
}

/// Installs the global tracing subscriber. Safe to call more than once; the
/// second installation is ignored.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_checkout_pricing() {
        let cfg = AppConfig::new("sqlite::memory:", "test");
        assert_eq!(cfg.shipping_fee, dec!(10000));
        assert_eq!(cfg.tax_rate, dec!(0.1));
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn gateway_defaults_are_valid() {
        let cfg = AppConfig::new("sqlite::memory:", "test");
        assert!(cfg.validate().is_ok());
        assert!(cfg.gateway.verify_ipn_signature);
        assert_eq!(cfg.gateway.request_type, "captureWallet");
    }
}
