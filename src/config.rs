use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::env as std_env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SESSION_TTL_SECS: u64 = 1800;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_BACKEND_BASE_URL: &str = "http://localhost:9000";
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USD_MUR_FALLBACK_RATE: f64 = 45.5;
const DEFAULT_CHECKOUT_SUCCESS_DELAY_MS: u64 = 1500;
const DEFAULT_TOUR_FRESHNESS_WINDOW_HOURS: i64 = 168;
const DEFAULT_TOUR_START_DELAY_MS: u64 = 1000;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default = "default_false_bool")]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// Checkout session TTL in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Base URL of the platform REST backend
    #[serde(default = "default_backend_base_url")]
    pub backend_base_url: String,

    /// API key sent to the platform backend on every call
    #[serde(default)]
    pub backend_api_key: Option<String>,

    /// Timeout (seconds) for platform backend calls
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,

    /// Stripe secret key
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// PayPal REST credentials
    #[serde(default)]
    pub paypal_client_id: Option<String>,
    #[serde(default)]
    pub paypal_client_secret: Option<String>,

    /// MCB Juice merchant credentials
    #[serde(default)]
    pub mcb_juice_merchant_id: Option<String>,
    #[serde(default)]
    pub mcb_juice_api_key: Option<String>,

    /// Peach Payments credentials
    #[serde(default)]
    pub peach_entity_id: Option<String>,
    #[serde(default)]
    pub peach_access_token: Option<String>,

    /// Run payment providers in test mode (no live charges)
    #[serde(default = "default_true_bool")]
    pub payment_test_mode: bool,

    /// Fallback USD to MUR rate when the live rate is unavailable
    #[serde(default = "default_usd_mur_fallback_rate")]
    #[validate(custom = "validate_exchange_rate")]
    pub usd_mur_fallback_rate: f64,

    /// Delay (milliseconds) clients should wait on the success screen before redirecting
    #[serde(default = "default_checkout_success_delay_ms")]
    pub checkout_success_delay_ms: u64,

    /// Accounts older than this window never auto-start onboarding tours
    #[serde(default = "default_tour_freshness_window_hours")]
    #[validate(custom = "validate_freshness_window")]
    pub tour_freshness_window_hours: i64,

    /// Delay (milliseconds) clients should wait before showing a started tour
    #[serde(default = "default_tour_start_delay_ms")]
    pub tour_start_delay_ms: u64,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything else
    pub fn new(host: String, port: u16, environment: String, backend_base_url: String) -> Self {
        Self {
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            session_ttl_secs: default_session_ttl_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            backend_base_url,
            backend_api_key: None,
            backend_timeout_secs: default_backend_timeout_secs(),
            stripe_secret_key: None,
            paypal_client_id: None,
            paypal_client_secret: None,
            mcb_juice_merchant_id: None,
            mcb_juice_api_key: None,
            peach_entity_id: None,
            peach_access_token: None,
            payment_test_mode: true,
            usd_mur_fallback_rate: default_usd_mur_fallback_rate(),
            checkout_success_delay_ms: default_checkout_success_delay_ms(),
            tour_freshness_window_hours: default_tour_freshness_window_hours(),
            tour_start_delay_ms: default_tour_start_delay_ms(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checkout session TTL as a Duration
    pub fn session_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_ttl_secs)
    }

    /// Platform backend call timeout as a Duration
    pub fn backend_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.backend_timeout_secs)
    }

    /// Tour freshness window as a chrono Duration
    pub fn tour_freshness_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.tour_freshness_window_hours)
    }

    /// Fallback USD to MUR rate as a Decimal
    pub fn usd_mur_fallback(&self) -> rust_decimal::Decimal {
        rust_decimal::Decimal::from_f64_retain(self.usd_mur_fallback_rate)
            .map(|rate| rate.round_dp(4))
            .unwrap_or_else(|| rust_decimal::Decimal::new(455, 1))
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if self.is_production() && self.payment_test_mode {
            let mut err = ValidationError::new("payment_test_mode_in_production");
            err.message = Some(
                "Production must charge live providers. Set APP__PAYMENT_TEST_MODE=false and configure provider credentials.".into(),
            );
            errors.add("payment_test_mode", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_false_bool() -> bool {
    false
}

fn default_true_bool() -> bool {
    true
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_backend_base_url() -> String {
    DEFAULT_BACKEND_BASE_URL.to_string()
}

fn default_backend_timeout_secs() -> u64 {
    DEFAULT_BACKEND_TIMEOUT_SECS
}

fn default_usd_mur_fallback_rate() -> f64 {
    DEFAULT_USD_MUR_FALLBACK_RATE
}

fn default_checkout_success_delay_ms() -> u64 {
    DEFAULT_CHECKOUT_SUCCESS_DELAY_MS
}

fn default_tour_freshness_window_hours() -> i64 {
    DEFAULT_TOUR_FRESHNESS_WINDOW_HOURS
}

fn default_tour_start_delay_ms() -> u64 {
    DEFAULT_TOUR_START_DELAY_MS
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

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_exchange_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || rate <= 0.0 {
        let mut err = ValidationError::new("usd_mur_fallback_rate");
        err.message = Some("usd_mur_fallback_rate must be a finite value greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_freshness_window(hours: i64) -> Result<(), ValidationError> {
    if hours <= 0 {
        let mut err = ValidationError::new("tour_freshness_window_hours");
        err.message = Some("tour_freshness_window_hours must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("examhub_api={},tower_http=debug", level);
    let filter_directive = std_env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Docker config (config/docker.toml) if DOCKER env var is set
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
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

    let mut builder = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("backend_base_url", DEFAULT_BACKEND_BASE_URL)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    if env::var("DOCKER").is_ok() {
        info!("Docker environment detected");
        builder =
            builder.add_source(File::with_name(&format!("{}/docker", CONFIG_DIR)).required(false));
    }

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
