//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `ORDER_SIGNING_SECRET` - Key for order integrity signatures (min 32 chars, high entropy)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STORE_CURRENCY` - ISO 4217 currency for all charges (default: USD)
//! - `PAYMENT_GATEWAY_SECRET_KEY` - Gateway API key. Without it checkout fails
//!   with a configuration error instead of charging.
//! - `PAYMENT_GATEWAY_API_BASE` - Gateway REST base URL (default: <https://api.stripe.com/v1/>)
//! - `PAYMENT_GATEWAY_TIMEOUT_SECS` - Per-request gateway timeout (default: 15)
//! - `CHECKOUT_FRAUD_THRESHOLD` - Risk score above which orders are flagged (default: 65)
//! - `CHECKOUT_MISMATCH_TOLERANCE_CENTS` - Express-flow amount tolerance (default: 5)
//! - `CHECKOUT_AMOUNT_MISMATCH_POLICY` - `log` or `reject` (default: log)
//! - `ABUSE_CHECKOUT_LIMIT` / `ABUSE_CHECKOUT_WINDOW_SECS` (default: 10 per 60s)
//! - `ABUSE_INTENT_LIMIT` / `ABUSE_INTENT_WINDOW_SECS` (default: 30 per 60s)
//! - `ABUSE_TICKET_LIMIT` / `ABUSE_TICKET_WINDOW_SECS` (default: 5 per 3600s)
//! - `ABUSE_SWEEP_INTERVAL_SECS` - Abuse guard sweep period (default: 60)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` / `SENTRY_TRACES_SAMPLE_RATE` (default: 1.0 / 0.0)

use std::collections::HashMap;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use orchard_core::CurrencyCode;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use crate::services::abuse_guard::{ActionLimit, GuardedAction};

const MIN_SIGNING_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Environment variable holding the order signing key.
pub const SIGNING_SECRET_VAR: &str = "ORDER_SIGNING_SECRET";

const DEFAULT_GATEWAY_API_BASE: &str = "https://api.stripe.com/v1/";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Key for order integrity signatures
    pub order_signing_secret: SecretString,
    /// Currency every order is charged in
    pub currency: CurrencyCode,
    /// Payment gateway credentials; `None` disables charging
    pub payment: Option<PaymentGatewayConfig>,
    /// Checkout policy knobs
    pub checkout: CheckoutConfig,
    /// Per-identity action limits
    pub abuse: AbuseConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., production, staging)
    pub sentry_environment: Option<String>,
    /// Fraction of error events sent to Sentry
    pub sentry_sample_rate: f32,
    /// Fraction of transactions traced
    pub sentry_traces_sample_rate: f32,
}

/// Payment gateway configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct PaymentGatewayConfig {
    /// Server-side API key
    pub secret_key: SecretString,
    /// REST base URL, always ending in `/`
    pub api_base: Url,
    /// Bound on every gateway request
    pub timeout: Duration,
}

impl std::fmt::Debug for PaymentGatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGatewayConfig")
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// What to do when an express-flow charge does not match the quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmountMismatchPolicy {
    /// Record the mismatch and accept the order.
    #[default]
    Log,
    /// Refuse to create the order.
    Reject,
}

impl FromStr for AmountMismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "reject" => Ok(Self::Reject),
            other => Err(format!("expected 'log' or 'reject', got '{other}'")),
        }
    }
}

/// Checkout policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// Gateway risk scores strictly above this flag the order
    pub fraud_threshold: u32,
    /// Allowed difference between charged and quoted amounts, in minor units
    pub mismatch_tolerance_minor: i64,
    /// Handling of differences beyond the tolerance
    pub mismatch_policy: AmountMismatchPolicy,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            fraud_threshold: 65,
            mismatch_tolerance_minor: 5,
            mismatch_policy: AmountMismatchPolicy::Log,
        }
    }
}

/// Abuse guard limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbuseConfig {
    pub checkout_intent: ActionLimit,
    pub checkout_process: ActionLimit,
    pub ticket_create: ActionLimit,
    /// How often expired counters are swept
    pub sweep_interval: Duration,
}

impl AbuseConfig {
    /// Limit configured for an action.
    #[must_use]
    pub const fn limit_for(&self, action: GuardedAction) -> ActionLimit {
        match action {
            GuardedAction::CheckoutIntent => self.checkout_intent,
            GuardedAction::CheckoutProcess => self.checkout_process,
            GuardedAction::TicketCreate => self.ticket_create,
        }
    }
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            checkout_intent: ActionLimit::new(30, Duration::from_secs(60)),
            checkout_process: ActionLimit::new(10, Duration::from_secs(60)),
            ticket_create: ActionLimit::new(5, Duration::from_secs(3600)),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = parse_env("STOREFRONT_HOST", IpAddr::from([127, 0, 0, 1]))?;
        let port = parse_env("STOREFRONT_PORT", 3000_u16)?;
        let order_signing_secret = SecretString::from(get_required_env(SIGNING_SECRET_VAR)?);
        validate_signing_secret(&order_signing_secret, SIGNING_SECRET_VAR)?;
        let currency = parse_env("STORE_CURRENCY", CurrencyCode::USD)?;

        let payment = PaymentGatewayConfig::from_env()?;
        if payment.is_none() {
            tracing::warn!("PAYMENT_GATEWAY_SECRET_KEY not set; checkout will be unavailable");
        }

        Ok(Self {
            database_url,
            host,
            port,
            order_signing_secret,
            currency,
            payment,
            checkout: CheckoutConfig::from_env()?,
            abuse: AbuseConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_env("SENTRY_SAMPLE_RATE", 1.0_f32)?,
            sentry_traces_sample_rate: parse_env("SENTRY_TRACES_SAMPLE_RATE", 0.0_f32)?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl PaymentGatewayConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(secret_key) = get_optional_env("PAYMENT_GATEWAY_SECRET_KEY") else {
            return Ok(None);
        };
        validate_secret_strength(&secret_key, "PAYMENT_GATEWAY_SECRET_KEY")?;

        let api_base = parse_api_base(&get_env_or_default(
            "PAYMENT_GATEWAY_API_BASE",
            DEFAULT_GATEWAY_API_BASE,
        ))?;
        let timeout = Duration::from_secs(parse_env("PAYMENT_GATEWAY_TIMEOUT_SECS", 15_u64)?);

        Ok(Some(Self {
            secret_key: SecretString::from(secret_key),
            api_base,
            timeout,
        }))
    }
}

impl CheckoutConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            fraud_threshold: parse_env("CHECKOUT_FRAUD_THRESHOLD", defaults.fraud_threshold)?,
            mismatch_tolerance_minor: parse_env(
                "CHECKOUT_MISMATCH_TOLERANCE_CENTS",
                defaults.mismatch_tolerance_minor,
            )?,
            mismatch_policy: parse_env(
                "CHECKOUT_AMOUNT_MISMATCH_POLICY",
                defaults.mismatch_policy,
            )?,
        })
    }
}

impl AbuseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            checkout_intent: parse_limit("ABUSE_INTENT", defaults.checkout_intent)?,
            checkout_process: parse_limit("ABUSE_CHECKOUT", defaults.checkout_process)?,
            ticket_create: parse_limit("ABUSE_TICKET", defaults.ticket_create)?,
            sweep_interval: Duration::from_secs(parse_env(
                "ABUSE_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional, non-empty environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, falling back to `default`.
fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get_optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

/// Parse `<PREFIX>_LIMIT` and `<PREFIX>_WINDOW_SECS`.
fn parse_limit(prefix: &str, default: ActionLimit) -> Result<ActionLimit, ConfigError> {
    let limit_key = format!("{prefix}_LIMIT");
    let window_key = format!("{prefix}_WINDOW_SECS");
    let limit = parse_env(&limit_key, default.limit)?;
    let window = parse_env(&window_key, default.window.as_secs())?;
    if limit == 0 {
        return Err(ConfigError::InvalidEnvVar(
            limit_key,
            "must be at least 1".to_string(),
        ));
    }
    if window == 0 {
        return Err(ConfigError::InvalidEnvVar(
            window_key,
            "must be at least 1 second".to_string(),
        ));
    }
    Ok(ActionLimit::new(limit, Duration::from_secs(window)))
}

/// Parse the gateway base URL, normalizing the trailing slash so joins append.
fn parse_api_base(raw: &str) -> Result<Url, ConfigError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&with_slash).map_err(|e| {
        ConfigError::InvalidEnvVar("PAYMENT_GATEWAY_API_BASE".to_string(), e.to_string())
    })?;
    if url.scheme() != "https" && url.host_str() != Some("localhost") {
        return Err(ConfigError::InvalidEnvVar(
            "PAYMENT_GATEWAY_API_BASE".to_string(),
            "must use https".to_string(),
        ));
    }
    Ok(url)
}

/// Validate that a secret meets minimum length requirements.
fn validate_secret_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SIGNING_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SIGNING_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Check an order signing key: not a placeholder, enough entropy, and at
/// least 32 characters. Tools that verify stored orders apply the same rules.
///
/// # Errors
///
/// Returns `ConfigError::InsecureSecret` naming `var_name` if any rule fails.
pub fn validate_signing_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    validate_secret_strength(secret.expose_secret(), var_name)?;
    validate_secret_length(secret, var_name)
}
