//! Service configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use credits_core::{default_credit_packs, CreditPack};
use credits_ledger::config::DEFAULT_MAX_ROLLOVER_CREDITS;
use credits_ledger::LedgerConfig;
use credits_store::DEFAULT_LOCK_TIMEOUT;

/// Stripe API base URL used when none is configured.
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a Stripe webhook signature timestamp.
pub const DEFAULT_WEBHOOK_TOLERANCE_SECONDS: u64 = 300;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/credits").
    pub data_dir: String,

    /// Service API key for the host application.
    pub service_api_key: Option<String>,

    /// Admin API key for manual grants and refunds.
    pub admin_api_key: Option<String>,

    /// Stripe API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API base URL.
    pub stripe_api_base: String,

    /// Maximum accepted age of a webhook signature, in seconds.
    pub webhook_tolerance_seconds: u64,

    /// Frontend URL for checkout redirects.
    pub frontend_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Credit packs offered for purchase.
    pub credit_packs: Vec<CreditPack>,

    /// Ledger behaviour (rollover, lock timeout).
    pub ledger: LedgerConfig,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // Try to load Stripe secrets from file first, then fall back to env vars
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();

        let lock_timeout = std::env::var("LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or(DEFAULT_LOCK_TIMEOUT, Duration::from_millis);

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_api_base: std::env::var("STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base),
            webhook_tolerance_seconds: env_or(
                "WEBHOOK_TOLERANCE_SECONDS",
                DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
            ),
            frontend_url: std::env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            credit_packs: defaults.credit_packs,
            ledger: LedgerConfig {
                rollover_enabled: env_or("ROLLOVER_ENABLED", false),
                max_rollover_credits: env_or("MAX_ROLLOVER_CREDITS", DEFAULT_MAX_ROLLOVER_CREDITS),
                lock_timeout,
            },
        }
    }

    /// Look up a configured credit pack.
    #[must_use]
    pub fn credit_pack(&self, pack_id: &str) -> Option<&CreditPack> {
        self.credit_packs.iter().find(|pack| pack.id == pack_id)
    }

    /// Webhook signature tolerance as a duration.
    #[must_use]
    pub const fn webhook_tolerance(&self) -> Duration {
        Duration::from_secs(self.webhook_tolerance_seconds)
    }
}

/// Parse an environment variable, falling back to `default` when it is
/// missing or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/stripe.json",
        "credits/.secrets/stripe.json",
        "../.secrets/stripe.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    // Fall back to environment variables
    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/credits".into(),
            service_api_key: None,
            admin_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: DEFAULT_STRIPE_API_BASE.into(),
            webhook_tolerance_seconds: DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024, // 1MB
            request_timeout_seconds: 30,
            credit_packs: default_credit_packs(),
            ledger: LedgerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripe.json");
        std::fs::write(&path, r#"{"api_key":"sk_test_1","webhook_secret":"whsec_1"}"#).unwrap();

        let secrets: StripeSecrets = load_secrets_file(path.to_str().unwrap()).unwrap();
        assert_eq!(secrets.api_key, "sk_test_1");
        assert_eq!(secrets.webhook_secret.as_deref(), Some("whsec_1"));
    }

    #[test]
    fn missing_secrets_file_is_not_found() {
        let err = load_secrets_file::<StripeSecrets>("/nonexistent/stripe.json").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn credit_pack_lookup() {
        let config = ServiceConfig::default();
        assert!(config.credit_pack("starter").is_some());
        assert!(config.credit_pack("unknown").is_none());
    }
}
