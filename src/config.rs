//! Configuration types for tracegate.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults. Every key has a default, so
//! a missing config file yields a fully usable configuration.
//!
//! The loaded [`Config`] is immutable for the life of the process: middleware
//! receive it behind an `Arc` and never re-read it per request.
//!
//! # Example
//! ```toml
//! [server]
//! port = 8080
//!
//! [rate_limiting.requests]
//! max_events    = 60
//! decay_seconds = 60
//!
//! [rate_limiting.errors]
//! max_events = 10
//!
//! [[identities]]
//! token_env = "TRACEGATE_USER_ALICE"
//! id        = 1
//! name      = "Alice"
//! email     = "alice@example.com"
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Build/deployment metadata stamped onto trace headers and exception reports.
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Demo identities bound to bearer tokens, resolved from the environment
    /// at startup. Keys never appear in the config file itself.
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

impl Config {
    /// Load and validate a config file. A missing file is not an error —
    /// defaults cover every key.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: Self = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).context("parsing config TOML")?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, scope) in [
            ("requests", &self.rate_limiting.requests),
            ("errors", &self.rate_limiting.errors),
        ] {
            if !scope.enabled {
                continue;
            }
            anyhow::ensure!(
                scope.max_events > 0,
                "rate_limiting.{name}.max_events must be non-zero when enabled"
            );
            anyhow::ensure!(
                scope.decay_seconds > 0,
                "rate_limiting.{name}.decay_seconds must be non-zero when enabled"
            );
            anyhow::ensure!(
                (100..=599).contains(&scope.return_code),
                "rate_limiting.{name}.return_code {} is not a valid HTTP status",
                scope.return_code
            );
        }

        if self.rate_limiting.events.enabled {
            anyhow::ensure!(
                self.rate_limiting.events.decay_seconds > 0,
                "rate_limiting.events.decay_seconds must be non-zero when enabled"
            );
        }

        let mut seen = std::collections::HashSet::new();
        for identity in &self.identities {
            anyhow::ensure!(
                seen.insert(identity.id),
                "[[identities]] entry with duplicate id {}",
                identity.id
            );
        }

        Ok(())
    }
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port the service listens on (default: 8080).
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Environment variable whose value is the Bearer token required for all
    /// `/ops/*` requests. Leave unset to disable ops authentication (only
    /// recommended when the port is strictly firewalled).
    #[serde(default)]
    pub ops_token_env: Option<String>,

    /// Log level override (also controlled by `RUST_LOG` env var).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Number of exception reports retained in memory (default: 1000).
    #[serde(default = "defaults::report_capacity")]
    pub report_capacity: usize,

    /// Number of trace sessions retained in memory (default: 10000). At the
    /// ceiling, cookie-less clients still get a session but it is not kept
    /// beyond their request.
    #[serde(default = "defaults::session_capacity")]
    pub session_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            ops_token_env: None,
            log_level: None,
            report_capacity: defaults::report_capacity(),
            session_capacity: defaults::session_capacity(),
        }
    }
}

/// Application build metadata.
///
/// Emitted in the `X-App-Version` response header and copied verbatim into
/// every persisted exception report so a report can be tied to a deploy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Application version (default: the crate version).
    #[serde(default = "defaults::version")]
    pub version: String,

    /// VCS commit the binary was built from, if stamped at build time.
    #[serde(default)]
    pub commit: Option<String>,

    /// Build timestamp, if stamped at build time.
    #[serde(default)]
    pub build_date: Option<String>,

    /// Deployment role, e.g. `web`, `worker` (default: `web`).
    #[serde(default = "defaults::role")]
    pub role: String,

    /// Locale used when neither the user preference nor `Accept-Language`
    /// yields one (default: `en`).
    #[serde(default = "defaults::locale")]
    pub default_locale: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: defaults::version(),
            commit: None,
            build_date: None,
            role: defaults::role(),
            default_locale: defaults::locale(),
        }
    }
}

/// Dual-axis rate limiting: independent windows for requests and for error
/// responses, plus the debounce window for limit-exceeded events.
///
/// Deserialized through [`RateLimitingOverrides`] so a partial scope table
/// (say `[rate_limiting.requests]` with only `enabled = false`) keeps that
/// scope's own defaults for every unset key — the two scopes default to
/// different limits and key prefixes, so plain field defaults cannot express
/// this.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(from = "RateLimitingOverrides")]
pub struct RateLimitingConfig {
    pub requests: ScopeConfig,
    pub errors: ScopeConfig,
    pub events: EventsConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            requests: defaults::requests_scope(),
            errors: defaults::errors_scope(),
            events: EventsConfig::default(),
        }
    }
}

/// One rate-limiting scope (requests or errors).
#[derive(Debug, Clone, Serialize)]
pub struct ScopeConfig {
    /// Toggle for this scope (default: true).
    pub enabled: bool,

    /// Attempts allowed inside one decay window.
    pub max_events: u64,

    /// Window length in seconds.
    pub decay_seconds: u64,

    /// Counter key prefix in the shared store.
    pub key: String,

    /// Status returned when the limit is breached (default: 404 — breached
    /// clients learn nothing about why they were cut off).
    pub return_code: u16,

    /// Body returned when the limit is breached (default: empty).
    pub return_message: String,
}

/// Raw TOML shape of one scope: every key optional.
#[derive(Debug, Clone, Default, Deserialize)]
struct ScopeOverrides {
    enabled: Option<bool>,
    max_events: Option<u64>,
    decay_seconds: Option<u64>,
    key: Option<String>,
    return_code: Option<u16>,
    return_message: Option<String>,
}

impl ScopeOverrides {
    fn apply(self, base: ScopeConfig) -> ScopeConfig {
        ScopeConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            max_events: self.max_events.unwrap_or(base.max_events),
            decay_seconds: self.decay_seconds.unwrap_or(base.decay_seconds),
            key: self.key.unwrap_or(base.key),
            return_code: self.return_code.unwrap_or(base.return_code),
            return_message: self.return_message.unwrap_or(base.return_message),
        }
    }
}

/// Raw TOML shape of `[rate_limiting]`, merged onto the per-scope defaults.
#[derive(Debug, Clone, Default, Deserialize)]
struct RateLimitingOverrides {
    #[serde(default)]
    requests: ScopeOverrides,
    #[serde(default)]
    errors: ScopeOverrides,
    #[serde(default)]
    events: EventsConfig,
}

impl From<RateLimitingOverrides> for RateLimitingConfig {
    fn from(raw: RateLimitingOverrides) -> Self {
        Self {
            requests: raw.requests.apply(defaults::requests_scope()),
            errors: raw.errors.apply(defaults::errors_scope()),
            events: raw.events,
        }
    }
}

/// Debounce window for limit-exceeded event emission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Toggle for event suppression (default: true). When disabled, a limit
    /// event fires on every over-limit request.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Suppression window length in seconds (default: 120).
    #[serde(default = "defaults::events_decay_seconds")]
    pub decay_seconds: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decay_seconds: defaults::events_decay_seconds(),
        }
    }
}

/// A demo identity bound to a bearer token.
///
/// The token value is read from the environment variable named by `token_env`
/// at startup, keeping secrets out of the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Name of the environment variable whose value is this user's Bearer token.
    pub token_env: String,
    pub id: u64,
    pub name: String,
    pub email: String,
    /// Preferred locale, used by the locale resolver when this user is
    /// authenticated.
    #[serde(default)]
    pub locale: Option<String>,
}

mod defaults {
    use super::ScopeConfig;

    pub fn port() -> u16 { 8080 }
    pub fn report_capacity() -> usize { 1000 }
    pub fn session_capacity() -> usize { 10_000 }
    pub fn enabled() -> bool { true }
    pub fn events_decay_seconds() -> u64 { 120 }
    pub fn role() -> String { "web".into() }
    pub fn locale() -> String { "en".into() }
    pub fn version() -> String { env!("CARGO_PKG_VERSION").into() }

    pub fn requests_scope() -> ScopeConfig {
        ScopeConfig {
            enabled: true,
            max_events: 60,
            decay_seconds: 60,
            key: "rate-limiting-requests".into(),
            return_code: 404,
            return_message: String::new(),
        }
    }

    pub fn errors_scope() -> ScopeConfig {
        ScopeConfig {
            enabled: true,
            max_events: 10,
            decay_seconds: 60,
            key: "rate-limiting-errors".into(),
            return_code: 404,
            return_message: String::new(),
        }
    }
}
