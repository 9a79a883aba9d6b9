//! Shared application state injected into every handler and middleware via
//! [`axum::extract::State`].

use std::{collections::HashMap, net::ToSocketAddrs, sync::Arc, time::Instant};

use crate::{
    config::Config,
    events::EventBus,
    http::auth::AuthUser,
    reports::ReportLog,
    session::SessionStore,
    store::CounterStore,
};

pub struct AppState {
    /// Immutable for the life of the process; read-only after startup.
    pub config: Arc<Config>,
    /// Rate-limit counters and event-suppression flags.
    pub limiter: CounterStore,
    /// Cookie-keyed sessions holding the stable trace id.
    pub sessions: SessionStore,
    /// Append-only exception report store.
    pub reports: ReportLog,
    pub events: EventBus,
    /// Service start time — uptime for the public status endpoint.
    pub started_at: Instant,

    /// Host identity stamped into exception reports, resolved once at startup.
    pub host_name: String,
    pub host_ip: String,

    /// Bearer token required for `/ops/*` access.
    ///
    /// `None` means ops auth is disabled (port should then be firewalled).
    /// Resolved at startup from `server.ops_token_env`.
    pub ops_token: Option<String>,
    /// Maps resolved bearer token values → identities.
    ///
    /// Built at startup by reading each `[[identities]]` entry's `token_env`.
    /// An empty map means every request is anonymous.
    pub identity_map: HashMap<String, AuthUser>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let ops_token = config
            .server
            .ops_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());

        let identity_map: HashMap<String, AuthUser> = config
            .identities
            .iter()
            .filter_map(|identity| {
                let token = std::env::var(&identity.token_env)
                    .ok()
                    .filter(|t| !t.is_empty())?;
                Some((
                    token,
                    AuthUser {
                        id: identity.id,
                        name: identity.name.clone(),
                        email: identity.email.clone(),
                        locale: identity.locale.clone(),
                    },
                ))
            })
            .collect();
        if !identity_map.is_empty() {
            tracing::info!(count = identity_map.len(), "loaded identity token mappings");
        }

        let host_name = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_owned());
        let host_ip = resolve_host_ip(&host_name);

        Self {
            limiter: CounterStore::new(),
            sessions: SessionStore::new(config.server.session_capacity),
            reports: ReportLog::new(config.server.report_capacity),
            events: EventBus::new(),
            started_at: Instant::now(),
            host_name,
            host_ip,
            ops_token,
            identity_map,
            config,
        }
    }
}

/// Resolve the host's own address, falling back to loopback. Runs once at
/// startup; failures are not worth dying over.
fn resolve_host_ip(host_name: &str) -> String {
    (host_name, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_owned())
}
