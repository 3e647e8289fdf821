//! AppState construction and background-task spawning.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use nb_domain::config::{Config, ConfigSeverity};

use crate::nodes::pairing::PairingRegistry;
use crate::nodes::registry::ConnectionRegistry;
use crate::nodes::router::InvocationRouter;
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Nodes ────────────────────────────────────────────────────────
    let pairing = Arc::new(PairingRegistry::new(&config.pairing)?);
    let connections = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(InvocationRouter::new(
        pairing.clone(),
        connections.clone(),
        config.router.clone(),
    ));
    tracing::info!(
        paired = pairing.list_paired().len(),
        "node registries ready"
    );

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!(
                    "API bearer-token auth DISABLED; set {env_var} to protect pairing and invoke routes"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        started_at: Instant::now(),
        pairing,
        connections,
        router,
        api_token_hash,
    })
}

/// Spawn the periodic maintenance loops.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Expired pairing requests ────────────────────────────────────
    {
        let pairing = state.pairing.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let expired = pairing.prune_expired();
                if expired > 0 {
                    tracing::debug!(expired, "pruned pairing requests");
                }
            }
        });
    }

    // ── Router retention cache ──────────────────────────────────────
    {
        let router = state.router.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(15));
            loop {
                interval.tick().await;
                let pruned = router.prune_completed();
                if pruned > 0 {
                    tracing::debug!(pruned, "pruned retained invocation results");
                }
            }
        });
    }

    // ── Stale bridge sessions ───────────────────────────────────────
    {
        let connections = state.connections.clone();
        let stale_secs = state.config.bridge.stale_after_secs.min(86_400 * 365) as i64;
        let max_age = chrono::Duration::seconds(stale_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                connections.prune_stale(max_age);
            }
        });
    }
}
