use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rg_domain::config::{Config, ConfigSeverity};
use rg_gateway::api;
use rg_gateway::cli::{Cli, Command, ConfigCommand};
use rg_gateway::rules;
use rg_gateway::services::Services;
use rg_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(&cli.config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            let issues = config.validate();
            let mut failed = false;
            for issue in &issues {
                match issue.severity {
                    ConfigSeverity::Warning => println!("warning: {issue}"),
                    ConfigSeverity::Error => {
                        println!("error: {issue}");
                        failed = true;
                    }
                }
            }
            if failed {
                std::process::exit(1);
            }
            println!("configuration OK ({} rules)", config.rules.len());
            Ok(())
        }
        Some(Command::Version) => {
            println!("riskgate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rg_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the evaluation service with the given rules file.
async fn run_server(config_path: &Path) -> anyhow::Result<()> {
    tracing::info!("riskgate starting");

    // ── Config ───────────────────────────────────────────────────────
    let config = Config::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── External services ────────────────────────────────────────────
    let services = Services::connect(&config.services)
        .await
        .context("connecting external services")?;

    // ── Rule registry ────────────────────────────────────────────────
    let compiled = rules::compile(&config.rules, &services)
        .await
        .context("compiling rules")?;
    tracing::info!(rules = compiled.registry.rule_count(), "rule registry ready");

    // ── HMAC secrets ─────────────────────────────────────────────────
    let auth_keys = load_auth_keys().context("loading API secrets")?;
    tracing::info!(clients = auth_keys.len(), "hmac auth keys loaded");

    let allowed_skew = parse_skew();
    if allowed_skew.is_zero() {
        tracing::warn!("timestamp skew check DISABLED (ALLOWED_SKEW_MINUTES <= 0)");
    }

    // ── App state + router ───────────────────────────────────────────
    let state = AppState {
        registry: Arc::new(compiled.registry),
        bus: services.bus.clone(),
        denylist: compiled.denylist,
        auth_keys: Arc::new(auth_keys),
        allowed_skew,
    };

    let app = api::router(state.clone())
        .layer(build_cors_layer())
        // Slow-client safeguard; rule slowness is bounded separately by the
        // pipeline's per-handler deadline.
        .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "riskgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    tracing::info!("graceful shutdown complete");
    Ok(())
}

/// Load the client HMAC secrets from the environment.
///
/// Both client pairs are required; refusing to boot with a partial keyring
/// beats silently locking one client out.
fn load_auth_keys() -> anyhow::Result<HashMap<String, Vec<u8>>> {
    let mut keys = HashMap::new();
    for id in ["CLIENT_1", "CLIENT_2"] {
        let key = std::env::var(format!("API_KEY_{id}")).unwrap_or_default();
        let secret = std::env::var(format!("API_SECRET_{id}")).unwrap_or_default();
        if key.is_empty() || secret.is_empty() {
            anyhow::bail!("could not load expected api keys (API_KEY_{id} / API_SECRET_{id})");
        }
        keys.insert(key, secret.into_bytes());
    }
    Ok(keys)
}

/// Accepted clock skew for signed timestamps, from `ALLOWED_SKEW_MINUTES`.
/// Defaults to 5 minutes; zero or negative disables the check.
fn parse_skew() -> Duration {
    match std::env::var("ALLOWED_SKEW_MINUTES")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
    {
        Some(minutes) if minutes <= 0 => Duration::ZERO,
        Some(minutes) => Duration::from_secs(minutes as u64 * 60),
        None => Duration::from_secs(5 * 60),
    }
}

/// CORS for the administrative surface: any origin, credentials allowed,
/// preflight cached for five minutes.
fn build_cors_layer() -> tower_http::cors::CorsLayer {
    use axum::http::{header, HeaderName, Method};
    use tower_http::cors::AllowOrigin;

    tower_http::cors::CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-key-id"),
            HeaderName::from_static("x-timestamp"),
            HeaderName::from_static("x-signature"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(300))
}

/// Resolve on SIGINT or SIGTERM so in-flight requests can drain.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining");
}
