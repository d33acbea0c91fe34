//! Pingora-based reverse proxy with per-client target affinity.
//!
//! A client picks a backend by prefixing a request path with a registered
//! numeric selector (`/8080/...`); later requests without a selector go to
//! the backend that client picked last. Every routing outcome is appended
//! to a JSON-lines audit log served back on a reserved path.

mod audit;
mod backend;
mod cli;
mod config;
mod logging;
mod proxy;
mod store;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pingora_core::server::Server;
use pingora_core::services::background::background_service;

use crate::audit::{audit_channel, AuditLog};
use crate::cli::{Cli, Command};
use crate::config::ProxyConfig;
use crate::proxy::{GatewayProxy, Router};
use crate::store::AffinityTable;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => ProxyConfig::load(Path::new(path))
            .with_context(|| format!("failed to load config from {}", path))?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(
        cli.log_level.unwrap_or(config.logging.level),
        cli.log_format.unwrap_or(config.logging.format),
    )
    .context("failed to initialize logging")?;

    match cli.command.unwrap_or(Command::Serve { listen: None }) {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
                config.validate().context("invalid listen override")?;
            }
            serve(config)
        }
        Command::DemoBackends { ports } => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime
                .block_on(backend::run_demo_backends(&ports))
                .context("demo backend failed")
        }
        Command::CheckConfig => check_config(&config),
    }
}

/// Builds the proxy service and runs it until the process is stopped.
fn serve(config: ProxyConfig) -> Result<()> {
    let listen = config.listen_addr()?;
    let registry = Arc::new(config.target_registry()?);
    let router = Arc::new(Router::new(
        Arc::clone(&registry),
        Arc::new(AffinityTable::new()),
        config.audit.endpoint.clone(),
    ));

    let audit_log = Arc::new(AuditLog::new(&config.audit.path));
    let (audit_sink, audit_writer) = audit_channel(Arc::clone(&audit_log));

    let mut server = Server::new(None).context("failed to create server")?;
    server.bootstrap();

    let gateway = GatewayProxy::new(router, audit_log, audit_sink);
    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, gateway);
    proxy_service.add_tcp(&listen.to_string());

    server.add_service(proxy_service);
    server.add_service(background_service("audit writer", audit_writer));

    tracing::info!(
        listen = %listen,
        audit_log = %config.audit.path,
        audit_endpoint = %config.audit.endpoint,
        targets = registry.len(),
        "proxy server running"
    );
    for (key, target) in registry.entries() {
        tracing::info!(backend = %target, "access url: http://localhost:{}/{}", listen.port(), key);
    }

    server.run_forever()
}

fn check_config(config: &ProxyConfig) -> Result<()> {
    config.validate()?;
    let registry = config.target_registry()?;

    println!("listen: {}", config.listen);
    println!(
        "selector: {} digits, {} targets",
        registry.format().digits(),
        registry.len()
    );
    println!("audit: {} (served at {})", config.audit.path, config.audit.endpoint);
    for (key, target) in registry.entries() {
        println!("  /{} -> {}", key, target);
    }
    Ok(())
}
