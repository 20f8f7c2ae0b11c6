// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use ccgate_gateway::AppState;
use ccgate_mcp::McpServerSpec;
use ccgate_model::catalog;
use cli::{Cli, Commands, TlsModeArg};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Some(Commands::Serve { bind, tls, cert_dir }) => {
            let config = ccgate_config::load(cli.config.as_deref())?;
            run_serve(config, bind.clone(), *tls, cert_dir.clone()).await
        }
        Some(Commands::ShowConfig) => {
            let config = ccgate_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            cli::print_completions(*shell);
            Ok(())
        }
        Some(Commands::ListModels { provider, json }) => list_models_cmd(provider.as_deref(), *json),
        None => {
            let config = ccgate_config::load(cli.config.as_deref())?;
            run_serve(config, None, TlsModeArg::SelfSigned, None).await
        }
    }
}

async fn run_serve(
    config: ccgate_config::Config,
    bind_override: Option<String>,
    tls_mode: TlsModeArg,
    cert_dir_override: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bind_addr = bind_override.unwrap_or_else(|| config.server.bind_addr.clone());
    let tls_config = config.server.tls.clone();
    let servers_json = config.mcp.servers_json.clone();

    let state = AppState::new(config);
    bootstrap_mcp_servers(&state, servers_json.as_deref()).await;

    let router = ccgate_gateway::build_router(state);

    match (tls_mode, tls_config) {
        (TlsModeArg::Off, _) => {
            info!(%bind_addr, "starting ccgate (plain HTTP)");
            ccgate_gateway::serve(&bind_addr, None, router).await
        }
        (TlsModeArg::SelfSigned, Some(explicit)) => {
            info!(%bind_addr, cert = %explicit.cert_path, "starting ccgate (configured TLS cert)");
            let cert_path = PathBuf::from(explicit.cert_path);
            let key_path = PathBuf::from(explicit.key_path);
            ccgate_gateway::serve(&bind_addr, Some((&cert_path, &key_path)), router).await
        }
        (TlsModeArg::SelfSigned, None) => {
            let cert_dir = cert_dir_override.unwrap_or_else(ccgate_gateway::default_cert_dir);
            let runtime = ccgate_gateway::load_or_generate(&cert_dir)
                .context("generating self-signed TLS certificate")?;
            info!(
                %bind_addr,
                fingerprint = %runtime.fingerprint_sha256,
                "starting ccgate (self-signed TLS) — pin this fingerprint on native clients",
            );
            ccgate_gateway::serve(&bind_addr, Some((&runtime.cert_path, &runtime.key_path)), router).await
        }
    }
}

/// Parses `mcp.servers_json` (a JSON array of [`McpServerSpec`]) and
/// registers each entry, matching the config field's documented "bootstrap
/// step" contract. Malformed entries are logged and skipped rather than
/// failing startup.
async fn bootstrap_mcp_servers(state: &AppState, servers_json: Option<&str>) {
    let Some(raw) = servers_json else { return };
    let specs: Vec<McpServerSpec> = match serde_json::from_str(raw) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "ignoring malformed MCP_SERVERS_JSON / mcp.servers_json");
            return;
        }
    };
    for spec in specs {
        let id = spec.id.clone();
        if let Err(e) = state.mcp.register(spec).await {
            warn!(server = %id, error = %e, "failed to register MCP server from config");
        }
    }
}

fn list_models_cmd(provider_filter: Option<&str>, as_json: bool) -> anyhow::Result<()> {
    let mut entries: Vec<_> = catalog::all().to_vec();
    if let Some(p) = provider_filter {
        entries.retain(|e| e.provider == p);
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    let id_w = entries.iter().map(|e| e.id.len()).max().unwrap_or(10).max(10);
    let prov_w = entries.iter().map(|e| e.provider.len()).max().unwrap_or(8).max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  VISION",
        "ID", "PROVIDER", "CTX WINDOW", "MAX OUT TOKENS", id_w = id_w, prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 46));
    for e in &entries {
        println!(
            "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  {}",
            e.id, e.provider, e.context_window, e.max_output_tokens, e.supports_vision(),
            id_w = id_w, prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
