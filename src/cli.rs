// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TlsModeArg {
    /// Generate (or reuse) a self-signed ECDSA P-256 certificate.
    #[default]
    SelfSigned,
    /// Serve plain HTTP; only safe on a loopback or otherwise trusted network.
    Off,
}

#[derive(Parser, Debug)]
#[command(
    name = "ccgate",
    about = "Multi-protocol LLM gateway: dialect translation, policy pipeline, server-side tool loop",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway's HTTP server.
    ///
    /// Binds `server.bind_addr` from the loaded config (override with
    /// `--bind`), and serves TLS by default with a self-signed certificate
    /// unless `--tls off` or an explicit `server.tls` cert/key pair is
    /// configured.
    Serve {
        /// Override `server.bind_addr`.
        #[arg(long)]
        bind: Option<String>,
        /// TLS mode for this run.
        #[arg(long, value_enum, default_value = "self-signed")]
        tls: TlsModeArg,
        /// Directory for the self-signed dev certificate (ignored when
        /// `server.tls` is set in config, or `--tls off`).
        #[arg(long)]
        cert_dir: Option<PathBuf>,
    },

    /// Print the effective configuration and exit.
    ShowConfig,

    /// Generate shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// List the built-in model catalog used by capability fallback.
    ListModels {
        /// Filter by provider name (e.g. "openai", "anthropic").
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Output as JSON instead of a formatted table.
        #[arg(long)]
        json: bool,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "ccgate", &mut std::io::stdout());
}
