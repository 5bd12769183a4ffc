//! ClusterCtl - command line tool for cluster management daemons
//!
//! Usage:
//!   clusterctl certkey CERT KEY          - Install a daemon certificate locally
//!   clusterctl sync-certificates [NODE]  - Distribute certificates and restart daemons
//!   clusterctl restart [NODE]            - Restart daemons and wait for completion
//!   clusterctl deauth [TOKEN]            - Revoke authorized tokens

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clusterctl::certs::{CertificateBundle, InstallOptions};
use clusterctl::config::ClusterCtlConfig;
use clusterctl::network::{HttpChannel, NodeName};
use clusterctl::restart::{
    CertificateSync, RestartCoordinator, RunReport, SyncOutcome, TokioClock, VerifyPolicy, WaitMode,
};
use clusterctl::tokens::TokenStore;

/// Cluster Management Daemon Control Tool
#[derive(Parser)]
#[command(name = "clusterctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/clusterctl/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides config
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a certificate and key for the local daemon
    Certkey {
        /// PEM certificate file
        cert: PathBuf,
        /// PEM private key file
        key: PathBuf,
        /// Overwrite an existing certificate and key
        #[arg(long)]
        force: bool,
    },
    /// Send the local daemon certificate to nodes and restart their daemons
    SyncCertificates {
        /// Target nodes (defaults to all cluster nodes)
        nodes: Vec<NodeName>,
        /// Do not wait for the restarts to complete
        #[arg(long)]
        no_wait: bool,
    },
    /// Restart the daemon on nodes and wait until each restart is confirmed
    Restart {
        /// Target nodes (defaults to all cluster nodes)
        nodes: Vec<NodeName>,
        /// Do not wait for the restarts to complete
        #[arg(long)]
        no_wait: bool,
    },
    /// Revoke the given tokens, or all tokens when none are given
    Deauth {
        tokens: Vec<String>,
    },
    /// Check configuration file for errors
    CheckConfig,
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClusterCtlConfig::load_or_default(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: failed to load {:?}: {}", cli.config, e);
            std::process::exit(1);
        }
    };

    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    let result = match cli.command {
        Commands::Certkey { cert, key, force } => certkey(&config, &cert, &key, force),
        Commands::SyncCertificates { nodes, no_wait } => {
            sync_certificates(&config, &nodes, wait_mode(no_wait)).await
        }
        Commands::Restart { nodes, no_wait } => restart(&config, &nodes, wait_mode(no_wait)).await,
        Commands::Deauth { tokens } => deauth(&config, &tokens),
        Commands::CheckConfig => check_config(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn wait_mode(no_wait: bool) -> WaitMode {
    if no_wait {
        WaitMode::NoWait
    } else {
        WaitMode::Wait
    }
}

fn verify_policy(config: &ClusterCtlConfig) -> VerifyPolicy {
    VerifyPolicy::new(config.poll_interval(), config.wait_budget())
}

fn target_nodes(config: &ClusterCtlConfig, requested: &[NodeName]) -> anyhow::Result<Vec<NodeName>> {
    let nodes = config.target_nodes(requested);
    if nodes.is_empty() {
        bail!("No nodes given and no cluster nodes configured");
    }
    Ok(nodes)
}

// ============ Commands ============

fn certkey(config: &ClusterCtlConfig, cert: &Path, key: &Path, force: bool) -> anyhow::Result<()> {
    let bundle = CertificateBundle::read_from(cert, key)
        .with_context(|| format!("Unable to read {:?} or {:?}", cert, key))?;
    bundle.validate()?;
    bundle.install(&config.paths.cert, &config.paths.key, InstallOptions { force })?;

    println!(
        "Certificate and key updated, you may need to restart the daemon for new settings to take effect"
    );
    Ok(())
}

async fn sync_certificates(
    config: &ClusterCtlConfig,
    nodes: &[NodeName],
    mode: WaitMode,
) -> anyhow::Result<()> {
    let nodes = target_nodes(config, nodes)?;
    let bundle = CertificateBundle::read_from(&config.paths.cert, &config.paths.key)
        .context("Unable to read local daemon certificate")?;

    let channel = HttpChannel::from_config(config)?;
    let clock = TokioClock;
    let restarter = RestartCoordinator::new(&channel, &channel, &clock, verify_policy(config));
    let sync = CertificateSync::new(&channel, &restarter);

    let report = sync
        .sync_and_restart(&nodes, &bundle, mode)
        .await
        .context("Unable to sync daemon certificates")?;

    print_sync(&report.sync);
    if let Some(restart) = &report.restart {
        print_report(restart);
    }
    if let Some(error) = &report.restart_error {
        println!();
        println!("\x1b[31mUnable to restart daemon: {}\x1b[0m", error);
    }

    if report.is_failed() {
        bail!("Certificate synchronization did not succeed on all nodes");
    }
    Ok(())
}

async fn restart(config: &ClusterCtlConfig, nodes: &[NodeName], mode: WaitMode) -> anyhow::Result<()> {
    let nodes = target_nodes(config, nodes)?;

    let channel = HttpChannel::from_config(config)?;
    let clock = TokioClock;
    let restarter = RestartCoordinator::new(&channel, &channel, &clock, verify_policy(config));

    let report = restarter
        .restart(&nodes, mode)
        .await
        .context("Unable to restart daemon")?;

    print_report(&report);

    if report.is_failed() {
        bail!("Daemon restart did not succeed on all nodes");
    }
    Ok(())
}

fn deauth(config: &ClusterCtlConfig, tokens: &[String]) -> anyhow::Result<()> {
    let store = TokenStore::new(&config.paths.tokens);

    if tokens.is_empty() {
        store.revoke_all()?;
        println!("All tokens revoked");
        return Ok(());
    }

    let outcome = store.revoke(tokens)?;
    if !outcome.is_complete() {
        let missing: Vec<&str> = outcome.not_found.iter().map(String::as_str).collect();
        bail!("Following tokens were not found: '{}'", missing.join("', '"));
    }
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = ClusterCtlConfig::from_file(path)
        .with_context(|| format!("Invalid configuration {:?}", path))?;

    println!("Configuration OK: {:?}", path);
    println!("  Cluster nodes:  {}", config.cluster.nodes.join(", "));
    println!("  Daemon:         {}", config.daemon.endpoint);
    println!(
        "  Restart wait:   {}s, polling every {}s",
        config.restart.wait_budget_secs, config.restart.poll_interval_secs
    );
    Ok(())
}

// ============ Output ============

fn print_sync(sync: &SyncOutcome) {
    println!();
    println!("{:<30} {}", "NODE", "CERTIFICATES");
    println!("{}", "-".repeat(60));
    for node in &sync.accepted {
        println!("{:<30} \x1b[32mSynced\x1b[0m", node);
    }
    for (node, message) in &sync.rejected {
        println!("{:<30} \x1b[31m{}\x1b[0m", node, message);
    }
    if let Some(error) = &sync.operation_error {
        println!("\x1b[31m{}\x1b[0m", error);
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("{:<30} {}", "NODE", "RESTART");
    println!("{}", "-".repeat(60));
    for (node, outcome) in report.outcomes() {
        let text = outcome.to_string();
        let colored = if outcome.is_failure() {
            format!("\x1b[31m{}\x1b[0m", text)
        } else {
            format!("\x1b[32m{}\x1b[0m", text)
        };
        println!("{:<30} {}", node, colored);
    }
    for error in report.errors() {
        println!("\x1b[31m{}\x1b[0m", error);
    }
    println!();
}
