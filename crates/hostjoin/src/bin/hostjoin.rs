//! hostjoin CLI - joins this node to an engine-managed cluster.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

use hostjoin::config::{JoinConfig, DEFAULT_CONFIG_PATH};
use hostjoin::context::{CancelToken, JoinContext, Outcome, Secret};
use hostjoin::dialog::{Answers, Dialog, TerminalDialog};
use hostjoin::engine::HttpEngineConnector;
use hostjoin::orchestrator::JoinOrchestrator;
use hostjoin::pki::HttpPkiSource;
use hostjoin::registrar::ManualSetupDispatcher;
use hostjoin::vds::LocalVds;

/// Join this node to an engine-managed virtualization cluster.
#[derive(Parser)]
#[command(name = "hostjoin")]
#[command(about = "Register this node with the cluster management engine")]
struct Cli {
    /// Engine endpoint FQDN (or set `HOSTJOIN_ENGINE_FQDN`).
    #[arg(long, env = "HOSTJOIN_ENGINE_FQDN")]
    engine_fqdn: String,

    /// Address the engine reaches this node at; defaults to the system
    /// hostname.
    #[arg(long)]
    node_address: Option<String>,

    /// Target cluster name (skips the cluster prompt).
    #[arg(long)]
    cluster: Option<String>,

    /// Host display name inside the engine.
    #[arg(long)]
    host_name: Option<String>,

    /// Administrator password (or set `HOSTJOIN_ADMIN_PASSWORD`);
    /// prompted for interactively when absent.
    #[arg(long, env = "HOSTJOIN_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Answers file with pre-seeded settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept the engine certificate without validation.
    #[arg(long, default_value = "false")]
    insecure: bool,

    /// Fail instead of prompting; requires pre-seeded answers.
    #[arg(long, default_value = "false")]
    non_interactive: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

/// Fallback menu shown when the engine rejects the host-add request.
struct TerminalDispatcher {
    dialog: TerminalDialog,
}

impl ManualSetupDispatcher for TerminalDispatcher {
    fn dispatch(&self, engine_fqdn: &str, detail: &str) -> Result<bool, hostjoin::dialog::DialogError> {
        self.dialog.note(&format!(
            "The engine on {engine_fqdn} could not add this host:\n  {detail}\n\
             Please check that the engine is reachable and healthy, resolve the reported \
             problem, then continue."
        ));
        self.dialog
            .confirm("manual_setup_resolved", "Has the problem been resolved?", false)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("hostjoin=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hostjoin=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let node_address = match cli.node_address {
        Some(address) => address,
        None => hostname()?,
    };

    let mut ctx = JoinContext::new(&cli.engine_fqdn, node_address);
    if let Some(path) = &cli.config {
        let config = JoinConfig::load(path)
            .with_context(|| format!("cannot load answers file {}", path.display()))?;
        config.apply(&mut ctx);
    }
    if let Some(cluster) = cli.cluster {
        ctx.cluster_name = Some(cluster);
    }
    if let Some(host_name) = cli.host_name {
        ctx.host_name = Some(host_name);
    }
    if let Some(password) = cli.admin_password {
        ctx.set_admin_password(Secret::new(password), false);
    }
    if cli.insecure {
        ctx.insecure_tls = Some(true);
    }

    let base_url = Url::parse(&format!("https://{}/engine/api", cli.engine_fqdn))
        .context("invalid engine FQDN")?;
    let connector = HttpEngineConnector::new(base_url);
    let pki = HttpPkiSource::new(&cli.engine_fqdn);
    let vds = LocalVds::new().context("cannot reach the hypervisor control service")?;

    let cancel = CancelToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, finishing the current step");
            signal_token.cancel();
        }
    });

    let terminal = TerminalDialog::new();
    let answers = Answers::new();
    let dialog: &dyn Dialog = if cli.non_interactive { &answers } else { &terminal };
    let dispatcher = TerminalDispatcher {
        dialog: TerminalDialog::new(),
    };

    let orchestrator = JoinOrchestrator::new(&pki, &connector, &vds, dialog, &dispatcher, cancel)
        .with_config_path(DEFAULT_CONFIG_PATH);

    match orchestrator.join(ctx).await {
        Outcome::Success(host) => {
            println!("Host {} is now operational in the cluster.", host.name);
            Ok(())
        }
        Outcome::Degraded {
            reason,
            manual_steps,
        } => {
            println!("Join completed with follow-up required: {reason}");
            println!("To finish deploying, please:");
            for step in manual_steps {
                println!("  - {step}");
            }
            Ok(())
        }
        Outcome::Failed { reason } => anyhow::bail!("join failed: {reason}"),
    }
}

/// The system hostname, used as the default node address.
fn hostname() -> Result<String> {
    let output = std::process::Command::new("hostname")
        .arg("-f")
        .output()
        .context("cannot determine the system hostname")?;
    if !output.status.success() {
        anyhow::bail!("hostname -f failed");
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
