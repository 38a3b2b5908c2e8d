//! Tunnel Officer - keeps a fleet of ssh port forwards alive

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use officer_cli::console::{self, Console};
use officer_cli::render::{self, ProbeLine, StatusBoard};
use officer_cli::tunnel_store::TunnelStore;
use officer_core::{
    Registry, SshLauncher, StatusReporter, SupervisionController, SupervisorSettings,
};

/// Pause between auto-start and the first status board
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Tunnel Officer - supervise ssh port forwards
#[derive(Parser, Debug)]
#[command(name = "tunnel-officer")]
#[command(about = "Keep ssh port forwards up and show their status", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Tunnel configuration file
    #[arg(default_value = "config.json")]
    config: PathBuf,

    /// Directory for per-tunnel event logs
    #[arg(long, env = "TUNNEL_OFFICER_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TUNNEL_OFFICER_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Do not start the configured tunnels on launch
    #[arg(long)]
    no_autostart: bool,

    /// ssh client used to open tunnels
    #[arg(long, env = "TUNNEL_OFFICER_SSH", default_value = "ssh")]
    ssh_program: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start tunnels, check their local ports, then exit
    Test {
        /// Only test this tunnel
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }

    // The stdin reader thread cannot be cancelled, so leave without waiting for it.
    std::process::exit(0);
}

async fn run(cli: Cli) -> Result<()> {
    print!("{}", render::banner());
    println!();

    std::fs::create_dir_all(&cli.log_dir).context(format!(
        "Failed to create logs directory {:?}",
        cli.log_dir
    ))?;
    println!("📁 Logs directory: {}", cli.log_dir.display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Received Ctrl+C, shutting down gracefully...");
            info!("Shutdown requested");
            shutdown_tx.send(true).ok();
        }
    });
    println!("⚡ Signal handler registered");

    println!("📋 Loading configuration from: {}", cli.config.display());
    let store = TunnelStore::new(&cli.config);
    let specs = store.load().context("Failed to load configuration")?;

    let settings = SupervisorSettings {
        ssh_program: cli.ssh_program.clone(),
        log_dir: Some(cli.log_dir.clone()),
        ..SupervisorSettings::default()
    };
    let controller = Arc::new(SupervisionController::new(
        Arc::new(Registry::default()),
        Arc::new(SshLauncher::new()),
        settings,
    ));

    for spec in specs {
        let name = spec.name.clone();
        if let Err(e) = controller.add_tunnel(spec) {
            warn!(tunnel = %name, "Skipping tunnel: {}", e);
        }
    }

    let count = controller.registry().len();
    if count == 0 {
        println!("⚠️  No tunnels configured, exiting.");
        anyhow::bail!("No tunnels configured in {}", cli.config.display());
    }
    println!("✅ Loaded {} tunnels successfully\n", count);

    if let Some(Commands::Test { name }) = cli.command {
        return run_connectivity_test(&controller, name).await;
    }

    if cli.no_autostart {
        println!("⏸️  Auto-start disabled; use 'start' to bring tunnels up");
    } else {
        println!("🚀 Auto-starting all tunnels...");
        let report = controller.start_all().await;
        for e in &report.failed {
            println!("❌ {}", e);
        }
        tokio::time::sleep(SETTLE_DELAY).await;
    }

    let mut console = Console::new(
        controller.clone(),
        store,
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
        shutdown_rx,
    );
    let result = console.run().await;

    println!("\n🛑 Initiating shutdown sequence...");
    controller.shutdown().await;
    println!("👋 Tunnel Officer signing off. All tunnels terminated.");
    println!("{}", "═".repeat(76));

    result
}

/// Bring tunnels up, wait out the grace period and probe their local ports
async fn run_connectivity_test(
    controller: &SupervisionController,
    name: Option<String>,
) -> Result<()> {
    match &name {
        Some(name) => {
            controller.start_by_name(name).await?;
        }
        None => {
            let report = controller.start_all().await;
            for e in &report.failed {
                println!("❌ {}", e);
            }
        }
    }

    let timing = &controller.settings().timing;
    let wait = timing.forward_grace.max(timing.reverse_grace) + SETTLE_DELAY;
    println!("⏳ Waiting {}s for tunnels to come up...", wait.as_secs());
    tokio::time::sleep(wait).await;

    let results = console::probe_tunnels(controller.registry(), name.as_deref()).await?;
    println!("🧪 Connectivity test:");
    for (spec, probe) in &results {
        println!(
            "   {}",
            ProbeLine {
                name: &spec.name,
                port: spec.local_port,
                probe,
            }
        );
    }
    println!();
    print!(
        "{}",
        StatusBoard(&StatusReporter::snapshot(controller.registry()))
    );

    controller.shutdown().await;
    let reachable = results.iter().filter(|(_, p)| p.is_reachable()).count();
    println!("\n✅ Test finished: {}/{} reachable", reachable, results.len());
    Ok(())
}

/// Initialize logging
fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
