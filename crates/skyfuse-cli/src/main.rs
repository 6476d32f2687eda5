//! `skyfuse` – perception fusion node
//!
//! 1. Initialises tracing (optionally exporting spans over OTLP).
//! 2. Loads `~/.skyfuse/config.toml` (defaults when absent); a config that
//!    cannot be read or validated aborts with exit code 1.
//! 3. Starts the UDP JSON ingest adapter and the [`FusionNode`] loop.
//! 4. Intercepts **Ctrl-C**: the node unsubscribes, releases the occupancy
//!    map and the process exits.
//!
//! `skyfuse init` writes the default configuration file and exits.

mod config;

use colored::Colorize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use skyfuse_middleware::{EventBus, MessageAdapter, UdpJsonAdapter};
use skyfuse_perception::fusion::LoggingSink;
use skyfuse_perception::transform::FrameService;
use skyfuse_runtime::telemetry::init_tracing;
use skyfuse_runtime::{FusionNode, NodeConfig};
use skyfuse_types::FusionError;

fn main() {
    let _guard = init_tracing("skyfuse");

    print_banner();

    if std::env::args().nth(1).as_deref() == Some("init") {
        run_init();
        return;
    }

    // ── Startup preconditions ─────────────────────────────────────────────
    let startup = config::load().and_then(|cfg| {
        let node_config = cfg.node_config()?;
        let bind = cfg.bind_socket_addr()?;
        let replay = cfg.replay_socket_addr()?;
        Ok((cfg, node_config, bind, replay))
    });
    let (cfg, node_config, bind, replay) = match startup {
        Ok(parts) => parts,
        Err(e) => fatal(&e),
    };
    println!(
        "  Config: {}  ingest {}  sensor {} in {}",
        config::config_path().display().to_string().bold(),
        bind.to_string().cyan(),
        cfg.body_frame,
        cfg.map_frame
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => fatal(&FusionError::Config(format!("cannot start runtime: {e}"))),
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = stop_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    if let Err(e) = runtime.block_on(serve(cfg, node_config, bind, replay, stop_rx)) {
        fatal(&e);
    }
    println!("{}", "  ✓ Exiting skyfuse.".green());
}

async fn serve(
    cfg: config::Config,
    node_config: NodeConfig,
    bind: SocketAddr,
    replay: Option<SocketAddr>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), FusionError> {
    let bus = EventBus::default();
    let frames: Arc<dyn FrameService> = Arc::new(cfg.frame_graph());
    let mut node = FusionNode::new(&bus, frames, node_config);

    let adapter =
        Arc::new(UdpJsonAdapter::bind(Arc::new(bus.clone()), bind, cfg.channels, replay).await?);
    info!(adapter = adapter.name(), addr = %bind, "ingest adapter started");
    let adapter_task = {
        let adapter = Arc::clone(&adapter);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { adapter.run(shutdown).await })
    };

    node.run(&LoggingSink, shutdown).await?;

    match adapter_task.await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "ingest adapter task failed");
            Ok(())
        }
    }
}

fn run_init() {
    let path = config::config_path();
    if path.exists() {
        println!("  Config already present at {}", path.display().to_string().bold());
        return;
    }
    match config::save(&config::Config::default()) {
        Ok(()) => println!(
            "  {} Config written to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        ),
        Err(e) => fatal(&e),
    }
}

fn fatal(e: &FusionError) -> ! {
    eprintln!("{}: {e}", "Startup error".red().bold());
    std::process::exit(1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"       __          ____             "#.bold().cyan());
    println!("{}", r#"  ___ / /____ __  / __/_ _____ ___  "#.bold().cyan());
    println!("{}", r#" (_-</  '_/ // / / _// // (_-</ -_) "#.bold().cyan());
    println!("{}", r#"/___/_/\_\\_, / /_/  \_,_/___/\__/  "#.bold().cyan());
    println!("{}", r#"         /___/                      "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "skyfuse".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Stereo + occupancy obstacle fusion");
    println!();
}
