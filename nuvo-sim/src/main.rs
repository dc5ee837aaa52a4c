//! NuvoLED wall simulator entry point.
//!
//! ```text
//! nuvo-sim                  Run in the foreground
//! nuvo-sim --config <path>  Load a custom config TOML
//! nuvo-sim --strict         Force strict validation
//! nuvo-sim --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nuvo_sim::config::SimConfig;
use nuvo_sim::service::SimService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "nuvo-sim", about = "Headless NuvoLED wall simulator")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "nuvo-sim.toml")]
    config: PathBuf,

    /// Reject frames that break protocol invariants.
    #[arg(long)]
    strict: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&SimConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = SimConfig::load(&cli.config);
    if cli.strict {
        config.decode.strict = true;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("nuvo-sim v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "grid {}x{} of {}x{} panels",
        config.wall.grid_cols, config.wall.grid_rows, config.wall.panel_width, config.wall.panel_height
    );
    info!(
        "strict: {}, order: {:?}, placement: {:?}, interleave: {:?}",
        config.decode.strict, config.decode.order, config.decode.placement, config.decode.interleave
    );

    let service = SimService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
