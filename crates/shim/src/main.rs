//! Developer harness for the shim.
//!
//! Runs an emulated session in-process against `shim_core`, or loads a built
//! `shim_exports` library and drives it through the C interface.

mod cli;
mod config;
mod logging;
mod probe;
mod session;
mod signals;

use anyhow::anyhow;
use cli::CliArgs;
use config::AppConfig;
use session::SessionRunner;
use tracing::info;

/// Loads the configuration file and applies command line overrides.
async fn load_config(args: &CliArgs) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load_from_file(&args.config_path).await?;

    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if args.server {
        config.session.server = true;
    }
    if args.manual {
        config.session.manual_dispatch = true;
    }
    config.session.resolve.extend(args.resolve.iter().cloned());

    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

async fn run_session(args: &CliArgs, config: &AppConfig) -> anyhow::Result<()> {
    let runner = SessionRunner::new(config.shim.clone(), config.session.clone());
    runner.start()?;

    let resolutions = runner.resolve_all(&config.session.resolve);
    println!("{}", serde_json::to_string_pretty(&resolutions)?);

    match args.cycles {
        Some(cycles) => info!("⏱️ Pumping {} times", cycles),
        None => info!("🛑 Press Ctrl+C to stop"),
    }
    let (pumps, reason) = runner.run(args.cycles, signals::termination()).await;

    runner.stop();
    let report = runner.report(pumps, reason);
    println!("{}", serde_json::to_string_pretty(&report)?);
    info!("✅ Session finished after {} pumps", pumps);
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = match load_config(&args).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to start: {:?}", e);
            std::process::exit(1);
        }
    };
    logging::setup_logging(&config.logging)?;
    display_banner();

    if let Some(library) = &args.probe {
        let report = probe::probe(library, &config.session.resolve)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    run_session(&args, &config).await
}

/// Display startup banner using proper logging
fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║              🧩 SHIM HARNESS             ║");
    info!("║                 v{:<24}║", version);
    info!("║                                          ║");
    info!("║  Versioned interfaces, callback dispatch ║");
    info!("╚══════════════════════════════════════════╝");
}
