//! Minimal CLI entrypoint for IronQuant.
//!
//! One invocation runs one advisory cycle; scheduling (cron, CI) is left to
//! the operator.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ironquant::config::Config;
use ironquant::engine::AdvisorEngine;
use ironquant::report::{render_html, Notifier};
use ironquant::utils::init_logging;
use std::path::Path;

#[derive(Debug, Parser)]
#[command(name = "ironquant", author, version, about = "IronQuant advisory CLI", long_about = None)]
struct Args {
    /// Path to the configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Print the default configuration to stdout and exit
    #[arg(long)]
    print_default_config: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one advisory cycle and deliver the digest
    Run,
    /// Generate a default configuration file
    Init {
        /// Output path for the config file
        #[arg(short, long, default_value = "config.yaml")]
        output: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging("info");

    let args = Args::parse();

    if args.print_default_config {
        println!("{}", Config::default_yaml());
        return Ok(());
    }

    match args.command {
        Some(Command::Init { output, force }) => {
            let path = Path::new(&output);
            if path.exists() && !force {
                eprintln!("{output} already exists. Use --force to overwrite.");
                std::process::exit(1);
            }
            std::fs::write(path, Config::default_yaml())?;
            println!("✅ Wrote default config to {output}");
            Ok(())
        }
        Some(Command::Run) | None => run_cycle(&args.config).await,
    }
}

async fn run_cycle(config_path: &str) -> Result<()> {
    let config = if Path::new(config_path).exists() {
        Config::from_file(config_path).context("Failed to load configuration")?
    } else {
        log::warn!("Configuration file '{config_path}' not found – using defaults");
        Config::default()
    };

    log::info!(
        "🚀 Starting advisory cycle over {} instruments",
        config.funds.len()
    );
    let notifier = Notifier::new(config.notify.as_ref().map(|n| n.webhook_url.clone()));
    let engine = AdvisorEngine::new(config)?;
    let outcome = engine.run_cycle().await;

    for report in &outcome.reports {
        println!(
            "{} ({}): {} score={:.0} fuse={} amount={}",
            report.name,
            report.code,
            report.decision.action.label(),
            report.decision.final_score,
            report.risk.fuse_level.as_u8(),
            report.decision.amount
        );
    }

    let html = render_html(&outcome);
    notifier.deliver("IronQuant daily advisory", &html).await;
    log::info!("✅ Cycle complete ({} decisions)", outcome.reports.len());
    Ok(())
}
