use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use homeflux_core::{
    backfill, jobs, HomefluxConfig, InfluxStore, MeterAgent, OpowerClient, Scheduler, Store,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "homeflux")]
#[command(version = VERSION)]
#[command(about = "Homeflux - home power and weather telemetry collection")]
#[command(long_about = r#"
Homeflux periodically collects power usage and weather telemetry from a
utility provider's web API and from local UPS hardware, and persists the
normalized readings into a time-series store under timescale-segmented
buckets.

With no subcommand it runs every collection job forever on its schedule.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run every collection job forever on its schedule (default)")]
    Run,

    #[command(about = "Run one cycle of each collection job and exit")]
    Once,

    #[command(about = "Backfill meter history from the online-since date and exit")]
    Backfill {
        #[arg(long, value_name = "YYYY-MM-DD")]
        since: Option<NaiveDate>,
    },

    #[command(about = "Show version information")]
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("homeflux {}", VERSION);
        return ExitCode::SUCCESS;
    }

    let config = match HomefluxConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging.level, cli.verbose);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str, verbose: bool) {
    let default_directive = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli, config: HomefluxConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let store: Arc<dyn Store> = Arc::new(InfluxStore::new(&config.store));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            if config.dry_run {
                info!("dry run: records will be collected but never persisted");
            }
            let scheduler = Scheduler::new(jobs::build_jobs(Arc::clone(&config), store));
            scheduler.run_forever().await;
            Ok(())
        }
        Command::Once => {
            let scheduler = Scheduler::new(jobs::build_jobs(Arc::clone(&config), store));
            scheduler.run_once().await;
            Ok(())
        }
        Command::Backfill { since } => {
            let online_since = since
                .or(config.online_since)
                .context("no online-since date: pass --since or set online_since in the config")?;

            let api = OpowerClient::new(&config.meter)?;
            let mut agent = MeterAgent::new(api);
            let today = Utc::now().date_naive();

            backfill::run(
                &mut agent,
                store.as_ref(),
                online_since,
                today,
                config.dry_run,
            )
            .await?;
            Ok(())
        }
        Command::Version => unreachable!("handled before config load"),
    }
}
