use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use weather_advisory::store::{migrate, parse_date};
use weather_advisory::{AdvisoryConfig, Services, logging, scheduler, web};

#[derive(Parser)]
#[command(name = "weather-advisory", version, about = "Daily regional weather advisories")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "WEATHER_ADVISORY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server and the daily jobs
    Serve,
    /// Generate advisories for all, selected or smoke-test regions
    Generate {
        #[arg(short, long = "region", value_name = "CODE")]
        regions: Vec<String>,
        #[arg(long, conflicts_with = "regions")]
        smoke: bool,
    },
    /// Push today's advisories to subscribed users
    Notify,
    /// Print the stored document for a region
    Lookup {
        code: String,
        /// Day as YYYYMMDD, defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// Rewrite legacy documents into the current layout
    Migrate,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(command: Command, services: Arc<Services>) -> Result<()> {
    match command {
        Command::Serve => {
            let jobs = scheduler::spawn_daily_jobs(services.clone())?;
            let served = web::run(services).await;
            for job in jobs {
                job.abort();
            }
            served
        }
        Command::Generate { regions, smoke } => {
            let selected = if !regions.is_empty() {
                services.catalog.select(&regions)?
            } else if smoke {
                services.catalog.smoke_test()
            } else {
                services.catalog.all().to_vec()
            };
            // Region failures are part of the summary; only run-level errors fail the command.
            let summary = services.orchestrator.run(&selected).await?;
            if summary.failure_count > 0 {
                warn!(
                    failed = summary.failure_count,
                    total = summary.total_regions,
                    "Some regions failed"
                );
            }
            print_json(&summary)
        }
        Command::Notify => {
            let report = services.dispatcher.dispatch_all().await?;
            print_json(&report)
        }
        Command::Lookup { code, date } => {
            let date = date.as_deref().map(parse_date).transpose()?;
            match services.store.load(&code, date).await? {
                Some(document) => print_json(&document),
                None => anyhow::bail!("no forecast stored for {code}"),
            }
        }
        Command::Migrate => {
            let report = migrate(services.store.documents().as_ref()).await?;
            print_json(&report)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AdvisoryConfig::load_from_path(cli.config).context("Failed to load configuration")?;
    logging::init(&config.logging, cli.verbose)?;
    info!(version = weather_advisory::VERSION, "Starting weather-advisory");

    let services = Arc::new(Services::from_config(config)?);
    execute(cli.command, services).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error!("{err:#}");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
