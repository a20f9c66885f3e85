use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use clap::{Args, Parser, Subcommand};
use headcount_core::clock::MILLIS_PER_MINUTE;
use headcount_core::{ReportAggregator, ReportRequest};
use headcount_store::{FaceStore, StoreOptions};
use headcountd::Config;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "headcount", about = "headcount gallery maintenance and reporting")]
struct Cli {
    /// Gallery database (defaults to the daemon's configured path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print stored attribute counters
    Counts,
    /// Print a per-camera report as JSON
    Report(ReportArgs),
    /// Evict records older than the retention horizon
    Sweep {
        /// Override the configured horizon
        #[arg(long)]
        horizon_secs: Option<u64>,
    },
    /// Remove every record of one person
    Forget { person_id: i64 },
    /// Remove every record and restart person numbering
    Reset {
        /// Also clear the person ledger
        #[arg(long)]
        persons: bool,
    },
    /// Manage the person ledger
    #[command(subcommand)]
    Persons(PersonsCommand),
}

#[derive(Args)]
struct ReportArgs {
    /// Camera id (repeatable; defaults to the configured cameras)
    #[arg(long = "camera")]
    cameras: Vec<String>,
    /// Window length ending now
    #[arg(long, conflicts_with_all = ["from", "to"])]
    minutes: Option<u64>,
    /// Window start, epoch millis
    #[arg(long, requires = "to")]
    from: Option<i64>,
    /// Window end, epoch millis
    #[arg(long, requires = "from")]
    to: Option<i64>,
    /// Only count persons seen inside the window
    #[arg(long)]
    no_fallback: bool,
}

#[derive(Subcommand)]
enum PersonsCommand {
    /// List registered persons
    List,
    /// Register a person
    Add {
        name: String,
        /// Number of images provided for this person
        #[arg(long, default_value_t = 0)]
        images: u64,
    },
    /// Remove a registered person
    Remove { person_id: i64 },
    /// Remove every registered person
    Clear,
}

impl ReportArgs {
    /// Inclusive `(from, to)` window in epoch millis.
    fn window(&self, now: i64, default_window: Duration) -> Result<(i64, i64)> {
        match (self.from, self.to, self.minutes) {
            (Some(from), Some(to), _) => {
                if from > to {
                    bail!("--from ({from}) is after --to ({to})");
                }
                Ok((from, to))
            }
            (_, _, Some(minutes)) => {
                let span = i64::try_from(minutes)
                    .ok()
                    .and_then(|m| m.checked_mul(MILLIS_PER_MINUTE))
                    .context("--minutes is too large")?;
                Ok((now.saturating_sub(span), now))
            }
            _ => {
                let span = i64::try_from(default_window.as_millis()).unwrap_or(i64::MAX);
                Ok((now.saturating_sub(span), now))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());

    let store = FaceStore::open(
        &db_path,
        StoreOptions {
            dimension: config.embedding_dim,
            ..StoreOptions::default()
        },
    )
    .await
    .with_context(|| format!("failed to open gallery at {}", db_path.display()))?;

    let result = run(cli.command, &store, &config).await;
    store.close().await?;
    result
}

async fn run(command: Commands, store: &FaceStore, config: &Config) -> Result<()> {
    match command {
        Commands::Counts => {
            let counts = store.stored_counts().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            println!("persons: {}", store.count_persons().await?);
        }
        Commands::Report(args) => {
            let (from, to) = args.window(
                store.now_millis(),
                Duration::from_secs(config.report_window_secs),
            )?;
            let camera_ids = if args.cameras.is_empty() {
                config.cameras.clone()
            } else {
                args.cameras
            };
            let request = ReportRequest {
                camera_ids,
                from,
                to,
                fallback_to_latest: !args.no_fallback,
            };
            let report = store.build_report(ReportAggregator::local(), request).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Sweep { horizon_secs } => {
            let mut policy = config.retention_policy();
            if let Some(secs) = horizon_secs {
                policy.horizon = Duration::from_secs(secs);
            }
            let removed = store.sweep(policy).await?;
            println!("Removed {removed} record(s) older than {}s", policy.horizon.as_secs());
        }
        Commands::Forget { person_id } => {
            let removed = store.forget_person(person_id).await?;
            println!("Removed {removed} record(s) for person {person_id}");
        }
        Commands::Reset { persons } => {
            let removed = store.clear().await?;
            println!("Removed {removed} record(s)");
            if persons {
                let cleared = store.clear_persons().await?;
                println!("Removed {cleared} person(s)");
            }
        }
        Commands::Persons(cmd) => match cmd {
            PersonsCommand::List => {
                let persons = store.persons().await?;
                if persons.is_empty() {
                    println!("No persons registered");
                }
                for p in persons {
                    println!(
                        "{:>6}  {:<24}  {:>4} image(s)  added {}",
                        p.person_id,
                        p.person_name,
                        p.num_images,
                        format_millis(p.add_time)
                    );
                }
            }
            PersonsCommand::Add { name, images } => {
                let p = store.add_person(name, images).await?;
                println!("Added person {} ({})", p.person_id, p.person_name);
            }
            PersonsCommand::Remove { person_id } => {
                if store.remove_person(person_id).await? {
                    println!("Removed person {person_id}");
                } else {
                    bail!("no person with id {person_id}");
                }
            }
            PersonsCommand::Clear => {
                let cleared = store.clear_persons().await?;
                println!("Removed {cleared} person(s)");
            }
        },
    }
    Ok(())
}

fn format_millis(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}
