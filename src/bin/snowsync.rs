use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};

use snowsync::{Config, IncidentSync, ResponseSlaConfig, SyncOptions, SyncReport};

#[derive(Parser)]
#[command(name = "snowsync", about = "ServiceNow incident sync")]
struct Cli {
    /// Config file (default: ~/.snowsync/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database path (overrides storage.path)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync job on its cron schedule until interrupted
    Run {
        /// Cron expression (overrides schedule.cron)
        #[arg(long)]
        cron: Option<String>,
        /// Also run one cycle immediately
        #[arg(long)]
        now: bool,
    },
    /// Run a single sync cycle
    Sync {
        /// Fetch incidents updated since this time (YYYY-MM-DD or "YYYY-MM-DD HH:MM:SS")
        #[arg(long)]
        since: Option<String>,
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List synced incidents, most recently updated first
    Incidents {
        #[arg(long, default_value = "50")]
        limit: u32,
        #[arg(long)]
        json: bool,
    },
    /// Show one incident
    Show {
        /// Incident number, e.g. INC0010042
        number: String,
        #[arg(long)]
        json: bool,
    },
    /// Manage response SLA configuration
    Sla {
        #[command(subcommand)]
        action: SlaAction,
    },
    /// Inspect or move the sync watermark
    Watermark {
        #[command(subcommand)]
        action: WatermarkAction,
    },
    /// Show store status and recent sync runs
    Status,
}

#[derive(Subcommand)]
enum SlaAction {
    /// List SLA thresholds
    List {
        #[arg(long)]
        json: bool,
    },
    /// Create or update the thresholds for one priority
    Set {
        id: i64,
        priority: String,
        /// Minutes allowed before first response
        response_minutes: i64,
        /// Minutes allowed before resolution
        resolution_minutes: i64,
    },
    /// Remove an SLA entry
    Remove { id: i64 },
}

#[derive(Subcommand)]
enum WatermarkAction {
    /// Print the current watermark
    Show,
    /// Set the watermark (YYYY-MM-DD or "YYYY-MM-DD HH:MM:SS", UTC)
    Set { at: String },
    /// Clear the watermark so the next cycle uses the initial lookback
    Reset,
}

fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    if let Some(ts) = snowsync::date_util::parse_remote_timestamp(s) {
        return Ok(ts);
    }
    chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow::anyhow!("invalid timestamp '{s}', expected YYYY-MM-DD[ HH:MM:SS]"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.db {
        config.storage.path = Some(path);
    }
    log::debug!("Loaded config: {config:?}");

    let db = snowsync::Database::open_at(config.database_path()?).await?;
    let app = IncidentSync::from_config(db, &config)?;

    match cli.command {
        Commands::Run { cron, now } => {
            let cron = cron.unwrap_or_else(|| config.schedule.cron.clone());
            let scheduler = app.start_scheduler(&cron).await?;
            eprintln!("Syncing incidents on schedule '{cron}'. Press Ctrl-C to stop.");
            if now {
                match app.sync_once(&SyncOptions::default()).await {
                    Ok(report) => print_report(&report),
                    Err(e) => eprintln!("Initial sync failed: {e}"),
                }
            }
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await?;
        }
        Commands::Sync { since, json } => {
            let options = SyncOptions {
                since: since.as_deref().map(parse_timestamp).transpose()?,
            };
            let report = app.sync_once(&options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Incidents { limit, json } => {
            let incidents = app.incidents(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&incidents)?);
            } else if incidents.is_empty() {
                println!("No incidents synced yet.");
            } else {
                for inc in &incidents {
                    println!(
                        "{:<12} {:<12} {:<10} {:<20} {}",
                        inc.incident_number,
                        inc.status,
                        inc.priority,
                        inc.updated_on,
                        inc.subject
                    );
                }
            }
        }
        Commands::Show { number, json } => match app.incident(&number).await? {
            Some(inc) if json => println!("{}", serde_json::to_string_pretty(&inc)?),
            Some(inc) => {
                println!("{}", inc.incident_number);
                println!("  Subject:     {}", inc.subject);
                println!("  Status:      {}", inc.status);
                println!("  Priority:    {}", inc.priority);
                println!("  Severity:    {}", inc.severity);
                println!("  Assigned to: {}", inc.assigned_to);
                println!("  Group:       {}", inc.assignment_group);
                println!("  Created:     {}", inc.created_on);
                println!("  Updated:     {}", inc.updated_on);
            }
            None => anyhow::bail!("incident {number} not found"),
        },
        Commands::Sla { action } => handle_sla(&app, action).await?,
        Commands::Watermark { action } => handle_watermark(&app, action).await?,
        Commands::Status => print_status(&app).await?,
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    eprintln!(
        "Sync {}: {} fetched, {} synced, {} skipped",
        report.status.as_str(),
        report.items_fetched,
        report.items_synced,
        report.items_failed
    );
    if let Some(watermark) = report.watermark {
        eprintln!("  Watermark: {watermark}");
    }
    if let Some(err) = &report.error {
        eprintln!("  {err}");
    }
}

async fn handle_sla(app: &IncidentSync, action: SlaAction) -> anyhow::Result<()> {
    match action {
        SlaAction::List { json } => {
            let slas = app.response_sla_configs().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&slas)?);
            } else if slas.is_empty() {
                println!("No SLA thresholds configured.");
            } else {
                for sla in &slas {
                    println!(
                        "{:>4}  priority {:<14} response {:>5}m  resolution {:>6}m",
                        sla.id, sla.priority, sla.response_minutes, sla.resolution_minutes
                    );
                }
            }
        }
        SlaAction::Set {
            id,
            priority,
            response_minutes,
            resolution_minutes,
        } => {
            app.set_response_sla(ResponseSlaConfig {
                id,
                priority,
                response_minutes,
                resolution_minutes,
            })
            .await?;
            println!("SLA {id} updated.");
        }
        SlaAction::Remove { id } => {
            if app.remove_response_sla(id).await? {
                println!("SLA {id} removed.");
            } else {
                println!("SLA {id} not found.");
            }
        }
    }
    Ok(())
}

async fn handle_watermark(app: &IncidentSync, action: WatermarkAction) -> anyhow::Result<()> {
    match action {
        WatermarkAction::Show => match app.watermark().await? {
            Some(at) => println!("{at}"),
            None => println!("No watermark stored."),
        },
        WatermarkAction::Set { at } => {
            let at = parse_timestamp(&at)?;
            app.set_watermark(at).await?;
            println!("Watermark set to {at}.");
        }
        WatermarkAction::Reset => {
            app.reset_watermark().await?;
            println!("Watermark cleared.");
        }
    }
    Ok(())
}

async fn print_status(app: &IncidentSync) -> anyhow::Result<()> {
    let counts = app.status_counts().await?;
    let total: u64 = counts.iter().map(|(_, n)| n).sum();
    let watermark = app.watermark().await?;
    let runs = app.recent_runs(5).await?;

    println!("Incident Store Status");
    println!("  Incidents: {total}");
    for (status, n) in &counts {
        println!("    {status:<12} {n}");
    }
    println!(
        "  Watermark: {}",
        watermark.map_or_else(|| "none".to_string(), |w| w.to_string())
    );
    println!("  Recent runs:");
    if runs.is_empty() {
        println!("    never");
    }
    for run in &runs {
        println!(
            "    {}  {:<15} synced {:>4}  skipped {:>3}{}",
            run.started_at,
            run.status,
            run.items_synced,
            run.items_failed,
            run.error_message
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
