use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod alerts;
mod config;
mod db;
mod error;
mod evaluator;
mod models;
mod pipeline;
mod predictions;
mod report;
mod server;
mod store;
mod thresholds;

use alerts::{AlertDispatcher, NotifyChannel, Renderer, TelegramChannel};
use config::{AlertConfig, ServerConfig};
use db::PgStore;
use store::SignalStore;

#[derive(Parser)]
#[command(name = "domino-signal-watch")]
#[command(about = "Signal status evaluation, prediction scoring and alerting for a macro thesis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a realistic thesis with signals, thresholds, data and predictions
    Seed,
    /// Run one evaluation cycle: statuses, then predictions, then alerts
    Evaluate {
        /// Skip forwarding status changes to the notification channel
        #[arg(long)]
        no_alerts: bool,
    },
    /// Serve the alert webhook and evaluation endpoints
    Serve,
    /// Generate a markdown status report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 10)]
        recent: i64,
    },
}

fn dispatcher_from(config: &AlertConfig) -> AlertDispatcher {
    let channel: Arc<dyn NotifyChannel> = Arc::new(TelegramChannel::new(
        Some(config.bot_token.clone()),
        Some(config.chat_id.clone()),
    ));
    AlertDispatcher::spawn(channel, Renderer::new(config.timezone), config.batch)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("domino_signal_watch=info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = config::database_url()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Evaluate { no_alerts } => {
            let alert_config = if no_alerts {
                None
            } else {
                Some(AlertConfig::from_env()?)
            };

            let report = pipeline::run_cycle(&store).await?;
            println!(
                "Thresholds: {}. Evaluated {} signals, {} changed.",
                report.thresholds, report.evaluation.evaluated, report.evaluation.changed
            );
            println!(
                "Scored {} of {} due predictions.",
                report.predictions.scored, report.predictions.evaluated
            );
            for error in report
                .evaluation
                .errors
                .iter()
                .chain(report.predictions.errors.iter())
            {
                println!("- {error}");
            }

            if let Some(alert_config) = alert_config {
                let dispatcher = dispatcher_from(&alert_config);
                let outcomes = pipeline::forward_changes(&dispatcher, &report.changes).await;
                let failed = outcomes.iter().filter(|o| !o.is_delivered()).count();
                println!(
                    "Alerts: {} delivered, {} failed.",
                    outcomes.len() - failed,
                    failed
                );
            }
        }
        Commands::Serve => {
            let alert_config = AlertConfig::from_env()?;
            let server_config = ServerConfig::from_env()?;
            let state = Arc::new(server::AppState {
                store: Arc::new(store),
                dispatcher: dispatcher_from(&alert_config),
                webhook_secret: server_config.webhook_secret,
            });
            server::serve(state, &server_config.bind_addr).await?;
        }
        Commands::Report { out, recent } => {
            let timezone = config::timezone()?;
            let statuses = store.signal_statuses().await?;
            let changes = store.recent_changes(recent.max(1)).await?;
            let open = store.open_predictions().await?;
            let report = report::build_report(Utc::now(), timezone, &statuses, &changes, &open);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
