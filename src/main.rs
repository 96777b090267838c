//! Daily Post Scheduler
//!
//! Resident process that posts to Instagram at the day's optimal times.
//!
//! The scheduler:
//! - Plans 2-3 jittered slots for today from the weekday's optimal times
//! - Rotates templates so consecutive posts never share one
//! - Runs `generate-and-post` as a child process when a slot fires
//! - Re-plans every local midnight

use anyhow::{Context, Result};
use clap::Parser;
use insta_autoposter::config::{self, Config};
use insta_autoposter::http_server::{self, AppState};
use insta_autoposter::schedule_config::OptimalTimes;
use insta_autoposter::scheduler::{DailyScheduler, PipelineFlags, ProcessLauncher, ScheduleMode};
use insta_autoposter::state::SchedulerStateStore;
use insta_autoposter::templates::{DirectoryCatalog, TemplateRotation};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "daily-post-scheduler", version, about = "Schedules daily Instagram posts at optimal times")]
struct Cli {
    /// How the day's posting slots are chosen
    #[arg(long, env = "SCHEDULE_MODE", value_enum, default_value = "optimal")]
    mode: ScheduleMode,
}

#[tokio::main]
async fn main() {
    // Load environment variables and logging
    dotenv::dotenv().ok();
    config::init_logging();

    let cli = Cli::parse();

    // Run the scheduler
    if let Err(e) = run(cli).await {
        log::error!("Scheduler failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    log::info!("Starting daily post scheduler ({:?} mode)...", cli.mode);

    // Load configuration from environment
    let cfg = Config::from_env().context("Failed to load configuration")?;
    let program = cfg.pipeline_program()?;
    log::info!("Content pipeline: {}", program.display());

    // Shared scheduler state and template rotation
    let state = Arc::new(SchedulerStateStore::json(&cfg.scheduler_state_path));
    let rotation = TemplateRotation::new(DirectoryCatalog::new(&cfg.templates_dir), state.clone());
    log::info!("Available templates: {}", rotation.available_templates().join(", "));

    // Optional health endpoint
    if let Some(port) = cfg.health_port {
        let app_state = AppState {
            scheduler_state: state.clone(),
            templates_dir: cfg.templates_dir.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = http_server::start_server(app_state, port).await {
                log::error!("HTTP server stopped: {:#}", e);
            }
        });
    }

    let flags = PipelineFlags {
        skip_posting: cfg.pipeline_skip_posting,
        mock: cfg.pipeline_mock,
    };

    let scheduler = DailyScheduler::new(
        rotation,
        OptimalTimes::default(),
        cli.mode,
        Arc::new(ProcessLauncher::new(program)),
        flags,
    );

    scheduler.run().await
}
