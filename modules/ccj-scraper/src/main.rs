use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ccj_common::{today, ScraperConfig};
use ccj_scraper::dry_run::{DryRunInmateStore, DryRunScraper};
use ccj_scraper::{Controller, ControllerConfig, Monitor, RawInmateData, SearchCommands};

/// Run one Cook County Jail scrape cycle.
#[derive(Parser, Debug)]
#[command(name = "ccj-scraper")]
struct Cli {
    /// Only search for inmates booked on or after this date (YYYY-MM-DD)
    /// that the store does not already know about.
    #[arg(long)]
    missing_since: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ccj=info".parse()?))
        .init();

    let cli = Cli::parse();
    info!("CCJ scraper starting...");

    let config = ScraperConfig::from_env()?;
    config.log_summary();

    // Collaborators
    let monitor = Arc::new(Monitor::new());
    let raw_inmate_data =
        RawInmateData::new(today(), config.feature_controls.as_ref(), monitor.clone());
    let scraper = Arc::new(DryRunScraper::new(monitor.clone(), raw_inmate_data));
    let inmates = Arc::new(DryRunInmateStore::new(monitor.clone()));
    let (search, mut search_task) =
        SearchCommands::new(scraper.clone(), monitor.clone(), config.candidates_per_day).spawn();

    let controller = Controller::new(
        monitor,
        Arc::new(search),
        scraper,
        inmates,
        ControllerConfig::from(&config),
    );

    let mut run = match cli.missing_since {
        Some(start_date) => {
            info!(%start_date, "Searching for missing inmates");
            controller.find_missing_inmates(start_date)?
        }
        None => controller.run()?,
    };

    tokio::select! {
        result = &mut run => result??,
        dispatched = &mut search_task => {
            // The dispatcher only exits early on a scraper error.
            controller.stop();
            run.await??;
            dispatched??;
            bail!("search command task exited before the scrape cycle finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping controller");
            controller.stop();
            run.await??;
        }
    }

    info!(
        heartbeats = controller.heartbeat_count(),
        stage = %controller.stage(),
        "CCJ scraper done"
    );
    Ok(())
}
