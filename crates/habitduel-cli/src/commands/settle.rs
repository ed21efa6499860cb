use clap::Subcommand;
use habitduel_core::{ChallengeId, Config, SettlementScheduler, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{open_database, CommandResult};

#[derive(Subcommand)]
pub enum SettleAction {
    /// Run one close-out and settlement batch now
    Run {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle one challenge if its duration has elapsed
    Challenge {
        /// Challenge id
        id: ChallengeId,
    },
    /// Run batches on the configured interval until Ctrl-C
    Daemon {
        /// Override settlement.interval_secs
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn scheduler(config: &Config) -> Result<SettlementScheduler, Box<dyn std::error::Error>> {
    let store = Arc::new(open_database(config)?);
    Ok(SettlementScheduler::new(
        store,
        Arc::new(config.state_machine()),
        Arc::new(SystemClock),
        config.settlement.solo_success_ratio,
    ))
}

pub fn run(action: SettleAction) -> CommandResult {
    let config = Config::load()?;
    let jobs = scheduler(&config)?;

    match action {
        SettleAction::Run { json } => {
            if json {
                let report = jobs.run_once()?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", jobs.force_run()?);
            }
        }
        SettleAction::Challenge { id } => {
            let outcome = jobs.settle_challenge(id)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        SettleAction::Daemon { interval_secs } => {
            let period = interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.settlement_interval());

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async move {
                info!(period_secs = period.as_secs(), "settlement daemon started");
                let handle = Arc::new(jobs).spawn(period);
                let signal = tokio::signal::ctrl_c().await;
                handle.shutdown().await;
                info!("settlement daemon stopped");
                signal
            })?;
        }
    }
    Ok(())
}
