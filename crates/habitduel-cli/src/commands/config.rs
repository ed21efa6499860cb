use clap::Subcommand;
use habitduel_core::{Config, ConfigError};
use habitduel_core::storage::WeeklyPolicyKind;
use tracing::{info, warn};

use super::CommandResult;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one setting (e.g. "weekly.policy", "settlement.solo_success_ratio")
    Get { key: String },
    /// Change one setting; rejected if the result would not validate
    Set { key: String, value: String },
    /// Print the config file and the rules it produces
    List,
    /// Overwrite the config file with the defaults
    Reset,
    /// Print where the config file lives
    Path,
}

pub fn run(action: ConfigAction) -> CommandResult {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key).ok_or_else(|| ConfigError::InvalidValue {
                key: key.clone(),
                message: "no such setting".into(),
            })?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            let stored = config.get(&key).unwrap_or(value);
            info!(key = %key, value = %stored, "config updated");
            println!("{key} = {stored}");
        }
        ConfigAction::List => {
            let config = Config::load()?;
            print!("{}", toml::to_string_pretty(&config)?);
            println!();
            for line in rules(&config) {
                println!("# {line}");
            }
        }
        ConfigAction::Reset => {
            // Say what the defaults replace when the old file no longer loads.
            if let Err(err) = Config::load() {
                warn!(error = %err, "replacing unusable config");
                println!("previous config was unusable: {err}");
            }
            Config::default().save()?;
            println!("wrote defaults to {}", Config::file_path()?.display());
        }
        ConfigAction::Path => {
            println!("{}", Config::file_path()?.display());
        }
    }
    Ok(())
}

/// The weekly and settlement rules a config turns into, in plain words.
fn rules(config: &Config) -> Vec<String> {
    let weekly = match config.weekly.policy {
        WeeklyPolicyKind::TargetReached => "a week succeeds once its target time is logged".to_string(),
        WeeklyPolicyKind::RatioOfTarget => format!(
            "a week succeeds once {:.0}% of its target time is logged",
            config.weekly.min_ratio * 100.0
        ),
    };
    let solo = format!(
        "SOLO succeeds with at least {:.0}% successful weeks",
        config.settlement.solo_success_ratio * 100.0
    );
    let cadence = format!(
        "settlement runs every {}s",
        config.settlement_interval().as_secs()
    );
    vec![weekly, solo, cadence]
}
