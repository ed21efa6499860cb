//! TOML-based application configuration.
//!
//! Holds the policy knobs of the core:
//! - Weekly completion policy (absolute target or ratio of target)
//! - Settlement cadence and SOLO success ratio
//! - Realtime channel capacity
//! - Optional database path override
//!
//! Configuration is stored at `~/.config/habitduel/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;
use crate::progress::{CompletionPolicy, ProgressStateMachine, RatioOfTarget, TargetReached};

/// Which predicate closes a week as SUCCESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeeklyPolicyKind {
    /// elapsed >= target
    TargetReached,
    /// elapsed >= target * min_ratio
    RatioOfTarget,
}

/// Weekly completion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyConfig {
    #[serde(default = "default_policy")]
    pub policy: WeeklyPolicyKind,
    /// Only read when `policy = "ratio_of_target"`.
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,
}

/// Settlement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Share of SUCCESS weeks a SOLO participant needs.
    #[serde(default = "default_solo_success_ratio")]
    pub solo_success_ratio: f64,
}

/// Realtime fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Messages buffered per challenge channel before slow receivers lag.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/habitduel/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Overrides `<data_dir>/habitduel.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub weekly: WeeklyConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

// Default functions
fn default_policy() -> WeeklyPolicyKind {
    WeeklyPolicyKind::TargetReached
}
fn default_min_ratio() -> f64 {
    1.0
}
fn default_interval_secs() -> u64 {
    86_400
}
fn default_solo_success_ratio() -> f64 {
    0.7
}
fn default_channel_capacity() -> usize {
    64
}

impl Default for WeeklyConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            min_ratio: default_min_ratio(),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            solo_success_ratio: default_solo_success_ratio(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            weekly: WeeklyConfig::default(),
            settlement: SettlementConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::InvalidValue {
            key: key.to_string(),
            message: "unknown config key".into(),
        };
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Where [`load`](Self::load) and [`save`](Self::save) read and write.
    pub fn file_path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or write and return the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or is
    /// invalid, or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path()?)
    }

    /// Same as [`load`](Self::load) for an explicit path.
    ///
    /// Only a missing file is replaced by the default; an unreadable one is
    /// an error and is left as it is.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without persisting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the resulting config is invalid.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and persist it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    /// Reject values the core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.settlement.solo_success_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "settlement.solo_success_ratio".into(),
                message: format!("{ratio} is outside (0, 1]"),
            });
        }
        if self.weekly.min_ratio.is_nan() || self.weekly.min_ratio <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "weekly.min_ratio".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.settlement.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "settlement.interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.realtime.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "realtime.channel_capacity".into(),
                message: "must be greater than 0".into(),
            });
        }
        Ok(())
    }

    /// The configured weekly completion predicate.
    pub fn completion_policy(&self) -> Box<dyn CompletionPolicy> {
        match self.weekly.policy {
            WeeklyPolicyKind::TargetReached => Box::new(TargetReached),
            WeeklyPolicyKind::RatioOfTarget => Box::new(RatioOfTarget {
                min_ratio: self.weekly.min_ratio,
            }),
        }
    }

    pub fn state_machine(&self) -> ProgressStateMachine {
        ProgressStateMachine::new(self.completion_policy())
    }

    pub fn settlement_interval(&self) -> Duration {
        Duration::from_secs(self.settlement.interval_secs)
    }
}
