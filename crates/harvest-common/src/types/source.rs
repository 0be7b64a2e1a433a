use crate::HarvestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operator-controlled status of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    #[default]
    Enabled,
    Disabled,
    /// Picked up by the periodic scheduler
    Scheduled,
    /// Last run had no successful batch
    Error,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::Enabled => "enabled",
            SourceState::Disabled => "disabled",
            SourceState::Scheduled => "scheduled",
            SourceState::Error => "error",
        }
    }

    pub fn is_runnable(&self) -> bool {
        !matches!(self, SourceState::Disabled)
    }
}

impl FromStr for SourceState {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enabled" => Ok(SourceState::Enabled),
            "disabled" => Ok(SourceState::Disabled),
            "scheduled" => Ok(SourceState::Scheduled),
            "error" => Ok(SourceState::Error),
            other => Err(HarvestError::Parse(format!("unknown source status '{other}'"))),
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the harvest machinery is doing with a source right now,
/// independent of its [`SourceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Error => "error",
        }
    }
}

impl FromStr for RunState {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "idle" => Ok(RunState::Idle),
            "running" => Ok(RunState::Running),
            "error" => Ok(RunState::Error),
            other => Err(HarvestError::Parse(format!("unknown run state '{other}'"))),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry row for one source (maps to `source_status`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub name: String,
    pub status: SourceState,
    pub run_state: RunState,
    /// Parsed time of the newest saved record; never moves backwards
    pub last_update: Option<DateTime<Utc>>,
}

impl SourceStatus {
    pub fn new(name: impl Into<String>, status: SourceState) -> Self {
        Self {
            name: name.into(),
            status,
            run_state: RunState::Idle,
            last_update: None,
        }
    }
}
