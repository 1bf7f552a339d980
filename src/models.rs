use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Qualitative health of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Green,
    Amber,
    Red,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Green => "green",
            Status::Amber => "amber",
            Status::Red => "red",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "green" => Ok(Status::Green),
            "amber" => Ok(Status::Amber),
            "red" => Ok(Status::Red),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Lt,
    Gt,
}

impl Comparator {
    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Lt => "lt",
            Comparator::Gt => "gt",
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lt" => Ok(Comparator::Lt),
            "gt" => Ok(Comparator::Gt),
            other => Err(format!("unknown comparator '{other}'")),
        }
    }
}

/// Exact (domino, signal) pair used as the key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalKey {
    pub domino_id: i32,
    pub signal_name: String,
}

impl SignalKey {
    pub fn new(domino_id: i32, signal_name: impl Into<String>) -> Self {
        Self {
            domino_id,
            signal_name: signal_name.into(),
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domino {} / {}", self.domino_id, self.signal_name)
    }
}

#[derive(Debug, Clone)]
pub struct SignalStatus {
    pub key: SignalKey,
    /// Stored as text so a hand-edited row with an odd value still round-trips.
    pub status: String,
    pub is_override: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DataPoint {
    pub key: SignalKey,
    pub raw_value: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdDefinition {
    pub key: SignalKey,
    pub comparator: Comparator,
    pub amber: f64,
    pub red: f64,
}

/// A threshold row as read from the dynamic table, before validation.
#[derive(Debug, Clone)]
pub struct ThresholdRow {
    pub domino_id: i32,
    pub signal_name: String,
    pub comparator: String,
    pub amber: Option<f64>,
    pub red: Option<f64>,
}

/// Audit record for one confirmed status transition. Also the alert payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalChange {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub domino_id: i32,
    pub signal_name: String,
    pub old_status: String,
    pub new_status: String,
    #[serde(default = "default_trigger")]
    pub trigger_type: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "Utc::now")]
    pub changed_at: DateTime<Utc>,
}

fn default_trigger() -> String {
    "manual".to_string()
}

impl SignalChange {
    pub fn is_escalation(&self) -> bool {
        self.new_status.eq_ignore_ascii_case(Status::Red.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Hit,
    Miss,
    Partial,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Hit => "hit",
            Outcome::Miss => "miss",
            Outcome::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOperator {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ThresholdOperator {
    /// Anything other than the four known spellings means `>=`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(">") => ThresholdOperator::Gt,
            Some("<") => ThresholdOperator::Lt,
            Some("<=") => ThresholdOperator::Lte,
            _ => ThresholdOperator::Gte,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ThresholdOperator::Gt => ">",
            ThresholdOperator::Gte => ">=",
            ThresholdOperator::Lt => "<",
            ThresholdOperator::Lte => "<=",
        }
    }

    pub fn holds(self, current: f64, target: f64) -> bool {
        match self {
            ThresholdOperator::Gt => current > target,
            ThresholdOperator::Gte => current >= target,
            ThresholdOperator::Lt => current < target,
            ThresholdOperator::Lte => current <= target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Other(String),
}

impl Direction {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "up" => Direction::Up,
            Some(v) if v == "down" => Direction::Down,
            Some(v) => Direction::Other(v),
            None => Direction::Other(String::new()),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
            Direction::Other(raw) if raw.is_empty() => f.write_str("(none)"),
            Direction::Other(raw) => f.write_str(raw),
        }
    }
}

/// Type-specific condition of a prediction, one variant per type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionCondition {
    Threshold {
        target: Option<f64>,
        operator: ThresholdOperator,
    },
    Direction {
        baseline: Option<f64>,
        direction: Direction,
    },
    Range {
        min: Option<f64>,
        max: Option<f64>,
    },
    Unknown {
        kind: String,
    },
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub id: Uuid,
    pub signal_id: Option<Uuid>,
    pub condition: PredictionCondition,
    /// Raw domino/signal carried in the payload, used when the link is missing.
    pub fallback: Option<SignalKey>,
    pub statement: String,
    pub target_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub scored_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub evaluated: usize,
    pub changed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoringSummary {
    pub evaluated: usize,
    pub scored: usize,
    pub errors: Vec<String>,
}
