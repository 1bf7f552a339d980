use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::evaluator::parse_numeric;
use crate::models::{
    Direction, Outcome, Prediction, PredictionCondition, ScoringSummary, SignalKey,
    ThresholdOperator,
};
use crate::store::{LatestPoints, SignalStore};

/// Alternate spellings of a direction baseline, in preference order.
const BASELINE_FIELDS: [&str; 3] = ["baseline", "baseline_value", "start_value"];

/// Accepts JSON numbers and numeric strings ("4.2%").
fn number(payload: &Value, field: &str) -> Option<f64> {
    match payload.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric(s),
        _ => None,
    }
}

fn text<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(Value::as_str)
}

/// Builds the typed condition for a prediction row, plus the raw domino/signal pair the
/// payload may carry for predictions without a signal link.
pub fn parse_condition(kind: &str, payload: &Value) -> (PredictionCondition, Option<SignalKey>) {
    let condition = match kind.trim().to_ascii_lowercase().as_str() {
        "threshold" => PredictionCondition::Threshold {
            target: number(payload, "threshold"),
            operator: ThresholdOperator::parse(text(payload, "operator")),
        },
        "direction" => PredictionCondition::Direction {
            baseline: BASELINE_FIELDS
                .iter()
                .find_map(|field| number(payload, field)),
            direction: Direction::parse(text(payload, "direction")),
        },
        "range" => PredictionCondition::Range {
            min: number(payload, "min"),
            max: number(payload, "max"),
        },
        other => PredictionCondition::Unknown {
            kind: other.to_string(),
        },
    };

    let domino_id = match payload.get("domino_id") {
        Some(Value::Number(n)) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    let fallback = match (domino_id, text(payload, "signal_name")) {
        (Some(domino_id), Some(name)) if !name.trim().is_empty() => {
            Some(SignalKey::new(domino_id, name.trim()))
        }
        _ => None,
    };

    (condition, fallback)
}

pub fn score(condition: &PredictionCondition, current: Option<f64>) -> Outcome {
    match condition {
        PredictionCondition::Threshold { target, operator } => match (current, target) {
            (Some(current), Some(target)) if operator.holds(current, *target) => Outcome::Hit,
            (Some(_), Some(_)) => Outcome::Miss,
            _ => Outcome::Partial,
        },
        PredictionCondition::Direction {
            baseline,
            direction,
        } => {
            let (Some(current), Some(baseline)) = (current, baseline) else {
                return Outcome::Partial;
            };
            let delta = current - baseline;
            match direction {
                _ if delta == 0.0 => Outcome::Partial,
                Direction::Up if delta > 0.0 => Outcome::Hit,
                Direction::Down if delta < 0.0 => Outcome::Hit,
                Direction::Up | Direction::Down => Outcome::Miss,
                Direction::Other(_) => Outcome::Partial,
            }
        }
        PredictionCondition::Range { min, max } => match (current, min, max) {
            (Some(current), Some(a), Some(b)) => {
                let (low, high) = if a <= b { (*a, *b) } else { (*b, *a) };
                if (low..=high).contains(&current) {
                    Outcome::Hit
                } else {
                    Outcome::Miss
                }
            }
            _ => Outcome::Partial,
        },
        PredictionCondition::Unknown { .. } => Outcome::Partial,
    }
}

pub struct PredictionScorer<'a, S: SignalStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SignalStore + ?Sized> PredictionScorer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        latest: &LatestPoints,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ScoringSummary> {
        let due = self.store.due_predictions(now.date_naive()).await?;
        let signals = self.store.signal_lookup().await?;
        debug!(due = due.len(), "Scoring due predictions");

        let results = join_all(
            due.iter()
                .map(|prediction| self.score_one(prediction, &signals, latest, now)),
        )
        .await;

        let mut summary = ScoringSummary {
            evaluated: due.len(),
            ..ScoringSummary::default()
        };
        for result in results {
            match result {
                Ok(true) => summary.scored += 1,
                Ok(false) => {}
                Err(err) => summary.errors.push(err),
            }
        }

        info!(
            evaluated = summary.evaluated,
            scored = summary.scored,
            errors = summary.errors.len(),
            "Prediction scoring finished"
        );
        Ok(summary)
    }

    async fn score_one(
        &self,
        prediction: &Prediction,
        signals: &HashMap<Uuid, SignalKey>,
        latest: &LatestPoints,
        now: DateTime<Utc>,
    ) -> Result<bool, String> {
        if prediction.scored_at.is_some() || prediction.outcome.is_some() {
            debug!(prediction = %prediction.id, "Skipping already scored prediction");
            return Ok(false);
        }
        let current = current_value(prediction, signals, latest);
        let outcome = score(&prediction.condition, current);

        match self.store.record_outcome(prediction.id, outcome, now).await {
            Ok(true) => {
                debug!(prediction = %prediction.id, outcome = outcome.as_str(), "Prediction scored");
                Ok(true)
            }
            Ok(false) => {
                debug!(prediction = %prediction.id, "Prediction already scored elsewhere");
                Ok(false)
            }
            Err(err) => {
                warn!(prediction = %prediction.id, error = %err, "Failed to record outcome");
                Err(format!("prediction {}: failed to record outcome: {err}", prediction.id))
            }
        }
    }
}

/// Linked signal first; the payload's own domino/signal pair when the link yields nothing.
fn current_value(
    prediction: &Prediction,
    signals: &HashMap<Uuid, SignalKey>,
    latest: &LatestPoints,
) -> Option<f64> {
    let linked = prediction
        .signal_id
        .and_then(|id| signals.get(&id))
        .and_then(|key| latest.get(key));
    let point = linked.or_else(|| prediction.fallback.as_ref().and_then(|key| latest.get(key)))?;
    parse_numeric(&point.raw_value)
}
