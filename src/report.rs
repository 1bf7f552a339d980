use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::alerts::render::domino_label;
use crate::models::{Prediction, PredictionCondition, SignalChange, SignalStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMix {
    pub green: usize,
    pub amber: usize,
    pub red: usize,
    pub other: usize,
    pub overridden: usize,
}

pub fn summarize_statuses(statuses: &[SignalStatus]) -> StatusMix {
    let mut mix = StatusMix {
        green: 0,
        amber: 0,
        red: 0,
        other: 0,
        overridden: 0,
    };

    for status in statuses {
        match status.status.as_str() {
            "green" => mix.green += 1,
            "amber" => mix.amber += 1,
            "red" => mix.red += 1,
            _ => mix.other += 1,
        }
        if status.is_override {
            mix.overridden += 1;
        }
    }

    mix
}

fn describe_condition(condition: &PredictionCondition) -> String {
    match condition {
        PredictionCondition::Threshold { target, operator } => match target {
            Some(target) => format!("threshold {} {target}", operator.symbol()),
            None => "threshold (no target)".to_string(),
        },
        PredictionCondition::Direction {
            baseline,
            direction,
        } => match baseline {
            Some(baseline) => format!("direction {direction} from {baseline}"),
            None => format!("direction {direction} (no baseline)"),
        },
        PredictionCondition::Range { min, max } => format!(
            "range {} to {}",
            min.map_or("?".to_string(), |v| v.to_string()),
            max.map_or("?".to_string(), |v| v.to_string())
        ),
        PredictionCondition::Unknown { kind } => format!("unknown type '{kind}'"),
    }
}

pub fn build_report(
    generated_at: DateTime<Utc>,
    timezone: Tz,
    statuses: &[SignalStatus],
    changes: &[SignalChange],
    open_predictions: &[Prediction],
) -> String {
    let mix = summarize_statuses(statuses);
    let mut by_domino: BTreeMap<i32, Vec<&SignalStatus>> = BTreeMap::new();
    for status in statuses {
        by_domino.entry(status.key.domino_id).or_default().push(status);
    }

    let mut output = String::new();

    let _ = writeln!(output, "# Domino Signal Report");
    let _ = writeln!(
        output,
        "Generated {}",
        generated_at.with_timezone(&timezone).format("%Y-%m-%d %H:%M %Z")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");
    let _ = writeln!(
        output,
        "- green: {}, amber: {}, red: {}, other: {} ({} overridden)",
        mix.green, mix.amber, mix.red, mix.other, mix.overridden
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Signals by Domino");

    if by_domino.is_empty() {
        let _ = writeln!(output, "No signals tracked yet.");
    } else {
        for (domino_id, signals) in &by_domino {
            let _ = writeln!(output, "### {}", domino_label(*domino_id));
            for signal in signals {
                let pinned = if signal.is_override { " (override)" } else { "" };
                let updated = match (&signal.updated_at, &signal.updated_by) {
                    (Some(at), Some(by)) => format!(
                        ", updated {} by {by}",
                        at.with_timezone(&timezone).format("%Y-%m-%d %H:%M")
                    ),
                    _ => String::new(),
                };
                let _ = writeln!(
                    output,
                    "- {}: {}{}{}",
                    signal.key.signal_name, signal.status, pinned, updated
                );
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Changes");

    if changes.is_empty() {
        let _ = writeln!(output, "No status changes recorded.");
    } else {
        for change in changes {
            let _ = writeln!(
                output,
                "- {} {} / {}: {} → {} ({})",
                change
                    .changed_at
                    .with_timezone(&timezone)
                    .format("%Y-%m-%d %H:%M"),
                domino_label(change.domino_id),
                change.signal_name,
                change.old_status,
                change.new_status,
                change.trigger_type
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Predictions");

    if open_predictions.is_empty() {
        let _ = writeln!(output, "No predictions awaiting scoring.");
    } else {
        for prediction in open_predictions {
            let _ = writeln!(
                output,
                "- due {} (opened {}): {} [{}]",
                prediction.target_date,
                prediction.created_at.date_naive(),
                if prediction.statement.is_empty() {
                    prediction.id.to_string()
                } else {
                    prediction.statement.clone()
                },
                describe_condition(&prediction.condition)
            );
        }
    }

    output
}
