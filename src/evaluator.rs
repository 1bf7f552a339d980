use std::sync::LazyLock;

use chrono::Utc;
use futures::future::join_all;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    Comparator, RunSummary, SignalChange, SignalStatus, Status, ThresholdDefinition,
};
use crate::store::{LatestPoints, SignalStore};
use crate::thresholds::ThresholdDirectory;

pub const EVALUATOR_EDITOR: &str = "cron-evaluator";
pub const CRON_TRIGGER: &str = "cron";

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid number pattern"));

/// First signed decimal in a raw value such as "118% avg" or "$1,204.5B".
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(',', "");
    NUMBER
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

pub fn classify(value: f64, threshold: &ThresholdDefinition) -> Status {
    match threshold.comparator {
        Comparator::Lt if value < threshold.red => Status::Red,
        Comparator::Lt if value < threshold.amber => Status::Amber,
        Comparator::Gt if value > threshold.red => Status::Red,
        Comparator::Gt if value > threshold.amber => Status::Amber,
        _ => Status::Green,
    }
}

#[derive(Debug)]
pub struct EvaluationRun {
    pub summary: RunSummary,
    pub changes: Vec<SignalChange>,
}

enum SignalResult {
    Informational,
    Unchanged,
    Changed {
        change: SignalChange,
        audit_error: Option<String>,
    },
    Failed(String),
}

pub struct StatusEvaluator<'a, S: SignalStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SignalStore + ?Sized> StatusEvaluator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Evaluates every non-overridden signal against `latest`. Only a failure to read the
    /// stored statuses aborts the run; per-signal problems land in `summary.errors`.
    pub async fn run(
        &self,
        directory: &ThresholdDirectory,
        latest: &LatestPoints,
    ) -> anyhow::Result<EvaluationRun> {
        let statuses = self.store.signal_statuses().await?;
        let candidates: Vec<&SignalStatus> = statuses.iter().filter(|s| !s.is_override).collect();
        debug!(
            total = statuses.len(),
            candidates = candidates.len(),
            "Evaluating signal statuses"
        );

        let results = join_all(
            candidates
                .into_iter()
                .map(|status| self.evaluate_one(status, directory, latest)),
        )
        .await;

        let mut summary = RunSummary::default();
        let mut changes = Vec::new();
        for result in results {
            match result {
                SignalResult::Informational => {}
                SignalResult::Unchanged => summary.evaluated += 1,
                SignalResult::Changed {
                    change,
                    audit_error,
                } => {
                    summary.evaluated += 1;
                    summary.changed += 1;
                    if let Some(err) = audit_error {
                        summary.errors.push(err);
                    }
                    changes.push(change);
                }
                SignalResult::Failed(err) => {
                    summary.evaluated += 1;
                    summary.errors.push(err);
                }
            }
        }

        info!(
            evaluated = summary.evaluated,
            changed = summary.changed,
            errors = summary.errors.len(),
            "Status evaluation finished"
        );
        Ok(EvaluationRun { summary, changes })
    }

    async fn evaluate_one(
        &self,
        status: &SignalStatus,
        directory: &ThresholdDirectory,
        latest: &LatestPoints,
    ) -> SignalResult {
        let key = &status.key;
        let Some(threshold) = directory.resolve(key.domino_id, &key.signal_name) else {
            return SignalResult::Informational;
        };
        let Some(point) = latest.get(key) else {
            return SignalResult::Failed(format!("{key}: no data points"));
        };
        let Some(value) = parse_numeric(&point.raw_value) else {
            return SignalResult::Failed(format!(
                "{key}: no numeric value in \"{}\"",
                point.raw_value
            ));
        };

        let computed = classify(value, threshold);
        debug!(
            signal = %key,
            value,
            observed_at = %point.created_at,
            computed = computed.as_str(),
            "Classified signal"
        );
        if status.status.parse::<Status>().ok() == Some(computed) {
            return SignalResult::Unchanged;
        }

        let now = Utc::now();
        match self
            .store
            .update_status(key, &status.status, computed, EVALUATOR_EDITOR, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(signal = %key, "Signal overridden or moved during evaluation");
                return SignalResult::Unchanged;
            }
            Err(err) => {
                warn!(signal = %key, error = %err, "Status update failed");
                return SignalResult::Failed(format!("{key}: status update failed: {err}"));
            }
        }

        let change = SignalChange {
            id: Uuid::new_v4(),
            domino_id: key.domino_id,
            signal_name: key.signal_name.clone(),
            old_status: status.status.clone(),
            new_status: computed.as_str().to_string(),
            trigger_type: CRON_TRIGGER.to_string(),
            reason: Some(format!(
                "Latest value \"{}\" ({value}) vs {} amber {} / red {}",
                point.raw_value,
                threshold.comparator.as_str(),
                threshold.amber,
                threshold.red
            )),
            changed_at: now,
        };
        info!(
            signal = %key,
            from = %change.old_status,
            to = %change.new_status,
            "Signal status changed"
        );

        let audit_error = match self.store.insert_change(&change).await {
            Ok(()) => None,
            Err(err) => {
                warn!(signal = %key, error = %err, "Status applied but audit write failed");
                Some(format!("{key}: status applied but audit write failed: {err}"))
            }
        };

        SignalResult::Changed {
            change,
            audit_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalKey;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn threshold(comparator: Comparator, amber: f64, red: f64) -> ThresholdDefinition {
        ThresholdDefinition {
            key: SignalKey::new(1, "test"),
            comparator,
            amber,
            red,
        }
    }

    async fn run(store: &MemoryStore) -> EvaluationRun {
        let directory = ThresholdDirectory::load(store).await;
        let latest = store.latest_data_points().await.unwrap();
        StatusEvaluator::new(store)
            .run(&directory, &latest)
            .await
            .unwrap()
    }

    #[test]
    fn parses_formatted_values() {
        assert_eq!(parse_numeric("118% avg"), Some(118.0));
        assert_eq!(parse_numeric("$1,204.5B"), Some(1204.5));
        assert_eq!(parse_numeric("down -2.3 pts"), Some(-2.3));
        assert_eq!(parse_numeric("212,000 claims"), Some(212_000.0));
        assert_eq!(parse_numeric("n/a"), None);
    }

    #[test]
    fn lt_bands() {
        let t = threshold(Comparator::Lt, 120.0, 110.0);
        assert_eq!(classify(109.9, &t), Status::Red);
        assert_eq!(classify(110.0, &t), Status::Amber);
        assert_eq!(classify(119.9, &t), Status::Amber);
        assert_eq!(classify(120.0, &t), Status::Green);
        assert_eq!(classify(118.0, &t), Status::Amber);
    }

    #[test]
    fn gt_bands() {
        let t = threshold(Comparator::Gt, 25.0, 35.0);
        assert_eq!(classify(35.1, &t), Status::Red);
        assert_eq!(classify(35.0, &t), Status::Amber);
        assert_eq!(classify(25.1, &t), Status::Amber);
        assert_eq!(classify(25.0, &t), Status::Green);
    }

    #[test]
    fn bands_hold_across_a_sweep() {
        let lt = threshold(Comparator::Lt, 50.0, 20.0);
        let gt = threshold(Comparator::Gt, 20.0, 50.0);
        for step in -100..=200 {
            let v = step as f64 * 0.5;
            let expected_lt = if v < 20.0 {
                Status::Red
            } else if v < 50.0 {
                Status::Amber
            } else {
                Status::Green
            };
            let expected_gt = if v > 50.0 {
                Status::Red
            } else if v > 20.0 {
                Status::Amber
            } else {
                Status::Green
            };
            assert_eq!(classify(v, &lt), expected_lt, "lt at {v}");
            assert_eq!(classify(v, &gt), expected_gt, "gt at {v}");
        }
    }

    #[tokio::test]
    async fn nrr_scenario_turns_amber_via_fallback() {
        let store = MemoryStore::default()
            .with_status(5, "SaaS Net Revenue Retention", "green")
            .with_point(5, "SaaS Net Revenue Retention", "118% avg", Utc::now());

        let result = run(&store).await;

        assert!(result.summary.errors.is_empty());
        assert_eq!(result.summary.evaluated, 1);
        assert_eq!(result.summary.changed, 1);
        assert_eq!(result.changes[0].old_status, "green");
        assert_eq!(result.changes[0].new_status, "amber");
        assert_eq!(result.changes[0].trigger_type, "cron");
        assert!(result.changes[0]
            .reason
            .as_deref()
            .unwrap()
            .contains("118% avg"));
        assert_eq!(
            store.status_of(5, "SaaS Net Revenue Retention").as_deref(),
            Some("amber")
        );
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let store = MemoryStore::default()
            .with_status(6, "VIX", "green")
            .with_point(6, "VIX", "41.2", Utc::now());

        let first = run(&store).await;
        let second = run(&store).await;

        assert_eq!(first.summary.changed, 1);
        assert_eq!(second.summary.changed, 0);
        assert!(second.changes.is_empty());
        assert_eq!(store.change_count(), 1);
    }

    #[tokio::test]
    async fn uses_most_recent_point() {
        let now = Utc::now();
        let store = MemoryStore::default()
            .with_status(6, "VIX", "green")
            .with_point(6, "VIX", "40", now - Duration::hours(2))
            .with_point(6, "VIX", "18", now);

        let result = run(&store).await;
        assert_eq!(result.summary.changed, 0);
        assert_eq!(store.status_of(6, "VIX").as_deref(), Some("green"));
    }

    #[tokio::test]
    async fn overridden_and_informational_signals_are_skipped() {
        let store = MemoryStore::default()
            .with_status(6, "VIX", "green")
            .with_status(1, "Frontier Model Releases", "amber")
            .with_point(6, "VIX", "50", Utc::now());
        store.state.lock().unwrap().statuses[0].is_override = true;

        let result = run(&store).await;

        assert_eq!(result.summary.evaluated, 0);
        assert_eq!(result.summary.changed, 0);
        assert!(result.summary.errors.is_empty());
        assert_eq!(store.status_of(6, "VIX").as_deref(), Some("green"));
    }

    #[tokio::test]
    async fn per_signal_failures_are_isolated() {
        let store = MemoryStore::default()
            .with_status(6, "VIX", "green")
            .with_status(2, "Unemployment Rate", "green")
            .with_status(3, "Consumer Sentiment Index", "green")
            .with_point(6, "VIX", "pending", Utc::now())
            .with_point(3, "Consumer Sentiment Index", "52.1", Utc::now());

        let result = run(&store).await;

        assert_eq!(result.summary.evaluated, 3);
        assert_eq!(result.summary.changed, 1);
        assert_eq!(result.summary.errors.len(), 2);
        assert_eq!(
            store.status_of(3, "Consumer Sentiment Index").as_deref(),
            Some("red")
        );
    }

    #[tokio::test]
    async fn audit_failure_keeps_the_status_change() {
        let store = MemoryStore::default()
            .with_status(6, "VIX", "green")
            .with_point(6, "VIX", "30", Utc::now());
        store.state.lock().unwrap().fail_change_insert = true;

        let result = run(&store).await;

        assert_eq!(result.summary.changed, 1);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.summary.errors.len(), 1);
        assert!(result.summary.errors[0].contains("audit"));
        assert_eq!(store.status_of(6, "VIX").as_deref(), Some("amber"));
    }

    #[tokio::test]
    async fn failed_status_write_is_reported_without_audit() {
        let store = MemoryStore::default()
            .with_status(6, "VIX", "green")
            .with_point(6, "VIX", "30", Utc::now());
        store.state.lock().unwrap().fail_status_update_for = Some(SignalKey::new(6, "VIX"));

        let result = run(&store).await;

        assert_eq!(result.summary.changed, 0);
        assert_eq!(result.summary.errors.len(), 1);
        assert_eq!(store.change_count(), 0);
    }

    #[tokio::test]
    async fn overlapping_runs_record_one_transition() {
        let store = MemoryStore::default()
            .with_status(6, "VIX", "green")
            .with_point(6, "VIX", "41.2", Utc::now());
        {
            let mut state = store.state.lock().unwrap();
            state.frozen_statuses = Some(state.statuses.clone());
        }

        let first = run(&store).await;
        let second = run(&store).await;

        assert_eq!(first.summary.changed, 1);
        assert_eq!(second.summary.changed, 0);
        assert!(second.changes.is_empty());
        assert!(second.summary.errors.is_empty());
        assert_eq!(store.change_count(), 1);
        assert_eq!(store.status_of(6, "VIX").as_deref(), Some("red"));
    }

    #[tokio::test]
    async fn status_case_does_not_count_as_a_change() {
        let store = MemoryStore::default()
            .with_status(6, "VIX", "Green")
            .with_status(2, "Unemployment Rate", "unknown")
            .with_point(6, "VIX", "19.4", Utc::now())
            .with_point(2, "Unemployment Rate", "4.3%", Utc::now());

        let result = run(&store).await;

        assert_eq!(result.summary.evaluated, 2);
        assert_eq!(result.summary.changed, 1);
        assert_eq!(result.changes[0].signal_name, "Unemployment Rate");
        assert_eq!(result.changes[0].old_status, "unknown");
        assert_eq!(store.status_of(6, "VIX").as_deref(), Some("Green"));
    }
}
