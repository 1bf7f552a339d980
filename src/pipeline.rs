use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::info;

use crate::alerts::{AlertDispatcher, DispatchOutcome};
use crate::evaluator::StatusEvaluator;
use crate::models::{RunSummary, ScoringSummary, SignalChange};
use crate::predictions::PredictionScorer;
use crate::store::SignalStore;
use crate::thresholds::{ThresholdDirectory, ThresholdSource};

#[derive(Debug, Serialize)]
pub struct CycleReport {
    pub thresholds: &'static str,
    pub evaluation: RunSummary,
    pub predictions: ScoringSummary,
    #[serde(skip)]
    pub changes: Vec<SignalChange>,
}

/// Evaluator then scorer over one snapshot of the latest data points.
pub async fn run_cycle<S: SignalStore + ?Sized>(store: &S) -> anyhow::Result<CycleReport> {
    let latest = store
        .latest_data_points()
        .await
        .context("failed to read latest signal data points")?;
    let directory = ThresholdDirectory::load(store).await;

    let evaluation = StatusEvaluator::new(store)
        .run(&directory, &latest)
        .await
        .context("failed to read signal statuses")?;
    let predictions = PredictionScorer::new(store)
        .run(&latest, Utc::now())
        .await
        .context("failed to read due predictions")?;

    Ok(CycleReport {
        thresholds: match directory.source() {
            ThresholdSource::Dynamic => "dynamic",
            ThresholdSource::Fallback => "fallback",
        },
        evaluation: evaluation.summary,
        predictions,
        changes: evaluation.changes,
    })
}

/// Submits every change to the dispatcher and waits for all of them to resolve.
pub async fn forward_changes(
    dispatcher: &AlertDispatcher,
    changes: &[SignalChange],
) -> Vec<DispatchOutcome> {
    if changes.is_empty() {
        return Vec::new();
    }
    let outcomes = join_all(
        changes
            .iter()
            .map(|change| dispatcher.submit(change.clone())),
    )
    .await;
    let delivered = outcomes.iter().filter(|o| o.is_delivered()).count();
    info!(
        changes = changes.len(),
        delivered,
        failed = changes.len() - delivered,
        "Forwarded status changes"
    );
    outcomes
}
