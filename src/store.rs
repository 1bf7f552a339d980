use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    DataPoint, Outcome, Prediction, SignalChange, SignalKey, SignalStatus, Status, ThresholdRow,
};

/// Latest data point per signal, read once per evaluation cycle.
pub type LatestPoints = HashMap<SignalKey, DataPoint>;

/// Row-store contract the evaluation engines run against.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn signal_statuses(&self) -> Result<Vec<SignalStatus>, StoreError>;

    async fn latest_data_points(&self) -> Result<LatestPoints, StoreError>;

    /// Enabled rows of the dynamic threshold table, unvalidated.
    async fn enabled_thresholds(&self) -> Result<Vec<ThresholdRow>, StoreError>;

    /// Compare-and-set against the `expected` status the caller read. Returns false when
    /// the row is gone, was pinned by an override, or was moved by another run meanwhile.
    async fn update_status(
        &self,
        key: &SignalKey,
        expected: &str,
        status: Status,
        editor: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn insert_change(&self, change: &SignalChange) -> Result<(), StoreError>;

    /// Unscored predictions whose target date is on or before `today`.
    async fn due_predictions(&self, today: NaiveDate) -> Result<Vec<Prediction>, StoreError>;

    async fn signal_lookup(&self) -> Result<HashMap<Uuid, SignalKey>, StoreError>;

    /// Conditional on `scored_at IS NULL`; returns false when another run got there first.
    async fn record_outcome(
        &self,
        id: Uuid,
        outcome: Outcome,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryState {
        pub statuses: Vec<SignalStatus>,
        pub points: Vec<DataPoint>,
        pub thresholds: Vec<ThresholdRow>,
        pub changes: Vec<SignalChange>,
        pub predictions: Vec<Prediction>,
        pub signals: HashMap<Uuid, SignalKey>,
        /// When set, `signal_statuses` keeps returning this snapshot.
        pub frozen_statuses: Option<Vec<SignalStatus>>,
        pub fail_thresholds: bool,
        pub fail_change_insert: bool,
        pub fail_status_update_for: Option<SignalKey>,
        pub fail_outcome_for: Option<Uuid>,
        pub outcome_writes: usize,
    }

    /// In-memory store with failure injection for engine tests.
    #[derive(Default)]
    pub struct MemoryStore {
        pub state: Mutex<MemoryState>,
    }

    impl MemoryStore {
        pub fn with_status(self, domino_id: i32, name: &str, status: &str) -> Self {
            self.state.lock().unwrap().statuses.push(SignalStatus {
                key: SignalKey::new(domino_id, name),
                status: status.to_string(),
                is_override: false,
                updated_at: None,
                updated_by: None,
            });
            self
        }

        pub fn with_point(self, domino_id: i32, name: &str, raw: &str, at: DateTime<Utc>) -> Self {
            self.state.lock().unwrap().points.push(DataPoint {
                key: SignalKey::new(domino_id, name),
                raw_value: raw.to_string(),
                created_at: at,
            });
            self
        }

        pub fn with_threshold(
            self,
            domino_id: i32,
            name: &str,
            comparator: &str,
            amber: Option<f64>,
            red: Option<f64>,
        ) -> Self {
            self.state.lock().unwrap().thresholds.push(ThresholdRow {
                domino_id,
                signal_name: name.to_string(),
                comparator: comparator.to_string(),
                amber,
                red,
            });
            self
        }

        pub fn status_of(&self, domino_id: i32, name: &str) -> Option<String> {
            let key = SignalKey::new(domino_id, name);
            self.state
                .lock()
                .unwrap()
                .statuses
                .iter()
                .find(|s| s.key == key)
                .map(|s| s.status.clone())
        }

        pub fn change_count(&self) -> usize {
            self.state.lock().unwrap().changes.len()
        }
    }

    #[async_trait]
    impl SignalStore for MemoryStore {
        async fn signal_statuses(&self) -> Result<Vec<SignalStatus>, StoreError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .frozen_statuses
                .clone()
                .unwrap_or_else(|| state.statuses.clone()))
        }

        async fn latest_data_points(&self) -> Result<LatestPoints, StoreError> {
            let state = self.state.lock().unwrap();
            let mut latest = LatestPoints::new();
            // Later insertion wins a timestamp tie, like `id DESC` in Postgres.
            for point in &state.points {
                match latest.get(&point.key) {
                    Some(existing) if existing.created_at > point.created_at => {}
                    _ => {
                        latest.insert(point.key.clone(), point.clone());
                    }
                }
            }
            Ok(latest)
        }

        async fn enabled_thresholds(&self) -> Result<Vec<ThresholdRow>, StoreError> {
            let state = self.state.lock().unwrap();
            if state.fail_thresholds {
                return Err(StoreError::Unavailable("thresholds offline".to_string()));
            }
            Ok(state.thresholds.clone())
        }

        async fn update_status(
            &self,
            key: &SignalKey,
            expected: &str,
            status: Status,
            editor: &str,
            at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_status_update_for.as_ref() == Some(key) {
                return Err(StoreError::Unavailable(format!("cannot update {key}")));
            }
            match state
                .statuses
                .iter_mut()
                .find(|s| &s.key == key && !s.is_override && s.status == expected)
            {
                Some(row) => {
                    row.status = status.as_str().to_string();
                    row.updated_at = Some(at);
                    row.updated_by = Some(editor.to_string());
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn insert_change(&self, change: &SignalChange) -> Result<(), StoreError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_change_insert {
                return Err(StoreError::Unavailable("audit table offline".to_string()));
            }
            state.changes.push(change.clone());
            Ok(())
        }

        async fn due_predictions(&self, today: NaiveDate) -> Result<Vec<Prediction>, StoreError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .predictions
                .iter()
                .filter(|p| p.scored_at.is_none() && p.outcome.is_none() && p.target_date <= today)
                .cloned()
                .collect())
        }

        async fn signal_lookup(&self) -> Result<HashMap<Uuid, SignalKey>, StoreError> {
            Ok(self.state.lock().unwrap().signals.clone())
        }

        async fn record_outcome(
            &self,
            id: Uuid,
            outcome: Outcome,
            at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_outcome_for == Some(id) {
                return Err(StoreError::Unavailable(format!("cannot score {id}")));
            }
            let Some(row) = state
                .predictions
                .iter_mut()
                .find(|p| p.id == id && p.scored_at.is_none())
            else {
                return Ok(false);
            };
            row.outcome = Some(outcome);
            row.scored_at = Some(at);
            state.outcome_writes += 1;
            Ok(true)
        }
    }
}
