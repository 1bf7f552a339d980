use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::{Comparator, SignalKey, ThresholdDefinition, ThresholdRow};
use crate::store::SignalStore;

/// Compiled-in thresholds used whenever the dynamic table is unusable.
const FALLBACK_THRESHOLDS: &[(i32, &str, Comparator, f64, f64)] = &[
    (1, "Hyperscaler Capex Growth YoY", Comparator::Lt, 20.0, 10.0),
    (2, "Initial Jobless Claims", Comparator::Gt, 250_000.0, 300_000.0),
    (2, "Unemployment Rate", Comparator::Gt, 4.5, 5.5),
    (3, "Consumer Sentiment Index", Comparator::Lt, 65.0, 55.0),
    (3, "Real Retail Sales Growth YoY", Comparator::Lt, 1.0, -1.0),
    (4, "Credit Card Delinquency Rate", Comparator::Gt, 3.5, 4.5),
    (4, "High Yield Spread (bps)", Comparator::Gt, 450.0, 600.0),
    (5, "SaaS Net Revenue Retention", Comparator::Lt, 120.0, 110.0),
    (5, "Software Seat Growth YoY", Comparator::Lt, 5.0, 0.0),
    (6, "VIX", Comparator::Gt, 25.0, 35.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdSource {
    Dynamic,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct ThresholdDirectory {
    source: ThresholdSource,
    entries: HashMap<SignalKey, ThresholdDefinition>,
}

impl ThresholdDirectory {
    /// Loads the dynamic table, or the fallback table when the dynamic one is unreadable,
    /// empty, or has any unusable row. Never blends the two.
    pub async fn load<S: SignalStore + ?Sized>(store: &S) -> Self {
        match store.enabled_thresholds().await {
            Ok(rows) => match Self::from_rows(&rows) {
                Ok(directory) => {
                    debug!(count = directory.len(), "Loaded dynamic thresholds");
                    directory
                }
                Err(reason) => {
                    warn!(%reason, "Dynamic thresholds unusable, using fallback table");
                    Self::fallback()
                }
            },
            Err(err) => {
                warn!(error = %err, "Threshold table unreadable, using fallback table");
                Self::fallback()
            }
        }
    }

    pub fn from_rows(rows: &[ThresholdRow]) -> Result<Self, String> {
        if rows.is_empty() {
            return Err("no enabled rows".to_string());
        }

        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            let key = SignalKey::new(row.domino_id, row.signal_name.clone());
            let (Some(amber), Some(red)) = (row.amber, row.red) else {
                return Err(format!("{key} is missing a cut value"));
            };
            let comparator = row
                .comparator
                .parse::<Comparator>()
                .map_err(|err| format!("{key}: {err}"))?;
            entries.insert(
                key.clone(),
                ThresholdDefinition {
                    key,
                    comparator,
                    amber,
                    red,
                },
            );
        }

        Ok(Self {
            source: ThresholdSource::Dynamic,
            entries,
        })
    }

    pub fn fallback() -> Self {
        let entries = FALLBACK_THRESHOLDS
            .iter()
            .map(|&(domino_id, name, comparator, amber, red)| {
                let key = SignalKey::new(domino_id, name);
                (
                    key.clone(),
                    ThresholdDefinition {
                        key,
                        comparator,
                        amber,
                        red,
                    },
                )
            })
            .collect();

        Self {
            source: ThresholdSource::Fallback,
            entries,
        }
    }

    pub fn resolve(&self, domino_id: i32, signal_name: &str) -> Option<&ThresholdDefinition> {
        self.entries.get(&SignalKey::new(domino_id, signal_name))
    }

    pub fn source(&self) -> ThresholdSource {
        self.source
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn empty_table_uses_fallback() {
        let store = MemoryStore::default();
        let directory = ThresholdDirectory::load(&store).await;

        assert_eq!(directory.source(), ThresholdSource::Fallback);
        let nrr = directory
            .resolve(5, "SaaS Net Revenue Retention")
            .expect("fallback entry");
        assert_eq!(nrr.comparator, Comparator::Lt);
        assert_eq!(nrr.amber, 120.0);
        assert_eq!(nrr.red, 110.0);
    }

    #[tokio::test]
    async fn dynamic_rows_win_when_usable() {
        let store = MemoryStore::default().with_threshold(9, "Custom", "gt", Some(1.0), Some(2.0));
        let directory = ThresholdDirectory::load(&store).await;

        assert_eq!(directory.source(), ThresholdSource::Dynamic);
        assert_eq!(directory.len(), 1);
        assert!(directory.resolve(9, "Custom").is_some());
        assert!(directory.resolve(5, "SaaS Net Revenue Retention").is_none());
    }

    #[tokio::test]
    async fn one_incomplete_row_replaces_everything() {
        let store = MemoryStore::default()
            .with_threshold(9, "Custom", "gt", Some(1.0), Some(2.0))
            .with_threshold(9, "Broken", "lt", Some(1.0), None);
        let directory = ThresholdDirectory::load(&store).await;

        assert_eq!(directory.source(), ThresholdSource::Fallback);
        assert!(directory.resolve(9, "Custom").is_none());
    }

    #[tokio::test]
    async fn read_failure_uses_fallback() {
        let store = MemoryStore::default().with_threshold(9, "Custom", "gt", Some(1.0), Some(2.0));
        store.state.lock().unwrap().fail_thresholds = true;
        let directory = ThresholdDirectory::load(&store).await;

        assert_eq!(directory.source(), ThresholdSource::Fallback);
    }

    #[test]
    fn keys_match_exactly() {
        let directory = ThresholdDirectory::fallback();
        assert!(directory.resolve(5, "saas net revenue retention").is_none());
        assert!(directory.resolve(4, "SaaS Net Revenue Retention").is_none());
    }

    #[test]
    fn unknown_comparator_is_unusable() {
        let rows = vec![ThresholdRow {
            domino_id: 1,
            signal_name: "X".to_string(),
            comparator: "between".to_string(),
            amber: Some(1.0),
            red: Some(2.0),
        }];
        assert!(ThresholdDirectory::from_rows(&rows).is_err());
    }
}
