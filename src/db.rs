use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    DataPoint, Outcome, Prediction, SignalChange, SignalKey, SignalStatus, Status, ThresholdRow,
};
use crate::predictions::parse_condition;
use crate::store::{LatestPoints, SignalStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed store over the `domino_watch` schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn recent_changes(&self, limit: i64) -> anyhow::Result<Vec<SignalChange>> {
        let rows = sqlx::query(
            r#"
            SELECT id, domino_id, signal_name, old_status, new_status, trigger_type, reason, changed_at
            FROM domino_watch.signal_changes
            ORDER BY changed_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut changes = Vec::with_capacity(rows.len());
        for row in rows {
            changes.push(SignalChange {
                id: row.get("id"),
                domino_id: row.get("domino_id"),
                signal_name: row.get("signal_name"),
                old_status: row.get("old_status"),
                new_status: row.get("new_status"),
                trigger_type: row.get("trigger_type"),
                reason: row.get("reason"),
                changed_at: row.get("changed_at"),
            });
        }
        Ok(changes)
    }

    pub async fn open_predictions(&self) -> anyhow::Result<Vec<Prediction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, signal_id, prediction_type, condition, statement, target_date,
                   created_at, scored_at, outcome
            FROM domino_watch.predictions
            WHERE scored_at IS NULL
            ORDER BY target_date
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| prediction_from_row(row).map_err(anyhow::Error::from))
            .collect()
    }
}

fn prediction_from_row(row: &PgRow) -> Result<Prediction, StoreError> {
    let kind: String = row.try_get("prediction_type")?;
    let payload: serde_json::Value = row.try_get("condition")?;
    let (condition, fallback) = parse_condition(&kind, &payload);
    let outcome: Option<String> = row.try_get("outcome")?;
    let outcome = match outcome.as_deref() {
        None => None,
        Some("hit") => Some(Outcome::Hit),
        Some("miss") => Some(Outcome::Miss),
        Some("partial") => Some(Outcome::Partial),
        Some(other) => return Err(StoreError::InvalidRow(format!("unknown outcome '{other}'"))),
    };

    Ok(Prediction {
        id: row.try_get("id")?,
        signal_id: row.try_get("signal_id")?,
        condition,
        fallback,
        statement: row.try_get("statement")?,
        target_date: row.try_get("target_date")?,
        created_at: row.try_get("created_at")?,
        scored_at: row.try_get("scored_at")?,
        outcome,
    })
}

#[async_trait]
impl SignalStore for PgStore {
    async fn signal_statuses(&self) -> Result<Vec<SignalStatus>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT domino_id, signal_name, status, override, updated_at, updated_by
            FROM domino_watch.signal_statuses
            ORDER BY domino_id, signal_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut statuses = Vec::with_capacity(rows.len());
        for row in rows {
            statuses.push(SignalStatus {
                key: SignalKey::new(row.try_get("domino_id")?, row.try_get::<String, _>("signal_name")?),
                status: row.try_get("status")?,
                is_override: row.try_get("override")?,
                updated_at: row.try_get("updated_at")?,
                updated_by: row.try_get("updated_by")?,
            });
        }
        Ok(statuses)
    }

    async fn latest_data_points(&self) -> Result<LatestPoints, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (domino_id, signal_name) domino_id, signal_name, raw_value, created_at
            FROM domino_watch.signal_data_points
            ORDER BY domino_id, signal_name, created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut latest = LatestPoints::with_capacity(rows.len());
        for row in rows {
            let key = SignalKey::new(row.try_get("domino_id")?, row.try_get::<String, _>("signal_name")?);
            latest.insert(
                key.clone(),
                DataPoint {
                    key,
                    raw_value: row.try_get("raw_value")?,
                    created_at: row.try_get("created_at")?,
                },
            );
        }
        Ok(latest)
    }

    async fn enabled_thresholds(&self) -> Result<Vec<ThresholdRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT domino_id, signal_name, comparator, amber_value, red_value
            FROM domino_watch.signal_thresholds
            WHERE enabled
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut thresholds = Vec::with_capacity(rows.len());
        for row in rows {
            thresholds.push(ThresholdRow {
                domino_id: row.try_get("domino_id")?,
                signal_name: row.try_get("signal_name")?,
                comparator: row.try_get("comparator")?,
                amber: row.try_get("amber_value")?,
                red: row.try_get("red_value")?,
            });
        }
        Ok(thresholds)
    }

    async fn update_status(
        &self,
        key: &SignalKey,
        expected: &str,
        status: Status,
        editor: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE domino_watch.signal_statuses
            SET status = $3, updated_at = $4, updated_by = $5
            WHERE domino_id = $1 AND signal_name = $2 AND NOT override AND status = $6
            "#,
        )
        .bind(key.domino_id)
        .bind(&key.signal_name)
        .bind(status.as_str())
        .bind(at)
        .bind(editor)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_change(&self, change: &SignalChange) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO domino_watch.signal_changes
            (id, domino_id, signal_name, old_status, new_status, trigger_type, reason, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(change.id)
        .bind(change.domino_id)
        .bind(&change.signal_name)
        .bind(&change.old_status)
        .bind(&change.new_status)
        .bind(&change.trigger_type)
        .bind(&change.reason)
        .bind(change.changed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_predictions(&self, today: NaiveDate) -> Result<Vec<Prediction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, signal_id, prediction_type, condition, statement, target_date,
                   created_at, scored_at, outcome
            FROM domino_watch.predictions
            WHERE scored_at IS NULL AND outcome IS NULL AND target_date <= $1
            ORDER BY target_date, created_at
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(prediction_from_row).collect()
    }

    async fn signal_lookup(&self) -> Result<HashMap<Uuid, SignalKey>, StoreError> {
        let rows = sqlx::query("SELECT id, domino_id, signal_name FROM domino_watch.signals")
            .fetch_all(&self.pool)
            .await?;

        let mut lookup = HashMap::with_capacity(rows.len());
        for row in rows {
            lookup.insert(
                row.try_get("id")?,
                SignalKey::new(row.try_get("domino_id")?, row.try_get::<String, _>("signal_name")?),
            );
        }
        Ok(lookup)
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        outcome: Outcome,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE domino_watch.predictions
            SET outcome = $2, scored_at = $3
            WHERE id = $1 AND scored_at IS NULL
            "#,
        )
        .bind(id)
        .bind(outcome.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let statuses = vec![
        (1, "Hyperscaler Capex Growth YoY", "green"),
        (1, "Frontier Model Releases", "green"),
        (2, "Initial Jobless Claims", "green"),
        (2, "Unemployment Rate", "green"),
        (3, "Consumer Sentiment Index", "amber"),
        (3, "Real Retail Sales Growth YoY", "green"),
        (4, "Credit Card Delinquency Rate", "amber"),
        (4, "High Yield Spread (bps)", "green"),
        (5, "SaaS Net Revenue Retention", "green"),
        (5, "Software Seat Growth YoY", "green"),
        (6, "VIX", "green"),
    ];

    for (domino_id, signal_name, status) in &statuses {
        sqlx::query(
            r#"
            INSERT INTO domino_watch.signal_statuses (domino_id, signal_name, status, updated_by)
            VALUES ($1, $2, $3, 'seed')
            ON CONFLICT (domino_id, signal_name) DO NOTHING
            "#,
        )
        .bind(domino_id)
        .bind(signal_name)
        .bind(status)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO domino_watch.signals (id, domino_id, signal_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (domino_id, signal_name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(domino_id)
        .bind(signal_name)
        .execute(pool)
        .await?;
    }

    let thresholds = vec![
        (2, "Initial Jobless Claims", "gt", 250_000.0, 300_000.0),
        (2, "Unemployment Rate", "gt", 4.5, 5.5),
        (3, "Consumer Sentiment Index", "lt", 65.0, 55.0),
        (4, "Credit Card Delinquency Rate", "gt", 3.5, 4.5),
        (5, "SaaS Net Revenue Retention", "lt", 120.0, 110.0),
        (6, "VIX", "gt", 25.0, 35.0),
    ];

    for (domino_id, signal_name, comparator, amber, red) in thresholds {
        sqlx::query(
            r#"
            INSERT INTO domino_watch.signal_thresholds
            (domino_id, signal_name, comparator, amber_value, red_value, enabled)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (domino_id, signal_name) DO UPDATE
            SET comparator = EXCLUDED.comparator,
                amber_value = EXCLUDED.amber_value,
                red_value = EXCLUDED.red_value
            "#,
        )
        .bind(domino_id)
        .bind(signal_name)
        .bind(comparator)
        .bind(amber)
        .bind(red)
        .execute(pool)
        .await?;
    }

    let now = Utc::now();
    let points = vec![
        (2, "Initial Jobless Claims", "231,000", now - Duration::days(7)),
        (2, "Initial Jobless Claims", "262,000", now - Duration::hours(6)),
        (2, "Unemployment Rate", "4.3%", now - Duration::days(3)),
        (3, "Consumer Sentiment Index", "57.9 (prelim)", now - Duration::days(1)),
        (4, "Credit Card Delinquency Rate", "3.1%", now - Duration::days(2)),
        (5, "SaaS Net Revenue Retention", "118% avg", now - Duration::hours(12)),
        (6, "VIX", "19.4", now - Duration::hours(1)),
    ];

    let existing: i64 =
        sqlx::query("SELECT COUNT(*) AS count FROM domino_watch.signal_data_points")
            .fetch_one(pool)
            .await?
            .get("count");
    if existing == 0 {
        for (domino_id, signal_name, raw_value, created_at) in points {
            sqlx::query(
                r#"
                INSERT INTO domino_watch.signal_data_points (domino_id, signal_name, raw_value, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(domino_id)
            .bind(signal_name)
            .bind(raw_value)
            .bind(created_at)
            .execute(pool)
            .await?;
        }
    }

    let vix_id: Uuid = sqlx::query(
        "SELECT id FROM domino_watch.signals WHERE domino_id = 6 AND signal_name = 'VIX'",
    )
    .fetch_one(pool)
    .await
    .context("seeded VIX signal is missing")?
    .get("id");

    let today = now.date_naive();
    let predictions = vec![
        (
            Uuid::parse_str("6f1f0f2e-8a55-4a8e-9d4c-1b8a4f3c2d10")?,
            Some(vix_id),
            "threshold",
            json!({ "threshold": 30, "operator": ">" }),
            "VIX closes above 30 within the quarter",
            today - Duration::days(1),
        ),
        (
            Uuid::parse_str("0b7d9c61-3f0e-4a52-b8a1-7e2c5d9f4a21")?,
            None,
            "direction",
            json!({ "baseline": 121, "direction": "down", "domino_id": 5, "signal_name": "SaaS Net Revenue Retention" }),
            "SaaS NRR keeps sliding",
            today,
        ),
        (
            Uuid::parse_str("c3a2e8f4-1d6b-4f7a-9e0c-5b4d3a2f1e32")?,
            None,
            "range",
            json!({ "min": 4.2, "max": 4.8, "domino_id": 2, "signal_name": "Unemployment Rate" }),
            "Unemployment between 4.2% and 4.8% by year end",
            NaiveDate::from_ymd_opt(2026, 12, 31).context("invalid date")?,
        ),
    ];

    for (id, signal_id, kind, condition, statement, target_date) in predictions {
        sqlx::query(
            r#"
            INSERT INTO domino_watch.predictions
            (id, signal_id, prediction_type, condition, statement, target_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(signal_id)
        .bind(kind)
        .bind(condition)
        .bind(statement)
        .bind(target_date)
        .execute(pool)
        .await?;
    }

    Ok(())
}
