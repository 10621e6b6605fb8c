/// Item attempt history
///
/// One row per Worker Task run. The worker opens a row in `running` when it
/// starts and closes it with the outcome. Rows are never deleted except by
/// deleting the Item, so re-queueing keeps the history of earlier task ids.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE item_attempts (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     item_id UUID NOT NULL REFERENCES items(id) ON DELETE CASCADE,
///     task_id UUID NOT NULL,
///     attempt INTEGER NOT NULL,
///     outcome VARCHAR(16) NOT NULL DEFAULT 'running',
///     error TEXT,
///     started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     finished_at TIMESTAMPTZ,
///     UNIQUE (task_id, attempt)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres};
use std::str::FromStr;
use uuid::Uuid;

/// Outcome of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    /// Run in progress (or the worker died mid-run)
    Running,
    Succeeded,
    /// Failed transiently, another run is scheduled
    Retrying,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Running => "running",
            AttemptOutcome::Succeeded => "succeeded",
            AttemptOutcome::Retrying => "retrying",
            AttemptOutcome::Failed => "failed",
        }
    }
}

impl FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(AttemptOutcome::Running),
            "succeeded" => Ok(AttemptOutcome::Succeeded),
            "retrying" => Ok(AttemptOutcome::Retrying),
            "failed" => Ok(AttemptOutcome::Failed),
            other => Err(format!("unknown attempt outcome: {}", other)),
        }
    }
}

/// One Worker Task run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ItemAttempt {
    pub id: Uuid,

    pub item_id: Uuid,

    /// Job id the run belonged to
    pub task_id: Uuid,

    /// 1-based run number within `task_id`
    pub attempt: i32,

    /// Stored as text; see [`ItemAttempt::outcome`]
    pub outcome: String,

    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl ItemAttempt {
    /// Parsed outcome, `Running` for unrecognised values
    pub fn outcome(&self) -> AttemptOutcome {
        self.outcome.parse().unwrap_or(AttemptOutcome::Running)
    }

    /// Opens a run in `running` state
    pub async fn start<'e, E>(executor: E, item_id: Uuid, task_id: Uuid, attempt: i32) -> Result<Self, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, ItemAttempt>(
            r#"
            INSERT INTO item_attempts (item_id, task_id, attempt)
            VALUES ($1, $2, $3)
            RETURNING id, item_id, task_id, attempt, outcome, error, started_at, finished_at
            "#,
        )
        .bind(item_id)
        .bind(task_id)
        .bind(attempt)
        .fetch_one(executor)
        .await?;

        Ok(row)
    }

    /// Closes a running row with its outcome
    ///
    /// Returns false if the row was already closed.
    pub async fn finish(
        pool: &PgPool,
        task_id: Uuid,
        attempt: i32,
        outcome: AttemptOutcome,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE item_attempts
            SET outcome = $3,
                error = $4,
                finished_at = NOW()
            WHERE task_id = $1 AND attempt = $2 AND outcome = 'running'
            "#,
        )
        .bind(task_id)
        .bind(attempt)
        .bind(outcome.as_str())
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists an item's runs, oldest first
    pub async fn list_for_item(pool: &PgPool, item_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ItemAttempt>(
            r#"
            SELECT id, item_id, task_id, attempt, outcome, error, started_at, finished_at
            FROM item_attempts
            WHERE item_id = $1
            ORDER BY started_at ASC, attempt ASC
            "#,
        )
        .bind(item_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_round_trip() {
        for outcome in [
            AttemptOutcome::Running,
            AttemptOutcome::Succeeded,
            AttemptOutcome::Retrying,
            AttemptOutcome::Failed,
        ] {
            assert_eq!(outcome.as_str().parse::<AttemptOutcome>(), Ok(outcome));
        }
        assert!("exploded".parse::<AttemptOutcome>().is_err());
    }

    #[test]
    fn test_unknown_outcome_reads_as_running() {
        let row = ItemAttempt {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            attempt: 1,
            outcome: "bogus".to_string(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        assert_eq!(row.outcome(), AttemptOutcome::Running);
    }
}
