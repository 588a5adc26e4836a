//! Postgres storage for session entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use sqlx::PgPool;
use workbench_access::{SessionBackend, SessionError, SessionId};

/// Session backend over the `session_entries` table.
///
/// Rows past `expires_at` read as absent and are purged by
/// [`SessionBackend::delete_expired`].
pub struct PgSessionBackend {
    pool: PgPool,
}

impl PgSessionBackend {
    /// Creates a new session backend.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend_error(e: sqlx::Error) -> SessionError {
    SessionError::Backend {
        details: e.to_string(),
    }
}

#[async_trait]
impl SessionBackend for PgSessionBackend {
    async fn put(
        &self,
        session: &SessionId,
        key: &str,
        value: serde_json::Value,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Report<SessionError>> {
        sqlx::query(
            r#"
            INSERT INTO session_entries (session_id, key, value, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, key)
            DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(session.as_str())
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(())
    }

    async fn get(
        &self,
        session: &SessionId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Report<SessionError>> {
        let value = sqlx::query_scalar(
            r#"
            SELECT value
            FROM session_entries
            WHERE session_id = $1 AND key = $2 AND expires_at > NOW()
            "#,
        )
        .bind(session.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(value)
    }

    async fn take(
        &self,
        session: &SessionId,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Report<SessionError>> {
        // A single DELETE .. RETURNING lets at most one caller see the row.
        let value = sqlx::query_scalar(
            r#"
            DELETE FROM session_entries
            WHERE session_id = $1 AND key = $2 AND expires_at > NOW()
            RETURNING value
            "#,
        )
        .bind(session.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(value)
    }

    async fn remove(&self, session: &SessionId, key: &str) -> Result<(), Report<SessionError>> {
        sqlx::query(
            r#"
            DELETE FROM session_entries
            WHERE session_id = $1 AND key = $2
            "#,
        )
        .bind(session.as_str())
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(())
    }

    async fn touch(
        &self,
        session: &SessionId,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, Report<SessionError>> {
        let result = sqlx::query(
            r#"
            UPDATE session_entries
            SET expires_at = $3
            WHERE session_id = $1 AND key = $2 AND expires_at > NOW()
            "#,
        )
        .bind(session.as_str())
        .bind(key)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn destroy(&self, session: &SessionId) -> Result<(), Report<SessionError>> {
        sqlx::query(
            r#"
            DELETE FROM session_entries
            WHERE session_id = $1
            "#,
        )
        .bind(session.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, Report<SessionError>> {
        let result = sqlx::query(
            r#"
            DELETE FROM session_entries
            WHERE expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(result.rows_affected())
    }
}
