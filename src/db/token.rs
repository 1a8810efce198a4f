//! SQLite-backed refresh token registry.
//!
//! Only refresh tokens are stored, for revocation support.
//! Access tokens are stateless and short-lived.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use crate::registry::{RefreshRegistry, RegistryEntry, RegistryError};

/// Store for managing registered refresh tokens.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    jti: String,
    subject: String,
    issued_at: i64,
    expires_at: i64,
}

impl From<TokenRow> for RegistryEntry {
    fn from(row: TokenRow) -> Self {
        Self {
            jti: row.jti,
            subject: row.subject,
            issued_at: row.issued_at.max(0) as u64,
            expires_at: row.expires_at.max(0) as u64,
        }
    }
}

/// SQLite stores INTEGER as i64; clamp instead of wrapping for far-future expiries.
fn to_sql_time(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

const UPSERT: &str = "INSERT INTO refresh_tokens (jti, subject, issued_at, expires_at) VALUES (?, ?, ?, ?)
     ON CONFLICT(jti) DO UPDATE SET subject = excluded.subject, issued_at = excluded.issued_at, expires_at = excluded.expires_at";

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshRegistry for TokenStore {
    async fn put(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        sqlx::query(UPSERT)
            .bind(&entry.jti)
            .bind(&entry.subject)
            .bind(to_sql_time(entry.issued_at))
            .bind(to_sql_time(entry.expires_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn lookup(&self, jti: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        let row: Option<TokenRow> = sqlx::query_as(
            "SELECT jti, subject, issued_at, expires_at FROM refresh_tokens WHERE jti = ?",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RegistryEntry::from))
    }

    async fn revoke(&self, jti: &str) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE jti = ?")
            .bind(jti)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all(&self, subject: &str) -> Result<u64, RegistryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE subject = ?")
            .bind(subject)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace(&self, new: RegistryEntry, old_jti: &str) -> Result<bool, RegistryError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM refresh_tokens WHERE jti = ?")
            .bind(old_jti)
            .execute(&mut *tx)
            .await?;
        if removed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(UPSERT)
            .bind(&new.jti)
            .bind(&new.subject)
            .bind(to_sql_time(new.issued_at))
            .bind(to_sql_time(new.expires_at))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list(&self, subject: &str, now: u64) -> Result<Vec<RegistryEntry>, RegistryError> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            "SELECT jti, subject, issued_at, expires_at FROM refresh_tokens WHERE subject = ? AND expires_at > ? ORDER BY issued_at DESC",
        )
        .bind(subject)
        .bind(to_sql_time(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RegistryEntry::from).collect())
    }

    async fn sweep_expired(&self, now: u64) -> Result<u64, RegistryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(to_sql_time(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
