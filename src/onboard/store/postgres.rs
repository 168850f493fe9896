use super::{Store, StoreError};
use crate::onboard::models::{MigrationRecord, NewMigrationRecord, NewOtp, NewUser, Otp, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Postgres, Transaction};
use tracing::{info_span, Instrument};

pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const USER_COLUMNS: &str =
    "id, full_name, email, phone_number, password_hash, is_verified, created_at";
const OTP_COLUMNS: &str = "id, user_id, code, is_used, created_at, expires_at";

const USERS_EMAIL_KEY: &str = "users_email_key";
const USERS_PHONE_NUMBER_KEY: &str = "users_phone_number_key";

macro_rules! db_span {
    ($operation:expr, $statement:expr) => {
        info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = $operation,
            db.statement = $statement
        )
    };
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error if any schema statement fails.
    pub async fn apply_schema(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for schema setup")?;

        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&mut *conn)
                .instrument(db_span!("DDL", statement.as_str()))
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }

        Ok(())
    }

    async fn lock_user(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
    ) -> Result<bool, StoreError> {
        let query = "SELECT id FROM users WHERE id = $1 FOR UPDATE";
        let row: Option<(i64,)> = sqlx::query_as(query)
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .instrument(db_span!("SELECT", query))
            .await?;
        Ok(row.is_some())
    }
}

/// Map unique violations on `users` to the matching domain conflict.
fn map_unique_violation(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.constraint() {
            Some(USERS_EMAIL_KEY) => return StoreError::DuplicateEmail,
            Some(USERS_PHONE_NUMBER_KEY) => return StoreError::DuplicatePhone,
            _ => {}
        }
    }
    StoreError::Database(err)
}

pub(crate) fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await?;
        conn.ping()
            .instrument(info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await?;
        Ok(())
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span!("SELECT", query.as_str()))
            .await?;
        Ok(user)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let query = "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)";
        let (exists,): (bool,) = sqlx::query_as(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(db_span!("SELECT", query))
            .await?;
        Ok(exists)
    }

    async fn phone_exists(&self, phone_number: &str) -> Result<bool, StoreError> {
        let query = "SELECT EXISTS(SELECT 1 FROM users WHERE phone_number = $1)";
        let (exists,): (bool,) = sqlx::query_as(query)
            .bind(phone_number)
            .fetch_one(&self.pool)
            .instrument(db_span!("SELECT", query))
            .await?;
        Ok(exists)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let users = sqlx::query_as::<_, User>(&query)
            .fetch_all(&self.pool)
            .instrument(db_span!("SELECT", query.as_str()))
            .await?;
        Ok(users)
    }

    async fn create_user(&self, user: NewUser, otp: NewOtp) -> Result<(User, Otp), StoreError> {
        let mut tx = self.pool.begin().await?;

        let insert_user = format!(
            "INSERT INTO users (full_name, email, phone_number, password_hash, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&insert_user)
            .bind(&user.full_name)
            .bind(&user.email)
            .bind(&user.phone_number)
            .bind(&user.password_hash)
            .bind(user.created_at)
            .fetch_one(&mut *tx)
            .instrument(db_span!("INSERT", insert_user.as_str()))
            .await
            .map_err(map_unique_violation)?;

        let insert_otp = format!(
            "INSERT INTO otps (user_id, code, created_at, expires_at) \
             VALUES ($1, $2, $3, $4) RETURNING {OTP_COLUMNS}"
        );
        let otp = sqlx::query_as::<_, Otp>(&insert_otp)
            .bind(user.id)
            .bind(&otp.code)
            .bind(otp.created_at)
            .bind(otp.expires_at)
            .fetch_one(&mut *tx)
            .instrument(db_span!("INSERT", insert_otp.as_str()))
            .await?;

        tx.commit().await?;

        Ok((user, otp))
    }

    async fn consume_otp(
        &self,
        user_id: i64,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Otp>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The row lock on the selected OTP makes a concurrent consumer wait and
        // then fail the `NOT is_used` recheck.
        let consume = format!(
            "UPDATE otps SET is_used = TRUE \
             WHERE id = ( \
                 SELECT id FROM otps \
                 WHERE user_id = $1 AND code = $2 AND NOT is_used AND expires_at > $3 \
                 ORDER BY id DESC LIMIT 1 \
                 FOR UPDATE \
             ) AND NOT is_used \
             RETURNING {OTP_COLUMNS}"
        );
        let otp = sqlx::query_as::<_, Otp>(&consume)
            .bind(user_id)
            .bind(code)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(db_span!("UPDATE", consume.as_str()))
            .await?;

        let Some(otp) = otp else {
            tx.rollback().await?;
            return Ok(None);
        };

        let verify = "UPDATE users SET is_verified = TRUE WHERE id = $1";
        let result = sqlx::query(verify)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span!("UPDATE", verify))
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::UserNotFound(user_id));
        }

        tx.commit().await?;

        Ok(Some(otp))
    }

    async fn replace_otp(&self, user_id: i64, otp: NewOtp) -> Result<(u64, Otp), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize resends for the same user.
        if !Self::lock_user(&mut tx, user_id).await? {
            tx.rollback().await?;
            return Err(StoreError::UserNotFound(user_id));
        }

        let invalidate = "UPDATE otps SET is_used = TRUE WHERE user_id = $1 AND NOT is_used";
        let invalidated = sqlx::query(invalidate)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span!("UPDATE", invalidate))
            .await?
            .rows_affected();

        let insert = format!(
            "INSERT INTO otps (user_id, code, created_at, expires_at) \
             VALUES ($1, $2, $3, $4) RETURNING {OTP_COLUMNS}"
        );
        let otp = sqlx::query_as::<_, Otp>(&insert)
            .bind(user_id)
            .bind(&otp.code)
            .bind(otp.created_at)
            .bind(otp.expires_at)
            .fetch_one(&mut *tx)
            .instrument(db_span!("INSERT", insert.as_str()))
            .await?;

        tx.commit().await?;

        Ok((invalidated, otp))
    }

    async fn list_otps(&self, user_id: i64) -> Result<Vec<Otp>, StoreError> {
        let query = format!("SELECT {OTP_COLUMNS} FROM otps WHERE user_id = $1 ORDER BY id");
        let otps = sqlx::query_as::<_, Otp>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span!("SELECT", query.as_str()))
            .await?;
        Ok(otps)
    }

    async fn insert_migration(
        &self,
        record: NewMigrationRecord,
    ) -> Result<MigrationRecord, StoreError> {
        let query = "INSERT INTO migration_records (old_system_user_id, new_system_user_id, migrated_at) \
                     VALUES ($1, $2, $3) \
                     RETURNING id, old_system_user_id, new_system_user_id, migrated_at";
        sqlx::query_as::<_, MigrationRecord>(query)
            .bind(&record.old_system_user_id)
            .bind(record.new_system_user_id)
            .bind(record.migrated_at)
            .fetch_one(&self.pool)
            .instrument(db_span!("INSERT", query))
            .await
            .map_err(|err| {
                if let sqlx::Error::Database(db_err) = &err {
                    if db_err.is_foreign_key_violation() {
                        return StoreError::UserNotFound(record.new_system_user_id);
                    }
                }
                StoreError::Database(err)
            })
    }

    async fn list_migrations(
        &self,
        new_system_user_id: i64,
    ) -> Result<Vec<MigrationRecord>, StoreError> {
        let query = "SELECT id, old_system_user_id, new_system_user_id, migrated_at \
                     FROM migration_records WHERE new_system_user_id = $1 ORDER BY id";
        let records = sqlx::query_as::<_, MigrationRecord>(query)
            .bind(new_system_user_id)
            .fetch_all(&self.pool)
            .instrument(db_span!("SELECT", query))
            .await?;
        Ok(records)
    }
}
