use async_trait::async_trait;
use bulwark_core::{
    Error, LockState, NewUser, User, UserId,
    error::{StorageError, utilities::DatabaseResultExt},
    repositories::UserRepository,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Row shape of the `users` table. Timestamps are unix seconds.
#[derive(Debug, sqlx::FromRow)]
struct SqliteUser {
    id: String,
    username: String,
    email: Option<String>,
    locked: bool,
    locked_until: Option<i64>,
    locked_reason: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SqliteUser> for User {
    type Error = Error;

    fn try_from(row: SqliteUser) -> Result<Self, Self::Error> {
        let locked_until = row.locked_until.map(from_timestamp).transpose()?;

        Ok(User {
            id: UserId::new(&row.id),
            username: row.username,
            email: row.email,
            lock: LockState {
                locked: row.locked,
                locked_until,
                locked_reason: row.locked_reason,
            },
            created_at: from_timestamp(row.created_at)?,
            updated_at: from_timestamp(row.updated_at)?,
        })
    }
}

pub(crate) fn from_timestamp(seconds: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        Error::Storage(StorageError::Database(format!(
            "Invalid timestamp in database: {seconds}"
        )))
    })
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, Error> {
        let now = Utc::now().timestamp();

        let row = sqlx::query_as::<_, SqliteUser>(
            r#"
            INSERT INTO users (id, username, email, locked, created_at, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4, ?5)
            RETURNING *
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.username)
        .bind(&user.email)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create user");
            StorageError::Database("Failed to create user".to_string())
        })?;

        row.try_into()
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, SqliteUser>("SELECT * FROM users WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_db_err_with_context("Failed to find user")?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, SqliteUser>("SELECT * FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_db_err_with_context("Failed to find user by username")?;

        row.map(User::try_from).transpose()
    }

    async fn update_lock_state(&self, id: &UserId, lock: &LockState) -> Result<User, Error> {
        let now = Utc::now().timestamp();

        let row = sqlx::query_as::<_, SqliteUser>(
            r#"
            UPDATE users
            SET locked = ?2, locked_until = ?3, locked_reason = ?4, updated_at = ?5
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id.as_str())
        .bind(lock.locked)
        .bind(lock.locked_until.map(|dt| dt.timestamp()))
        .bind(&lock.locked_reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %id, "Failed to update lock state");
            StorageError::Database("Failed to update lock state".to_string())
        })?;

        row.ok_or(Error::Storage(StorageError::NotFound))?.try_into()
    }

    async fn clear_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET locked = 0, locked_until = NULL, locked_reason = NULL, updated_at = ?2
            WHERE locked = 1 AND locked_until IS NOT NULL AND locked_until <= ?1
            "#,
        )
        .bind(now.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to clear expired locks");
            StorageError::Database("Failed to clear expired locks".to_string())
        })?;

        Ok(result.rows_affected())
    }

    async fn find_locked(&self) -> Result<Vec<User>, Error> {
        let rows = sqlx::query_as::<_, SqliteUser>(
            "SELECT * FROM users WHERE locked = 1 ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to list locked users")?;

        rows.into_iter().map(User::try_from).collect()
    }
}
