//! SQLite user repository implementation.

use chrono::Utc;
use sqlx::Row;
use stepline_core::repository::user::UserRepository;
use stepline_types::error::RepositoryError;
use stepline_types::user::{NewUser, User, UserUpdate};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

const USER_COLUMNS: &str = "id, name, email, email_verified, role, created_at, updated_at";

/// SQLite-backed implementation of `UserRepository`.
#[derive(Clone)]
pub struct SqliteUserRepository {
    pool: DatabasePool,
}

impl SqliteUserRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        executor: &sqlx::SqlitePool,
        id: i64,
    ) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(query_error)?;

        row.map(|r| {
            UserRow::from_row(&r)
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .into_user()
        })
        .transpose()
    }
}

struct UserRow {
    id: i64,
    name: String,
    email: String,
    email_verified: bool,
    role: Option<String>,
    created_at: String,
    updated_at: String,
}

impl UserRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            email_verified: row.try_get("email_verified")?,
            role: row.try_get("role")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_user(self) -> Result<User, RepositoryError> {
        Ok(User {
            id: self.id,
            name: self.name,
            email: self.email,
            email_verified: self.email_verified,
            role: self.role,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

impl UserRepository for SqliteUserRepository {
    async fn get_user(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        self.fetch(&self.pool.reader, id).await
    }

    async fn list_users(&self, limit: u32, offset: u32) -> Result<Vec<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC LIMIT ? OFFSET ?");
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                UserRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_user()
            })
            .collect()
    }

    async fn update_user(&self, id: i64, update: &UserUpdate) -> Result<User, RepositoryError> {
        // The writer pool has a single connection, so read-modify-write here
        // cannot interleave with another write.
        let mut user = self
            .fetch(&self.pool.writer, id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        update.apply(&mut user, Utc::now());

        sqlx::query(
            "UPDATE users SET name = ?, email = ?, email_verified = ?, role = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.role)
        .bind(format_datetime(&user.updated_at))
        .bind(id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(user)
    }

    async fn create_user(&self, new_user: &NewUser) -> Result<User, RepositoryError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (name, email, email_verified, role, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(new_user.email_verified)
        .bind(&new_user.role)
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(User {
            id: result.last_insert_rowid(),
            name: new_user.name.clone(),
            email: new_user.email.clone(),
            email_verified: new_user.email_verified,
            role: new_user.role.clone(),
            created_at: now,
            updated_at: now,
        })
    }
}
