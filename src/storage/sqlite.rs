use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::reminder::{Reminder, ReminderId};
use crate::user::{Role, RoleEntry, UserId};

use super::{
    BlockEntry, BlockStorage, NewReminder, PendingDelete, PendingDeleteStorage, ReminderStorage,
    RoleStorage, StorageError,
};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS reminders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fire_at TEXT NOT NULL,
        text TEXT NOT NULL,
        created_by INTEGER NOT NULL,
        created_by_name TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS roles (
        user_id INTEGER PRIMARY KEY,
        role TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS blocked_users (
        user_id INTEGER PRIMARY KEY,
        reason TEXT NOT NULL,
        blocked_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pending_deletes (
        reminder_id INTEGER PRIMARY KEY,
        requested_by INTEGER NOT NULL,
        requested_at TEXT NOT NULL
    )",
];

pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

#[derive(FromRow)]
struct ReminderRow {
    id: i64,
    fire_at: DateTime<Utc>,
    text: String,
    created_by: i64,
    created_by_name: String,
    created_at: DateTime<Utc>,
}

impl From<ReminderRow> for Reminder {
    fn from(row: ReminderRow) -> Self {
        Reminder {
            id: row.id,
            fire_at: row.fire_at,
            text: row.text,
            created_by: row.created_by,
            created_by_name: row.created_by_name,
            created_at: row.created_at,
        }
    }
}

pub struct SqliteReminderStorage {
    pool: SqlitePool,
}

impl SqliteReminderStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReminderStorage for SqliteReminderStorage {
    async fn insert(&self, reminder: NewReminder) -> Result<Reminder, StorageError> {
        let created = sqlx::query_as::<_, ReminderRow>(
            "INSERT INTO reminders (fire_at, text, created_by, created_by_name, created_at)
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(reminder.fire_at)
        .bind(&reminder.text)
        .bind(reminder.created_by)
        .bind(&reminder.created_by_name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(created.into())
    }

    async fn get(&self, id: ReminderId) -> Result<Option<Reminder>, StorageError> {
        let reminder = sqlx::query_as::<_, ReminderRow>("SELECT * FROM reminders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(reminder.map(Into::into))
    }

    async fn delete(&self, id: ReminderId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM reminders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_fire_time(&self) -> Result<Vec<Reminder>, StorageError> {
        let reminders =
            sqlx::query_as::<_, ReminderRow>("SELECT * FROM reminders ORDER BY fire_at, id")
                .fetch_all(&self.pool)
                .await?;

        Ok(reminders.into_iter().map(Into::into).collect())
    }
}

#[derive(FromRow)]
struct RoleRow {
    user_id: i64,
    role: String,
}

fn parse_role(value: &str) -> Result<Role, StorageError> {
    match value {
        "superadmin" => Ok(Role::Superadmin),
        "admin" => Ok(Role::Admin),
        other => Err(StorageError::Corrupt(format!("unknown role {other:?}"))),
    }
}

pub struct SqliteRoleStorage {
    pool: SqlitePool,
}

impl SqliteRoleStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleStorage for SqliteRoleStorage {
    async fn role_of(&self, user_id: UserId) -> Result<Option<Role>, StorageError> {
        let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| parse_role(&row.role)).transpose()
    }

    async fn insert(&self, user_id: UserId, role: Role) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO roles (user_id, role) VALUES (?, ?)")
            .bind(user_id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn remove_admin(&self, user_id: UserId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM roles WHERE user_id = ? AND role = 'admin'")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<RoleEntry>, StorageError> {
        let rows = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RoleEntry {
                    user_id: row.user_id,
                    role: parse_role(&row.role)?,
                })
            })
            .collect()
    }
}

#[derive(FromRow)]
struct BlockRow {
    user_id: i64,
    reason: String,
    blocked_at: DateTime<Utc>,
}

impl From<BlockRow> for BlockEntry {
    fn from(row: BlockRow) -> Self {
        BlockEntry {
            user_id: row.user_id,
            reason: row.reason,
            blocked_at: row.blocked_at,
        }
    }
}

pub struct SqliteBlockStorage {
    pool: SqlitePool,
}

impl SqliteBlockStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlockStorage for SqliteBlockStorage {
    async fn upsert(
        &self,
        user_id: UserId,
        reason: &str,
        blocked_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO blocked_users (user_id, reason, blocked_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE
             SET reason = excluded.reason, blocked_at = excluded.blocked_at",
        )
        .bind(user_id)
        .bind(reason)
        .bind(blocked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<BlockEntry>, StorageError> {
        let entry = sqlx::query_as::<_, BlockRow>("SELECT * FROM blocked_users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry.map(Into::into))
    }

    async fn remove(&self, user_id: UserId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM blocked_users WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<BlockEntry>, StorageError> {
        let entries =
            sqlx::query_as::<_, BlockRow>("SELECT * FROM blocked_users ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(entries.into_iter().map(Into::into).collect())
    }
}

#[derive(FromRow)]
struct PendingDeleteRow {
    reminder_id: i64,
    requested_by: i64,
    requested_at: DateTime<Utc>,
}

impl From<PendingDeleteRow> for PendingDelete {
    fn from(row: PendingDeleteRow) -> Self {
        PendingDelete {
            reminder_id: row.reminder_id,
            requested_by: row.requested_by,
            requested_at: row.requested_at,
        }
    }
}

pub struct SqlitePendingDeleteStorage {
    pool: SqlitePool,
}

impl SqlitePendingDeleteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingDeleteStorage for SqlitePendingDeleteStorage {
    async fn upsert(&self, request: PendingDelete) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO pending_deletes (reminder_id, requested_by, requested_at)
             VALUES (?, ?, ?)
             ON CONFLICT(reminder_id) DO UPDATE
             SET requested_by = excluded.requested_by, requested_at = excluded.requested_at",
        )
        .bind(request.reminder_id)
        .bind(request.requested_by)
        .bind(request.requested_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, reminder_id: ReminderId) -> Result<Option<PendingDelete>, StorageError> {
        let request = sqlx::query_as::<_, PendingDeleteRow>(
            "SELECT * FROM pending_deletes WHERE reminder_id = ?",
        )
        .bind(reminder_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request.map(Into::into))
    }

    async fn remove(&self, reminder_id: ReminderId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM pending_deletes WHERE reminder_id = ?")
            .bind(reminder_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
