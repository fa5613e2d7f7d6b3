mod memory;
mod sqlite;

pub use memory::{
    InMemoryBlockStorage, InMemoryPendingDeleteStorage, InMemoryReminderStorage,
    InMemoryRoleStorage,
};
pub use sqlite::{
    SqliteBlockStorage, SqlitePendingDeleteStorage, SqliteReminderStorage, SqliteRoleStorage,
    init_schema,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::reminder::{Reminder, ReminderId};
use crate::user::{Role, RoleEntry, UserId};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

pub struct NewReminder {
    pub fire_at: DateTime<Utc>,
    pub text: String,
    pub created_by: UserId,
    pub created_by_name: String,
}

#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub user_id: UserId,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PendingDelete {
    pub reminder_id: ReminderId,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReminderStorage: Send + Sync {
    async fn insert(&self, reminder: NewReminder) -> Result<Reminder, StorageError>;
    async fn get(&self, id: ReminderId) -> Result<Option<Reminder>, StorageError>;
    async fn delete(&self, id: ReminderId) -> Result<bool, StorageError>;
    /// Full listing ordered by fire time ascending. Callers that only want
    /// still-future reminders filter by `fire_at >= now` themselves.
    async fn list_by_fire_time(&self) -> Result<Vec<Reminder>, StorageError>;
}

#[async_trait]
pub trait RoleStorage: Send + Sync {
    async fn role_of(&self, user_id: UserId) -> Result<Option<Role>, StorageError>;
    async fn insert(&self, user_id: UserId, role: Role) -> Result<(), StorageError>;
    /// Removes only `admin` rows; the superadmin entry is untouchable here.
    async fn remove_admin(&self, user_id: UserId) -> Result<bool, StorageError>;
    async fn list(&self) -> Result<Vec<RoleEntry>, StorageError>;
}

#[async_trait]
pub trait BlockStorage: Send + Sync {
    async fn upsert(
        &self,
        user_id: UserId,
        reason: &str,
        blocked_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn get(&self, user_id: UserId) -> Result<Option<BlockEntry>, StorageError>;
    async fn remove(&self, user_id: UserId) -> Result<bool, StorageError>;
    async fn list(&self) -> Result<Vec<BlockEntry>, StorageError>;
}

#[async_trait]
pub trait PendingDeleteStorage: Send + Sync {
    /// At most one request per reminder; a repeated request overwrites the
    /// requester of record.
    async fn upsert(&self, request: PendingDelete) -> Result<(), StorageError>;
    async fn get(&self, reminder_id: ReminderId) -> Result<Option<PendingDelete>, StorageError>;
    async fn remove(&self, reminder_id: ReminderId) -> Result<bool, StorageError>;
}
