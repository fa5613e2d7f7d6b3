use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::reminder::{Reminder, ReminderId};
use crate::user::{Role, RoleEntry, UserId};

use super::{
    BlockEntry, BlockStorage, NewReminder, PendingDelete, PendingDeleteStorage, ReminderStorage,
    RoleStorage, StorageError,
};

#[derive(Default)]
struct ReminderStore {
    next_id: ReminderId,
    reminders: HashMap<ReminderId, Reminder>,
}

#[derive(Default)]
pub struct InMemoryReminderStorage {
    store: RwLock<ReminderStore>,
}

#[async_trait]
impl ReminderStorage for InMemoryReminderStorage {
    async fn insert(&self, reminder: NewReminder) -> Result<Reminder, StorageError> {
        let mut store = self.store.write().await;
        // ids are monotonic and never handed out twice, deletions included
        store.next_id += 1;
        let id = store.next_id;

        let created = Reminder {
            id,
            fire_at: reminder.fire_at,
            text: reminder.text,
            created_by: reminder.created_by,
            created_by_name: reminder.created_by_name,
            created_at: Utc::now(),
        };
        store.reminders.insert(id, created.clone());

        Ok(created)
    }

    async fn get(&self, id: ReminderId) -> Result<Option<Reminder>, StorageError> {
        Ok(self.store.read().await.reminders.get(&id).cloned())
    }

    async fn delete(&self, id: ReminderId) -> Result<bool, StorageError> {
        Ok(self.store.write().await.reminders.remove(&id).is_some())
    }

    async fn list_by_fire_time(&self) -> Result<Vec<Reminder>, StorageError> {
        let store = self.store.read().await;
        let mut reminders: Vec<_> = store.reminders.values().cloned().collect();
        reminders.sort_by_key(|reminder| (reminder.fire_at, reminder.id));

        Ok(reminders)
    }
}

#[derive(Default)]
pub struct InMemoryRoleStorage {
    store: RwLock<HashMap<UserId, Role>>,
}

#[async_trait]
impl RoleStorage for InMemoryRoleStorage {
    async fn role_of(&self, user_id: UserId) -> Result<Option<Role>, StorageError> {
        Ok(self.store.read().await.get(&user_id).copied())
    }

    async fn insert(&self, user_id: UserId, role: Role) -> Result<(), StorageError> {
        self.store.write().await.insert(user_id, role);
        Ok(())
    }

    async fn remove_admin(&self, user_id: UserId) -> Result<bool, StorageError> {
        let mut store = self.store.write().await;
        match store.get(&user_id) {
            Some(Role::Admin) => {
                store.remove(&user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<RoleEntry>, StorageError> {
        let store = self.store.read().await;
        let mut entries: Vec<_> = store
            .iter()
            .map(|(&user_id, &role)| RoleEntry { user_id, role })
            .collect();
        entries.sort_by_key(|entry| entry.user_id);

        Ok(entries)
    }
}

#[derive(Default)]
pub struct InMemoryBlockStorage {
    store: RwLock<HashMap<UserId, BlockEntry>>,
}

#[async_trait]
impl BlockStorage for InMemoryBlockStorage {
    async fn upsert(
        &self,
        user_id: UserId,
        reason: &str,
        blocked_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.store.write().await.insert(
            user_id,
            BlockEntry {
                user_id,
                reason: reason.to_string(),
                blocked_at,
            },
        );

        Ok(())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<BlockEntry>, StorageError> {
        Ok(self.store.read().await.get(&user_id).cloned())
    }

    async fn remove(&self, user_id: UserId) -> Result<bool, StorageError> {
        Ok(self.store.write().await.remove(&user_id).is_some())
    }

    async fn list(&self) -> Result<Vec<BlockEntry>, StorageError> {
        let store = self.store.read().await;
        let mut entries: Vec<_> = store.values().cloned().collect();
        entries.sort_by_key(|entry| entry.user_id);

        Ok(entries)
    }
}

#[derive(Default)]
pub struct InMemoryPendingDeleteStorage {
    store: RwLock<HashMap<ReminderId, PendingDelete>>,
}

#[async_trait]
impl PendingDeleteStorage for InMemoryPendingDeleteStorage {
    async fn upsert(&self, request: PendingDelete) -> Result<(), StorageError> {
        self.store
            .write()
            .await
            .insert(request.reminder_id, request);

        Ok(())
    }

    async fn get(&self, reminder_id: ReminderId) -> Result<Option<PendingDelete>, StorageError> {
        Ok(self.store.read().await.get(&reminder_id).cloned())
    }

    async fn remove(&self, reminder_id: ReminderId) -> Result<bool, StorageError> {
        Ok(self.store.write().await.remove(&reminder_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn new_reminder(fire_at: DateTime<Utc>) -> NewReminder {
        NewReminder {
            fire_at,
            text: "Submit resume".to_string(),
            created_by: 7,
            created_by_name: "@someone".to_string(),
        }
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let storage = InMemoryReminderStorage::default();
        let first = storage.insert(new_reminder(Utc::now())).await.unwrap();
        assert!(storage.delete(first.id).await.unwrap());

        let second = storage.insert(new_reminder(Utc::now())).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn listing_is_ordered_by_fire_time() {
        let storage = InMemoryReminderStorage::default();
        let now = Utc::now();
        let late = storage
            .insert(new_reminder(now + TimeDelta::hours(3)))
            .await
            .unwrap();
        let early = storage
            .insert(new_reminder(now + TimeDelta::hours(1)))
            .await
            .unwrap();

        let listed = storage.list_by_fire_time().await.unwrap();
        let ids: Vec<_> = listed.iter().map(|reminder| reminder.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn remove_admin_does_not_touch_the_superadmin() {
        let storage = InMemoryRoleStorage::default();
        storage.insert(1, Role::Superadmin).await.unwrap();
        storage.insert(2, Role::Admin).await.unwrap();

        assert!(!storage.remove_admin(1).await.unwrap());
        assert!(storage.remove_admin(2).await.unwrap());
        assert_eq!(storage.role_of(1).await.unwrap(), Some(Role::Superadmin));
    }
}
