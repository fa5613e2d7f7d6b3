use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::abuse::{AbuseGuard, AccessDecision};
use crate::delivery::ReminderDeliveryChannel;
use crate::reminder::{Reminder, ReminderId};
use crate::scheduling::ReminderScheduler;
use crate::storage::{
    BlockEntry, BlockStorage, NewReminder, PendingDelete, PendingDeleteStorage, ReminderStorage,
    RoleStorage, StorageError,
};
use crate::user::{Caller, Role, RoleEntry, UserId};

pub const INPUT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("reminder {0} not found")]
    ReminderNotFound(ReminderId),

    #[error("no pending delete request for reminder {0}")]
    NoPendingRequest(ReminderId),

    #[error("this operation requires the {0} role")]
    Unauthorized(&'static str),

    #[error("caller is blocked")]
    Blocked,

    #[error("caller was blocked for exceeding the rate limit")]
    RateLimited,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Scheduler(anyhow::Error),
}

impl From<anyhow::Error> for ServiceError {
    fn from(error: anyhow::Error) -> Self {
        ServiceError::Scheduler(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Removed on the spot by someone with unilateral authority.
    Deleted(ReminderId),
    /// Recorded as a pending request awaiting superadmin approval.
    ApprovalRequested(ReminderId),
}

/// Owns the timer registry (via the scheduler) together with the stores, so
/// every command handler works through one handle and nothing is ambient.
pub struct ReminderService {
    reminders: Arc<dyn ReminderStorage>,
    roles: Arc<dyn RoleStorage>,
    blocks: Arc<dyn BlockStorage>,
    pending_deletes: Arc<dyn PendingDeleteStorage>,
    scheduler: Arc<dyn ReminderScheduler>,
    delivery: Arc<dyn ReminderDeliveryChannel>,
    guard: AbuseGuard,
    superadmin_id: UserId,
    timezone: Tz,
}

impl ReminderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reminders: Arc<dyn ReminderStorage>,
        roles: Arc<dyn RoleStorage>,
        blocks: Arc<dyn BlockStorage>,
        pending_deletes: Arc<dyn PendingDeleteStorage>,
        scheduler: Arc<dyn ReminderScheduler>,
        delivery: Arc<dyn ReminderDeliveryChannel>,
        guard: AbuseGuard,
        superadmin_id: UserId,
        timezone: Tz,
    ) -> Self {
        Self {
            reminders,
            roles,
            blocks,
            pending_deletes,
            scheduler,
            delivery,
            guard,
            superadmin_id,
            timezone,
        }
    }

    /// Seeds the configured superadmin if the role store has none yet.
    pub async fn ensure_superadmin(&self) -> Result<(), ServiceError> {
        let seeded = self
            .roles
            .list()
            .await?
            .iter()
            .any(|entry| entry.role == Role::Superadmin);

        if !seeded {
            self.roles
                .insert(self.superadmin_id, Role::Superadmin)
                .await?;
            log::info!("Seeded superadmin {}", self.superadmin_id);
        }

        Ok(())
    }

    /// Rebuilds the timer set from stored reminders. Runs exactly once at
    /// startup, before the command surface is enabled; returns how many
    /// timers were registered.
    pub async fn reload_reminders(&self) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let mut restored = 0;
        for reminder in self.reminders.list_by_fire_time().await? {
            if reminder.fire_at < now {
                continue;
            }
            restored += self.scheduler.schedule_reminder(&reminder).await?;
        }

        Ok(restored)
    }

    pub async fn check_access(&self, caller: UserId) -> Result<(), ServiceError> {
        match self.guard.check(caller).await? {
            AccessDecision::Allowed => Ok(()),
            AccessDecision::Blocked => Err(ServiceError::Blocked),
            AccessDecision::RateLimited => Err(ServiceError::RateLimited),
        }
    }

    pub async fn create_reminder(
        &self,
        caller: &Caller,
        args: &str,
    ) -> Result<Reminder, ServiceError> {
        self.check_access(caller.id).await?;
        self.require_operator(caller.id).await?;

        let (fire_at, text) = self.parse_remind_args(args)?;
        let reminder = self
            .reminders
            .insert(NewReminder {
                fire_at,
                text,
                created_by: caller.id,
                created_by_name: caller.display_name.clone(),
            })
            .await?;

        self.scheduler.schedule_reminder(&reminder).await?;

        let announcement = format!(
            "📌 New reminder!\n🆔 {}\n⏰ {}\n📌 {}\n👤 {}",
            reminder.id,
            self.format_fire_time(reminder.fire_at),
            reminder.text,
            reminder.created_by_name
        );
        if let Err(error) = self.delivery.broadcast(&announcement).await {
            log::error!("Failed to announce reminder {}: {error:#}", reminder.id);
        }

        Ok(reminder)
    }

    pub async fn list_reminders(&self, caller: &Caller) -> Result<Vec<Reminder>, ServiceError> {
        self.check_access(caller.id).await?;

        Ok(self.reminders.list_by_fire_time().await?)
    }

    pub async fn delete_reminder(
        &self,
        caller: &Caller,
        args: &str,
    ) -> Result<DeleteOutcome, ServiceError> {
        self.check_access(caller.id).await?;

        let id = parse_reminder_id(args)?;
        if self.reminders.get(id).await?.is_none() {
            return Err(ServiceError::ReminderNotFound(id));
        }

        match self.roles.role_of(caller.id).await? {
            Some(Role::Superadmin) => {
                self.remove_reminder(id).await?;
                Ok(DeleteOutcome::Deleted(id))
            }
            Some(Role::Admin) => {
                self.pending_deletes
                    .upsert(PendingDelete {
                        reminder_id: id,
                        requested_by: caller.id,
                        requested_at: Utc::now(),
                    })
                    .await?;

                let note = format!(
                    "⚠️ Admin {} requested deletion of reminder {id}.\nUse /approve {id} or /reject {id}.",
                    caller.display_name
                );
                self.notify(self.superadmin_id, &note).await;

                Ok(DeleteOutcome::ApprovalRequested(id))
            }
            None => Err(ServiceError::Unauthorized("admin")),
        }
    }

    pub async fn approve_delete(
        &self,
        caller: &Caller,
        args: &str,
    ) -> Result<ReminderId, ServiceError> {
        self.check_access(caller.id).await?;
        self.require_superadmin(caller.id).await?;

        let id = parse_reminder_id(args)?;
        let request = self
            .pending_deletes
            .get(id)
            .await?
            .ok_or(ServiceError::NoPendingRequest(id))?;

        self.remove_reminder(id).await?;
        self.pending_deletes.remove(id).await?;
        self.notify(
            request.requested_by,
            &format!("✅ Your deletion request for reminder {id} was approved."),
        )
        .await;

        Ok(id)
    }

    pub async fn reject_delete(
        &self,
        caller: &Caller,
        args: &str,
    ) -> Result<ReminderId, ServiceError> {
        self.check_access(caller.id).await?;
        self.require_superadmin(caller.id).await?;

        let id = parse_reminder_id(args)?;
        let request = self
            .pending_deletes
            .get(id)
            .await?
            .ok_or(ServiceError::NoPendingRequest(id))?;

        self.pending_deletes.remove(id).await?;
        self.notify(
            request.requested_by,
            &format!("🚫 Your deletion request for reminder {id} was rejected."),
        )
        .await;

        Ok(id)
    }

    pub async fn add_admin(
        &self,
        caller: &Caller,
        args: &str,
    ) -> Result<(UserId, bool), ServiceError> {
        self.check_access(caller.id).await?;
        self.require_superadmin(caller.id).await?;

        let user_id = parse_user_id(args)?;
        if self.roles.role_of(user_id).await?.is_some() {
            return Ok((user_id, false));
        }
        self.roles.insert(user_id, Role::Admin).await?;

        Ok((user_id, true))
    }

    pub async fn remove_admin(
        &self,
        caller: &Caller,
        args: &str,
    ) -> Result<(UserId, bool), ServiceError> {
        self.check_access(caller.id).await?;
        self.require_superadmin(caller.id).await?;

        let user_id = parse_user_id(args)?;
        let removed = self.roles.remove_admin(user_id).await?;

        Ok((user_id, removed))
    }

    pub async fn list_admins(&self, caller: &Caller) -> Result<Vec<RoleEntry>, ServiceError> {
        self.check_access(caller.id).await?;
        self.require_superadmin(caller.id).await?;

        Ok(self.roles.list().await?)
    }

    pub async fn unblock(
        &self,
        caller: &Caller,
        args: &str,
    ) -> Result<(UserId, bool), ServiceError> {
        self.check_access(caller.id).await?;
        self.require_superadmin(caller.id).await?;

        let user_id = parse_user_id(args)?;
        let removed = self.blocks.remove(user_id).await?;

        Ok((user_id, removed))
    }

    pub async fn list_blocked(&self, caller: &Caller) -> Result<Vec<BlockEntry>, ServiceError> {
        self.check_access(caller.id).await?;
        self.require_superadmin(caller.id).await?;

        Ok(self.blocks.list().await?)
    }

    pub async fn broadcast(&self, caller: &Caller, args: &str) -> Result<(), ServiceError> {
        self.check_access(caller.id).await?;
        self.require_superadmin(caller.id).await?;

        let message = args.trim();
        if message.is_empty() {
            return Err(ServiceError::Validation(
                "broadcast message cannot be empty".to_string(),
            ));
        }

        if let Err(error) = self.delivery.broadcast(&format!("📢 {message}")).await {
            log::error!("Failed to broadcast message: {error:#}");
        }

        Ok(())
    }

    pub fn format_fire_time(&self, fire_at: DateTime<Utc>) -> String {
        fire_at
            .with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M %Z")
            .to_string()
    }

    /// Cancel first: a crash between the two steps must leave an orphan
    /// record with no timers, never timers with no backing record.
    async fn remove_reminder(&self, id: ReminderId) -> Result<(), ServiceError> {
        self.scheduler.cancel_reminder(id).await?;
        self.reminders.delete(id).await?;

        Ok(())
    }

    async fn require_operator(&self, caller: UserId) -> Result<Role, ServiceError> {
        self.roles
            .role_of(caller)
            .await?
            .ok_or(ServiceError::Unauthorized("admin"))
    }

    async fn require_superadmin(&self, caller: UserId) -> Result<(), ServiceError> {
        match self.roles.role_of(caller).await? {
            Some(Role::Superadmin) => Ok(()),
            _ => Err(ServiceError::Unauthorized("superadmin")),
        }
    }

    async fn notify(&self, user_id: UserId, text: &str) {
        if let Err(error) = self.delivery.notify_user(user_id, text).await {
            log::error!("Failed to notify user {user_id}: {error:#}");
        }
    }

    fn parse_remind_args(&self, args: &str) -> Result<(DateTime<Utc>, String), ServiceError> {
        let mut parts = args.split_whitespace();
        let (Some(date), Some(time)) = (parts.next(), parts.next()) else {
            return Err(ServiceError::Validation(
                "expected a date and a time".to_string(),
            ));
        };

        let text = parts.collect::<Vec<_>>().join(" ");
        if text.trim().is_empty() {
            return Err(ServiceError::Validation(
                "reminder message cannot be empty".to_string(),
            ));
        }

        let naive = NaiveDateTime::parse_from_str(&format!("{date} {time}"), INPUT_TIME_FORMAT)
            .map_err(|error| ServiceError::Validation(format!("could not parse time: {error}")))?;
        let local = naive.and_local_timezone(self.timezone).single().ok_or_else(|| {
            ServiceError::Validation(
                "time is invalid or ambiguous in the configured timezone".to_string(),
            )
        })?;

        Ok((local.with_timezone(&Utc), text))
    }
}

fn parse_reminder_id(args: &str) -> Result<ReminderId, ServiceError> {
    args.trim()
        .parse()
        .map_err(|_| ServiceError::Validation("expected a numeric reminder id".to_string()))
}

fn parse_user_id(args: &str) -> Result<UserId, ServiceError> {
    args.trim()
        .parse()
        .map_err(|_| ServiceError::Validation("expected a numeric user id".to_string()))
}
