mod lead_time_scheduler;

pub use lead_time_scheduler::LeadTimeScheduler;

use async_trait::async_trait;
use chrono::TimeDelta;

use crate::reminder::{Reminder, ReminderId};

/// One rung of the notification ladder: how long before the target time a
/// message goes out, and the prefix it carries.
pub struct LeadStep {
    pub offset: TimeDelta,
    pub prefix: &'static str,
}

pub fn lead_steps() -> [LeadStep; 5] {
    [
        LeadStep {
            offset: TimeDelta::hours(2),
            prefix: "⏰ Reminder in 2 hours:",
        },
        LeadStep {
            offset: TimeDelta::hours(1),
            prefix: "⏰ Reminder in 1 hour:",
        },
        LeadStep {
            offset: TimeDelta::minutes(30),
            prefix: "⏰ Reminder in 30 minutes:",
        },
        LeadStep {
            offset: TimeDelta::minutes(15),
            prefix: "⏰ Reminder in 15 minutes:",
        },
        LeadStep {
            offset: TimeDelta::zero(),
            prefix: "🔔 It's time!",
        },
    ]
}

#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    /// Registers a one-shot timer for every lead step still in the future
    /// and returns how many were registered. Re-scheduling the same
    /// reminder replaces its timers.
    async fn schedule_reminder(&self, reminder: &Reminder) -> anyhow::Result<usize>;

    /// Cancels every timer of the reminder. A no-op for timers that already
    /// fired or never existed.
    async fn cancel_reminder(&self, reminder_id: ReminderId) -> anyhow::Result<()>;
}
