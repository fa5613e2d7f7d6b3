use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    sync::{RwLock, watch},
    task::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;

use crate::delivery::ReminderDeliveryChannel;
use crate::reminder::{Reminder, ReminderId};

use super::{ReminderScheduler, lead_steps};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Timers are keyed by reminder id and ladder index, so the whole set for a
/// reminder can be rebuilt or cancelled from the stored record alone.
type FireKey = (ReminderId, usize);

struct ScheduledFireHandle {
    task: JoinHandle<()>,
    cancellation: CancellationToken,
}

struct CleanupTask(watch::Sender<()>);

type FireTaskStore = RwLock<HashMap<FireKey, ScheduledFireHandle>>;

pub struct LeadTimeScheduler {
    tasks: Arc<FireTaskStore>,
    delivery: Arc<dyn ReminderDeliveryChannel>,
    cleanup_task: CleanupTask,
}

impl LeadTimeScheduler {
    pub fn new(delivery: Arc<dyn ReminderDeliveryChannel>) -> Self {
        let tasks = Arc::new(RwLock::new(HashMap::new()));
        let cleanup_task = Self::spawn_cleanup_task(Arc::clone(&tasks));

        Self {
            tasks,
            delivery,
            cleanup_task,
        }
    }

    fn spawn_cleanup_task(tasks: Arc<FireTaskStore>) -> CleanupTask {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        task::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(CLEANUP_INTERVAL) => {
                        Self::clean_finished_tasks(&tasks).await;
                    }
                    _ = shutdown_rx.changed() => {
                        log::info!("Timer cleanup task shutting down");
                        break;
                    }
                };
            }
        });

        CleanupTask(shutdown_tx)
    }

    async fn clean_finished_tasks(tasks: &FireTaskStore) {
        let mut tasks = tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, handle| !handle.task.is_finished());
        let after = tasks.len();

        if before != after {
            log::debug!("Cleaned up {} fired reminder timers", before - after);
        }
    }
}

impl Drop for LeadTimeScheduler {
    fn drop(&mut self) {
        let _ = self.cleanup_task.0.send(());
    }
}

#[async_trait]
impl ReminderScheduler for LeadTimeScheduler {
    async fn schedule_reminder(&self, reminder: &Reminder) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let mut registered = 0;

        for (index, step) in lead_steps().iter().enumerate() {
            let fire_at = reminder.fire_at - step.offset;
            if fire_at <= now {
                // already past this rung, no catch-up firing
                continue;
            }

            let key = (reminder.id, index);
            if let Some(existing) = tasks.remove(&key) {
                existing.cancellation.cancel();
            }

            let delay = (fire_at - now)
                .to_std()
                .expect("delay is in the future here");

            let cancellation = CancellationToken::new();
            let fire_token = cancellation.child_token();
            let text = format!("{} {}", step.prefix, reminder.text);
            let delivery = Arc::clone(&self.delivery);
            let task = task::spawn(async move {
                tokio::select! {
                    _ = fire_token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        if let Err(error) = delivery.broadcast(&text).await {
                            log::error!("Failed to deliver reminder notification: {error:#}");
                        }
                    }
                }
            });

            tasks.insert(key, ScheduledFireHandle { task, cancellation });
            registered += 1;
        }

        log::info!(
            "Registered {} timers for reminder {}",
            registered,
            reminder.id
        );

        Ok(registered)
    }

    async fn cancel_reminder(&self, reminder_id: ReminderId) -> anyhow::Result<()> {
        let mut tasks = self.tasks.write().await;
        for index in 0..lead_steps().len() {
            if let Some(handle) = tasks.remove(&(reminder_id, index)) {
                handle.cancellation.cancel();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, TimeDelta};
    use proptest::prelude::*;
    use test_strategy::proptest;

    use super::*;

    type Broadcasts = Arc<Mutex<Vec<String>>>;

    struct TestDeliveryChannel {
        broadcasts: Broadcasts,
    }

    #[async_trait]
    impl ReminderDeliveryChannel for TestDeliveryChannel {
        async fn broadcast(&self, text: &str) -> anyhow::Result<()> {
            self.broadcasts.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn notify_user(&self, _user_id: i64, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FailingDeliveryChannel {
        attempts: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl ReminderDeliveryChannel for FailingDeliveryChannel {
        async fn broadcast(&self, _text: &str) -> anyhow::Result<()> {
            *self.attempts.lock().unwrap() += 1;
            anyhow::bail!("transport down")
        }

        async fn notify_user(&self, _user_id: i64, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct TestContext {
        broadcasts: Broadcasts,
        scheduler: LeadTimeScheduler,
    }

    impl TestContext {
        fn new() -> Self {
            let broadcasts = Arc::new(Mutex::new(Vec::new()));
            let delivery = TestDeliveryChannel {
                broadcasts: Arc::clone(&broadcasts),
            };
            let scheduler = LeadTimeScheduler::new(Arc::new(delivery));

            Self {
                broadcasts,
                scheduler,
            }
        }
    }

    fn reminder_with_fire_at(fire_at: DateTime<Utc>) -> Reminder {
        Reminder {
            id: 1,
            fire_at,
            text: "Submit resume".to_string(),
            created_by: 7,
            created_by_name: "@someone".to_string(),
            created_at: Utc::now(),
        }
    }

    fn reminder_due_in(delta: TimeDelta) -> Reminder {
        // half a minute of slack keeps the ladder away from exact rung edges
        reminder_with_fire_at(Utc::now() + delta + TimeDelta::seconds(30))
    }

    async fn wait(duration: TimeDelta) {
        tokio::time::sleep(duration.to_std().unwrap() + std::time::Duration::from_secs(1)).await;
    }

    fn tokio_ct(
        future: impl std::future::Future<Output = Result<(), TestCaseError>>,
    ) -> Result<(), TestCaseError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap()
            .block_on(future)
    }

    #[tokio::test(start_paused = true)]
    async fn full_ladder_far_from_target() {
        let ctx = TestContext::new();
        let reminder = reminder_due_in(TimeDelta::hours(3));

        let registered = ctx.scheduler.schedule_reminder(&reminder).await.unwrap();

        assert_eq!(registered, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn only_remaining_rungs_near_target() {
        let ctx = TestContext::new();
        let reminder = reminder_due_in(TimeDelta::minutes(20));

        let registered = ctx.scheduler.schedule_reminder(&reminder).await.unwrap();

        assert_eq!(registered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn past_target_registers_nothing() {
        let ctx = TestContext::new();
        let reminder = reminder_with_fire_at(Utc::now() - TimeDelta::minutes(1));

        let registered = ctx.scheduler.schedule_reminder(&reminder).await.unwrap();

        assert_eq!(registered, 0);
        wait(TimeDelta::hours(3)).await;
        assert!(ctx.broadcasts.lock().unwrap().is_empty());
    }

    #[proptest(async = tokio_ct)]
    async fn registered_count_matches_future_rungs(#[strategy(1i64..=600)] minutes_ahead: i64) {
        let ctx = TestContext::new();
        let target_delta = TimeDelta::minutes(minutes_ahead) + TimeDelta::seconds(30);
        let reminder = reminder_with_fire_at(Utc::now() + target_delta);
        let expected = lead_steps()
            .iter()
            .filter(|step| step.offset < target_delta)
            .count();

        let registered = ctx.scheduler.schedule_reminder(&reminder).await.unwrap();

        prop_assert_eq!(registered, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn rungs_fire_in_lead_order() {
        let ctx = TestContext::new();
        let reminder = reminder_due_in(TimeDelta::hours(3));
        let delay = reminder.fire_at - Utc::now();

        ctx.scheduler.schedule_reminder(&reminder).await.unwrap();
        wait(delay).await;

        let expected: Vec<String> = lead_steps()
            .iter()
            .map(|step| format!("{} {}", step.prefix, reminder.text))
            .collect();
        assert_eq!(*ctx.broadcasts.lock().unwrap(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_timers() {
        let ctx = TestContext::new();
        let reminder = reminder_due_in(TimeDelta::hours(3));
        let delay = reminder.fire_at - Utc::now();

        ctx.scheduler.schedule_reminder(&reminder).await.unwrap();
        ctx.scheduler.schedule_reminder(&reminder).await.unwrap();
        wait(delay).await;

        assert_eq!(ctx.broadcasts.lock().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_all_firing() {
        let ctx = TestContext::new();
        let reminder = reminder_due_in(TimeDelta::minutes(20));

        ctx.scheduler.schedule_reminder(&reminder).await.unwrap();
        ctx.scheduler.cancel_reminder(reminder.id).await.unwrap();
        ctx.scheduler.cancel_reminder(reminder.id).await.unwrap();
        wait(TimeDelta::minutes(30)).await;

        assert!(ctx.broadcasts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_ladder_stops_later_rungs() {
        let ctx = TestContext::new();
        let reminder = reminder_due_in(TimeDelta::hours(3));
        let first_rung = (reminder.fire_at - TimeDelta::hours(2)) - Utc::now();

        ctx.scheduler.schedule_reminder(&reminder).await.unwrap();
        wait(first_rung).await;
        ctx.scheduler.cancel_reminder(reminder.id).await.unwrap();
        wait(TimeDelta::hours(3)).await;

        let broadcasts = ctx.broadcasts.lock().unwrap();
        assert_eq!(broadcasts.len(), 1);
        assert!(broadcasts[0].starts_with("⏰ Reminder in 2 hours:"));
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_failures_do_not_stop_later_rungs() {
        let attempts = Arc::new(Mutex::new(0));
        let delivery = FailingDeliveryChannel {
            attempts: Arc::clone(&attempts),
        };
        let scheduler = LeadTimeScheduler::new(Arc::new(delivery));
        let reminder = reminder_due_in(TimeDelta::minutes(20));
        let delay = reminder.fire_at - Utc::now();

        scheduler.schedule_reminder(&reminder).await.unwrap();
        wait(delay).await;

        assert_eq!(*attempts.lock().unwrap(), 2);
    }
}
