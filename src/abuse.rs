use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::storage::{BlockStorage, RoleStorage, StorageError};
use crate::user::UserId;

const REQUEST_LIMIT: usize = 5;
const TIME_WINDOW: Duration = Duration::from_secs(10);

pub const RATE_LIMIT_REASON: &str = "rate limit exceeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    /// Present in the durable block list before this request.
    Blocked,
    /// Tripped the sliding window on this request and is now durably blocked.
    RateLimited,
}

pub struct AbuseGuard {
    roles: Arc<dyn RoleStorage>,
    blocks: Arc<dyn BlockStorage>,
    requests: Mutex<HashMap<UserId, Vec<Instant>>>,
}

impl AbuseGuard {
    pub fn new(roles: Arc<dyn RoleStorage>, blocks: Arc<dyn BlockStorage>) -> Self {
        Self {
            roles,
            blocks,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Runs before any other authorization or mutation. Operators bypass
    /// both the block list and the window; everyone else is checked against
    /// the durable block list first, then the sliding window.
    pub async fn check(&self, caller: UserId) -> Result<AccessDecision, StorageError> {
        if self.roles.role_of(caller).await?.is_some() {
            return Ok(AccessDecision::Allowed);
        }

        if self.blocks.get(caller).await?.is_some() {
            return Ok(AccessDecision::Blocked);
        }

        let now = Instant::now();
        let over_limit = {
            let mut requests = self.requests.lock().expect("window lock poisoned");
            // drop stale timestamps everywhere so idle callers do not pile up
            requests.retain(|_, timestamps| {
                timestamps.retain(|at| now.duration_since(*at) < TIME_WINDOW);
                !timestamps.is_empty()
            });

            let timestamps = requests.entry(caller).or_default();
            timestamps.push(now);
            timestamps.len() > REQUEST_LIMIT
        };

        if over_limit {
            self.blocks
                .upsert(caller, RATE_LIMIT_REASON, Utc::now())
                .await?;
            self.requests
                .lock()
                .expect("window lock poisoned")
                .remove(&caller);

            return Ok(AccessDecision::RateLimited);
        }

        Ok(AccessDecision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::storage::{InMemoryBlockStorage, InMemoryRoleStorage};
    use crate::user::Role;

    use super::*;

    struct TestContext {
        roles: Arc<InMemoryRoleStorage>,
        blocks: Arc<InMemoryBlockStorage>,
        guard: AbuseGuard,
    }

    impl TestContext {
        fn new() -> Self {
            let roles = Arc::new(InMemoryRoleStorage::default());
            let blocks = Arc::new(InMemoryBlockStorage::default());
            let guard = AbuseGuard::new(roles.clone(), blocks.clone());

            Self {
                roles,
                blocks,
                guard,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_request_in_window_blocks() {
        let ctx = TestContext::new();

        for _ in 0..5 {
            assert_eq!(ctx.guard.check(9).await.unwrap(), AccessDecision::Allowed);
        }
        assert_eq!(ctx.guard.check(9).await.unwrap(), AccessDecision::RateLimited);

        let entry = ctx.blocks.get(9).await.unwrap().unwrap();
        assert_eq!(entry.reason, RATE_LIMIT_REASON);
    }

    #[tokio::test(start_paused = true)]
    async fn operators_are_never_blocked() {
        let ctx = TestContext::new();
        ctx.roles.insert(2, Role::Admin).await.unwrap();

        for _ in 0..100 {
            assert_eq!(ctx.guard.check(2).await.unwrap(), AccessDecision::Allowed);
        }
        assert!(ctx.blocks.get(2).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_does_not_unblock() {
        let ctx = TestContext::new();

        for _ in 0..6 {
            ctx.guard.check(9).await.unwrap();
        }

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(ctx.guard.check(9).await.unwrap(), AccessDecision::Blocked);

        ctx.blocks.remove(9).await.unwrap();
        assert_eq!(ctx.guard.check(9).await.unwrap(), AccessDecision::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_for_patient_callers() {
        let ctx = TestContext::new();

        for round in 0..3 {
            for _ in 0..5 {
                assert_eq!(
                    ctx.guard.check(9).await.unwrap(),
                    AccessDecision::Allowed,
                    "round {round}"
                );
            }
            tokio::time::sleep(Duration::from_secs(11)).await;
        }
        assert!(ctx.blocks.get(9).await.unwrap().is_none());
    }
}
