use chrono::{DateTime, Utc};

use crate::user::UserId;

pub type ReminderId = i64;

#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: ReminderId,
    pub fire_at: DateTime<Utc>,
    pub text: String,
    pub created_by: UserId,
    pub created_by_name: String,
    pub created_at: DateTime<Utc>,
}
