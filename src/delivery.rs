use async_trait::async_trait;
use teloxide::prelude::*;

use crate::user::UserId;

#[async_trait]
pub trait ReminderDeliveryChannel: Send + Sync + 'static {
    async fn broadcast(&self, text: &str) -> anyhow::Result<()>;
    async fn notify_user(&self, user_id: UserId, text: &str) -> anyhow::Result<()>;
}

pub struct TelegramDeliveryChannel {
    bot: Bot,
    channel_id: ChatId,
}

impl TelegramDeliveryChannel {
    pub fn new(bot: Bot, channel_id: ChatId) -> Self {
        Self { bot, channel_id }
    }
}

#[async_trait]
impl ReminderDeliveryChannel for TelegramDeliveryChannel {
    async fn broadcast(&self, text: &str) -> anyhow::Result<()> {
        self.bot.send_message(self.channel_id, text).await?;
        Ok(())
    }

    async fn notify_user(&self, user_id: UserId, text: &str) -> anyhow::Result<()> {
        self.bot.send_message(ChatId(user_id), text).await?;
        Ok(())
    }
}
