use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono_tz::Tz;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use teloxide::prelude::*;

use napomni::abuse::AbuseGuard;
use napomni::appsettings::AppSettings;
use napomni::delivery::TelegramDeliveryChannel;
use napomni::scheduling::LeadTimeScheduler;
use napomni::service::ReminderService;
use napomni::storage::{
    self, SqliteBlockStorage, SqlitePendingDeleteStorage, SqliteReminderStorage, SqliteRoleStorage,
};
use napomni::telegram;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();

    let settings = AppSettings::new().context("failed to load settings")?;
    let timezone = Tz::from_str(&settings.timezone)
        .map_err(|error| anyhow::anyhow!("invalid timezone {:?}: {error}", settings.timezone))?;

    let connect_options =
        SqliteConnectOptions::from_str(&settings.database.url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(connect_options).await?;
    storage::init_schema(&pool).await?;

    let reminders = Arc::new(SqliteReminderStorage::new(pool.clone()));
    let roles = Arc::new(SqliteRoleStorage::new(pool.clone()));
    let blocks = Arc::new(SqliteBlockStorage::new(pool.clone()));
    let pending_deletes = Arc::new(SqlitePendingDeleteStorage::new(pool));

    let bot = Bot::new(settings.telegram.token.clone());
    let delivery = Arc::new(TelegramDeliveryChannel::new(
        bot.clone(),
        ChatId(settings.telegram.channel_id),
    ));
    let scheduler = Arc::new(LeadTimeScheduler::new(delivery.clone()));

    let guard = AbuseGuard::new(roles.clone(), blocks.clone());
    let service = Arc::new(ReminderService::new(
        reminders,
        roles,
        blocks,
        pending_deletes,
        scheduler,
        delivery,
        guard,
        settings.telegram.superadmin_id,
        timezone,
    ));

    service.ensure_superadmin().await?;
    let restored = service.reload_reminders().await?;
    log::info!("Restored {restored} reminder timers from storage");

    telegram::run(bot, service).await;

    Ok(())
}
