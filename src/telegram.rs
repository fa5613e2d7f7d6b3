use std::sync::Arc;

use teloxide::{dptree, macros::BotCommands, prelude::*};

use crate::reminder::Reminder;
use crate::service::{DeleteOutcome, ReminderService, ServiceError};
use crate::user::Caller;

type HandlerResult = anyhow::Result<()>;

const MAX_REPLY_CHARS: usize = 3500;

const WELCOME: &str = "👋 Hi! I'm your reminder bot.\nUse /remind to set reminders.\nPing me with /ping to test uptime.";

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "greet the bot")]
    Start,
    #[command(description = "check that the bot is alive")]
    Ping,
    #[command(description = "set a reminder: /remind YYYY-MM-DD HH:MM message")]
    Remind(String),
    #[command(description = "list all reminders")]
    ListReminders,
    #[command(description = "delete a reminder by id")]
    DeleteReminder(String),
    #[command(description = "approve a pending deletion")]
    Approve(String),
    #[command(description = "reject a pending deletion")]
    Reject(String),
    #[command(description = "grant the admin role")]
    AddAdmin(String),
    #[command(description = "revoke the admin role")]
    RemoveAdmin(String),
    #[command(description = "list admins")]
    ListAdmins,
    #[command(description = "broadcast a message to the channel")]
    Broadcast(String),
    #[command(description = "unblock a user")]
    Unblock(String),
    #[command(description = "list blocked users")]
    ListBlocked,
}

pub async fn run(bot: Bot, service: Arc<ReminderService>) {
    log::info!("Starting Telegram command interface");

    let schema = Update::filter_message()
        .branch(teloxide::filter_command::<Command, _>().endpoint(handle_command));

    Dispatcher::builder(bot, schema)
        .dependencies(dptree::deps![service])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    service: Arc<ReminderService>,
) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let caller = Caller::new(from.id.0 as i64, from.username.as_deref());

    let replies = match cmd {
        Command::Start => match service.check_access(caller.id).await {
            Ok(()) => vec![WELCOME.to_string()],
            Err(error) => vec![error_reply(&error)],
        },
        Command::Ping => vec!["pong".to_string()],
        Command::Remind(args) => match service.create_reminder(&caller, &args).await {
            Ok(reminder) => vec![format!(
                "✅ Reminder set (ID: {})\n⏰ {}\n📌 {}\n👤 Created by {}",
                reminder.id,
                service.format_fire_time(reminder.fire_at),
                reminder.text,
                reminder.created_by_name
            )],
            Err(error) => vec![with_usage(&error, "/remind YYYY-MM-DD HH:MM message")],
        },
        Command::ListReminders => match service.list_reminders(&caller).await {
            Ok(reminders) if reminders.is_empty() => vec!["📭 No reminders set.".to_string()],
            Ok(reminders) => paginate(
                reminders
                    .iter()
                    .map(|reminder| format_reminder_line(&service, reminder)),
            ),
            Err(error) => vec![error_reply(&error)],
        },
        Command::DeleteReminder(args) => match service.delete_reminder(&caller, &args).await {
            Ok(DeleteOutcome::Deleted(id)) => vec![format!("✅ Reminder {id} deleted.")],
            Ok(DeleteOutcome::ApprovalRequested(_)) => {
                vec!["⌛ Deletion request sent to the superadmin.".to_string()]
            }
            Err(error) => vec![with_usage(&error, "/deletereminder <id>")],
        },
        Command::Approve(args) => match service.approve_delete(&caller, &args).await {
            Ok(id) => vec![format!("✅ Reminder {id} deleted after approval.")],
            Err(error) => vec![with_usage(&error, "/approve <id>")],
        },
        Command::Reject(args) => match service.reject_delete(&caller, &args).await {
            Ok(id) => vec![format!("🚫 Deletion of reminder {id} rejected.")],
            Err(error) => vec![with_usage(&error, "/reject <id>")],
        },
        Command::AddAdmin(args) => match service.add_admin(&caller, &args).await {
            Ok((user_id, true)) => vec![format!("✅ Added {user_id} as admin.")],
            Ok((_, false)) => vec!["⚠️ That user already has a role.".to_string()],
            Err(error) => vec![with_usage(&error, "/addadmin <user_id>")],
        },
        Command::RemoveAdmin(args) => match service.remove_admin(&caller, &args).await {
            Ok((user_id, true)) => vec![format!("✅ Removed {user_id} from admins.")],
            Ok((_, false)) => vec!["⚠️ User is not an admin.".to_string()],
            Err(error) => vec![with_usage(&error, "/removeadmin <user_id>")],
        },
        Command::ListAdmins => match service.list_admins(&caller).await {
            Ok(entries) => {
                let mut lines = vec!["👮 Admins:".to_string()];
                lines.extend(
                    entries
                        .iter()
                        .map(|entry| format!("{} ({})", entry.user_id, entry.role)),
                );
                paginate(lines)
            }
            Err(error) => vec![error_reply(&error)],
        },
        Command::Broadcast(args) => match service.broadcast(&caller, &args).await {
            Ok(()) => vec!["✅ Message broadcasted to the channel.".to_string()],
            Err(error) => vec![with_usage(&error, "/broadcast <message>")],
        },
        Command::Unblock(args) => match service.unblock(&caller, &args).await {
            Ok((user_id, true)) => vec![format!("✅ User {user_id} has been unblocked.")],
            Ok((_, false)) => vec!["⚠️ That user is not blocked.".to_string()],
            Err(error) => vec![with_usage(&error, "/unblock <user_id>")],
        },
        Command::ListBlocked => match service.list_blocked(&caller).await {
            Ok(entries) if entries.is_empty() => {
                vec!["✅ No users are currently blocked.".to_string()]
            }
            Ok(entries) => {
                let mut lines = vec!["🔒 Blocked Users:".to_string()];
                lines.extend(entries.iter().map(|entry| {
                    format!(
                        "🚫 {} | Reason: {} | Blocked at: {}",
                        entry.user_id,
                        entry.reason,
                        entry.blocked_at.format("%Y-%m-%d %H:%M:%S")
                    )
                }));
                paginate(lines)
            }
            Err(error) => vec![error_reply(&error)],
        },
    };

    for reply in replies {
        bot.send_message(msg.chat.id, reply).await?;
    }

    Ok(())
}

fn format_reminder_line(service: &ReminderService, reminder: &Reminder) -> String {
    format!(
        "🆔 {}\n⏰ {}\n📌 {}\n👤 {}\n---",
        reminder.id,
        service.format_fire_time(reminder.fire_at),
        reminder.text,
        reminder.created_by_name
    )
}

/// Splits the listing into several messages instead of truncating it.
fn paginate(lines: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut pages = vec![String::new()];
    for line in lines {
        let current = pages.last_mut().expect("pages is never empty");
        if !current.is_empty() && current.len() + line.len() + 1 > MAX_REPLY_CHARS {
            pages.push(line);
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&line);
        }
    }

    pages
}

fn error_reply(error: &ServiceError) -> String {
    match error {
        ServiceError::Validation(reason) => format!("⚠️ {reason}"),
        ServiceError::ReminderNotFound(_) => "❌ Reminder not found.".to_string(),
        ServiceError::NoPendingRequest(_) => "❌ No pending request.".to_string(),
        ServiceError::Unauthorized(role) => format!("❌ Only a {role} can do that."),
        ServiceError::Blocked => {
            "⛔ You are blocked. Contact the superadmin to be unblocked.".to_string()
        }
        ServiceError::RateLimited => {
            "⛔ You have been blocked for spamming. Contact the superadmin.".to_string()
        }
        ServiceError::Storage(_) | ServiceError::Scheduler(_) => {
            "Something went wrong, please try again later.".to_string()
        }
    }
}

fn with_usage(error: &ServiceError, usage: &str) -> String {
    match error {
        ServiceError::Validation(_) => format!("{}\nUsage: {usage}", error_reply(error)),
        _ => error_reply(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_splits_long_listings() {
        let line = "x".repeat(1000);
        let pages = paginate(std::iter::repeat_n(line, 8));

        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|page| page.len() <= MAX_REPLY_CHARS));
    }

    #[test]
    fn paginate_keeps_short_listings_in_one_message() {
        let pages = paginate(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(pages, vec!["a\nb".to_string()]);
    }

    #[test]
    fn validation_errors_carry_usage() {
        let error = ServiceError::Validation("expected a numeric reminder id".to_string());
        let reply = with_usage(&error, "/deletereminder <id>");

        assert!(reply.contains("Usage: /deletereminder <id>"));
    }
}
