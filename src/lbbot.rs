pub mod commands;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serenity::async_trait;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;

use chrono::{Days, NaiveTime, Utc};

use tokio::time::{Duration, sleep};

use crate::config::Config;
use crate::dialogue::{Assistant, DialogueConfig};
use crate::lbapi::LlmGrader;
use crate::lbdb::Store;
use crate::models::UserId;
use crate::pacing::Pacer;
use crate::transport::{MessageId, Transport};

use anyhow::{Context, Result};

/// Discord messages can't be longer than this.
const MAX_MESSAGE_LENGTH: usize = 2000;

/// Delivers messages as Discord DMs.
pub struct DiscordTransport {
    http: Arc<Http>,
}

impl DiscordTransport {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn send_message(&self, user: UserId, text: &str) -> Result<MessageId> {
        let channel = serenity::model::id::UserId::new(user)
            .create_dm_channel(&*self.http)
            .await
            .with_context(|| format!("Couldn't open a DM channel with {user}"))?;

        let mut last = None;
        for chunk in commands::split_reply(text, MAX_MESSAGE_LENGTH) {
            last = Some(channel.id.say(&self.http, chunk).await?.id.get());
        }

        last.with_context(|| format!("Nothing to send to {user}"))
    }
}

pub async fn run_lessonbot(config: Config, store: Store) -> Result<()> {
    let intents = GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    let http = Arc::new(Http::new(&config.discord_token));
    let transport: Arc<dyn Transport> = Arc::new(DiscordTransport::new(http));
    let grader = Arc::new(LlmGrader::new(config.grader.clone()));

    let handler = LessonHandler {
        assistant: Arc::new(Assistant::new(store.clone(), transport.clone(), grader, DialogueConfig::from(&config))),
        pacer: Arc::new(Pacer::new(store, transport, config.pacing.clone())),
        call_token: config.call_token,
        unlock_hour_utc: config.unlock_hour_utc,
        reminder_hour_utc: config.reminder_hour_utc,
        loops_started: AtomicBool::new(false),
    };

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await
        .context("Error creating client.")?;

    client.start().await?;

    Ok(())
}

/// Sleeps until the next `hour`:00 UTC. If that's right now, waits for tomorrow's.
async fn sleep_until_hour_utc(hour: u32) {
    let now = Utc::now();
    let target_time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();

    let mut target = now.date_naive().and_time(target_time).and_utc();
    if target <= now {
        target = target.checked_add_days(Days::new(1)).unwrap_or(target);
    }

    let sleep_duration = (target - now).to_std().unwrap_or(Duration::from_secs(60 * 60));
    log::info!("Next run at {target} ({} minutes).", sleep_duration.as_secs() / 60);

    sleep(sleep_duration).await;
}

struct LessonHandler {
    assistant: Arc<Assistant>,
    pacer: Arc<Pacer>,
    call_token: char,
    unlock_hour_utc: u32,
    reminder_hour_utc: u32,
    /// `ready` fires again on every reconnect; the sweeps must only be spawned once.
    loops_started: AtomicBool,
}

impl LessonHandler {
    fn spawn_daily_loops(&self) {
        let pacer = self.pacer.clone();
        let hour = self.unlock_hour_utc;
        tokio::spawn(async move {
            loop {
                sleep_until_hour_utc(hour).await;
                if let Err(err) = pacer.advance_ready_users().await {
                    log::error!("Unlock sweep failed: {err}");
                }
            }
        });

        let pacer = self.pacer.clone();
        let hour = self.reminder_hour_utc;
        tokio::spawn(async move {
            loop {
                sleep_until_hour_utc(hour).await;
                if let Err(err) = pacer.send_reminders().await {
                    log::error!("Reminder sweep failed: {err}");
                }
            }
        });
    }
}

#[async_trait]
impl EventHandler for LessonHandler {
    async fn ready(&self, _ctx: serenity::client::Context, ready: Ready) {
        log::info!("Bot is connected and ready as {}!", ready.user.name);

        if !self.loops_started.swap(true, Ordering::SeqCst) {
            self.spawn_daily_loops();
        }
    }

    async fn message(&self, ctx: serenity::client::Context, msg: Message) {
        // The course runs in DMs only.
        if msg.author.bot || msg.guild_id.is_some() {
            return;
        }

        let Some(event) = commands::inbound_event(&msg, self.call_token) else {
            return;
        };

        let response = match self.assistant.handle(event).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("Error handling message from {}: {err:#}", msg.author.id);
                String::from("Oops, internal error.")
            }
        };

        // Discord doesn't like sending empty messages.
        if response.is_empty() {
            return;
        }

        let channel = msg.channel_id;
        for chunk in commands::split_reply(&response, MAX_MESSAGE_LENGTH) {
            if let Err(why) = channel.say(&ctx.http, chunk).await {
                let _ = channel.say(&ctx.http, "Oops, internal error.").await;
                log::error!("Error sending message: {why:?}");
                return;
            }
        }
    }
}
