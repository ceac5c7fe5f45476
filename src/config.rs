//! Runtime configuration, read from the environment (and `.env` in the working directory).

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::models::UserId;

/// Thresholds that drive lesson unlocking and inactivity reminders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingConfig {
    /// Minimum time between completing a lesson and the next one unlocking.
    pub unlock_cooldown: chrono::Duration,
    pub soft_reminder_after: chrono::Duration,
    pub strong_reminder_after: chrono::Duration,
    /// Past this much inactivity nobody gets reminded anymore.
    pub reminder_cutoff: chrono::Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            unlock_cooldown: chrono::Duration::days(1),
            soft_reminder_after: chrono::Duration::days(3),
            strong_reminder_after: chrono::Duration::days(7),
            reminder_cutoff: chrono::Duration::days(14),
        }
    }
}

/// Limits enforced on homework submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeworkLimits {
    pub min_answer_length: usize,
    /// Maximum attempts per (user, lesson) inside `rate_window`, accepted or not.
    pub max_attempts: u32,
    pub rate_window: chrono::Duration,
    pub allowed_extensions: Vec<String>,
    pub min_file_size: u64,
    pub max_file_size: u64,
    pub grader_timeout: Duration,
}

impl Default for HomeworkLimits {
    fn default() -> Self {
        Self {
            min_answer_length: 20,
            max_attempts: 7,
            rate_window: chrono::Duration::hours(1),
            allowed_extensions: vec![String::from("pdf"), String::from("docx")],
            min_file_size: 1024,
            max_file_size: 20 * 1024 * 1024,
            grader_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub curator_id: UserId,
    pub admin_ids: HashSet<UserId>,
    pub database_path: PathBuf,
    pub lessons_path: Option<PathBuf>,
    pub call_token: char,
    pub unlock_hour_utc: u32,
    pub reminder_hour_utc: u32,
    pub grader: GraderConfig,
    pub pacing: PacingConfig,
    pub homework: HomeworkLimits,
}

impl Config {
    /// Reads the whole configuration, reporting every problem at once rather than the first.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut errors: Vec<String> = Vec::new();

        let discord_token = required("DISCORD_TOKEN", &mut errors);
        let curator_id = required("CURATOR_ID", &mut errors);
        let api_key = required("OPENAI_API_KEY", &mut errors);

        let curator_id = curator_id
            .and_then(|id| id.parse::<UserId>().map_err(|_| errors.push(format!("CURATOR_ID is not a user id: {id}"))).ok());

        let admin_ids = env::var("ADMIN_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .filter_map(|id| id.parse::<UserId>()
                .map_err(|_| errors.push(format!("ADMIN_IDS contains a non-numeric id: {id}")))
                .ok())
            .collect::<HashSet<_>>();

        let call_token = call_token(&mut errors);

        let unlock_hour_utc = optional("UNLOCK_HOUR_UTC", 10u32, &mut errors);
        let reminder_hour_utc = optional("REMINDER_HOUR_UTC", 18u32, &mut errors);
        for (name, hour) in [("UNLOCK_HOUR_UTC", unlock_hour_utc), ("REMINDER_HOUR_UTC", reminder_hour_utc)] {
            if hour > 23 {
                errors.push(format!("{name} must be between 0 and 23, got {hour}"));
            }
        }

        let defaults = HomeworkLimits::default();
        let homework = HomeworkLimits {
            min_answer_length: optional("MIN_ANSWER_LENGTH", defaults.min_answer_length, &mut errors),
            max_attempts: optional("RATE_LIMIT_PER_HOUR", defaults.max_attempts, &mut errors),
            grader_timeout: Duration::from_secs(optional("LLM_TIMEOUT", 15u64, &mut errors)),
            ..defaults
        };

        let pacing_defaults = PacingConfig::default();
        let pacing = PacingConfig {
            unlock_cooldown: chrono::Duration::hours(
                optional("UNLOCK_COOLDOWN_HOURS", pacing_defaults.unlock_cooldown.num_hours(), &mut errors)),
            soft_reminder_after: chrono::Duration::days(
                optional("SOFT_REMINDER_DAYS", pacing_defaults.soft_reminder_after.num_days(), &mut errors)),
            strong_reminder_after: chrono::Duration::days(
                optional("STRONG_REMINDER_DAYS", pacing_defaults.strong_reminder_after.num_days(), &mut errors)),
            reminder_cutoff: chrono::Duration::days(
                optional("REMINDER_CUTOFF_DAYS", pacing_defaults.reminder_cutoff.num_days(), &mut errors)),
        };
        if pacing.soft_reminder_after >= pacing.strong_reminder_after
            || pacing.strong_reminder_after >= pacing.reminder_cutoff
        {
            errors.push(String::from(
                "reminder thresholds must satisfy SOFT_REMINDER_DAYS < STRONG_REMINDER_DAYS < REMINDER_CUTOFF_DAYS"));
        }

        if !errors.is_empty() {
            for error in &errors {
                log::error!("[config] {error}");
            }
            return Err(anyhow!("Invalid configuration:\n\t{}", errors.join("\n\t")));
        }

        Ok(Self {
            discord_token: discord_token.unwrap_or_default(),
            curator_id: curator_id.unwrap_or_default(),
            admin_ids,
            database_path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("lessonbot.db")),
            lessons_path: env::var("LESSONS_PATH").ok().map(PathBuf::from),
            call_token,
            unlock_hour_utc,
            reminder_hour_utc,
            grader: GraderConfig {
                api_key: api_key.unwrap_or_default(),
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| String::from("https://api.openai.com/v1")),
                model: env::var("OPENAI_MODEL").unwrap_or_else(|_| String::from("gpt-4o-mini")),
            },
            pacing,
            homework,
        })
    }
}

fn required(name: &str, errors: &mut Vec<String>) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            errors.push(format!("{name} is not set"));
            None
        }
    }
}

fn optional<T: FromStr + std::fmt::Display>(name: &str, default: T, errors: &mut Vec<String>) -> T {
    match env::var(name) {
        Ok(value) => value.trim().parse::<T>().unwrap_or_else(|_| {
            errors.push(format!("{name} has an invalid value: {value}"));
            default
        }),
        Err(_) => default,
    }
}

/// The single character commands must start with, e.g. `$` or `!`.
fn call_token(errors: &mut Vec<String>) -> char {
    let env_token = env::var("BOT_CALL_TOKEN").unwrap_or_else(|_| String::from("$"));

    let Some(token) = env_token.chars().next() else {
        errors.push(String::from("BOT_CALL_TOKEN is empty"));
        return '$';
    };

    if env_token.chars().count() > 1 {
        log::warn!("$BOT_CALL_TOKEN not a single character. Truncating to {token}");
    }

    token
}
