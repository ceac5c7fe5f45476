use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::state::UserState;

/// Chat identity of a user. Issued by the transport, never by us.
pub type UserId = u64;
pub type LessonId = i64;

/// Converts a timestamp into the integer representation stored in the database.
///
/// Nanosecond precision, so comparisons against a threshold agree with the clock exactly.
pub fn to_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

pub fn duration_nanos(duration: chrono::Duration) -> i64 {
    duration.num_nanoseconds().unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub state: UserState,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// What a homework submission (or a lesson's homework requirement) consists of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeworkKind {
    Text,
    VideoLink,
    #[serde(alias = "document")]
    File,
}

impl HomeworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HomeworkKind::Text => "text",
            HomeworkKind::VideoLink => "video_link",
            HomeworkKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(HomeworkKind::Text),
            "video_link" => Some(HomeworkKind::VideoLink),
            "file" => Some(HomeworkKind::File),
            _ => None,
        }
    }

    /// How the student is asked to hand this kind of homework in.
    pub fn instruction(&self) -> &'static str {
        match self {
            HomeworkKind::Text => "a written answer",
            HomeworkKind::VideoLink => "a link to your YouTube video",
            HomeworkKind::File => "a PDF or DOCX file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lesson {
    pub id: LessonId,
    pub order: u32,
    pub title: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    /// `None` when the lesson has no homework at all.
    pub homework: Option<HomeworkKind>,
}

impl Lesson {
    pub fn requires_homework(&self) -> bool {
        self.homework.is_some()
    }
}

impl std::fmt::Display for Lesson {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "**Lesson {}: {}**", self.order, self.title)?;

        if let Some(url) = &self.media_url {
            write!(f, "\n\nVideo: <{url}>")?;
        }
        if let Some(body) = &self.body {
            write!(f, "\n\n{body}")?;
        }

        match self.homework {
            Some(kind) => write!(f, "\n\n*Homework:* send {}.", kind.instruction()),
            None => write!(f, "\n\nThis lesson has no homework."),
        }
    }
}

/// A catalog entry as it appears in the seed file, before it has a database id.
#[derive(Debug, Clone, Deserialize)]
pub struct LessonSeed {
    pub order: u32,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub homework: Option<HomeworkKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub user_id: UserId,
    pub current_lesson_id: LessonId,
    pub enrolled_at: DateTime<Utc>,
}

/// Stored status of a (user, lesson) progress row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Open,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Open => "OPEN",
            ProgressStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(ProgressStatus::Open),
            "COMPLETED" => Some(ProgressStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub status: ProgressStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Visibility of a lesson for one user. `Locked` is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonStatus {
    Locked,
    Open,
    Completed,
}

impl LessonStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOCKED" => Some(LessonStatus::Locked),
            "OPEN" => Some(LessonStatus::Open),
            "COMPLETED" => Some(LessonStatus::Completed),
            _ => None,
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            LessonStatus::Locked => "🔒",
            LessonStatus::Open => "📖",
            LessonStatus::Completed => "✅",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonOverview {
    pub lesson_id: LessonId,
    pub order: u32,
    pub title: String,
    pub status: LessonStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictKind {
    Accept,
    Revise,
}

impl VerdictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictKind::Accept => "ACCEPT",
            VerdictKind::Revise => "REVISE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCEPT" => Some(VerdictKind::Accept),
            "REVISE" => Some(VerdictKind::Revise),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub kind: VerdictKind,
    pub message: String,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        self.kind == VerdictKind::Accept
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: i64,
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub content: String,
    pub kind: HomeworkKind,
    pub verdict: VerdictKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCode {
    pub code: String,
    pub used: bool,
    pub redeemed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderTier {
    Soft,
    Strong,
}

impl ReminderTier {
    pub const ALL: [ReminderTier; 2] = [ReminderTier::Soft, ReminderTier::Strong];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderTier::Soft => "soft",
            ReminderTier::Strong => "strong",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ReminderTier::Soft => {
                "👋 We haven't seen you in a while! Your lessons are waiting for you, \
                 pick up where you left off whenever you're ready."
            }
            ReminderTier::Strong => {
                "⏰ You haven't dropped by for a whole week. Don't lose your momentum: \
                 even ten minutes today keeps the course moving."
            }
        }
    }
}

/// Aggregate numbers for the admin `stats` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseStats {
    pub users: u64,
    pub enrolled: u64,
    pub completed_lessons: u64,
    pub accepted_submissions: u64,
    pub unused_codes: u64,
}

impl std::fmt::Display for CourseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "**Course Stats:**\n\
             \tUsers: {}\n\
             \tEnrolled: {}\n\
             \tLessons completed: {}\n\
             \tHomework accepted: {}\n\
             \tUnused codes: {}",
            self.users, self.enrolled, self.completed_lessons, self.accepted_submissions, self.unused_codes
        )
    }
}
