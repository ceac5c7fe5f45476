//! Domain errors for the course engine.
//!
//! Every variant belongs to exactly one [`ErrorKind`], which decides how the
//! dialogue layer surfaces it to the student and at which level it gets logged.

use std::time::Duration;

use thiserror::Error;

use crate::models::HomeworkKind;
use crate::state::UserState;

pub type CourseResult<T> = Result<T, CourseError>;

#[derive(Error, Debug)]
pub enum CourseError {
    #[error("That code doesn't exist. Please double-check it and try again.")]
    CodeNotFound,

    #[error("That code has already been used.")]
    CodeAlreadyUsed,

    #[error("That code already exists.")]
    DuplicateCode,

    #[error("You're already enrolled in the course.")]
    AlreadyEnrolled,

    #[error("You don't have access to the course yet. Enter your access code first.")]
    NotEnrolled,

    #[error("This lesson isn't open for you yet.")]
    LessonLocked,

    #[error("This lesson has no homework.")]
    NoHomework,

    #[error("This lesson requires homework before it can be completed.")]
    HomeworkRequired,

    #[error("Your answer is too short. Please write at least {min} characters.")]
    TooShort { min: usize },

    #[error("Please send a link to a YouTube video.")]
    NotAVideoLink,

    #[error("Only PDF or DOCX files are accepted.")]
    UnsupportedFile,

    #[error("That file is too small or empty.")]
    FileTooSmall,

    #[error("That file is too large (maximum {max_mib} MB).")]
    FileTooLarge { max_mib: u64 },

    #[error("This lesson expects {}, not {}.", HomeworkKind::instruction(.expected), HomeworkKind::instruction(.got))]
    WrongFormat { expected: HomeworkKind, got: HomeworkKind },

    #[error("Your homework for this lesson has already been accepted.")]
    AlreadyAccepted,

    #[error("Too many attempts ({limit} per hour). Try again in {} min.", retry_minutes(.retry_after))]
    RateLimited { limit: u32, retry_after: Duration },

    #[error("{0} not found.")]
    NotFound(&'static str),

    #[error("The homework checker is unavailable right now, please send your answer again in a few minutes.")]
    GradingUnavailable(#[source] anyhow::Error),

    #[error("Couldn't deliver your message right now, please try again later.")]
    Undeliverable(#[source] anyhow::Error),

    #[error("You don't have permission to do that.")]
    Forbidden,

    #[error("Can't go from {from} to {to} right now.")]
    InvalidTransition { from: UserState, to: UserState },

    #[error("Inconsistent course state: {0}")]
    Invariant(String),

    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Error taxonomy: how a failure is surfaced and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the student. Shown verbatim, never logged as a fault.
    UserInput,
    /// Shown with a retry-after hint.
    RateLimit,
    /// Shown as a generic "not found", logged at low severity.
    NotFound,
    /// A dependency (oracle, transport) misbehaved. The student is asked to retry.
    TransientDependency,
    /// Corrupted or contradictory state. Surfaced to operators, skipped in batch jobs.
    InvariantViolation,
    /// Anything else, most likely the database.
    Internal,
}

impl CourseError {
    pub fn kind(&self) -> ErrorKind {
        use CourseError::*;

        match self {
            CodeNotFound | CodeAlreadyUsed | DuplicateCode | AlreadyEnrolled | NotEnrolled | LessonLocked
            | NoHomework | HomeworkRequired | TooShort { .. } | NotAVideoLink
            | UnsupportedFile | FileTooSmall | FileTooLarge { .. } | WrongFormat { .. }
            | AlreadyAccepted | Forbidden | InvalidTransition { .. } => ErrorKind::UserInput,
            RateLimited { .. } => ErrorKind::RateLimit,
            NotFound(_) => ErrorKind::NotFound,
            GradingUnavailable(_) | Undeliverable(_) => ErrorKind::TransientDependency,
            Invariant(_) => ErrorKind::InvariantViolation,
            Store(_) => ErrorKind::Internal,
        }
    }

    /// Text suitable for sending back to the student.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal | ErrorKind::InvariantViolation => {
                String::from("Oops, something went wrong on our side. Please try again later.")
            }
            _ => self.to_string(),
        }
    }
}

fn retry_minutes(retry_after: &Duration) -> u64 {
    retry_after.as_secs().div_ceil(60).max(1)
}
