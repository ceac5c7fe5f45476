//! Per-(user, lesson) lifecycle: LOCKED -> OPEN -> COMPLETED.
//!
//! Completing a lesson never unlocks the next one. Unlocking belongs to the pacer, so
//! the cooldown applies the same way however the completion came about.

use std::path::Path;

use anyhow::Context;

use crate::error::{CourseError, CourseResult};
use crate::lbdb::Store;
use crate::lbdb::progress::Advance;
use crate::models::{Lesson, LessonId, LessonOverview, LessonSeed, LessonStatus, UserId};

/// Result of moving a user on to their next lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unlock {
    pub lesson: Lesson,
    /// Whether this call created the progress row. Only that caller should notify.
    pub opened: bool,
}

/// COMPLETED if a progress row says so, OPEN if any progress row exists or the lesson is
/// the enrollment's active one, LOCKED otherwise.
pub fn visibility(store: &Store, user: UserId, lesson: LessonId) -> CourseResult<LessonStatus> {
    store
        .query_lesson_status(user, lesson)?
        .ok_or(CourseError::NotFound("Lesson"))
}

/// Marks the lesson completed. Calling it again is a no-op that keeps the first timestamp.
/// Returns `true` if this call completed it.
pub fn complete(store: &Store, user: UserId, lesson: LessonId) -> CourseResult<bool> {
    let completed = store.complete_lesson(user, lesson)?;
    if completed {
        log::info!("User {user} completed lesson {lesson}.");
    }
    Ok(completed)
}

/// Opens the lesson after `current_order` and moves the enrollment pointer onto it.
///
/// `None` when the course has no lesson at `current_order + 1`; nothing is written then.
/// Concurrent calls for the same user and order produce a single progress row and all
/// report the same lesson.
pub fn unlock_next(store: &Store, user: UserId, current_order: u32) -> CourseResult<Option<Unlock>> {
    match store.advance_enrollment(user, current_order)? {
        Advance::Unlocked { lesson, opened } => {
            if opened {
                log::info!("User {user} unlocked lesson {} ({}).", lesson.order, lesson.title);
            }
            Ok(Some(Unlock { lesson, opened }))
        }
        Advance::CourseFinished => Ok(None),
        Advance::NotEnrolled => Err(CourseError::Invariant(format!(
            "user {user} completed lesson #{current_order} without being enrolled"
        ))),
    }
}

pub fn lessons_with_status(store: &Store, user: UserId) -> CourseResult<Vec<LessonOverview>> {
    Ok(store.query_lessons_with_status(user)?)
}

/// The lesson the user's enrollment currently points at.
pub fn current_lesson(store: &Store, user: UserId) -> CourseResult<Lesson> {
    let enrollment = store.query_enrollment(user)?.ok_or(CourseError::NotEnrolled)?;

    store.query_lesson(enrollment.current_lesson_id)?.ok_or_else(|| {
        CourseError::Invariant(format!(
            "enrollment of {user} points at missing lesson {}",
            enrollment.current_lesson_id
        ))
    })
}

/// Looks up a lesson by its position, refusing anything the user can't see yet.
pub fn open_lesson(store: &Store, user: UserId, order: u32) -> CourseResult<Lesson> {
    if store.query_enrollment(user)?.is_none() {
        return Err(CourseError::NotEnrolled);
    }

    let lesson = store.query_lesson_by_order(order)?.ok_or(CourseError::NotFound("Lesson"))?;
    match visibility(store, user, lesson.id)? {
        LessonStatus::Locked => Err(CourseError::LessonLocked),
        LessonStatus::Open | LessonStatus::Completed => Ok(lesson),
    }
}

/// Completes a lesson that has no homework. Lessons with homework are only completed by
/// an accepted submission (or an admin).
pub fn mark_done(store: &Store, user: UserId, lesson: &Lesson) -> CourseResult<bool> {
    if lesson.requires_homework() {
        return Err(CourseError::HomeworkRequired);
    }
    if visibility(store, user, lesson.id)? == LessonStatus::Locked {
        return Err(CourseError::LessonLocked);
    }

    complete(store, user, lesson.id)
}

/// What the `progress` command shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    pub completed: usize,
    pub current: Lesson,
    pub lessons: Vec<LessonOverview>,
}

impl ProgressReport {
    pub fn percent(&self) -> usize {
        match self.lessons.len() {
            0 => 0,
            total => self.completed * 100 / total,
        }
    }
}

impl std::fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "**Your progress**\n\
             Completed: {} of {} lessons ({}%)\n\
             Current lesson: {}\n",
            self.completed,
            self.lessons.len(),
            self.percent(),
            self.current.title
        )?;

        for lesson in &self.lessons {
            write!(f, "\n{} {}. {}", lesson.status.marker(), lesson.order, lesson.title)?;
        }

        Ok(())
    }
}

pub fn progress_report(store: &Store, user: UserId) -> CourseResult<ProgressReport> {
    let current = current_lesson(store, user)?;
    let lessons = lessons_with_status(store, user)?;
    let completed = lessons
        .iter()
        .filter(|lesson| lesson.status == LessonStatus::Completed)
        .count();

    Ok(ProgressReport { completed, current, lessons })
}

/// Seeds the catalog from a JSON array of lessons. Positions already taken are skipped.
pub fn seed_from_file(store: &Store, path: &Path) -> anyhow::Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("No such file or directory: {}", path.display()))?;
    let seeds: Vec<LessonSeed> = serde_json::from_str(&raw)
        .with_context(|| format!("Couldn't deserialize lessons from {}", path.display()))?;

    let mut orders = seeds.iter().map(|seed| seed.order).collect::<Vec<_>>();
    orders.sort_unstable();
    if orders.iter().enumerate().any(|(index, &order)| order as usize != index + 1) {
        anyhow::bail!("Lesson order numbers in {} must run 1..={} without gaps", path.display(), seeds.len());
    }

    Ok(store.seed_lessons(&seeds)?)
}
