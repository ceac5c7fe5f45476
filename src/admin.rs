//! Administrative overrides.
//!
//! Every operation takes an [`AdminCapability`], which only [`Admins::authorize`] can
//! hand out. The overrides go through the same store primitives as the normal path,
//! so they respect the same uniqueness guarantees.

use std::collections::HashSet;
use std::sync::Arc;

use itertools::Itertools;
use rand::Rng;

use crate::error::{CourseError, CourseResult};
use crate::gate;
use crate::lbdb::Store;
use crate::lbdb::enrollments::EnrolledUser;
use crate::lessons;
use crate::models::{CourseStats, UserId};
use crate::transport::Transport;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 8;
const CODE_ATTEMPTS: usize = 5;

/// Proof that the caller was checked against the admin set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminCapability {
    admin: UserId,
}

#[derive(Debug, Clone, Default)]
pub struct Admins {
    ids: HashSet<UserId>,
}

impl Admins {
    pub fn new(ids: impl IntoIterator<Item = UserId>) -> Self {
        Self { ids: ids.into_iter().collect() }
    }

    pub fn authorize(&self, user: UserId) -> CourseResult<AdminCapability> {
        if self.ids.contains(&user) {
            Ok(AdminCapability { admin: user })
        } else {
            log::info!("User {user} tried an admin command.");
            Err(CourseError::Forbidden)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Admin {
    store: Store,
    transport: Arc<dyn Transport>,
}

impl Admin {
    pub fn new(store: Store, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Adds an access code. A random one is generated when `code` is `None`.
    pub fn issue_code(&self, cap: &AdminCapability, code: Option<&str>) -> CourseResult<String> {
        if let Some(code) = code {
            let code = gate::normalize_code(code);
            if code.is_empty() {
                return Err(CourseError::CodeNotFound);
            }
            if !self.store.insert_code(&code)? {
                return Err(CourseError::DuplicateCode);
            }
            log::info!("Admin {} issued access code {code}.", cap.admin);
            return Ok(code);
        }

        for _ in 0..CODE_ATTEMPTS {
            let code = random_code();
            if self.store.insert_code(&code)? {
                log::info!("Admin {} issued access code {code}.", cap.admin);
                return Ok(code);
            }
        }

        Err(CourseError::Invariant(format!("no free access code after {CODE_ATTEMPTS} attempts")))
    }

    /// Completes the lesson at `order` for `user` as if their homework had been accepted.
    /// The next lesson still waits for the unlock sweep.
    pub fn force_complete(&self, cap: &AdminCapability, user: UserId, order: u32) -> CourseResult<bool> {
        self.store.query_enrollment(user)?.ok_or(CourseError::NotFound("Student"))?;
        let lesson = self.store.query_lesson_by_order(order)?.ok_or(CourseError::NotFound("Lesson"))?;

        let completed = lessons::complete(&self.store, user, lesson.id)?;
        log::info!("Admin {} force-completed lesson {order} for {user}.", cap.admin);
        Ok(completed)
    }

    /// Opens every lesson for `user`. Completed lessons stay completed.
    pub fn open_all(&self, cap: &AdminCapability, user: UserId) -> CourseResult<usize> {
        self.store.query_enrollment(user)?.ok_or(CourseError::NotFound("Student"))?;

        let opened = self.store.open_all_lessons(user)?;
        log::info!("Admin {} opened all lessons for {user} ({opened} new).", cap.admin);
        Ok(opened)
    }

    pub fn stats(&self, _cap: &AdminCapability) -> CourseResult<CourseStats> {
        Ok(self.store.query_stats()?)
    }

    pub fn list_users(&self, _cap: &AdminCapability) -> CourseResult<Vec<EnrolledUser>> {
        Ok(self.store.query_enrolled_users()?)
    }

    /// Sends `text` to every enrolled student. Failures are counted, never retried.
    pub async fn broadcast(&self, cap: &AdminCapability, text: &str) -> CourseResult<BroadcastReport> {
        let mut report = BroadcastReport::default();

        for user in self.store.query_enrolled_users()? {
            match self.transport.send_message(user.user_id, text).await {
                Ok(_) => report.delivered += 1,
                Err(err) => {
                    log::warn!("[broadcast] couldn't reach {}: {err:#}", user.user_id);
                    report.failed += 1;
                }
            }
        }

        log::info!("Admin {} broadcast to {} student(s), {} failed.", cap.admin, report.delivered, report.failed);
        Ok(report)
    }
}

fn random_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// One line per student, in enrollment order.
pub fn format_users(users: &[EnrolledUser]) -> String {
    if users.is_empty() {
        return String::from("No students enrolled yet.");
    }

    format!(
        "**Students ({}):**\n{}",
        users.len(),
        users
            .iter()
            .map(|user| format!(
                "\t{} ({}): lesson {}. {}",
                user.display_name, user.user_id, user.current_order, user.current_title
            ))
            .join("\n")
    )
}
