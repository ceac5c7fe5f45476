//! Access-code gate: turns a known chat identity into an enrolled student.

use crate::error::{CourseError, CourseResult};
use crate::lbdb::Store;
use crate::lbdb::codes::Redemption;
use crate::models::{Enrollment, UserId};
use crate::state::UserState;

/// Codes are compared trimmed and uppercased, the way they are issued.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Redeems `code` for `user`, enrolling them at the first lesson.
///
/// Of any number of concurrent redemptions of one code, exactly one returns an
/// enrollment; the rest fail with [`CourseError::CodeAlreadyUsed`].
pub fn redeem(store: &Store, code: &str, user: UserId, display_name: &str) -> CourseResult<Enrollment> {
    let code = normalize_code(code);
    if code.is_empty() {
        return Err(CourseError::CodeNotFound);
    }

    store.insert_user(user, display_name)?;

    match store.redeem_code(&code, user)? {
        Redemption::Enrolled(enrollment) => {
            store.update_user_state(user, &UserState::Idle)?;
            Ok(enrollment)
        }
        Redemption::CodeNotFound => {
            log::debug!("[redeem] {user} tried an unknown code");
            Err(CourseError::CodeNotFound)
        }
        Redemption::CodeAlreadyUsed => {
            log::debug!("[redeem] {user} tried a used code");
            Err(CourseError::CodeAlreadyUsed)
        }
        Redemption::AlreadyEnrolled => Err(CourseError::AlreadyEnrolled),
        Redemption::CatalogEmpty => Err(CourseError::Invariant(String::from(
            "an access code was redeemed but no lessons are seeded",
        ))),
    }
}
