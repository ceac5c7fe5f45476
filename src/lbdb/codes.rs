use rusqlite::OptionalExtension;

use crate::{
    lbdb::{DBResult, Store},
    models::{self, UserId},
};

/// What happened to a redemption attempt.
///
/// Only `Enrolled` wrote anything; every other outcome rolled back untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    Enrolled(models::Enrollment),
    CodeNotFound,
    CodeAlreadyUsed,
    AlreadyEnrolled,
    /// No lessons are seeded, so there is nothing to enroll into.
    CatalogEmpty,
}

/////*============== ACCESS CODE QUERIES ==============*/
impl<'a> TryFrom<&'a rusqlite::Row<'a>> for models::AccessCode {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            code: row.get("code")?,
            used: row.get("used")?,
            redeemed_by: row.get("redeemed_by")?,
            created_at: models::from_nanos(row.get("created_at")?),
        })
    }
}

impl Store {
    pub fn query_code(&self, code: &str) -> DBResult<Option<models::AccessCode>> {
        let connection = self.connect()?;

        connection
            .query_row(
                "SELECT * FROM AccessCodes WHERE code = :code",
                rusqlite::named_params! { ":code": code },
                |row| models::AccessCode::try_from(row),
            )
            .optional()
    }

    /// Adds an unused code. Returns `false` if the code already exists.
    pub fn insert_code(&self, code: &str) -> DBResult<bool> {
        log::trace!("[insert_code] Inserting access code into AccessCodes...");
        let connection = self.connect()?;
        let now = self.now_nanos();

        connection
            .prepare("INSERT INTO AccessCodes (code, created_at) VALUES (:code, :now)")?
            .execute(rusqlite::named_params! { ":code": code, ":now": now })
            .map_or_else(crate::lbdb::swallow_constraint_violation, |_| Ok(true))
    }

    /// Consumes `code` for `user_id` and enrolls them at the first lesson.
    ///
    /// Marking the code, creating the enrollment and opening the first lesson happen in
    /// one write transaction. The code is flipped with `WHERE used = 0`, so of two racing
    /// redemptions exactly one sees a changed row. The user row must already exist.
    pub fn redeem_code(&self, code: &str, user_id: UserId) -> DBResult<Redemption> {
        log::trace!("[redeem_code] {user_id} is redeeming a code");
        let mut connection = self.connect()?;
        let transaction = Store::write_transaction(&mut connection)?;
        let now = self.now_nanos();

        let used: Option<bool> = transaction
            .query_row(
                "SELECT used FROM AccessCodes WHERE code = :code",
                rusqlite::named_params! { ":code": code },
                |row| row.get(0),
            )
            .optional()?;
        match used {
            None => return Ok(Redemption::CodeNotFound),
            // A spent code stays spent, whoever presents it.
            Some(true) => return Ok(Redemption::CodeAlreadyUsed),
            Some(false) => {}
        }

        let enrolled: bool = transaction.query_row(
            "SELECT EXISTS (SELECT 1 FROM Enrollments WHERE user_id = :user_id)",
            rusqlite::named_params! { ":user_id": user_id },
            |row| row.get(0),
        )?;
        if enrolled {
            return Ok(Redemption::AlreadyEnrolled);
        }

        let first_lesson: Option<models::LessonId> = transaction
            .query_row("SELECT lesson_id FROM Lessons ORDER BY order_num LIMIT 1", [], |row| row.get(0))
            .optional()?;
        let Some(first_lesson) = first_lesson else {
            return Ok(Redemption::CatalogEmpty);
        };

        let claimed = transaction.execute(
            "UPDATE AccessCodes SET used = 1, redeemed_by = :user_id WHERE code = :code AND used = 0",
            rusqlite::named_params! { ":user_id": user_id, ":code": code },
        )?;
        if claimed == 0 {
            return Ok(Redemption::CodeAlreadyUsed);
        }

        transaction.execute(
            "INSERT INTO Enrollments (user_id, current_lesson_id, enrolled_at)
             VALUES (:user_id, :lesson_id, :now)",
            rusqlite::named_params! { ":user_id": user_id, ":lesson_id": first_lesson, ":now": now },
        )?;
        transaction.execute(
            "INSERT INTO Progress (user_id, lesson_id, status)
             VALUES (:user_id, :lesson_id, 'OPEN')
             ON CONFLICT (user_id, lesson_id) DO NOTHING",
            rusqlite::named_params! { ":user_id": user_id, ":lesson_id": first_lesson },
        )?;

        transaction.commit()?;
        log::info!("User {user_id} redeemed an access code and is now enrolled.");

        Ok(Redemption::Enrolled(models::Enrollment {
            user_id,
            current_lesson_id: first_lesson,
            enrolled_at: models::from_nanos(now),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::Redemption;
    use crate::lbdb::testing::*;
    use crate::models::LessonStatus;

    #[test]
    fn redemption_opens_the_first_lesson() {
        let test = test_store_with_lessons(2);
        test.store.insert_code("ALPHA").unwrap();
        test.store.insert_user(1, "Ada").unwrap();

        let Redemption::Enrolled(enrollment) = test.store.redeem_code("ALPHA", 1).unwrap() else {
            panic!("expected an enrollment");
        };
        assert_eq!(enrollment.enrolled_at, start_time());
        assert_eq!(test.store.query_lesson_status(1, enrollment.current_lesson_id).unwrap(), Some(LessonStatus::Open));

        let code = test.store.query_code("ALPHA").unwrap().unwrap();
        assert!(code.used);
        assert_eq!(code.redeemed_by, Some(1));
    }

    #[test]
    fn a_used_code_stays_used() {
        let test = test_store_with_lessons(1);
        test.store.insert_code("ALPHA").unwrap();
        test.store.insert_user(1, "Ada").unwrap();
        test.store.insert_user(2, "Bob").unwrap();

        assert!(matches!(test.store.redeem_code("ALPHA", 1).unwrap(), Redemption::Enrolled(_)));
        assert_eq!(test.store.redeem_code("ALPHA", 2).unwrap(), Redemption::CodeAlreadyUsed);
        assert!(test.store.query_enrollment(2).unwrap().is_none());
    }

    #[test]
    fn already_enrolled_users_keep_the_code_unused() {
        let test = test_store_with_lessons(1);
        test.store.insert_code("ALPHA").unwrap();
        test.store.insert_code("BETA").unwrap();
        test.store.insert_user(1, "Ada").unwrap();

        test.store.redeem_code("ALPHA", 1).unwrap();
        assert_eq!(test.store.redeem_code("BETA", 1).unwrap(), Redemption::AlreadyEnrolled);
        assert!(!test.store.query_code("BETA").unwrap().unwrap().used);
    }

    #[test]
    fn unknown_codes_and_empty_catalogs() {
        let test = test_store();
        test.store.insert_user(1, "Ada").unwrap();
        assert_eq!(test.store.redeem_code("NOPE", 1).unwrap(), Redemption::CodeNotFound);

        test.store.insert_code("ALPHA").unwrap();
        assert_eq!(test.store.redeem_code("ALPHA", 1).unwrap(), Redemption::CatalogEmpty);
        assert_eq!(test.store.query_stats().unwrap().unused_codes, 1);
    }

    #[test]
    fn duplicate_codes_are_rejected_quietly() {
        let test = test_store();
        assert!(test.store.insert_code("ALPHA").unwrap());
        assert!(!test.store.insert_code("ALPHA").unwrap());
    }
}
