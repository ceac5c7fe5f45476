use rusqlite::OptionalExtension;

use crate::{
    lbdb::{DBResult, Store},
    models::{self, UserId},
};

/// An enrolled user together with the lesson their enrollment points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledUser {
    pub user_id: UserId,
    pub display_name: String,
    pub current_order: u32,
    pub current_title: String,
}

/////*============== ENROLLMENT QUERIES ==============*/
impl<'a> TryFrom<&'a rusqlite::Row<'a>> for models::Enrollment {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            current_lesson_id: row.get("current_lesson_id")?,
            enrolled_at: models::from_nanos(row.get("enrolled_at")?),
        })
    }
}

impl Store {
    pub fn query_enrollment(&self, user_id: UserId) -> DBResult<Option<models::Enrollment>> {
        let connection = self.connect()?;

        connection
            .query_row(
                "SELECT * FROM Enrollments WHERE user_id = :user_id",
                rusqlite::named_params! { ":user_id": user_id },
                |row| models::Enrollment::try_from(row),
            )
            .optional()
    }

    /// Every enrolled user, oldest enrollment first.
    pub fn query_enrolled_users(&self) -> DBResult<Vec<EnrolledUser>> {
        let connection = self.connect()?;

        let mut stmt = connection.prepare(
            "SELECT e.user_id, u.display_name, l.order_num, l.title
             FROM Enrollments e
             JOIN Users u   ON u.user_id = e.user_id
             JOIN Lessons l ON l.lesson_id = e.current_lesson_id
             ORDER BY e.enrolled_at, e.user_id",
        )?;

        let users = stmt
            .query_map([], |row| {
                Ok(EnrolledUser {
                    user_id: row.get("user_id")?,
                    display_name: row.get("display_name")?,
                    current_order: row.get("order_num")?,
                    current_title: row.get("title")?,
                })
            })?
            .collect::<DBResult<Vec<EnrolledUser>>>()?;

        Ok(users)
    }

    /// All the admin counters, read in one go.
    pub fn query_stats(&self) -> DBResult<models::CourseStats> {
        let connection = self.connect()?;

        connection.query_row(
            "SELECT
                (SELECT COUNT(*) FROM Users)                              AS users,
                (SELECT COUNT(*) FROM Enrollments)                        AS enrolled,
                (SELECT COUNT(*) FROM Progress WHERE status = 'COMPLETED') AS completed_lessons,
                (SELECT COUNT(*) FROM Submissions WHERE verdict = 'ACCEPT') AS accepted_submissions,
                (SELECT COUNT(*) FROM AccessCodes WHERE used = 0)         AS unused_codes",
            [],
            |row| {
                Ok(models::CourseStats {
                    users: row.get("users")?,
                    enrolled: row.get("enrolled")?,
                    completed_lessons: row.get("completed_lessons")?,
                    accepted_submissions: row.get("accepted_submissions")?,
                    unused_codes: row.get("unused_codes")?,
                })
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::lbdb::codes::Redemption;
    use crate::lbdb::testing::*;

    #[test]
    fn enrolled_users_report_their_current_lesson() {
        let test = test_store_with_lessons(3);
        test.store.insert_code("ALPHA").unwrap();
        test.store.insert_user(1, "Ada").unwrap();
        assert!(matches!(test.store.redeem_code("ALPHA", 1).unwrap(), Redemption::Enrolled(_)));

        let users = test.store.query_enrolled_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].display_name, "Ada");
        assert_eq!(users[0].current_order, 1);
        assert_eq!(users[0].current_title, "Lesson 1");
    }

    #[test]
    fn stats_count_each_table() {
        let test = test_store_with_lessons(2);
        test.store.insert_code("ALPHA").unwrap();
        test.store.insert_code("BETA").unwrap();
        test.store.insert_user(1, "Ada").unwrap();
        test.store.insert_user(2, "Bob").unwrap();
        test.store.redeem_code("ALPHA", 1).unwrap();

        let lesson = test.store.query_lesson_by_order(1).unwrap().unwrap();
        test.store.complete_lesson(1, lesson.id).unwrap();

        let stats = test.store.query_stats().unwrap();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.enrolled, 1);
        assert_eq!(stats.completed_lessons, 1);
        assert_eq!(stats.accepted_submissions, 0);
        assert_eq!(stats.unused_codes, 1);
    }
}
