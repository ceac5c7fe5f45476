use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::{
    lbdb::{DBResult, Store, bad_column},
    models::{self, LessonId, LessonStatus, ProgressStatus, UserId},
};

/// A completed lesson whose cooldown has passed and whose successor isn't open yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockCandidate {
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub order: u32,
    pub completed_at: DateTime<Utc>,
}

/// Outcome of trying to move a user on to the lesson after `current_order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// `opened` is true only for the one call that actually created the progress row.
    Unlocked { lesson: models::Lesson, opened: bool },
    /// There is no lesson after `current_order`.
    CourseFinished,
    NotEnrolled,
}

/////*============== PROGRESS QUERIES ==============*/
impl<'a> TryFrom<&'a rusqlite::Row<'a>> for models::Progress {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;

        Ok(Self {
            user_id: row.get("user_id")?,
            lesson_id: row.get("lesson_id")?,
            status: ProgressStatus::parse(&status).ok_or_else(|| bad_column(2, &status))?,
            completed_at: row.get::<_, Option<i64>>("completed_at")?.map(models::from_nanos),
        })
    }
}

impl<'a> TryFrom<&'a rusqlite::Row<'a>> for models::LessonOverview {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;

        Ok(Self {
            lesson_id: row.get("lesson_id")?,
            order: row.get("order_num")?,
            title: row.get("title")?,
            status: LessonStatus::parse(&status).ok_or_else(|| bad_column(0, &status))?,
        })
    }
}

/// Opens the (user, lesson) pair unless a row already exists, whatever its status.
/// Returns `true` if this call created the row.
fn open_progress(connection: &Connection, user_id: UserId, lesson_id: LessonId) -> DBResult<bool> {
    let inserted = connection.execute(
        "INSERT INTO Progress (user_id, lesson_id, status)
         VALUES (:user_id, :lesson_id, 'OPEN')
         ON CONFLICT (user_id, lesson_id) DO NOTHING",
        rusqlite::named_params! { ":user_id": user_id, ":lesson_id": lesson_id },
    )?;

    Ok(inserted > 0)
}

impl Store {
    pub fn query_progress(&self, user_id: UserId, lesson_id: LessonId) -> DBResult<Option<models::Progress>> {
        let connection = self.connect()?;

        connection
            .query_row(
                "SELECT user_id, lesson_id, status, completed_at
                 FROM Progress
                 WHERE user_id = :user_id AND lesson_id = :lesson_id",
                rusqlite::named_params! { ":user_id": user_id, ":lesson_id": lesson_id },
                |row| models::Progress::try_from(row),
            )
            .optional()
    }

    /// Opens a lesson for a user. Existing rows (including completed ones) are left alone.
    pub fn insert_progress_open(&self, user_id: UserId, lesson_id: LessonId) -> DBResult<bool> {
        log::trace!("[insert_progress_open] Opening lesson {lesson_id} for {user_id}");
        open_progress(&self.connect()?, user_id, lesson_id)
    }

    /// Marks the lesson completed. A lesson that is already completed keeps its original
    /// timestamp. Returns `true` if this call did the completing.
    pub fn complete_lesson(&self, user_id: UserId, lesson_id: LessonId) -> DBResult<bool> {
        log::trace!("[complete_lesson] Completing lesson {lesson_id} for {user_id}");
        let connection = self.connect()?;

        let changed = connection.execute(
            "INSERT INTO Progress (user_id, lesson_id, status, completed_at)
             VALUES (:user_id, :lesson_id, 'COMPLETED', :now)
             ON CONFLICT (user_id, lesson_id) DO UPDATE
                SET status = 'COMPLETED', completed_at = :now
                WHERE Progress.status <> 'COMPLETED'",
            rusqlite::named_params! {
                ":user_id":   user_id,
                ":lesson_id": lesson_id,
                ":now":       self.now_nanos(),
            },
        )?;

        Ok(changed > 0)
    }

    /// Catalog annotated with what `user_id` can see. A progress row wins over the
    /// enrollment pointer; a completed row wins over everything.
    pub fn query_lessons_with_status(&self, user_id: UserId) -> DBResult<Vec<models::LessonOverview>> {
        self.query_overview(user_id, None)
    }

    /// `None` if the lesson doesn't exist at all.
    pub fn query_lesson_status(&self, user_id: UserId, lesson_id: LessonId) -> DBResult<Option<LessonStatus>> {
        Ok(self
            .query_overview(user_id, Some(lesson_id))?
            .into_iter()
            .next()
            .map(|overview| overview.status))
    }

    fn query_overview(&self, user_id: UserId, lesson_id: Option<LessonId>) -> DBResult<Vec<models::LessonOverview>> {
        let connection = self.connect()?;

        let mut stmt = connection.prepare(
            "SELECT
                CASE
                    WHEN p.status = 'COMPLETED'          THEN 'COMPLETED'
                    WHEN p.status IS NOT NULL            THEN 'OPEN'
                    WHEN e.current_lesson_id = l.lesson_id THEN 'OPEN'
                    ELSE 'LOCKED'
                END AS status,
                l.lesson_id, l.order_num, l.title
             FROM Lessons l
             LEFT JOIN Progress p    ON p.lesson_id = l.lesson_id AND p.user_id = :user_id
             LEFT JOIN Enrollments e ON e.user_id = :user_id
             WHERE :lesson_id IS NULL OR l.lesson_id = :lesson_id
             ORDER BY l.order_num",
        )?;

        let overview = stmt
            .query_map(
                rusqlite::named_params! { ":user_id": user_id, ":lesson_id": lesson_id },
                |row| models::LessonOverview::try_from(row),
            )?
            .collect::<DBResult<Vec<models::LessonOverview>>>()?;

        Ok(overview)
    }

    /// Every completed lesson that is at least `cooldown` old, isn't the last lesson of
    /// the catalog, and whose successor the user doesn't have yet.
    ///
    /// Completed rows without a timestamp are corrupt and never selected.
    pub fn query_unlock_candidates(&self, cooldown: chrono::Duration) -> DBResult<Vec<UnlockCandidate>> {
        log::trace!("[query_unlock_candidates] Looking for users ready for their next lesson...");
        let connection = self.connect()?;

        let mut stmt = connection.prepare(
            "SELECT p.user_id, p.lesson_id, l.order_num, p.completed_at
             FROM Progress p
             JOIN Lessons l ON l.lesson_id = p.lesson_id
             WHERE p.status = 'COMPLETED'
               AND p.completed_at IS NOT NULL
               AND p.completed_at <= :now - :cooldown
               AND l.order_num < (SELECT MAX(order_num) FROM Lessons)
               AND NOT EXISTS (
                 SELECT 1
                 FROM Progress p2
                 JOIN Lessons l2 ON l2.lesson_id = p2.lesson_id
                 WHERE p2.user_id = p.user_id
                   AND l2.order_num = l.order_num + 1
               )
             ORDER BY p.completed_at",
        )?;

        let candidates = stmt
            .query_map(
                rusqlite::named_params! {
                    ":now":      self.now_nanos(),
                    ":cooldown": models::duration_nanos(cooldown),
                },
                |row| {
                    Ok(UnlockCandidate {
                        user_id: row.get("user_id")?,
                        lesson_id: row.get("lesson_id")?,
                        order: row.get("order_num")?,
                        completed_at: models::from_nanos(row.get("completed_at")?),
                    })
                },
            )?
            .collect::<DBResult<Vec<UnlockCandidate>>>()?;

        Ok(candidates)
    }

    /// Opens the lesson at `current_order + 1` for the user and points their enrollment at it.
    ///
    /// Racing callers are serialised by the write lock and the (user, lesson) uniqueness:
    /// the loser finds the row already there, writes nothing, and reports the same lesson
    /// with `opened: false`.
    pub fn advance_enrollment(&self, user_id: UserId, current_order: u32) -> DBResult<Advance> {
        log::trace!("[advance_enrollment] Advancing {user_id} past lesson #{current_order}");
        let mut connection = self.connect()?;
        let transaction = Store::write_transaction(&mut connection)?;

        let enrolled: bool = transaction.query_row(
            "SELECT EXISTS (SELECT 1 FROM Enrollments WHERE user_id = :user_id)",
            rusqlite::named_params! { ":user_id": user_id },
            |row| row.get(0),
        )?;
        if !enrolled {
            return Ok(Advance::NotEnrolled);
        }

        let next = transaction
            .query_row(
                "SELECT * FROM Lessons WHERE order_num = :order",
                rusqlite::named_params! { ":order": current_order + 1 },
                |row| models::Lesson::try_from(row),
            )
            .optional()?;
        let Some(next) = next else {
            return Ok(Advance::CourseFinished);
        };

        let opened = open_progress(&transaction, user_id, next.id)?;
        if opened {
            // The pointer only ever moves forward.
            transaction.execute(
                "UPDATE Enrollments
                 SET current_lesson_id = :lesson_id
                 WHERE user_id = :user_id
                   AND (SELECT order_num FROM Lessons WHERE lesson_id = current_lesson_id) < :order",
                rusqlite::named_params! {
                    ":lesson_id": next.id,
                    ":user_id":   user_id,
                    ":order":     next.order,
                },
            )?;
        }

        transaction.commit()?;
        Ok(Advance::Unlocked { lesson: next, opened })
    }

    /// Opens every lesson of the catalog for the user and moves their pointer to the
    /// last one. Completed lessons stay completed. Returns how many rows were created.
    pub fn open_all_lessons(&self, user_id: UserId) -> DBResult<usize> {
        log::trace!("[open_all_lessons] Opening the whole catalog for {user_id}");
        let mut connection = self.connect()?;
        let transaction = Store::write_transaction(&mut connection)?;

        let opened = transaction.execute(
            "INSERT INTO Progress (user_id, lesson_id, status)
             SELECT :user_id, lesson_id, 'OPEN' FROM Lessons WHERE true
             ON CONFLICT (user_id, lesson_id) DO NOTHING",
            rusqlite::named_params! { ":user_id": user_id },
        )?;
        transaction.execute(
            "UPDATE Enrollments
             SET current_lesson_id = (SELECT lesson_id FROM Lessons ORDER BY order_num DESC LIMIT 1)
             WHERE user_id = :user_id",
            rusqlite::named_params! { ":user_id": user_id },
        )?;

        transaction.commit()?;
        Ok(opened)
    }
}
