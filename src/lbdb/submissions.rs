use chrono::{DateTime, Utc};

use crate::{
    lbdb::{DBResult, Store, bad_column},
    models::{self, HomeworkKind, LessonId, UserId, VerdictKind},
};

/// Attempts made inside the rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentAttempts {
    pub count: u32,
    pub oldest: Option<DateTime<Utc>>,
}

/////*============== SUBMISSION QUERIES ==============*/
impl<'a> TryFrom<&'a rusqlite::Row<'a>> for models::Submission {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        let kind: String = row.get("content_type")?;
        let verdict: String = row.get("verdict")?;

        Ok(Self {
            id: row.get("submission_id")?,
            user_id: row.get("user_id")?,
            lesson_id: row.get("lesson_id")?,
            content: row.get("content")?,
            kind: HomeworkKind::parse(&kind).ok_or_else(|| bad_column(4, &kind))?,
            verdict: VerdictKind::parse(&verdict).ok_or_else(|| bad_column(5, &verdict))?,
            message: row.get("verdict_message")?,
            created_at: models::from_nanos(row.get("created_at")?),
        })
    }
}

impl Store {
    /// Appends an attempt to the log. Submissions are never updated afterwards.
    ///
    /// Nothing is appended once the lesson has an accepted submission; `None` then. The
    /// check and the insert share one write transaction, so racing attempts can't both
    /// land after an acceptance.
    pub fn insert_submission(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        content: &str,
        kind: HomeworkKind,
        verdict: &models::Verdict,
    ) -> DBResult<Option<i64>> {
        log::trace!("[insert_submission] {user_id} -> lesson {lesson_id}: {}", verdict.kind.as_str());
        let mut connection = self.connect()?;
        let transaction = Store::write_transaction(&mut connection)?;

        let inserted = transaction.execute(
            "INSERT INTO Submissions (user_id, lesson_id, content, content_type, verdict, verdict_message, created_at)
             SELECT :user_id, :lesson_id, :content, :content_type, :verdict, :verdict_message, :now
             WHERE NOT EXISTS (
               SELECT 1 FROM Submissions
               WHERE user_id = :user_id AND lesson_id = :lesson_id AND verdict = 'ACCEPT'
             )",
            rusqlite::named_params! {
                ":user_id":         user_id,
                ":lesson_id":       lesson_id,
                ":content":         content,
                ":content_type":    kind.as_str(),
                ":verdict":         verdict.kind.as_str(),
                ":verdict_message": verdict.message,
                ":now":             self.now_nanos(),
            },
        )?;
        let id = (inserted > 0).then(|| transaction.last_insert_rowid());

        transaction.commit()?;
        Ok(id)
    }

    /// Every attempt for (user, lesson), oldest first.
    pub fn query_submissions(&self, user_id: UserId, lesson_id: LessonId) -> DBResult<Vec<models::Submission>> {
        let connection = self.connect()?;

        let mut stmt = connection.prepare(
            "SELECT * FROM Submissions
             WHERE user_id = :user_id AND lesson_id = :lesson_id
             ORDER BY created_at, submission_id",
        )?;

        let submissions = stmt
            .query_map(
                rusqlite::named_params! { ":user_id": user_id, ":lesson_id": lesson_id },
                |row| models::Submission::try_from(row),
            )?
            .collect::<DBResult<Vec<models::Submission>>>()?;

        Ok(submissions)
    }

    pub fn has_accepted_submission(&self, user_id: UserId, lesson_id: LessonId) -> DBResult<bool> {
        self.connect()?.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM Submissions
                WHERE user_id = :user_id AND lesson_id = :lesson_id AND verdict = 'ACCEPT'
             )",
            rusqlite::named_params! { ":user_id": user_id, ":lesson_id": lesson_id },
            |row| row.get(0),
        )
    }

    /// Counts every attempt, whatever its verdict, made in the trailing `window`.
    pub fn query_recent_attempts(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        window: chrono::Duration,
    ) -> DBResult<RecentAttempts> {
        let connection = self.connect()?;

        connection.query_row(
            "SELECT COUNT(*), MIN(created_at)
             FROM Submissions
             WHERE user_id = :user_id
               AND lesson_id = :lesson_id
               AND created_at > :now - :window",
            rusqlite::named_params! {
                ":user_id":   user_id,
                ":lesson_id": lesson_id,
                ":now":       self.now_nanos(),
                ":window":    models::duration_nanos(window),
            },
            |row| {
                Ok(RecentAttempts {
                    count: row.get(0)?,
                    oldest: row.get::<_, Option<i64>>(1)?.map(models::from_nanos),
                })
            },
        )
    }
}
