use rusqlite::OptionalExtension;

use crate::{
    lbdb::{DBResult, Store},
    models::{LessonId, UserId},
};

/// Who asked the question the curator is replying to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionOrigin {
    pub student_id: UserId,
    pub lesson_id: Option<LessonId>,
}

/////*============== SUPPORT QUESTION QUERIES ==============*/
impl Store {
    /// Remembers that the curator-side message `message_id` carries a question from `student_id`.
    pub fn insert_support_question(
        &self,
        message_id: u64,
        student_id: UserId,
        lesson_id: Option<LessonId>,
    ) -> DBResult<bool> {
        log::trace!("[insert_support_question] message {message_id} -> student {student_id}");
        let connection = self.connect()?;
        let now = self.now_nanos();

        connection
            .prepare(
                "INSERT INTO SupportQuestions ( message_id,  student_id,  lesson_id,  created_at)
                 VALUES                       (:message_id, :student_id, :lesson_id, :now)",
            )?
            .execute(rusqlite::named_params! {
                ":message_id": message_id,
                ":student_id": student_id,
                ":lesson_id":  lesson_id,
                ":now":        now,
            })
            .map_or_else(crate::lbdb::swallow_constraint_violation, |_| Ok(true))
    }

    pub fn query_question_origin(&self, message_id: u64) -> DBResult<Option<QuestionOrigin>> {
        let connection = self.connect()?;

        connection
            .query_row(
                "SELECT student_id, lesson_id FROM SupportQuestions WHERE message_id = :message_id",
                rusqlite::named_params! { ":message_id": message_id },
                |row| {
                    Ok(QuestionOrigin {
                        student_id: row.get("student_id")?,
                        lesson_id: row.get("lesson_id")?,
                    })
                },
            )
            .optional()
    }
}
