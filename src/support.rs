//! Relays questions between students and the curator.
//!
//! Every curator-side message that carries a question is remembered, so a reply to
//! either of them finds its way back to the student who asked.

use std::sync::Arc;

use crate::error::{CourseError, CourseResult};
use crate::lbdb::Store;
use crate::models::{LessonId, User, UserId};
use crate::transport::{MessageId, Transport};

pub struct Support {
    store: Store,
    transport: Arc<dyn Transport>,
    curator: UserId,
}

impl Support {
    pub fn new(store: Store, transport: Arc<dyn Transport>, curator: UserId) -> Self {
        Self { store, transport, curator }
    }

    pub fn curator(&self) -> UserId {
        self.curator
    }

    /// Forwards a question to the curator: a header describing the student, then the
    /// question itself.
    pub async fn ask(&self, student: &User, lesson: Option<LessonId>, question: &str) -> CourseResult<()> {
        let header = self.header(student, lesson)?;

        // Each delivered message is recorded right away, so a reply to the header still
        // finds the student even if the question itself never arrives.
        for text in [header.as_str(), question] {
            let message: MessageId = self.transport
                .send_message(self.curator, text)
                .await
                .inspect_err(|err| log::error!("[ask] couldn't reach the curator for {}: {err:#}", student.id))
                .map_err(CourseError::Undeliverable)?;
            self.store.insert_support_question(message, student.id, lesson)?;
        }

        log::info!("Question from {} forwarded to the curator.", student.id);
        Ok(())
    }

    /// Relays the curator's reply to the student behind `reply_to`.
    ///
    /// Returns the student it went to, or `None` if `reply_to` isn't a forwarded question.
    pub async fn curator_reply(&self, from: UserId, reply_to: MessageId, text: &str) -> CourseResult<Option<UserId>> {
        if from != self.curator {
            return Err(CourseError::Forbidden);
        }

        let Some(origin) = self.store.query_question_origin(reply_to)? else {
            log::debug!("[curator_reply] message {reply_to} isn't a forwarded question");
            return Ok(None);
        };

        self.transport
            .send_message(origin.student_id, &format!("💬 Answer from the curator:\n\n{text}"))
            .await
            .inspect_err(|err| log::error!("[curator_reply] couldn't reach {}: {err:#}", origin.student_id))
            .map_err(CourseError::Undeliverable)?;

        log::info!("Curator reply relayed to {}.", origin.student_id);
        Ok(Some(origin.student_id))
    }

    fn header(&self, student: &User, lesson: Option<LessonId>) -> CourseResult<String> {
        let mut header = format!(
            "📩 **Question from a student**\nID: {}\nName: {}",
            student.id, student.display_name
        );

        if let Some(lesson) = lesson.map(|id| self.store.query_lesson(id)).transpose()?.flatten() {
            header += &format!("\nLesson: {}. {}", lesson.order, lesson.title);
        }

        header += "\n────────────────────";
        Ok(header)
    }
}
