//! Homework intake: checks a submission, grades it, logs it and completes the lesson
//! when it is accepted.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use anyhow::anyhow;
use regex::Regex;
use serenity::async_trait;

use crate::config::HomeworkLimits;
use crate::error::{CourseError, CourseResult};
use crate::lbdb::Store;
use crate::lessons;
use crate::models::{HomeworkKind, Lesson, LessonId, LessonStatus, UserId, Verdict, VerdictKind};

static VIDEO_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(youtube\.com/watch\?v=|youtu\.be/|youtube\.com/shorts/)")
        .expect("video link pattern is valid")
});

const VIDEO_ACKNOWLEDGEMENT: &str =
    "🎬 Got your video, thank you! The next lesson opens a day after you complete this one.";
const FILE_ACKNOWLEDGEMENT: &str =
    "📄 Got your file, thank you! The next lesson opens a day after you complete this one.";

/// What the student handed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomeworkContent {
    Text(String),
    Link(String),
    /// An uploaded document. `reference` is whatever the transport uses to find it again.
    File { name: String, size: u64, reference: String },
}

impl HomeworkContent {
    pub fn kind(&self) -> HomeworkKind {
        match self {
            HomeworkContent::Text(_) => HomeworkKind::Text,
            HomeworkContent::Link(_) => HomeworkKind::VideoLink,
            HomeworkContent::File { .. } => HomeworkKind::File,
        }
    }

    /// What goes into the submission log.
    fn logged(&self) -> String {
        match self {
            HomeworkContent::Text(text) | HomeworkContent::Link(text) => text.trim().to_string(),
            HomeworkContent::File { name, reference, .. } => format!("{name} ({reference})"),
        }
    }
}

/// Everything the grading oracle gets to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradingRequest<'a> {
    pub lesson_order: u32,
    pub topic: &'a str,
    pub task: &'a str,
    pub answer: &'a str,
}

/// Pluggable verdict oracle for free-text answers.
#[async_trait]
pub trait Grader: Send + Sync {
    async fn grade(&self, request: &GradingRequest<'_>) -> anyhow::Result<Verdict>;
}

pub struct Intake {
    store: Store,
    grader: Arc<dyn Grader>,
    limits: HomeworkLimits,
}

impl Intake {
    pub fn new(store: Store, grader: Arc<dyn Grader>, limits: HomeworkLimits) -> Self {
        Self { store, grader, limits }
    }

    /// Checks that `user` may hand something in for `lesson` right now, without
    /// looking at any content. Used before asking the student for their answer.
    pub fn check_ready(&self, user: UserId, lesson: LessonId) -> CourseResult<Lesson> {
        let lesson = self.actionable_lesson(user, lesson)?;
        self.check_not_accepted(user, &lesson)?;
        self.check_rate_limit(user, &lesson)?;
        Ok(lesson)
    }

    /// Runs one submission through the pipeline.
    ///
    /// Checks run in order, each one a hard stop: the lesson must be open and have
    /// homework, nothing may have been accepted already, the hourly ceiling must not be
    /// reached, and the content must have the right shape. Only then is the answer graded
    /// and logged. A grader timeout or failure writes nothing.
    pub async fn submit(&self, user: UserId, lesson: LessonId, content: HomeworkContent) -> CourseResult<Verdict> {
        let lesson = self.actionable_lesson(user, lesson)?;
        self.check_not_accepted(user, &lesson)?;
        self.check_rate_limit(user, &lesson)?;
        let expected = self.validate(&lesson, &content)?;

        let verdict = match expected {
            HomeworkKind::Text => self.grade(&lesson, &content).await?,
            HomeworkKind::VideoLink => accept(VIDEO_ACKNOWLEDGEMENT),
            HomeworkKind::File => accept(FILE_ACKNOWLEDGEMENT),
        };

        let logged = self.store.insert_submission(user, lesson.id, &content.logged(), content.kind(), &verdict)?;
        if logged.is_none() {
            // Another attempt was accepted while this one was being graded.
            lessons::complete(&self.store, user, lesson.id)?;
            return Err(CourseError::AlreadyAccepted);
        }
        log::info!(
            "User {user} submitted homework for lesson {}: {}",
            lesson.order,
            verdict.kind.as_str()
        );

        if verdict.is_accepted() {
            lessons::complete(&self.store, user, lesson.id)?;
        }

        Ok(verdict)
    }

    fn actionable_lesson(&self, user: UserId, lesson: LessonId) -> CourseResult<Lesson> {
        if self.store.query_enrollment(user)?.is_none() {
            return Err(CourseError::NotEnrolled);
        }

        let lesson = self.store.query_lesson(lesson)?.ok_or(CourseError::NotFound("Lesson"))?;
        if lessons::visibility(&self.store, user, lesson.id)? == LessonStatus::Locked {
            return Err(CourseError::LessonLocked);
        }
        if !lesson.requires_homework() {
            return Err(CourseError::NoHomework);
        }

        Ok(lesson)
    }

    fn check_not_accepted(&self, user: UserId, lesson: &Lesson) -> CourseResult<()> {
        if !self.store.has_accepted_submission(user, lesson.id)? {
            return Ok(());
        }

        // An accepted answer whose completion never landed gets its completion now.
        if lessons::complete(&self.store, user, lesson.id)? {
            log::warn!("[check_not_accepted] lesson {} of {user} was accepted but not completed", lesson.id);
        }

        Err(CourseError::AlreadyAccepted)
    }

    fn check_rate_limit(&self, user: UserId, lesson: &Lesson) -> CourseResult<()> {
        let attempts = self.store.query_recent_attempts(user, lesson.id, self.limits.rate_window)?;
        if attempts.count < self.limits.max_attempts {
            return Ok(());
        }

        let retry_after = attempts
            .oldest
            .map(|oldest| oldest + self.limits.rate_window - self.store.now())
            .and_then(|wait| wait.to_std().ok())
            .unwrap_or_default();

        log::debug!("[check_rate_limit] {user} hit the ceiling on lesson {}", lesson.id);
        Err(CourseError::RateLimited { limit: self.limits.max_attempts, retry_after })
    }

    /// Shape checks. Returns the homework kind the lesson expects.
    fn validate(&self, lesson: &Lesson, content: &HomeworkContent) -> CourseResult<HomeworkKind> {
        let expected = lesson.homework.ok_or(CourseError::NoHomework)?;
        if content.kind() != expected {
            return Err(CourseError::WrongFormat { expected, got: content.kind() });
        }

        match content {
            HomeworkContent::Text(text) => {
                if text.trim().chars().count() < self.limits.min_answer_length {
                    return Err(CourseError::TooShort { min: self.limits.min_answer_length });
                }
            }
            HomeworkContent::Link(link) => {
                if !is_video_link(link) {
                    return Err(CourseError::NotAVideoLink);
                }
            }
            HomeworkContent::File { name, size, .. } => {
                let extension = Path::new(name)
                    .extension()
                    .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
                    .unwrap_or_default();

                if !self.limits.allowed_extensions.contains(&extension) {
                    return Err(CourseError::UnsupportedFile);
                }
                if *size < self.limits.min_file_size {
                    return Err(CourseError::FileTooSmall);
                }
                if *size > self.limits.max_file_size {
                    return Err(CourseError::FileTooLarge { max_mib: self.limits.max_file_size / (1024 * 1024) });
                }
            }
        }

        Ok(expected)
    }

    async fn grade(&self, lesson: &Lesson, content: &HomeworkContent) -> CourseResult<Verdict> {
        let HomeworkContent::Text(answer) = content else {
            return Err(CourseError::WrongFormat { expected: HomeworkKind::Text, got: content.kind() });
        };

        let request = GradingRequest {
            lesson_order: lesson.order,
            topic: &lesson.title,
            task: lesson.body.as_deref().unwrap_or_default(),
            answer: answer.trim(),
        };

        match tokio::time::timeout(self.limits.grader_timeout, self.grader.grade(&request)).await {
            Ok(Ok(verdict)) => Ok(verdict),
            Ok(Err(err)) => {
                log::error!("[grade] grader failed on lesson {}: {err:#}", lesson.order);
                Err(CourseError::GradingUnavailable(err))
            }
            Err(_) => {
                log::warn!("[grade] grader timed out after {:?} on lesson {}", self.limits.grader_timeout, lesson.order);
                Err(CourseError::GradingUnavailable(anyhow!(
                    "grader timed out after {:?}",
                    self.limits.grader_timeout
                )))
            }
        }
    }
}

fn accept(message: &str) -> Verdict {
    Verdict { kind: VerdictKind::Accept, message: message.to_string() }
}

/// Whether `link` points at a YouTube video, short or long form.
pub fn is_video_link(link: &str) -> bool {
    VIDEO_LINK.is_match(link.trim())
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::{Script, ScriptedGrader};
    use super::*;
    use crate::lbdb::testing::*;
    use crate::models::LessonSeed;

    const ANSWER: &str = "Breathing from the diaphragm keeps the voice steady.";

    struct Fixture {
        test: TestStore,
        grader: Arc<ScriptedGrader>,
        intake: Intake,
    }

    fn fixture(script: Script) -> Fixture {
        let test = test_store_with_lessons(1);
        for (order, homework) in [(2, HomeworkKind::VideoLink), (3, HomeworkKind::File)] {
            test.store.insert_lesson(&LessonSeed {
                order,
                title: format!("Lesson {order}"),
                body: None,
                media_url: None,
                homework: Some(homework),
            }).unwrap();
        }
        test.store.insert_code("CODE0001").unwrap();
        crate::gate::redeem(&test.store, "CODE0001", 1, "Ada").unwrap();
        test.store.open_all_lessons(1).unwrap();

        let grader = Arc::new(ScriptedGrader::new(script));
        let limits = HomeworkLimits { grader_timeout: Duration::from_millis(50), ..HomeworkLimits::default() };
        let intake = Intake::new(test.store.clone(), grader.clone(), limits);
        Fixture { test, grader, intake }
    }

    fn lesson_id(fixture: &Fixture, order: u32) -> LessonId {
        fixture.test.store.query_lesson_by_order(order).unwrap().unwrap().id
    }

    fn text(answer: &str) -> HomeworkContent {
        HomeworkContent::Text(answer.to_string())
    }

    #[tokio::test]
    async fn short_answers_never_reach_the_grader() {
        let fixture = fixture(Script::Accept);
        let lesson = lesson_id(&fixture, 1);

        let err = fixture.intake.submit(1, lesson, text("too short")).await.unwrap_err();
        assert!(matches!(err, CourseError::TooShort { min: 20 }));
        assert_eq!(fixture.grader.calls(), 0);
        assert!(fixture.test.store.query_submissions(1, lesson).unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepted_text_completes_the_lesson() {
        let fixture = fixture(Script::Accept);
        let lesson = lesson_id(&fixture, 1);

        let verdict = fixture.intake.submit(1, lesson, text(ANSWER)).await.unwrap();
        assert!(verdict.is_accepted());
        assert_eq!(lessons::visibility(&fixture.test.store, 1, lesson).unwrap(), LessonStatus::Completed);
    }

    #[tokio::test]
    async fn revise_keeps_the_lesson_open() {
        let fixture = fixture(Script::Revise);
        let lesson = lesson_id(&fixture, 1);

        let verdict = fixture.intake.submit(1, lesson, text(ANSWER)).await.unwrap();
        assert_eq!(verdict.kind, VerdictKind::Revise);
        assert_eq!(lessons::visibility(&fixture.test.store, 1, lesson).unwrap(), LessonStatus::Open);
        assert_eq!(fixture.test.store.query_submissions(1, lesson).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn grader_failures_write_nothing() {
        for script in [Script::Fail, Script::Hang] {
            let fixture = fixture(script);
            let lesson = lesson_id(&fixture, 1);

            let err = fixture.intake.submit(1, lesson, text(ANSWER)).await.unwrap_err();
            assert!(matches!(err, CourseError::GradingUnavailable(_)));
            assert!(fixture.test.store.query_submissions(1, lesson).unwrap().is_empty());
            assert_eq!(lessons::visibility(&fixture.test.store, 1, lesson).unwrap(), LessonStatus::Open);
        }
    }

    #[tokio::test]
    async fn rate_limit_counts_every_attempt_and_hints_a_retry() {
        let fixture = fixture(Script::Revise);
        let lesson = lesson_id(&fixture, 1);

        for _ in 0..7 {
            fixture.intake.submit(1, lesson, text(ANSWER)).await.unwrap();
            fixture.test.clock.advance(chrono::Duration::minutes(1));
        }

        let err = fixture.intake.submit(1, lesson, text(ANSWER)).await.unwrap_err();
        let CourseError::RateLimited { limit, retry_after } = err else {
            panic!("expected a rate limit, got {err:?}");
        };
        assert_eq!(limit, 7);
        // First attempt at t0, now is t0 + 7min, window is an hour.
        assert_eq!(retry_after, Duration::from_secs(53 * 60));

        fixture.test.clock.advance(chrono::Duration::minutes(53));
        assert!(fixture.intake.submit(1, lesson, text(ANSWER)).await.is_ok());
    }

    #[tokio::test]
    async fn already_accepted_wins_over_the_rate_limit() {
        let fixture = fixture(Script::Revise);
        let lesson = lesson_id(&fixture, 1);

        for _ in 0..6 {
            fixture.intake.submit(1, lesson, text(ANSWER)).await.unwrap();
        }
        fixture.grader.set(Script::Accept);
        fixture.intake.submit(1, lesson, text(ANSWER)).await.unwrap();

        let err = fixture.intake.submit(1, lesson, text(ANSWER)).await.unwrap_err();
        assert!(matches!(err, CourseError::AlreadyAccepted));
        assert_eq!(fixture.test.store.query_submissions(1, lesson).unwrap().len(), 7);
    }

    #[tokio::test]
    async fn video_links_are_auto_accepted() {
        let fixture = fixture(Script::Fail);
        let lesson = lesson_id(&fixture, 2);

        let err = fixture.intake
            .submit(1, lesson, HomeworkContent::Link(String::from("https://vimeo.com/123")))
            .await
            .unwrap_err();
        assert!(matches!(err, CourseError::NotAVideoLink));

        let verdict = fixture.intake
            .submit(1, lesson, HomeworkContent::Link(String::from("https://youtu.be/dQw4w9WgXcQ")))
            .await
            .unwrap();
        assert!(verdict.is_accepted());
        assert_eq!(fixture.grader.calls(), 0);
    }

    #[tokio::test]
    async fn files_are_checked_for_extension_and_size() {
        let fixture = fixture(Script::Fail);
        let lesson = lesson_id(&fixture, 3);
        let file = |name: &str, size: u64| HomeworkContent::File {
            name: name.to_string(),
            size,
            reference: String::from("attachment://1"),
        };

        let intake = &fixture.intake;
        let submit = move |content: HomeworkContent| intake.submit(1, lesson, content);
        assert!(matches!(submit(file("essay.txt", 4096)).await, Err(CourseError::UnsupportedFile)));
        assert!(matches!(submit(file("essay.pdf", 10)).await, Err(CourseError::FileTooSmall)));
        assert!(matches!(
            submit(file("essay.pdf", 21 * 1024 * 1024)).await,
            Err(CourseError::FileTooLarge { max_mib: 20 })
        ));
        assert!(submit(file("Essay.DOCX", 4096)).await.unwrap().is_accepted());
    }

    #[tokio::test]
    async fn wrong_kind_is_rejected() {
        let fixture = fixture(Script::Accept);
        let lesson = lesson_id(&fixture, 3);

        let err = fixture.intake.submit(1, lesson, text(ANSWER)).await.unwrap_err();
        assert!(matches!(
            err,
            CourseError::WrongFormat { expected: HomeworkKind::File, got: HomeworkKind::Text }
        ));
    }

    #[tokio::test]
    async fn locked_lessons_take_no_homework() {
        let test = test_store_with_lessons(2);
        test.store.insert_code("CODE0001").unwrap();
        crate::gate::redeem(&test.store, "CODE0001", 1, "Ada").unwrap();
        let locked = test.store.query_lesson_by_order(2).unwrap().unwrap();

        let intake = Intake::new(test.store.clone(), Arc::new(ScriptedGrader::new(Script::Accept)), HomeworkLimits::default());
        let err = intake.submit(1, locked.id, text(ANSWER)).await.unwrap_err();
        assert!(matches!(err, CourseError::LessonLocked));
    }

    #[test]
    fn recognises_video_links() {
        assert!(is_video_link("https://www.youtube.com/watch?v=abc"));
        assert!(is_video_link("https://youtu.be/abc"));
        assert!(is_video_link("https://youtube.com/shorts/abc"));
        assert!(!is_video_link("https://example.com/watch?v=abc"));
    }
}
