#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serenity::async_trait;

use lessonbot::config::{HomeworkLimits, PacingConfig};
use lessonbot::homework::{Grader, GradingRequest, Intake};
use lessonbot::lbdb::{ManualClock, Store};
use lessonbot::models::{HomeworkKind, Lesson, LessonSeed, UserId, Verdict, VerdictKind};
use lessonbot::pacing::Pacer;
use lessonbot::transport::{MessageId, Transport};

pub const ANSWER: &str = "Breathing from the diaphragm keeps the voice steady and calm.";

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(UserId, String)>>,
    unreachable: Mutex<HashSet<UserId>>,
}

impl RecordingTransport {
    pub fn block(&self, user: UserId) {
        self.unreachable.lock().unwrap().insert(user);
    }

    pub fn sent_to(&self, user: UserId) -> Vec<String> {
        self.sent.lock().unwrap()
            .iter()
            .filter(|(to, _)| *to == user)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_message_id(&self) -> MessageId {
        5000 + self.total() as MessageId
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(&self, user: UserId, text: &str) -> Result<MessageId> {
        if self.unreachable.lock().unwrap().contains(&user) {
            return Err(anyhow!("user {user} has DMs closed"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((user, text.to_string()));
        Ok(5000 + sent.len() as MessageId)
    }
}

/// Always answers with the configured verdict, or fails when `verdict` is `None`.
pub struct FixedGrader {
    verdict: Mutex<Option<VerdictKind>>,
    calls: Mutex<usize>,
}

impl FixedGrader {
    pub fn new(verdict: Option<VerdictKind>) -> Self {
        Self { verdict: Mutex::new(verdict), calls: Mutex::new(0) }
    }

    pub fn set(&self, verdict: Option<VerdictKind>) {
        *self.verdict.lock().unwrap() = verdict;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Grader for FixedGrader {
    async fn grade(&self, _request: &GradingRequest<'_>) -> Result<Verdict> {
        *self.calls.lock().unwrap() += 1;
        match *self.verdict.lock().unwrap() {
            Some(kind) => Ok(Verdict { kind, message: format!("Grader says {}.", kind.as_str()) }),
            None => Err(anyhow!("grading API returned 503")),
        }
    }
}

pub struct Harness {
    pub store: Store,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<RecordingTransport>,
    pub grader: Arc<FixedGrader>,
    _dir: tempfile::TempDir,
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

impl Harness {
    /// A fresh store with `count` text-homework lessons.
    pub fn with_lessons(count: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start_time()));
        let store = Store::with_clock(dir.path().join("course.db"), clock.clone()).unwrap();

        let seeds = (1..=count)
            .map(|order| LessonSeed {
                order,
                title: format!("Lesson {order}"),
                body: Some(format!("Explain what you took from lesson {order}.")),
                media_url: None,
                homework: Some(HomeworkKind::Text),
            })
            .collect::<Vec<_>>();
        store.seed_lessons(&seeds).unwrap();

        Self {
            store,
            clock,
            transport: Arc::new(RecordingTransport::default()),
            grader: Arc::new(FixedGrader::new(Some(VerdictKind::Accept))),
            _dir: dir,
        }
    }

    pub fn enroll(&self, user: UserId) {
        let code = format!("CODE{user:04}");
        self.store.insert_code(&code).unwrap();
        lessonbot::gate::redeem(&self.store, &code, user, &format!("student {user}")).unwrap();
    }

    pub fn lesson(&self, order: u32) -> Lesson {
        self.store.query_lesson_by_order(order).unwrap().unwrap()
    }

    pub fn intake(&self) -> Intake {
        let limits = HomeworkLimits { grader_timeout: Duration::from_millis(200), ..HomeworkLimits::default() };
        Intake::new(self.store.clone(), self.grader.clone(), limits)
    }

    pub fn pacer(&self) -> Pacer {
        Pacer::new(self.store.clone(), self.transport.clone(), PacingConfig::default())
    }
}
