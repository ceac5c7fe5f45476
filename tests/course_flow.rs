mod common;

use std::thread;

use chrono::Duration;

use common::{ANSWER, Harness};
use lessonbot::error::CourseError;
use lessonbot::homework::HomeworkContent;
use lessonbot::lessons;
use lessonbot::models::{LessonStatus, ReminderTier, VerdictKind};

#[tokio::test]
async fn accepted_homework_unlocks_the_next_lesson_after_the_cooldown() {
    let h = Harness::with_lessons(3);
    h.enroll(1);
    let (first, second) = (h.lesson(1), h.lesson(2));
    let intake = h.intake();
    let pacer = h.pacer();

    let err = intake.submit(1, first.id, HomeworkContent::Text(String::from("too short"))).await.unwrap_err();
    assert!(matches!(err, CourseError::TooShort { .. }));
    assert_eq!(h.grader.calls(), 0);
    assert_eq!(lessons::visibility(&h.store, 1, first.id).unwrap(), LessonStatus::Open);

    let verdict = intake.submit(1, first.id, HomeworkContent::Text(String::from(ANSWER))).await.unwrap();
    assert!(verdict.is_accepted());
    assert_eq!(lessons::visibility(&h.store, 1, first.id).unwrap(), LessonStatus::Completed);
    assert_eq!(lessons::visibility(&h.store, 1, second.id).unwrap(), LessonStatus::Locked);

    h.clock.advance(Duration::hours(23));
    let early = pacer.advance_ready_users().await.unwrap();
    assert_eq!(early.unlocked, 0);
    assert_eq!(lessons::visibility(&h.store, 1, second.id).unwrap(), LessonStatus::Locked);

    h.clock.advance(Duration::hours(1));
    let report = pacer.advance_ready_users().await.unwrap();
    assert_eq!(report.unlocked, 1);
    assert_eq!(report.notified, 1);
    assert_eq!(lessons::visibility(&h.store, 1, second.id).unwrap(), LessonStatus::Open);
    assert_eq!(lessons::current_lesson(&h.store, 1).unwrap().order, 2);

    // A second sweep finds nothing left to do and stays quiet.
    let again = pacer.advance_ready_users().await.unwrap();
    assert_eq!(again.candidates, 0);
    assert_eq!(h.transport.sent_to(1).len(), 1);
    assert!(h.transport.sent_to(1)[0].contains("Lesson 2"));
}

#[tokio::test]
async fn finishing_the_last_lesson_leaves_nothing_to_unlock() {
    let h = Harness::with_lessons(2);
    h.enroll(1);
    h.store.open_all_lessons(1).unwrap();
    let last = h.lesson(2);

    lessons::complete(&h.store, 1, last.id).unwrap();
    h.clock.advance(Duration::days(2));

    let report = h.pacer().advance_ready_users().await.unwrap();
    assert_eq!(report.candidates, 0);
    assert_eq!(report.skipped, 0);
    assert_eq!(h.transport.total(), 0);
}

#[tokio::test]
async fn revised_and_failed_gradings_keep_the_lesson_open() {
    let h = Harness::with_lessons(2);
    h.enroll(1);
    let first = h.lesson(1);
    let intake = h.intake();

    h.grader.set(Some(VerdictKind::Revise));
    let verdict = intake.submit(1, first.id, HomeworkContent::Text(String::from(ANSWER))).await.unwrap();
    assert!(!verdict.is_accepted());

    h.grader.set(None);
    let err = intake.submit(1, first.id, HomeworkContent::Text(String::from(ANSWER))).await.unwrap_err();
    assert!(matches!(err, CourseError::GradingUnavailable(_)));

    // The revision is on record, the outage is not.
    assert_eq!(h.store.query_submissions(1, first.id).unwrap().len(), 1);
    assert_eq!(lessons::visibility(&h.store, 1, first.id).unwrap(), LessonStatus::Open);
}

#[tokio::test]
async fn reminders_respect_thresholds_and_the_cutoff() {
    let h = Harness::with_lessons(1);
    h.enroll(1);
    h.clock.advance(Duration::days(12));
    h.enroll(2);
    h.clock.advance(Duration::days(3));

    // User 1 has been quiet for 15 days, user 2 for exactly 3.
    let report = h.pacer().send_reminders().await.unwrap();
    assert_eq!(report.soft, 1);
    assert_eq!(report.strong, 0);
    assert!(h.transport.sent_to(1).is_empty());
    assert_eq!(h.transport.sent_to(2).len(), 1);
    assert_eq!(h.store.query_reminders(2).unwrap(), vec![ReminderTier::Soft]);
}

#[tokio::test]
async fn reminders_go_out_once_until_the_student_comes_back() {
    let h = Harness::with_lessons(1);
    h.enroll(1);
    h.clock.advance(Duration::days(4));
    let pacer = h.pacer();

    assert_eq!(pacer.send_reminders().await.unwrap().soft, 1);
    assert_eq!(pacer.send_reminders().await.unwrap().soft, 0);
    assert_eq!(h.transport.sent_to(1).len(), 1);

    // Activity re-arms the tiers, and a new silence starts a new episode.
    h.store.record_activity(1).unwrap();
    assert!(h.store.query_reminders(1).unwrap().is_empty());
    assert_eq!(pacer.send_reminders().await.unwrap().soft, 0);

    h.clock.advance(Duration::days(3));
    assert_eq!(pacer.send_reminders().await.unwrap().soft, 1);
    assert_eq!(h.transport.sent_to(1).len(), 2);
}

#[test]
fn concurrent_unlocks_agree_on_one_lesson() {
    let h = Harness::with_lessons(3);
    h.enroll(1);
    lessons::complete(&h.store, 1, h.lesson(1).id).unwrap();

    let unlocks = thread::scope(|scope| {
        let handles = (0..8)
            .map(|_| scope.spawn(|| lessons::unlock_next(&h.store, 1, 1)))
            .collect::<Vec<_>>();
        handles.into_iter().map(|handle| handle.join().unwrap().unwrap().unwrap()).collect::<Vec<_>>()
    });

    assert_eq!(unlocks.iter().filter(|unlock| unlock.opened).count(), 1);
    assert!(unlocks.iter().all(|unlock| unlock.lesson.order == 2));
    assert!(h.store.query_progress(1, h.lesson(2).id).unwrap().is_some());
    assert_eq!(h.store.query_progress(1, h.lesson(3).id).unwrap(), None);
}

#[test]
fn overlapping_sweeps_unlock_and_notify_once() {
    let h = Harness::with_lessons(3);
    let students = 1..=5;
    for user in students.clone() {
        h.enroll(user);
        lessons::complete(&h.store, user, h.lesson(1).id).unwrap();
    }
    h.clock.advance(Duration::days(1));

    let (sweeps, live) = thread::scope(|scope| {
        let sweeps = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                    runtime.block_on(h.pacer().advance_ready_users()).unwrap()
                })
            })
            .collect::<Vec<_>>();
        // A live handler moving the same students on at the same time.
        let live = scope.spawn(|| {
            students.clone()
                .map(|user| lessons::unlock_next(&h.store, user, 1).unwrap().unwrap())
                .filter(|unlock| unlock.opened)
                .count()
        });

        let sweeps = sweeps.into_iter().map(|sweep| sweep.join().unwrap()).collect::<Vec<_>>();
        (sweeps, live.join().unwrap())
    });

    let unlocked_by_sweeps = sweeps.iter().map(|report| report.unlocked).sum::<usize>();
    assert_eq!(unlocked_by_sweeps + live, 5);
    assert!(sweeps.iter().all(|report| report.skipped == 0));

    let second = h.lesson(2);
    for user in students {
        assert!(h.transport.sent_to(user).len() <= 1);
        assert!(h.store.query_progress(user, second.id).unwrap().is_some());
        assert_eq!(h.store.query_progress(user, h.lesson(3).id).unwrap(), None);
        assert_eq!(lessons::current_lesson(&h.store, user).unwrap().order, 2);
    }
    assert_eq!(h.transport.total(), unlocked_by_sweeps);
}

#[test]
fn a_code_enrolls_exactly_one_student() {
    let h = Harness::with_lessons(1);
    h.store.insert_code("SHARED01").unwrap();

    lessonbot::gate::redeem(&h.store, "shared01", 1, "Ada").unwrap();
    let err = lessonbot::gate::redeem(&h.store, "SHARED01", 2, "Grace").unwrap_err();
    assert!(matches!(err, CourseError::CodeAlreadyUsed));
    assert_eq!(h.store.query_enrollment(2).unwrap(), None);

    let code = h.store.query_code("SHARED01").unwrap().unwrap();
    assert!(code.used);
    assert_eq!(code.redeemed_by, Some(1));
}
