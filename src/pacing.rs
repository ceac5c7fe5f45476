//! The two daily sweeps: unlocking the next lesson after the cooldown, and nagging
//! students who have gone quiet.
//!
//! Both are safe to run concurrently with themselves and with live handlers. Every
//! "do this once" decision is made by a uniqueness constraint in the store, and a
//! failure for one user never stops the rest of the batch.

use std::sync::Arc;

use crate::config::PacingConfig;
use crate::error::CourseResult;
use crate::lbdb::Store;
use crate::lessons::{self, Unlock};
use crate::models::{ReminderTier, UserId};
use crate::transport::Transport;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockReport {
    pub candidates: usize,
    /// Lessons this sweep opened.
    pub unlocked: usize,
    pub notified: usize,
    pub notify_failed: usize,
    /// Candidates skipped because of an error or corrupted state.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderReport {
    pub soft: usize,
    pub strong: usize,
    pub send_failed: usize,
    pub skipped: usize,
}

impl ReminderReport {
    fn count_sent(&mut self, tier: ReminderTier) {
        match tier {
            ReminderTier::Soft => self.soft += 1,
            ReminderTier::Strong => self.strong += 1,
        }
    }
}

pub struct Pacer {
    store: Store,
    transport: Arc<dyn Transport>,
    config: PacingConfig,
}

impl Pacer {
    pub fn new(store: Store, transport: Arc<dyn Transport>, config: PacingConfig) -> Self {
        Self { store, transport, config }
    }

    /// Opens the next lesson for everyone whose last completion is past the cooldown.
    ///
    /// Notifications are advisory: a failed send is logged and never undoes or retries
    /// the unlock. Only the sweep that actually opened a lesson sends its notification.
    pub async fn advance_ready_users(&self) -> CourseResult<UnlockReport> {
        let candidates = self.store.query_unlock_candidates(self.config.unlock_cooldown)?;
        let mut report = UnlockReport { candidates: candidates.len(), ..UnlockReport::default() };
        log::info!("Unlock sweep: {} candidate(s).", candidates.len());

        for candidate in candidates {
            let unlock = match lessons::unlock_next(&self.store, candidate.user_id, candidate.order) {
                Ok(Some(unlock)) => unlock,
                Ok(None) => {
                    log::debug!("[advance_ready_users] {} is at the end of the course", candidate.user_id);
                    continue;
                }
                Err(err) => {
                    log::error!("[advance_ready_users] skipping {}: {err}", candidate.user_id);
                    report.skipped += 1;
                    continue;
                }
            };

            // Someone else got there first and owns the notification.
            if !unlock.opened {
                continue;
            }
            report.unlocked += 1;

            match self.transport.send_message(candidate.user_id, &unlock_message(&unlock)).await {
                Ok(_) => report.notified += 1,
                Err(err) => {
                    log::warn!("[advance_ready_users] couldn't notify {}: {err:#}", candidate.user_id);
                    report.notify_failed += 1;
                }
            }
        }

        log::info!("Unlock sweep finished: {report:?}");
        Ok(report)
    }

    /// Sends each due reminder tier at most once per inactivity episode.
    ///
    /// The tier is logged before the message goes out, so a crash or a concurrent sweep
    /// can lose a reminder but never send it twice.
    pub async fn send_reminders(&self) -> CourseResult<ReminderReport> {
        let mut report = ReminderReport::default();

        for tier in ReminderTier::ALL {
            let threshold = match tier {
                ReminderTier::Soft => self.config.soft_reminder_after,
                ReminderTier::Strong => self.config.strong_reminder_after,
            };

            let users = self.store.query_users_for_reminder(tier, threshold, self.config.reminder_cutoff)?;
            log::info!("Reminder sweep: {} user(s) due a {} reminder.", users.len(), tier.as_str());

            for user in users {
                match self.remind(user, tier).await {
                    Ok(true) => report.count_sent(tier),
                    Ok(false) => {}
                    Err(err) => {
                        log::warn!("[send_reminders] {} reminder for {user} failed: {err:#}", tier.as_str());
                        report.send_failed += 1;
                    }
                }
            }
        }

        log::info!("Reminder sweep finished: {report:?}");
        Ok(report)
    }

    /// `Ok(false)` if another sweep already claimed this tier for the user.
    async fn remind(&self, user: UserId, tier: ReminderTier) -> anyhow::Result<bool> {
        if !self.store.log_reminder(user, tier)? {
            return Ok(false);
        }

        self.transport.send_message(user, tier.message()).await?;
        log::info!("Sent {} reminder to {user}.", tier.as_str());
        Ok(true)
    }
}

fn unlock_message(unlock: &Unlock) -> String {
    format!(
        "🔓 A new lesson is open!\n\n**Lesson {}: {}**",
        unlock.lesson.order, unlock.lesson.title
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lbdb::testing::*;
    use crate::transport::testing::RecordingTransport;

    fn enroll(test: &TestStore, user: UserId) {
        let code = format!("CODE{user:04}");
        test.store.insert_code(&code).unwrap();
        crate::gate::redeem(&test.store, &code, user, "student").unwrap();
    }

    fn complete_order(test: &TestStore, user: UserId, order: u32) {
        let lesson = test.store.query_lesson_by_order(order).unwrap().unwrap();
        lessons::complete(&test.store, user, lesson.id).unwrap();
    }

    fn pacer(test: &TestStore, transport: &Arc<RecordingTransport>) -> Pacer {
        Pacer::new(test.store.clone(), transport.clone(), PacingConfig::default())
    }

    #[tokio::test]
    async fn cooldown_boundary_is_inclusive() {
        let test = test_store_with_lessons(2);
        let transport = Arc::new(RecordingTransport::default());
        enroll(&test, 1);
        // Completed off a whole millisecond, the way the system clock reports time.
        test.clock.advance(chrono::Duration::microseconds(500) + chrono::Duration::nanoseconds(7));
        complete_order(&test, 1, 1);

        test.clock.advance(chrono::Duration::days(1) - chrono::Duration::nanoseconds(1));
        let report = pacer(&test, &transport).advance_ready_users().await.unwrap();
        assert_eq!(report.candidates, 0);

        test.clock.advance(chrono::Duration::nanoseconds(1));
        let report = pacer(&test, &transport).advance_ready_users().await.unwrap();
        assert_eq!(report.unlocked, 1);
        assert_eq!(transport.sent_to(1).len(), 1);
        assert!(transport.sent_to(1)[0].contains("Lesson 2"));
    }

    #[tokio::test]
    async fn notification_failures_do_not_stop_the_batch() {
        let test = test_store_with_lessons(2);
        let transport = Arc::new(RecordingTransport::unreachable([1]));
        for user in [1, 2] {
            enroll(&test, user);
            complete_order(&test, user, 1);
        }
        test.clock.advance(chrono::Duration::days(2));

        let report = pacer(&test, &transport).advance_ready_users().await.unwrap();
        assert_eq!(report.unlocked, 2);
        assert_eq!(report.notified, 1);
        assert_eq!(report.notify_failed, 1);

        // The failed notification is not retried: the unlock already happened.
        let report = pacer(&test, &transport).advance_ready_users().await.unwrap();
        assert_eq!(report.candidates, 0);
    }

    #[tokio::test]
    async fn completions_without_enrollment_are_skipped() {
        let test = test_store_with_lessons(2);
        let transport = Arc::new(RecordingTransport::default());
        test.store.insert_user(9, "Ghost").unwrap();
        complete_order(&test, 9, 1);
        enroll(&test, 1);
        complete_order(&test, 1, 1);
        test.clock.advance(chrono::Duration::days(1));

        let report = pacer(&test, &transport).advance_ready_users().await.unwrap();
        assert_eq!(report.candidates, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.unlocked, 1);
    }

    #[tokio::test]
    async fn a_user_gone_a_week_gets_both_tiers_once() {
        let test = test_store_with_lessons(1);
        let transport = Arc::new(RecordingTransport::default());
        enroll(&test, 1);
        test.clock.advance(chrono::Duration::days(7));

        let pacer = pacer(&test, &transport);
        let report = pacer.send_reminders().await.unwrap();
        assert_eq!((report.soft, report.strong), (1, 1));

        let report = pacer.send_reminders().await.unwrap();
        assert_eq!((report.soft, report.strong), (0, 0));
        assert_eq!(transport.sent_to(1).len(), 2);
    }

    #[tokio::test]
    async fn failed_reminders_stay_claimed() {
        let test = test_store_with_lessons(1);
        let transport = Arc::new(RecordingTransport::unreachable([1]));
        enroll(&test, 1);
        enroll(&test, 2);
        test.clock.advance(chrono::Duration::days(3));

        let pacer = pacer(&test, &transport);
        let report = pacer.send_reminders().await.unwrap();
        assert_eq!(report.soft, 1);
        assert_eq!(report.send_failed, 1);

        let report = pacer.send_reminders().await.unwrap();
        assert_eq!(report, ReminderReport::default());
    }
}
