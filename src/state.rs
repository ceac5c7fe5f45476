//! Per-user interaction state.
//!
//! The state is persisted as a short tag in `Users.state`. Lesson-bound states carry
//! their lesson id in the tag (`WAITING_HW:5`) so a restart doesn't lose the context
//! a student was answering in.

use std::str::FromStr;

use crate::models::LessonId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    /// Known identity without a redeemed access code.
    NoAuth,
    WaitingCode,
    Idle,
    ViewingLesson { lesson: LessonId },
    WaitingHomework { lesson: LessonId },
    /// The grading oracle is looking at an answer for this lesson.
    Processing { lesson: LessonId },
    WaitingQuestion { lesson: Option<LessonId> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised user state tag: '{0}'")]
pub struct UnknownStateTag(pub String);

impl UserState {
    /// Whether `self -> next` is a legal move.
    ///
    /// Re-entering the same state is always legal. `Idle` is the "main menu" and can be
    /// reached from anywhere a student can be once enrolled.
    pub fn can_transition_to(&self, next: &UserState) -> bool {
        use UserState::*;

        if self == next {
            return true;
        }

        match (self, next) {
            (NoAuth, WaitingCode) => true,
            (WaitingCode, NoAuth) => true,
            // Only a successful redemption leaves the unauthenticated states.
            (NoAuth | WaitingCode, Idle) => true,
            (NoAuth | WaitingCode, _) => false,

            (_, NoAuth | WaitingCode) => false,
            (_, Idle) => true,

            (Idle | ViewingLesson { .. } | WaitingHomework { .. } | WaitingQuestion { .. },
             ViewingLesson { .. }) => true,

            (Idle | ViewingLesson { .. } | WaitingHomework { .. }, WaitingHomework { .. }) => true,
            (Processing { lesson: from }, WaitingHomework { lesson: to }) => from == to,

            (WaitingHomework { lesson: from }, Processing { lesson: to }) => from == to,

            (Idle | ViewingLesson { .. } | WaitingHomework { .. }, WaitingQuestion { .. }) => true,

            _ => false,
        }
    }

    /// Lesson the user is currently interacting with, if any.
    pub fn lesson(&self) -> Option<LessonId> {
        match self {
            UserState::ViewingLesson { lesson }
            | UserState::WaitingHomework { lesson }
            | UserState::Processing { lesson } => Some(*lesson),
            UserState::WaitingQuestion { lesson } => *lesson,
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, UserState::NoAuth | UserState::WaitingCode)
    }
}

impl std::fmt::Display for UserState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserState::NoAuth => write!(f, "NO_AUTH"),
            UserState::WaitingCode => write!(f, "WAITING_CODE"),
            UserState::Idle => write!(f, "IDLE"),
            UserState::ViewingLesson { lesson } => write!(f, "VIEWING_LESSON:{lesson}"),
            UserState::WaitingHomework { lesson } => write!(f, "WAITING_HW:{lesson}"),
            UserState::Processing { lesson } => write!(f, "PROCESSING:{lesson}"),
            UserState::WaitingQuestion { lesson: Some(lesson) } => write!(f, "WAITING_QUESTION:{lesson}"),
            UserState::WaitingQuestion { lesson: None } => write!(f, "WAITING_QUESTION"),
        }
    }
}

impl FromStr for UserState {
    type Err = UnknownStateTag;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownStateTag(tag.to_string());

        let (name, lesson) = match tag.split_once(':') {
            Some((name, id)) => (name, Some(id.parse::<LessonId>().map_err(|_| unknown())?)),
            None => (tag, None),
        };

        match (name, lesson) {
            ("NO_AUTH", None) => Ok(UserState::NoAuth),
            ("WAITING_CODE", None) => Ok(UserState::WaitingCode),
            ("IDLE", None) => Ok(UserState::Idle),
            ("VIEWING_LESSON", Some(lesson)) => Ok(UserState::ViewingLesson { lesson }),
            ("WAITING_HW", Some(lesson)) => Ok(UserState::WaitingHomework { lesson }),
            ("PROCESSING", Some(lesson)) => Ok(UserState::Processing { lesson }),
            ("WAITING_QUESTION", lesson) => Ok(UserState::WaitingQuestion { lesson }),
            _ => Err(unknown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_display() {
        let states = [
            UserState::NoAuth,
            UserState::WaitingCode,
            UserState::Idle,
            UserState::ViewingLesson { lesson: 4 },
            UserState::WaitingHomework { lesson: 4 },
            UserState::Processing { lesson: 4 },
            UserState::WaitingQuestion { lesson: None },
            UserState::WaitingQuestion { lesson: Some(9) },
        ];

        for state in states {
            assert_eq!(state.to_string().parse::<UserState>(), Ok(state));
        }
    }

    #[test]
    fn garbage_tags_are_rejected() {
        assert!("idle".parse::<UserState>().is_err());
        assert!("WAITING_HW".parse::<UserState>().is_err());
        assert!("WAITING_HW:abc".parse::<UserState>().is_err());
        assert!("IDLE:3".parse::<UserState>().is_err());
    }

    #[test]
    fn unauthenticated_users_cannot_reach_lessons() {
        assert!(!UserState::NoAuth.can_transition_to(&UserState::ViewingLesson { lesson: 1 }));
        assert!(!UserState::WaitingCode.can_transition_to(&UserState::WaitingHomework { lesson: 1 }));
        assert!(UserState::WaitingCode.can_transition_to(&UserState::Idle));
    }

    #[test]
    fn enrolled_users_never_fall_back_to_no_auth() {
        assert!(!UserState::Idle.can_transition_to(&UserState::NoAuth));
        assert!(!UserState::ViewingLesson { lesson: 2 }.can_transition_to(&UserState::WaitingCode));
    }

    #[test]
    fn processing_is_bound_to_its_lesson() {
        let waiting = UserState::WaitingHomework { lesson: 3 };
        assert!(waiting.can_transition_to(&UserState::Processing { lesson: 3 }));
        assert!(!waiting.can_transition_to(&UserState::Processing { lesson: 4 }));
        assert!(UserState::Processing { lesson: 3 }.can_transition_to(&waiting));
        assert!(UserState::Processing { lesson: 3 }.can_transition_to(&UserState::Idle));
        assert!(!UserState::Idle.can_transition_to(&UserState::Processing { lesson: 3 }));
    }
}
