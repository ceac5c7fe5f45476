//! Table definitions. All timestamps are integer Unix nanoseconds.
//!
//! The UNIQUE constraints on `AccessCodes(code)`, `Progress(user_id, lesson_id)` and
//! `Reminders(user_id, reminder_type)` are what make redemption, unlocking and reminding
//! happen at most once; the engine relies on them instead of locks.

pub const USERS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS Users (
        user_id        INTEGER     PRIMARY KEY,
        display_name   TEXT        NOT NULL,
        state          TEXT        NOT NULL    DEFAULT 'NO_AUTH',

        last_activity  INTEGER     NOT NULL,
        created_at     INTEGER     NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_users_last_activity ON Users(last_activity);";

pub const LESSONS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS Lessons (
        lesson_id      INTEGER     PRIMARY KEY,
        order_num      INTEGER     NOT NULL    UNIQUE  CHECK (order_num > 0),
        title          TEXT        NOT NULL,
        body           TEXT,
        media_url      TEXT,

        has_homework   BOOLEAN     NOT NULL,
        homework_type  TEXT                    CHECK (homework_type IN ('text', 'video_link', 'file')),

        CHECK (has_homework = (homework_type IS NOT NULL))
    )";

pub const ENROLLMENTS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS Enrollments (
        user_id            INTEGER     PRIMARY KEY REFERENCES Users(user_id),
        current_lesson_id  INTEGER     NOT NULL    REFERENCES Lessons(lesson_id),
        enrolled_at        INTEGER     NOT NULL
    )";

pub const PROGRESS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS Progress (
        user_id        INTEGER     NOT NULL    REFERENCES Users(user_id),
        lesson_id      INTEGER     NOT NULL    REFERENCES Lessons(lesson_id),
        status         TEXT        NOT NULL    CHECK (status IN ('OPEN', 'COMPLETED')),
        completed_at   INTEGER,

        UNIQUE (user_id, lesson_id)
    );
    CREATE INDEX IF NOT EXISTS idx_progress_completed ON Progress(status, completed_at);";

pub const SUBMISSIONS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS Submissions (
        submission_id    INTEGER     PRIMARY KEY,
        user_id          INTEGER     NOT NULL    REFERENCES Users(user_id),
        lesson_id        INTEGER     NOT NULL    REFERENCES Lessons(lesson_id),

        content          TEXT        NOT NULL,
        content_type     TEXT        NOT NULL    CHECK (content_type IN ('text', 'video_link', 'file')),
        verdict          TEXT        NOT NULL    CHECK (verdict IN ('ACCEPT', 'REVISE')),
        verdict_message  TEXT        NOT NULL,

        created_at       INTEGER     NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_submissions_attempts ON Submissions(user_id, lesson_id, created_at);";

pub const ACCESS_CODES_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS AccessCodes (
        code           TEXT        PRIMARY KEY,
        used           BOOLEAN     NOT NULL    DEFAULT 0,
        redeemed_by    INTEGER                 REFERENCES Users(user_id),
        created_at     INTEGER     NOT NULL,

        CHECK (used = 0 OR redeemed_by IS NOT NULL)
    )";

pub const REMINDERS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS Reminders (
        user_id        INTEGER     NOT NULL    REFERENCES Users(user_id),
        reminder_type  TEXT        NOT NULL    CHECK (reminder_type IN ('soft', 'strong')),
        sent_at        INTEGER     NOT NULL,

        UNIQUE (user_id, reminder_type)
    )";

pub const SUPPORT_QUESTIONS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS SupportQuestions (
        message_id     INTEGER     PRIMARY KEY,
        student_id     INTEGER     NOT NULL    REFERENCES Users(user_id),
        lesson_id      INTEGER                 REFERENCES Lessons(lesson_id),
        created_at     INTEGER     NOT NULL
    )";

/// In creation order: referenced tables come first.
pub const SCHEMAS: [(&str, &str); 8] = [
    ("Users", USERS_SCHEMA),
    ("Lessons", LESSONS_SCHEMA),
    ("Enrollments", ENROLLMENTS_SCHEMA),
    ("Progress", PROGRESS_SCHEMA),
    ("Submissions", SUBMISSIONS_SCHEMA),
    ("AccessCodes", ACCESS_CODES_SCHEMA),
    ("Reminders", REMINDERS_SCHEMA),
    ("SupportQuestions", SUPPORT_QUESTIONS_SCHEMA),
];
