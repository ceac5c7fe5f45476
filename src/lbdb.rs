pub mod codes;
pub mod enrollments;
pub mod lessons;
pub mod progress;
pub mod questions;
pub mod reminders;
pub mod schema;
pub mod submissions;
pub mod users;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub type DBResult<T> = rusqlite::Result<T>;

/// How long a connection waits on a lock held by another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of "now" for every time comparison the store makes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle on the progress database.
///
/// Cheap to clone. Holds no entity state: every call opens its own connection, so
/// concurrent handlers and the pacing sweeps always see what is actually committed,
/// and SQLite serialises the conflicting writes.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Opens (and creates, if needed) the database at `path`, using the system clock.
    pub fn open(path: impl AsRef<Path>) -> DBResult<Self> {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> DBResult<Self> {
        let store = Self { path: path.as_ref().to_path_buf(), clock };
        store.initialize_db()?;
        Ok(store)
    }

    /// The store's notion of the current time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn now_nanos(&self) -> i64 {
        crate::models::to_nanos(self.now())
    }

    pub(crate) fn connect(&self) -> DBResult<Connection> {
        let connection = Connection::open(&self.path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(connection)
    }

    /// Starts a write transaction that takes the database write lock immediately,
    /// so read-then-write sequences inside it can't interleave with another writer.
    pub(crate) fn write_transaction(connection: &mut Connection) -> DBResult<Transaction<'_>> {
        connection.transaction_with_behavior(TransactionBehavior::Immediate)
    }

    fn initialize_db(&self) -> DBResult<()> {
        let connection = self.connect()?;

        // WAL lets the sweeps read while a handler is writing.
        let mode: String = connection.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        log::debug!("[initialize_db] journal mode: {mode}");

        for (name, table_schema) in schema::SCHEMAS {
            log::debug!("[initialize_db] creating {name}...");
            connection.execute_batch(table_schema)?;
        }

        Ok(())
    }
}

/// Turns a uniqueness/constraint violation into `Ok(false)` ("nothing was inserted").
pub fn swallow_constraint_violation(err: rusqlite::Error) -> DBResult<bool> {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            log::trace!("[swallow_constraint_violation] ignoring duplicate: {failure}");
            Ok(false)
        }
        other => Err(other),
    }
}

/// Conversion error for a column holding a value none of our enums know about.
pub(crate) fn bad_column(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unexpected value: {value}").into(),
    )
}
