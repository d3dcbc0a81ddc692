// ABOUTME: SQLite database handle with a connection-level isolation setting
// ABOUTME: Provides locations, handle open/close, cursors, and implicit transactions

use crate::config::ConnectOptions;
use crate::dump::Dump;
use anyhow::{bail, Result};
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Address designating the in-memory database
pub const MEMORY_DESIGNATOR: &str = ":memory:";

/// Where a database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A private, connection-scoped in-memory database
    Memory,
    /// A database file on disk (created on open if missing)
    File(PathBuf),
}

impl Location {
    pub fn is_memory(&self) -> bool {
        matches!(self, Location::Memory)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Memory => f.write_str(MEMORY_DESIGNATOR),
            Location::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<&str> for Location {
    fn from(address: &str) -> Self {
        if address == MEMORY_DESIGNATOR {
            Location::Memory
        } else {
            Location::File(PathBuf::from(address))
        }
    }
}

impl From<String> for Location {
    fn from(address: String) -> Self {
        Location::from(address.as_str())
    }
}

impl From<&Path> for Location {
    fn from(path: &Path) -> Self {
        Location::File(path.to_path_buf())
    }
}

impl From<PathBuf> for Location {
    fn from(path: PathBuf) -> Self {
        Location::File(path)
    }
}

/// Locking behavior of the implicit transaction opened before a data change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Deferred,
    Immediate,
    Exclusive,
}

impl IsolationLevel {
    /// SQL keyword placed after `BEGIN`
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Deferred => "DEFERRED",
            IsolationLevel::Immediate => "IMMEDIATE",
            IsolationLevel::Exclusive => "EXCLUSIVE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEFERRED" => Ok(IsolationLevel::Deferred),
            "IMMEDIATE" => Ok(IsolationLevel::Immediate),
            "EXCLUSIVE" => Ok(IsolationLevel::Exclusive),
            other => bail!(
                "Invalid isolation level '{}'. \
                 Must be DEFERRED, IMMEDIATE, or EXCLUSIVE",
                other
            ),
        }
    }
}

/// An open connection to a SQLite database
///
/// Besides the raw connection, a handle carries an isolation setting:
///
/// - `None`: autocommit. Every statement commits on its own unless the SQL
///   itself opens a transaction.
/// - `Some(level)`: a data-modifying statement (`INSERT`, `UPDATE`, `DELETE`,
///   `REPLACE`) run through a [`Cursor`] while no transaction is open first
///   issues `BEGIN <level>`. The transaction stays open until
///   [`Database::commit`] or [`Database::rollback`].
///
/// Dropping a handle closes the connection, which rolls back any open
/// transaction. Use [`Database::close`] to observe close errors.
pub struct Database {
    conn: Connection,
    location: Location,
    isolation_level: Option<IsolationLevel>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .field("isolation_level", &self.isolation_level)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl Database {
    /// Open (or create) a database with default connect options
    ///
    /// # Examples
    ///
    /// ```
    /// # use sqlite_db_transfer::Database;
    /// # fn example() -> anyhow::Result<()> {
    /// let db = Database::open(":memory:")?;
    /// assert!(db.location().is_memory());
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(location: impl Into<Location>) -> Result<Self> {
        Self::open_with_options(location, &ConnectOptions::default())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(Location::Memory)
    }

    /// Open (or create) a database with explicit connect options
    ///
    /// Open failures are the engine's own error, passed through unchanged.
    pub fn open_with_options(
        location: impl Into<Location>,
        options: &ConnectOptions,
    ) -> Result<Self> {
        let location = location.into();

        tracing::debug!("Opening SQLite database: {}", location);

        let conn = match &location {
            Location::Memory => Connection::open_in_memory()?,
            Location::File(path) => Connection::open(file_path(path))?,
        };
        conn.busy_timeout(options.busy_timeout)?;

        Ok(Self {
            conn,
            location,
            isolation_level: options.isolation_level,
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }

    /// Change the isolation setting
    ///
    /// Switching to autocommit (`None`) commits a transaction that is
    /// currently open.
    pub fn set_isolation_level(&mut self, level: Option<IsolationLevel>) -> Result<()> {
        if level.is_none() && self.in_transaction() {
            self.commit()?;
        }
        self.isolation_level = level;
        Ok(())
    }

    /// Put back a saved isolation setting without touching transactions
    pub(crate) fn restore_isolation_level(&mut self, level: Option<IsolationLevel>) {
        self.isolation_level = level;
    }

    /// Whether a transaction is open on the connection
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    pub fn commit(&self) -> Result<()> {
        if self.in_transaction() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        if self.in_transaction() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    /// Borrow the underlying rusqlite connection for direct queries
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Obtain an execution context on this handle
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            db: self,
            executed: 0,
        }
    }

    /// Lazily produce this database's logical dump
    pub fn dump(&self) -> Dump<'_> {
        Dump::new(&self.conn)
    }

    /// Close the connection, surfacing any error the engine reports
    pub fn close(self) -> Result<()> {
        let location = self.location;
        self.conn.close().map_err(|(_, e)| e)?;
        tracing::debug!("Closed SQLite database: {}", location);
        Ok(())
    }
}

/// Execution context bound to one [`Database`]
pub struct Cursor<'db> {
    db: &'db Database,
    executed: usize,
}

impl<'db> Cursor<'db> {
    /// Execute exactly one SQL statement, discarding any result rows
    ///
    /// Honors the handle's isolation setting: a data-modifying statement
    /// run outside a transaction first opens one when the setting is not
    /// `None`.
    pub fn execute(&mut self, sql: &str) -> Result<()> {
        if let Some(level) = self.db.isolation_level {
            if is_data_modification(sql) && !self.db.in_transaction() {
                self.db
                    .conn
                    .execute_batch(&format!("BEGIN {}", level.as_sql()))?;
            }
        }

        let mut stmt = self.db.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}

        self.executed += 1;
        Ok(())
    }

    /// Number of statements executed successfully through this cursor
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Release the cursor
    pub fn close(self) {}
}

/// SQLite reads a bare `:memory:` filename as the in-memory designator
fn file_path(path: &Path) -> PathBuf {
    if path == Path::new(MEMORY_DESIGNATOR) {
        Path::new(".").join(path)
    } else {
        path.to_path_buf()
    }
}

fn is_data_modification(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    matches!(
        keyword.to_ascii_uppercase().as_str(),
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_from_memory_designator() {
        assert_eq!(Location::from(":memory:"), Location::Memory);
        assert_eq!(
            Location::from("data.db"),
            Location::File(PathBuf::from("data.db"))
        );
        // Paths are never special-cased
        assert_eq!(
            Location::from(Path::new(":memory:")),
            Location::File(PathBuf::from(":memory:"))
        );
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::Memory.to_string(), ":memory:");
        assert_eq!(
            Location::File(PathBuf::from("/tmp/a.db")).to_string(),
            "/tmp/a.db"
        );
    }

    #[test]
    fn test_isolation_level_parse() {
        assert_eq!(
            "deferred".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Deferred
        );
        assert_eq!(
            " Immediate ".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Immediate
        );
        assert_eq!(
            "EXCLUSIVE".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Exclusive
        );

        let result = "serializable".parse::<IsolationLevel>();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid isolation level"));
    }

    #[test]
    fn test_open_defaults_to_deferred() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.isolation_level(), Some(IsolationLevel::Deferred));
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_open_creates_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("fresh.db");

        let db = Database::open(path.as_path()).unwrap();
        db.connection()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();
        db.close().unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_open_invalid_path_fails() {
        let result = Database::open(Path::new("/nonexistent/dir/database.db"));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .downcast_ref::<rusqlite::Error>()
            .is_some());
    }

    #[test]
    fn test_implicit_transaction_on_insert() {
        let db = Database::open_in_memory().unwrap();
        let mut cursor = db.cursor();

        cursor.execute("CREATE TABLE t (x INTEGER)").unwrap();
        assert!(!db.in_transaction());

        cursor.execute("INSERT INTO t VALUES (1)").unwrap();
        assert!(db.in_transaction());
        assert_eq!(cursor.executed(), 2);
        cursor.close();

        db.rollback().unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_autocommit_when_isolation_none() {
        let mut db = Database::open_in_memory().unwrap();
        db.set_isolation_level(None).unwrap();

        let mut cursor = db.cursor();
        cursor.execute("CREATE TABLE t (x INTEGER)").unwrap();
        cursor.execute("INSERT INTO t VALUES (1)").unwrap();
        cursor.close();

        assert!(!db.in_transaction());
        db.rollback().unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_switching_to_autocommit_commits_open_transaction() {
        let mut db = Database::open_in_memory().unwrap();
        {
            let mut cursor = db.cursor();
            cursor.execute("CREATE TABLE t (x INTEGER)").unwrap();
            cursor.execute("INSERT INTO t VALUES (1)").unwrap();
        }
        assert!(db.in_transaction());

        db.set_isolation_level(None).unwrap();
        assert!(!db.in_transaction());
        assert_eq!(db.isolation_level(), None);
    }

    #[test]
    fn test_cursor_drains_rows() {
        let db = Database::open_in_memory().unwrap();
        let mut cursor = db.cursor();
        cursor.execute("SELECT 1 UNION ALL SELECT 2").unwrap();
        cursor.execute("PRAGMA user_version").unwrap();
        assert_eq!(cursor.executed(), 2);
    }

    #[test]
    fn test_cursor_propagates_engine_error() {
        let db = Database::open_in_memory().unwrap();
        let mut cursor = db.cursor();
        let result = cursor.execute("INSERT INTO missing VALUES (1)");
        assert!(result.is_err());
        assert_eq!(cursor.executed(), 0);
        assert!(result
            .unwrap_err()
            .downcast_ref::<rusqlite::Error>()
            .is_some());
    }

    #[test]
    fn test_file_path_never_means_memory() {
        assert_eq!(file_path(Path::new(":memory:")), PathBuf::from("./:memory:"));
        assert_eq!(file_path(Path::new("a.db")), PathBuf::from("a.db"));
    }

    #[test]
    fn test_is_data_modification() {
        assert!(is_data_modification("INSERT INTO t VALUES(1);"));
        assert!(is_data_modification("  replace into t values(1)"));
        assert!(is_data_modification("Delete FROM t"));
        assert!(is_data_modification("UPDATE t SET x = 1"));
        assert!(!is_data_modification("CREATE TABLE t (x)"));
        assert!(!is_data_modification("BEGIN TRANSACTION;"));
        assert!(!is_data_modification("SELECT 1"));
    }
}
