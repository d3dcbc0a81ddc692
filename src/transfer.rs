// ABOUTME: Transfer engine replaying one database's dump into another
// ABOUTME: Provides transfer, load (file to memory), and store (database to file)

use crate::database::{Database, IsolationLevel, Location};
use anyhow::Result;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

/// A transfer endpoint: a handle owned by the caller, or an address to open
pub enum Endpoint<'a> {
    Handle(&'a mut Database),
    Location(Location),
}

impl<'a> From<&'a mut Database> for Endpoint<'a> {
    fn from(db: &'a mut Database) -> Self {
        Endpoint::Handle(db)
    }
}

impl From<Location> for Endpoint<'_> {
    fn from(location: Location) -> Self {
        Endpoint::Location(location)
    }
}

impl From<&str> for Endpoint<'_> {
    fn from(address: &str) -> Self {
        Endpoint::Location(Location::from(address))
    }
}

impl From<String> for Endpoint<'_> {
    fn from(address: String) -> Self {
        Endpoint::Location(Location::from(address))
    }
}

impl From<&Path> for Endpoint<'_> {
    fn from(path: &Path) -> Self {
        Endpoint::Location(Location::from(path))
    }
}

impl From<PathBuf> for Endpoint<'_> {
    fn from(path: PathBuf) -> Self {
        Endpoint::Location(Location::from(path))
    }
}

/// A resolved endpoint
///
/// `Borrowed` handles belong to the caller and are never closed here;
/// `Opened` handles were opened during resolution and belong to whoever
/// holds the `Handle`.
#[derive(Debug)]
pub enum Handle<'a> {
    Borrowed(&'a mut Database),
    Opened(Database),
}

impl Handle<'_> {
    pub fn is_borrowed(&self) -> bool {
        matches!(self, Handle::Borrowed(_))
    }

    /// Close the handle if it was opened during resolution
    ///
    /// Closing a borrowed handle does nothing; the caller keeps it open.
    pub fn close(self) -> Result<()> {
        match self {
            Handle::Borrowed(_) => Ok(()),
            Handle::Opened(db) => db.close(),
        }
    }

    /// Take ownership of a database opened during resolution
    pub fn into_opened(self) -> Option<Database> {
        match self {
            Handle::Borrowed(_) => None,
            Handle::Opened(db) => Some(db),
        }
    }
}

impl Deref for Handle<'_> {
    type Target = Database;

    fn deref(&self) -> &Database {
        match self {
            Handle::Borrowed(db) => &**db,
            Handle::Opened(db) => db,
        }
    }
}

impl DerefMut for Handle<'_> {
    fn deref_mut(&mut self) -> &mut Database {
        match self {
            Handle::Borrowed(db) => &mut **db,
            Handle::Opened(db) => db,
        }
    }
}

fn resolve(endpoint: Endpoint<'_>) -> Result<Handle<'_>> {
    match endpoint {
        Endpoint::Handle(db) => Ok(Handle::Borrowed(db)),
        Endpoint::Location(location) => Ok(Handle::Opened(Database::open(location)?)),
    }
}

/// Scoped autocommit override on a destination handle
///
/// Switching to autocommit commits a transaction left open on the handle.
/// The previous isolation setting is put back when the guard drops, on
/// every exit path. Restoring does not commit or roll back anything.
pub struct IsolationOverride<'a> {
    db: &'a mut Database,
    saved: Option<IsolationLevel>,
}

impl<'a> IsolationOverride<'a> {
    pub fn new(db: &'a mut Database) -> Result<Self> {
        let saved = db.isolation_level();
        db.set_isolation_level(None)?;
        Ok(Self { db, saved })
    }

    pub fn saved(&self) -> Option<IsolationLevel> {
        self.saved
    }
}

impl Deref for IsolationOverride<'_> {
    type Target = Database;

    fn deref(&self) -> &Database {
        &*self.db
    }
}

impl Drop for IsolationOverride<'_> {
    fn drop(&mut self) {
        self.db.restore_isolation_level(self.saved);
    }
}

/// Copy the contents of `source` into `destination`
///
/// Each endpoint is either a caller-owned handle (`&mut Database`) or an
/// address (`":memory:"`, a path string, a `Path`, a [`Location`]). Addresses
/// are opened, creating the database if it does not exist. Both handles are
/// returned open.
///
/// When `destination` already holds data the source is added to it. Rows
/// colliding on a unique or primary key fail the transfer; see
/// [`transfer_between`] for failure behavior.
///
/// # Examples
///
/// ```no_run
/// # use sqlite_db_transfer::transfer;
/// # fn example() -> anyhow::Result<()> {
/// let (source, destination) = transfer("source.db", "copy.db")?;
/// source.close()?;
/// destination.close()?;
/// # Ok(())
/// # }
/// ```
pub fn transfer<'s, 'd>(
    source: impl Into<Endpoint<'s>>,
    destination: impl Into<Endpoint<'d>>,
) -> Result<(Handle<'s>, Handle<'d>)> {
    let source = resolve(source.into())?;
    let mut destination = resolve(destination.into())?;

    transfer_between(&source, &mut destination)?;

    Ok((source, destination))
}

/// Replay the dump of `source` against `destination`
///
/// The destination runs in autocommit for the duration of the replay, so
/// the only transaction in effect is the one the dump itself opens. The
/// first failing statement aborts the replay: later statements are not
/// executed and nothing is rolled back. The destination's isolation setting
/// is restored before returning either way.
///
/// Engine errors are returned as the original `rusqlite::Error`, without
/// added context.
pub fn transfer_between(source: &Database, destination: &mut Database) -> Result<()> {
    tracing::info!(
        "Transferring SQLite database {} into {}",
        source.location(),
        destination.location()
    );

    let destination = IsolationOverride::new(destination)?;
    let mut cursor = destination.cursor();

    for statement in source.dump() {
        let statement = statement?;
        tracing::debug!("Executing dump statement: {}", statement);
        cursor.execute(&statement)?;
    }

    let executed = cursor.executed();
    cursor.close();

    tracing::info!("✓ Replayed {} statements", executed);
    Ok(())
}

/// Load a database into a new in-memory copy
///
/// The source handle opened here is closed before returning.
///
/// # Examples
///
/// ```no_run
/// # use sqlite_db_transfer::load;
/// # fn example() -> anyhow::Result<()> {
/// let memory = load("app.db")?;
/// let count: i64 = memory
///     .connection()
///     .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))?;
/// # Ok(())
/// # }
/// ```
pub fn load(path: impl Into<Location>) -> Result<Database> {
    let source = Database::open(path)?;
    let mut memory = Database::open_in_memory()?;

    transfer_between(&source, &mut memory)?;
    source.close()?;

    Ok(memory)
}

/// Store a database into `path`, returning a handle to the stored copy
///
/// `database` is usually an in-memory handle; it is left open. If `path`
/// already holds a database the source is merged into it additively.
///
/// # Examples
///
/// ```no_run
/// # use sqlite_db_transfer::{load, store};
/// # fn example() -> anyhow::Result<()> {
/// let mut memory = load("app.db")?;
/// memory.connection().execute("DELETE FROM sessions", [])?;
/// let saved = store(&mut memory, "app-trimmed.db")?;
/// saved.close()?;
/// # Ok(())
/// # }
/// ```
pub fn store<'a>(database: impl Into<Endpoint<'a>>, path: impl Into<Location>) -> Result<Database> {
    let source = resolve(database.into())?;
    let mut destination = Database::open(path)?;

    transfer_between(&source, &mut destination)?;

    Ok(destination)
}
