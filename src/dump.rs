// ABOUTME: Lazy logical dump of a SQLite database as SQL statements
// ABOUTME: Emits schema, row inserts, indexes/triggers/views, and sequences in replay order

use rusqlite::{params, Connection, Params};
use std::collections::VecDeque;

/// Number of rows fetched per query while dumping a table
pub const DUMP_PAGE_SIZE: usize = 512;

const CREATE_PREFIXES: [&str; 5] = [
    "CREATE TABLE ",
    "CREATE UNIQUE INDEX ",
    "CREATE INDEX ",
    "CREATE TRIGGER ",
    "CREATE VIEW ",
];

const ROWID_ALIASES: [&str; 3] = ["rowid", "_rowid_", "oid"];

/// Pull-based sequence of SQL statements reconstructing a database
///
/// Nothing is read from the connection until the first call to `next()`.
/// The schema listing is read once at that point; table rows are read in
/// pages of [`DUMP_PAGE_SIZE`] as the consumer advances, so a large table is
/// never held in memory at once.
///
/// If the connection is in autocommit mode, the first pull opens a read
/// transaction that lasts until the dump ends, fails, or is dropped. Every
/// page then comes from the same snapshot even if another connection writes
/// to the file mid-dump. A transaction the caller already holds is used as is.
///
/// Statement order:
///
/// 1. `BEGIN TRANSACTION;`
/// 2. per table (by name): its `CREATE TABLE IF NOT EXISTS` statement, then one
///    `INSERT INTO "<table>" VALUES(...);` per row
/// 3. indexes, triggers and views (`IF NOT EXISTS`)
/// 4. `sqlite_sequence` contents
/// 5. `COMMIT;`
///
/// After yielding an error the iterator is exhausted.
///
/// # Examples
///
/// ```
/// # use sqlite_db_transfer::Database;
/// # fn example() -> anyhow::Result<()> {
/// let db = Database::open_in_memory()?;
/// db.connection().execute_batch(
///     "CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);",
/// )?;
///
/// let statements = db.dump().collect::<Result<Vec<_>, _>>()?;
/// assert_eq!(statements.first().map(String::as_str), Some("BEGIN TRANSACTION;"));
/// assert!(statements.contains(&"INSERT INTO \"t\" VALUES(1);".to_string()));
/// # Ok(())
/// # }
/// ```
pub struct Dump<'conn> {
    conn: &'conn Connection,
    planned: bool,
    finished: bool,
    /// Whether this dump opened the read transaction it runs in
    owns_snapshot: bool,
    steps: VecDeque<Step>,
    scan: Option<TableScan>,
    page: VecDeque<String>,
}

enum Step {
    Statement(String),
    Rows(TableScan),
}

/// How a table scan resumes from one page to the next
enum Paging {
    /// Seek past the last rowid seen, so each page costs only its own rows
    Rowid {
        alias: &'static str,
        last: Option<i64>,
    },
    /// `WITHOUT ROWID` tables, and tables whose columns shadow every rowid alias
    Offset { offset: usize },
}

/// Paged `INSERT` generation for one table
struct TableScan {
    table: String,
    /// SQL expression rendering one row as its `INSERT` statement
    insert: String,
    paging: Paging,
    dumped: usize,
    exhausted: bool,
}

impl TableScan {
    fn new(conn: &Connection, table: &str) -> rusqlite::Result<Self> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let columns = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let values = columns
            .iter()
            .map(|column| format!("quote({})", quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(" || ',' || ");
        let prefix = format!("INSERT INTO {} VALUES(", quote_identifier(table));
        let insert = format!("{} || {} || ')'", quote_literal(&prefix), values);

        let without_rowid: bool = conn.query_row(
            "SELECT wr FROM pragma_table_list WHERE schema = 'main' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        let alias = ROWID_ALIASES.iter().copied().find(|alias| {
            !columns
                .iter()
                .any(|column| column.eq_ignore_ascii_case(alias))
        });

        let paging = match alias {
            Some(alias) if !without_rowid => Paging::Rowid { alias, last: None },
            _ => {
                tracing::debug!("Table '{}' is dumped with offset paging", table);
                Paging::Offset { offset: 0 }
            }
        };

        Ok(Self {
            table: table.to_string(),
            insert,
            paging,
            dumped: 0,
            exhausted: false,
        })
    }

    fn fetch(&mut self, conn: &Connection) -> rusqlite::Result<Vec<String>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let from = quote_identifier(&self.table);
        let limit = DUMP_PAGE_SIZE as i64;

        let rows: Vec<String> = match &mut self.paging {
            Paging::Rowid { alias, last } => {
                let keyed = match *last {
                    None => keyed_page(
                        conn,
                        &format!(
                            "SELECT {0}, {1} FROM {2} ORDER BY {0} LIMIT ?1",
                            alias, self.insert, from
                        ),
                        params![limit],
                    )?,
                    Some(after) => keyed_page(
                        conn,
                        &format!(
                            "SELECT {0}, {1} FROM {2} WHERE {0} > ?2 ORDER BY {0} LIMIT ?1",
                            alias, self.insert, from
                        ),
                        params![limit, after],
                    )?,
                };
                if let Some((rowid, _)) = keyed.last() {
                    *last = Some(*rowid);
                }
                keyed.into_iter().map(|(_, insert)| insert).collect()
            }
            Paging::Offset { offset } => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM {} LIMIT ?1 OFFSET ?2",
                    self.insert, from
                ))?;
                let rows = stmt
                    .query_map(params![limit, *offset as i64], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                *offset += rows.len();
                rows
            }
        };

        self.dumped += rows.len();
        if rows.len() < DUMP_PAGE_SIZE {
            self.exhausted = true;
            tracing::debug!("Dumped {} rows from table '{}'", self.dumped, self.table);
        }

        Ok(rows.into_iter().map(|insert| format!("{};", insert)).collect())
    }
}

/// Run a page query whose rows are `(rowid, insert statement)` pairs
fn keyed_page<P: Params>(
    conn: &Connection,
    query: &str,
    params: P,
) -> rusqlite::Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(query)?;
    let rows = stmt
        .query_map(params, |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl<'conn> Dump<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            planned: false,
            finished: false,
            owns_snapshot: false,
            steps: VecDeque::new(),
            scan: None,
            page: VecDeque::new(),
        }
    }

    fn advance(&mut self) -> rusqlite::Result<Option<String>> {
        if !self.planned {
            self.planned = true;
            if self.conn.is_autocommit() {
                self.conn.execute_batch("BEGIN DEFERRED")?;
                self.owns_snapshot = true;
            }
            self.steps = plan(self.conn)?;
        }

        loop {
            if let Some(statement) = self.page.pop_front() {
                return Ok(Some(statement));
            }

            if let Some(scan) = self.scan.as_mut() {
                let rows = scan.fetch(self.conn)?;
                if rows.is_empty() {
                    self.scan = None;
                } else {
                    self.page.extend(rows);
                }
                continue;
            }

            match self.steps.pop_front() {
                Some(Step::Statement(statement)) => return Ok(Some(statement)),
                Some(Step::Rows(scan)) => self.scan = Some(scan),
                None => return Ok(None),
            }
        }
    }

    /// End the read transaction this dump opened, if any
    fn release_snapshot(&mut self) -> rusqlite::Result<()> {
        if self.owns_snapshot {
            self.owns_snapshot = false;
            if !self.conn.is_autocommit() {
                self.conn.execute_batch("COMMIT")?;
            }
        }
        Ok(())
    }
}

impl Iterator for Dump<'_> {
    type Item = rusqlite::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.advance() {
            Ok(Some(statement)) => Some(Ok(statement)),
            Ok(None) => {
                self.finished = true;
                self.release_snapshot().err().map(Err)
            }
            Err(e) => {
                self.finished = true;
                if let Err(release) = self.release_snapshot() {
                    tracing::debug!("Failed to end dump read transaction: {}", release);
                }
                Some(Err(e))
            }
        }
    }
}

impl Drop for Dump<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release_snapshot() {
            tracing::debug!("Failed to end dump read transaction: {}", e);
        }
    }
}

struct SchemaEntry {
    name: String,
    sql: String,
}

fn schema_entries(conn: &Connection, query: &str) -> rusqlite::Result<Vec<SchemaEntry>> {
    let mut stmt = conn.prepare(query)?;
    let entries = stmt
        .query_map([], |row| {
            Ok(SchemaEntry {
                name: row.get(0)?,
                sql: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Read the schema and lay out every step of the dump
fn plan(conn: &Connection) -> rusqlite::Result<VecDeque<Step>> {
    let mut steps = VecDeque::new();
    let mut sequence = Vec::new();
    let mut writable_schema = false;

    steps.push_back(Step::Statement("BEGIN TRANSACTION;".to_string()));

    let tables = schema_entries(
        conn,
        "SELECT name, sql FROM sqlite_master \
         WHERE sql NOT NULL AND type = 'table' \
         ORDER BY name",
    )?;

    for table in &tables {
        if table.name == "sqlite_sequence" {
            sequence.push("DELETE FROM \"sqlite_sequence\";".to_string());
            let mut stmt = conn.prepare(
                "SELECT 'INSERT INTO \"sqlite_sequence\" VALUES(' \
                 || quote(name) || ',' || quote(seq) || ');' \
                 FROM sqlite_sequence",
            )?;
            let inserts = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            sequence.extend(inserts);
            continue;
        } else if table.name == "sqlite_stat1" {
            steps.push_back(Step::Statement("ANALYZE \"sqlite_master\";".to_string()));
        } else if table.name.starts_with("sqlite_") {
            continue;
        } else if table.sql.starts_with("CREATE VIRTUAL TABLE") {
            if !writable_schema {
                writable_schema = true;
                steps.push_back(Step::Statement("PRAGMA writable_schema=ON;".to_string()));
            }
            steps.push_back(Step::Statement(format!(
                "INSERT INTO sqlite_master(type,name,tbl_name,rootpage,sql) \
                 VALUES('table',{0},{0},0,{1});",
                quote_literal(&table.name),
                quote_literal(&table.sql)
            )));
            continue;
        } else {
            steps.push_back(Step::Statement(format!(
                "{};",
                create_if_not_exists(&table.sql)
            )));
        }

        steps.push_back(Step::Rows(TableScan::new(conn, &table.name)?));
    }

    let others = schema_entries(
        conn,
        "SELECT name, sql FROM sqlite_master \
         WHERE sql NOT NULL AND type IN ('index', 'trigger', 'view')",
    )?;
    for entry in &others {
        tracing::debug!("Dumping schema object '{}'", entry.name);
        steps.push_back(Step::Statement(format!(
            "{};",
            create_if_not_exists(&entry.sql)
        )));
    }

    if writable_schema {
        steps.push_back(Step::Statement("PRAGMA writable_schema=RESET;".to_string()));
    }

    steps.extend(sequence.into_iter().map(Step::Statement));
    steps.push_back(Step::Statement("COMMIT;".to_string()));

    tracing::debug!(
        "Planned dump of {} tables and {} other schema objects",
        tables.len(),
        others.len()
    );

    Ok(steps)
}

/// Rewrite a `CREATE` statement from `sqlite_master` so it tolerates an
/// object that already exists
///
/// SQLite stores these statements with normalized leading keywords and
/// without any `IF NOT EXISTS` clause, so a prefix match is enough.
/// Statements with an unrecognized prefix are returned unchanged.
pub fn create_if_not_exists(sql: &str) -> String {
    for prefix in CREATE_PREFIXES {
        if let Some(rest) = sql.strip_prefix(prefix) {
            if rest
                .trim_start()
                .to_ascii_uppercase()
                .starts_with("IF NOT EXISTS")
            {
                return sql.to_string();
            }
            return format!("{}IF NOT EXISTS {}", prefix, rest);
        }
    }
    sql.to_string()
}

/// Quote a SQL identifier, doubling embedded double quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL string literal, doubling embedded single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
