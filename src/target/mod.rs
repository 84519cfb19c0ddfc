// ABOUTME: DuckDB target database handle and DDL/DML helpers
// ABOUTME: Table recreation, batched inserts, views, sequences and catalog lookups

use crate::error::{LoaderError, Result as LoaderResult};
use crate::source::SequenceDescriptor;
use crate::transfer::converter::ColumnValue;
use crate::utils::quote_ident;
use anyhow::{bail, Context, Result};
use duckdb::{params, params_from_iter, Connection, OptionalExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// Path value that selects an in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// The embedded target database.
///
/// Holds one root connection; every task gets its own connection cloned from
/// it, so connections are never shared between threads.
pub struct TargetDatabase {
    root: Mutex<Connection>,
    path: String,
}

impl TargetDatabase {
    /// Open (or create) the database at `path`. `:memory:` opens an
    /// in-memory database. Missing parent directories are created.
    pub fn open(path: &str) -> LoaderResult<Self> {
        if path == IN_MEMORY {
            return Self::open_in_memory();
        }

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LoaderError::config(format!(
                        "Cannot create target directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::info!("Opened target database {}", path);
        Ok(Self {
            root: Mutex::new(conn),
            path: path.to_string(),
        })
    }

    pub fn open_in_memory() -> LoaderResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            root: Mutex::new(conn),
            path: IN_MEMORY.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// A new connection to the same database, owned by the caller.
    pub fn connect(&self) -> Result<Connection> {
        let root = self
            .root
            .lock()
            .map_err(|_| anyhow::anyhow!("Target connection lock poisoned"))?;
        root.try_clone()
            .context("Failed to open target connection")
    }

    /// Flush the write-ahead log into the database file.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch("CHECKPOINT")
            .context("Failed to checkpoint target database")?;
        tracing::info!("Checkpointed target database {}", self.path);
        Ok(())
    }
}

/// Drop `table` if present and create it from `ddl`.
pub fn recreate_table(conn: &Connection, table: &str, ddl: &str) -> Result<()> {
    let sql = format!("DROP TABLE IF EXISTS {};\n{};", quote_ident(table), ddl);
    tracing::debug!("Recreating table {}: {}", table, ddl);
    conn.execute_batch(&sql)
        .with_context(|| format!("Failed to recreate table {}", table))
}

/// Build `INSERT INTO "T" VALUES (?, ?), (?, ?), ...` for `row_count` rows.
pub fn insert_sql(table: &str, column_count: usize, row_count: usize) -> String {
    let row = format!("({})", vec!["?"; column_count].join(", "));
    let values = vec![row.as_str(); row_count].join(", ");
    format!("INSERT INTO {} VALUES {}", quote_ident(table), values)
}

/// Insert rows as one multi-row statement, in the given order.
///
/// Every row must have the same width; a ragged batch is rejected before
/// anything is written.
pub fn insert_batch(conn: &Connection, table: &str, rows: &[Vec<ColumnValue>]) -> Result<()> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    let width = first.len();
    if let Some(bad) = rows.iter().position(|row| row.len() != width) {
        bail!(
            "Batch for {} has {} values in row {} but {} in row 1",
            table,
            rows[bad].len(),
            bad + 1,
            width
        );
    }

    let sql = insert_sql(table, width, rows.len());
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("Failed to prepare insert into {}", table))?;
    let inserted = stmt
        .execute(params_from_iter(rows.iter().flatten()))
        .with_context(|| format!("Failed to insert {} rows into {}", rows.len(), table))?;
    tracing::trace!("Inserted {} rows into {}", inserted, table);
    Ok(())
}

pub fn drop_view(conn: &Connection, name: &str) -> Result<()> {
    conn.execute_batch(&format!("DROP VIEW IF EXISTS {};", quote_ident(name)))
        .with_context(|| format!("Failed to drop view {}", name))
}

/// Replace the view `name` with one defined by `select_sql`.
pub fn recreate_view(conn: &Connection, name: &str, select_sql: &str) -> Result<()> {
    let sql = format!(
        "DROP VIEW IF EXISTS {view};\nCREATE OR REPLACE VIEW {view} AS {select};",
        view = quote_ident(name),
        select = select_sql
    );
    tracing::debug!("Recreating view {}: {}", name, select_sql);
    conn.execute_batch(&sql)
        .with_context(|| format!("Failed to create view {}", name))
}

/// DDL that makes the target sequence continue from the source's last number.
pub fn sequence_ddl(sequence: &SequenceDescriptor) -> Result<String> {
    let start = sequence.last_number.trunc().to_i64().ok_or_else(|| {
        anyhow::anyhow!(
            "Sequence {} value {} does not fit a BIGINT",
            sequence.name,
            sequence.last_number
        )
    })?;
    let increment = if sequence.increment_by == 0 {
        1
    } else {
        sequence.increment_by
    };

    let mut sql = format!(
        "CREATE SEQUENCE {} START WITH {} INCREMENT BY {}",
        quote_ident(&sequence.name),
        start,
        increment
    );
    // Default bounds are 1..MAX ascending and MIN..-1 descending.
    if increment < 0 {
        sql.push_str(&format!(" MAXVALUE {}", start.max(-1)));
    } else if start < 1 {
        sql.push_str(&format!(" MINVALUE {}", start));
    }
    Ok(sql)
}

/// Drop and recreate the target sequence from its source descriptor.
pub fn recreate_sequence(conn: &Connection, sequence: &SequenceDescriptor) -> Result<()> {
    let ddl = sequence_ddl(sequence)?;
    tracing::debug!("Syncing sequence {}: {}", sequence.name, ddl);
    let sql = format!(
        "DROP SEQUENCE IF EXISTS {};\n{};",
        quote_ident(&sequence.name),
        ddl
    );
    conn.execute_batch(&sql)
        .with_context(|| format!("Failed to create sequence {}", sequence.name))
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<Decimal> {
    let sql = format!("SELECT COUNT(1) FROM {}", quote_ident(table));
    let count: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .with_context(|| format!("Failed to count rows of {}", table))?;
    Ok(Decimal::from(count))
}

pub fn view_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM duckdb_views() \
             WHERE NOT internal AND schema_name = current_schema() \
             AND upper(view_name) = upper(?)",
            params![name],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to look up view {}", name))?;
    Ok(count > 0)
}

/// Column names exposed by `duckdb_sequences()` in this DuckDB version.
pub fn sequence_catalog_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("DESCRIBE SELECT * FROM duckdb_sequences()")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to describe duckdb_sequences()")?;
    Ok(names)
}

/// Values of `columns` for sequence `name`, in the order given.
///
/// `None` when the sequence does not exist; a `None` entry means the column
/// is NULL for that sequence.
pub fn sequence_catalog_values(
    conn: &Connection,
    name: &str,
    columns: &[String],
) -> Result<Option<Vec<Option<Decimal>>>> {
    if columns.is_empty() {
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM duckdb_sequences() \
             WHERE schema_name = current_schema() AND upper(sequence_name) = upper(?)",
            params![name],
            |row| row.get(0),
        )?;
        return Ok((exists > 0).then(Vec::new));
    }

    let projection = columns
        .iter()
        .map(|c| format!("CAST({} AS VARCHAR)", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM duckdb_sequences() \
         WHERE schema_name = current_schema() AND upper(sequence_name) = upper(?)",
        projection
    );

    let raw: Option<Vec<Option<String>>> = conn
        .query_row(&sql, params![name], |row| {
            (0..columns.len())
                .map(|i| row.get::<_, Option<String>>(i))
                .collect()
        })
        .optional()
        .with_context(|| format!("Failed to look up sequence {}", name))?;

    Ok(raw.map(|values| {
        values
            .into_iter()
            .map(|v| v.and_then(|s| Decimal::from_str(s.trim()).ok()))
            .collect()
    }))
}
