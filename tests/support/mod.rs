// ABOUTME: SQLite-backed stand-in for an Oracle schema, used by integration tests
// ABOUTME: Oracle-style catalog views, connection tracking and fault injection

#![allow(dead_code)]

use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime};
use oracle_duckdb_loader::source::{
    materialize, ColumnDescriptor, LargeObject, SourceConnector, SourceRow, SourceSession,
    SourceValue,
};
use oracle_duckdb_loader::typemap::codes;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const OWNER: &str = "TEST";

const CATALOG_DDL: &str = "
CREATE TABLE ALL_TABLES (OWNER TEXT, TABLE_NAME TEXT);
CREATE TABLE ALL_VIEWS (OWNER TEXT, VIEW_NAME TEXT, TEXT TEXT);
CREATE TABLE ALL_SEQUENCES (SEQUENCE_OWNER TEXT, SEQUENCE_NAME TEXT, INCREMENT_BY INTEGER, LAST_NUMBER INTEGER);
";

/// Open, peak and total source sessions, plus LOB locators handed out.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    open: AtomicUsize,
    max_open: AtomicUsize,
    total: AtomicUsize,
    lobs_opened: AtomicUsize,
    lobs_freed: AtomicUsize,
}

impl ConnectionStats {
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn lobs_opened(&self) -> usize {
        self.lobs_opened.load(Ordering::SeqCst)
    }

    pub fn lobs_freed(&self) -> usize {
        self.lobs_freed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Remaining failing row queries per table
    tables: Mutex<HashMap<String, usize>>,
    /// Remaining count queries per table that kill their session
    lost_counts: Mutex<HashMap<String, usize>>,
    refuse_connections: AtomicBool,
    query_delay: Mutex<Duration>,
}

/// An Oracle schema `TEST` simulated with two SQLite files.
pub struct OracleStandIn {
    dir: TempDir,
    stats: Arc<ConnectionStats>,
    faults: Arc<Faults>,
}

impl OracleStandIn {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = Connection::open(dir.path().join("catalog.db")).expect("catalog db");
        catalog.execute_batch(CATALOG_DDL).expect("catalog ddl");
        Connection::open(dir.path().join("test.db")).expect("schema db");
        Self {
            dir,
            stats: Arc::new(ConnectionStats::default()),
            faults: Arc::new(Faults::default()),
        }
    }

    /// EMP (3 rows), DEPT (2 rows), T_SKIP (1 row), EMP_VIEW and ORDERS_SEQ.
    pub fn seeded() -> Self {
        let db = Self::new();
        db.add_table(
            "EMP",
            "ID NUMBER(9,0), NAME VARCHAR2(40), SALARY NUMBER(10,2), HIRED DATE, PHOTO BLOB, NOTES CLOB",
            "(1, 'ALICE', 1000.5, '2020-01-15 09:30:00', x'0102', 'first'),
             (2, 'BOB', 2000, '2021-06-01', NULL, NULL),
             (3, 'CAROL', NULL, NULL, x'FF', 'third')",
        );
        db.add_table(
            "DEPT",
            "DEPTNO NUMBER, DNAME VARCHAR2(14)",
            "(10, 'ACCOUNTING'), (20, 'RESEARCH')",
        );
        db.add_table("T_SKIP", "ID NUMBER(9,0)", "(1)");
        db.add_view(
            "EMP_VIEW",
            "SELECT e.ID, e.NAME, NVL2(e.SALARY, 'PAID', 'UNPAID') AS PAY_STATE \
             FROM TEST.EMP e -- active staff\nWHERE e.ID > 0 WITH READ ONLY;",
        );
        db.add_sequence("ORDERS_SEQ", 1, 1000);
        db
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn add_table(&self, name: &str, columns: &str, values: &str) {
        let schema = self.schema_conn();
        schema
            .execute_batch(&format!("CREATE TABLE {} ({});", name, columns))
            .expect("create table");
        if !values.trim().is_empty() {
            schema
                .execute_batch(&format!("INSERT INTO {} VALUES {};", name, values))
                .expect("insert rows");
        }
        self.catalog_conn()
            .execute(
                "INSERT INTO ALL_TABLES (OWNER, TABLE_NAME) VALUES (?1, ?2)",
                [OWNER, name],
            )
            .expect("register table");
    }

    pub fn add_view(&self, name: &str, text: &str) {
        self.catalog_conn()
            .execute(
                "INSERT INTO ALL_VIEWS (OWNER, VIEW_NAME, TEXT) VALUES (?1, ?2, ?3)",
                [OWNER, name, text],
            )
            .expect("register view");
    }

    pub fn add_sequence(&self, name: &str, increment_by: i64, last_number: i64) {
        self.catalog_conn()
            .execute(
                "INSERT INTO ALL_SEQUENCES VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![OWNER, name, increment_by, last_number],
            )
            .expect("register sequence");
    }

    /// Make the next `times` row queries of `table` fail.
    pub fn fail_table(&self, table: &str, times: usize) {
        self.faults
            .tables
            .lock()
            .unwrap()
            .insert(table.to_string(), times);
    }

    /// Make the next `times` row counts of `table` drop their session.
    pub fn lose_session_on_count(&self, table: &str, times: usize) {
        self.faults
            .lost_counts
            .lock()
            .unwrap()
            .insert(table.to_string(), times);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.faults.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Delay every row query, to keep a run in flight.
    pub fn set_query_delay(&self, delay: Duration) {
        *self.faults.query_delay.lock().unwrap() = delay;
    }

    pub fn set_view_text(&self, name: &str, text: &str) {
        self.catalog_conn()
            .execute(
                "UPDATE ALL_VIEWS SET TEXT = ?1 WHERE OWNER = ?2 AND VIEW_NAME = ?3",
                [text, OWNER, name],
            )
            .expect("update view");
    }

    /// Remove `ALL_SEQUENCES` so catalog discovery fails.
    pub fn break_catalog(&self) {
        self.catalog_conn()
            .execute_batch("DROP TABLE ALL_SEQUENCES;")
            .expect("drop catalog table");
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }

    pub fn connector(&self) -> Arc<dyn SourceConnector> {
        Arc::new(StandInConnector {
            dir: self.path(),
            stats: self.stats.clone(),
            faults: self.faults.clone(),
        })
    }

    fn catalog_conn(&self) -> Connection {
        Connection::open(self.dir.path().join("catalog.db")).expect("catalog db")
    }

    fn schema_conn(&self) -> Connection {
        Connection::open(self.dir.path().join("test.db")).expect("schema db")
    }
}

struct StandInConnector {
    dir: PathBuf,
    stats: Arc<ConnectionStats>,
    faults: Arc<Faults>,
}

impl SourceConnector for StandInConnector {
    fn connect(&self) -> Result<Box<dyn SourceSession>> {
        if self.faults.refuse_connections.load(Ordering::SeqCst) {
            bail!("ORA-12541: TNS:no listener");
        }
        let conn = Connection::open(self.dir.join("catalog.db"))?;
        let schema_path = self.dir.join("test.db").to_string_lossy().into_owned();
        conn.execute("ATTACH DATABASE ?1 AS TEST", [&schema_path])?;

        let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_open.fetch_max(open, Ordering::SeqCst);
        self.stats.total.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(StandInSession {
            conn,
            stats: self.stats.clone(),
            faults: self.faults.clone(),
            lost: false,
        }))
    }
}

struct StandInSession {
    conn: Connection,
    stats: Arc<ConnectionStats>,
    faults: Arc<Faults>,
    /// Set once the session has been killed; every later call fails
    lost: bool,
}

impl Drop for StandInSession {
    fn drop(&mut self) {
        self.stats.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StandInSession {
    fn before_count_query(&mut self, sql: &str) -> Result<()> {
        if !sql.starts_with("SELECT COUNT(1) FROM") {
            return Ok(());
        }
        let mut counts = self.faults.lost_counts.lock().unwrap();
        for (table, remaining) in counts.iter_mut() {
            if *remaining > 0 && sql.contains(&format!(".\"{}\"", table)) {
                *remaining -= 1;
                self.lost = true;
                bail!("ORA-03113: end-of-file on communication channel");
            }
        }
        Ok(())
    }

    fn before_row_query(&self, sql: &str) -> Result<()> {
        if !sql.starts_with("SELECT * FROM") {
            return Ok(());
        }
        let delay = *self.faults.query_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut tables = self.faults.tables.lock().unwrap();
        for (table, remaining) in tables.iter_mut() {
            if *remaining > 0 && sql.contains(&format!(".\"{}\"", table)) {
                *remaining -= 1;
                bail!("ORA-03113: end-of-file on communication channel");
            }
        }
        Ok(())
    }
}

/// SQLite has no `FETCH FIRST n ROWS ONLY`.
fn to_sqlite(sql: &str) -> String {
    match sql.find(" FETCH FIRST ") {
        Some(pos) => {
            let limit = sql[pos..]
                .split_whitespace()
                .nth(2)
                .unwrap_or("0")
                .to_string();
            format!("{} LIMIT {}", &sql[..pos], limit)
        }
        None => sql.to_string(),
    }
}

impl SourceSession for StandInSession {
    fn describe(&mut self, sql: &str) -> Result<Vec<ColumnDescriptor>> {
        if self.lost {
            bail!("ORA-03114: not connected to ORACLE");
        }
        let stmt = self.conn.prepare(&to_sqlite(sql))?;
        Ok(stmt
            .columns()
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let (code, precision, scale) = jdbc_type(column.decl_type());
                ColumnDescriptor::new(column.name(), i + 1, code, precision, scale)
            })
            .collect())
    }

    fn query(
        &mut self,
        sql: &str,
        _fetch_size: usize,
        visitor: &mut dyn FnMut(&dyn SourceRow) -> Result<()>,
    ) -> Result<()> {
        if self.lost {
            bail!("ORA-03114: not connected to ORACLE");
        }
        self.before_count_query(sql)?;
        self.before_row_query(sql)?;
        let mut stmt = self.conn.prepare(&to_sqlite(sql))?;
        let declared: Vec<String> = stmt
            .columns()
            .iter()
            .map(|column| column.decl_type().unwrap_or_default().to_uppercase())
            .collect();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            visitor(&StandInRow {
                row,
                declared: &declared,
                stats: &self.stats,
            })?;
        }
        Ok(())
    }
}

/// JDBC metadata for an Oracle-style declared type.
fn jdbc_type(declared: Option<&str>) -> (i32, i32, i32) {
    let declared = declared.unwrap_or_default().trim().to_uppercase();
    let (base, args) = match declared.find('(') {
        Some(pos) => (
            declared[..pos].trim().to_string(),
            declared[pos + 1..].trim_end_matches(')').to_string(),
        ),
        None => (declared.clone(), String::new()),
    };
    let numbers: Vec<i32> = args
        .split(',')
        .filter_map(|a| a.trim().parse().ok())
        .collect();
    let first = numbers.first().copied().unwrap_or(0);

    match base.as_str() {
        "NUMBER" => match numbers.as_slice() {
            [p, s] => (codes::NUMERIC, *p, *s),
            [p] => (codes::NUMERIC, *p, 0),
            _ => (codes::NUMERIC, 0, -127),
        },
        "VARCHAR2" | "VARCHAR" => (codes::VARCHAR, first, 0),
        "CHAR" => (codes::CHAR, first, 0),
        "DATE" | "TIMESTAMP" => (codes::TIMESTAMP, 0, 0),
        "BLOB" | "RAW" => (codes::BLOB, 0, 0),
        "CLOB" => (codes::CLOB, 0, 0),
        "BINARY_DOUBLE" => (codes::ORACLE_BINARY_DOUBLE, 0, 0),
        _ => (codes::OTHER, 0, 0),
    }
}

struct StandInRow<'a, 'stmt> {
    row: &'a rusqlite::Row<'stmt>,
    declared: &'a [String],
    stats: &'a Arc<ConnectionStats>,
}

impl StandInRow<'_, '_> {
    fn value(&self, index: usize) -> Result<ValueRef<'_>> {
        let Some(i) = index.checked_sub(1) else {
            bail!("column index {} out of range", index);
        };
        Ok(self.row.get_ref(i)?)
    }

    fn is_lob(&self, index: usize) -> bool {
        index
            .checked_sub(1)
            .and_then(|i| self.declared.get(i))
            .is_some_and(|decl| decl == "BLOB" || decl == "CLOB")
    }

    /// Hand out a locator for a non-null BLOB/CLOB cell, like the Oracle driver.
    fn lob(&self, index: usize) -> Result<Option<StandInLob>> {
        let data = match self.value(index)? {
            ValueRef::Null => return Ok(None),
            ValueRef::Blob(bytes) | ValueRef::Text(bytes) => bytes.to_vec(),
            other => bail!("not a large object: {:?}", other.data_type()),
        };
        self.stats.lobs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Some(StandInLob {
            data,
            stats: self.stats.clone(),
        }))
    }
}

#[derive(Debug)]
struct StandInLob {
    data: Vec<u8>,
    stats: Arc<ConnectionStats>,
}

impl LargeObject for StandInLob {
    fn length(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }

    fn free(&mut self) -> Result<()> {
        self.stats.lobs_freed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl SourceRow for StandInRow<'_, '_> {
    fn get_timestamp(&self, index: usize) -> Result<Option<NaiveDateTime>> {
        match self.value(index)? {
            ValueRef::Null => Ok(None),
            ValueRef::Text(text) => {
                let text = std::str::from_utf8(text)?;
                if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
                    return Ok(Some(ts));
                }
                let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")?;
                Ok(date.and_hms_opt(0, 0, 0))
            }
            other => bail!("not a timestamp: {:?}", other.data_type()),
        }
    }

    fn get_bytes(&self, index: usize) -> Result<Option<Vec<u8>>> {
        if self.is_lob(index) {
            return self.lob(index)?.map(|lob| materialize(Box::new(lob))).transpose();
        }
        match self.value(index)? {
            ValueRef::Null => Ok(None),
            ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(Some(bytes.to_vec())),
            other => bail!("not binary: {:?}", other.data_type()),
        }
    }

    fn get_string(&self, index: usize) -> Result<Option<String>> {
        if self.is_lob(index) {
            return match self.lob(index)? {
                Some(lob) => Ok(Some(String::from_utf8(materialize(Box::new(lob))?)?)),
                None => Ok(None),
            };
        }
        match self.value(index)? {
            ValueRef::Null => Ok(None),
            ValueRef::Text(text) => Ok(Some(String::from_utf8(text.to_vec())?)),
            ValueRef::Integer(i) => Ok(Some(i.to_string())),
            ValueRef::Real(f) => Ok(Some(f.to_string())),
            ValueRef::Blob(_) => bail!("BLOB is not character data"),
        }
    }

    fn get_value(&self, index: usize) -> Result<SourceValue> {
        if self.is_lob(index) {
            let blob = self.declared[index - 1] == "BLOB";
            return Ok(match self.lob(index)? {
                Some(lob) if blob => SourceValue::Blob(Box::new(lob)),
                Some(lob) => SourceValue::Clob(Box::new(lob)),
                None => SourceValue::Null,
            });
        }
        Ok(match self.value(index)? {
            ValueRef::Null => SourceValue::Null,
            ValueRef::Integer(i) => SourceValue::Integer(i),
            ValueRef::Real(f) => SourceValue::Float(f),
            ValueRef::Text(text) => SourceValue::Text(String::from_utf8(text.to_vec())?),
            ValueRef::Blob(bytes) => SourceValue::Bytes(bytes.to_vec()),
        })
    }
}
