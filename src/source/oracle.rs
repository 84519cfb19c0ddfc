// ABOUTME: Oracle implementation of the source seam on top of the `oracle` crate (ODPI-C)
// ABOUTME: Maps Oracle column types to JDBC codes and driver values to SourceValue

use super::{
    materialize, ColumnDescriptor, LargeObject, SourceConnector, SourceRow, SourceSession,
    SourceValue, VendorValue,
};
use crate::typemap::codes;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use oracle::sql_type::{Blob, Clob, IntervalDS, IntervalYM, Lob, NClob, OracleType};
use oracle::{Connection, Row};
use rust_decimal::Decimal;
use std::io::Read;
use std::str::FromStr;

/// Opens Oracle sessions with fixed credentials.
pub struct OracleConnector {
    connect_string: String,
    username: String,
    password: String,
}

impl OracleConnector {
    pub fn new(connect_string: &str, username: &str, password: &str) -> Self {
        Self {
            connect_string: connect_string.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl std::fmt::Debug for OracleConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConnector")
            .field("connect_string", &self.connect_string)
            .field("username", &self.username)
            .finish()
    }
}

impl SourceConnector for OracleConnector {
    fn connect(&self) -> Result<Box<dyn SourceSession>> {
        let conn = Connection::connect(&self.username, &self.password, &self.connect_string)
            .with_context(|| {
                format!(
                    "Failed to connect to Oracle at {} as {}",
                    self.connect_string, self.username
                )
            })?;
        Ok(Box::new(OracleSession { conn }))
    }
}

struct OracleSession {
    conn: Connection,
}

impl SourceSession for OracleSession {
    fn describe(&mut self, sql: &str) -> Result<Vec<ColumnDescriptor>> {
        let metadata_sql = describe_sql(sql);
        let rows = self
            .conn
            .query(&metadata_sql, &[])
            .with_context(|| format!("Failed to describe: {}", sql))?;
        Ok(rows
            .column_info()
            .iter()
            .enumerate()
            .map(|(i, info)| {
                let (type_code, precision, scale) = jdbc_type(info.oracle_type());
                ColumnDescriptor::new(info.name(), i + 1, type_code, precision, scale)
            })
            .collect())
    }

    fn query(
        &mut self,
        sql: &str,
        fetch_size: usize,
        visitor: &mut dyn FnMut(&dyn SourceRow) -> Result<()>,
    ) -> Result<()> {
        let fetch_size = u32::try_from(fetch_size.max(1)).unwrap_or(u32::MAX);
        let mut stmt = self
            .conn
            .statement(sql)
            .fetch_array_size(fetch_size)
            .lob_locator()
            .build()
            .with_context(|| format!("Failed to prepare: {}", sql))?;
        let rows = stmt
            .query(&[])
            .with_context(|| format!("Failed to execute: {}", sql))?;
        let types: Vec<OracleType> = rows
            .column_info()
            .iter()
            .map(|info| info.oracle_type().clone())
            .collect();

        for row in rows {
            let row = row.context("Failed to fetch row")?;
            visitor(&OracleRow {
                row: &row,
                types: &types,
            })?;
        }
        Ok(())
    }
}

struct OracleRow<'a> {
    row: &'a Row,
    types: &'a [OracleType],
}

impl OracleRow<'_> {
    fn column(&self, index: usize) -> Result<(usize, &OracleType)> {
        match index.checked_sub(1).and_then(|i| self.types.get(i).map(|t| (i, t))) {
            Some(found) => Ok(found),
            None => bail!("Column index {} out of range", index),
        }
    }

    /// Locator of a LOB column, or `None` for NULL and non-LOB columns.
    fn lob(&self, i: usize, oracle_type: &OracleType) -> Result<Option<OracleLob>> {
        let handle = match oracle_type {
            OracleType::BLOB => self.row.get::<usize, Option<Blob>>(i)?.map(LobHandle::Blob),
            OracleType::CLOB => self.row.get::<usize, Option<Clob>>(i)?.map(LobHandle::Clob),
            OracleType::NCLOB => self.row.get::<usize, Option<NClob>>(i)?.map(LobHandle::NClob),
            _ => return Ok(None),
        };
        Ok(handle.map(|h| OracleLob { handle: Some(h) }))
    }
}

impl SourceRow for OracleRow<'_> {
    fn get_timestamp(&self, index: usize) -> Result<Option<NaiveDateTime>> {
        let (i, oracle_type) = self.column(index)?;
        if matches!(
            oracle_type,
            OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_)
        ) {
            bail!("{} carries a time zone", oracle_type);
        }
        Ok(self.row.get::<usize, Option<NaiveDateTime>>(i)?)
    }

    fn get_bytes(&self, index: usize) -> Result<Option<Vec<u8>>> {
        let (i, oracle_type) = self.column(index)?;
        if is_lob(oracle_type) {
            return self
                .lob(i, oracle_type)?
                .map(|lob| materialize(Box::new(lob)))
                .transpose();
        }
        Ok(self.row.get::<usize, Option<Vec<u8>>>(i)?)
    }

    fn get_string(&self, index: usize) -> Result<Option<String>> {
        let (i, oracle_type) = self.column(index)?;
        if is_lob(oracle_type) {
            return match self.lob(i, oracle_type)? {
                Some(lob) => {
                    let bytes = materialize(Box::new(lob))?;
                    Ok(Some(String::from_utf8(bytes).context("CLOB content is not valid UTF-8")?))
                }
                None => Ok(None),
            };
        }
        Ok(self.row.get::<usize, Option<String>>(i)?)
    }

    fn get_value(&self, index: usize) -> Result<SourceValue> {
        let (i, oracle_type) = self.column(index)?;
        if let Some(lob) = self.lob(i, oracle_type)? {
            return Ok(match oracle_type {
                OracleType::BLOB => SourceValue::Blob(Box::new(lob)),
                _ => SourceValue::Clob(Box::new(lob)),
            });
        }
        if is_lob(oracle_type) {
            return Ok(SourceValue::Null);
        }
        let row = self.row;

        macro_rules! read {
            ($ty:ty, $wrap:expr) => {
                match row.get::<usize, Option<$ty>>(i)? {
                    Some(v) => $wrap(v),
                    None => SourceValue::Null,
                }
            };
        }

        let value = match oracle_type {
            OracleType::Number(_, _) | OracleType::Float(_) => read!(String, |s: String| {
                Decimal::from_str(&s)
                    .or_else(|_| Decimal::from_scientific(&s))
                    .map(SourceValue::Number)
                    .unwrap_or(SourceValue::Text(s))
            }),
            OracleType::Int64 => read!(i64, SourceValue::Integer),
            OracleType::BinaryFloat => read!(f32, |v: f32| SourceValue::Float(f64::from(v))),
            OracleType::BinaryDouble => read!(f64, SourceValue::Float),
            OracleType::Boolean => read!(bool, SourceValue::Boolean),
            OracleType::Date => read!(NaiveDateTime, |v| SourceValue::Vendor(
                VendorValue::OracleDate(v)
            )),
            OracleType::Timestamp(_) => read!(NaiveDateTime, |v| SourceValue::Vendor(
                VendorValue::OracleTimestamp(v)
            )),
            OracleType::TimestampTZ(_) => read!(DateTime<FixedOffset>, |v| SourceValue::Vendor(
                VendorValue::OracleTimestampTz(v)
            )),
            OracleType::TimestampLTZ(_) => read!(DateTime<FixedOffset>, |v| SourceValue::Vendor(
                VendorValue::OracleTimestampLtz(v)
            )),
            OracleType::IntervalDS(_, _) => read!(IntervalDS, |v: IntervalDS| {
                SourceValue::Vendor(VendorValue::OracleIntervalDs {
                    days: v.days(),
                    hours: v.hours(),
                    minutes: v.minutes(),
                    seconds: v.seconds(),
                    nanoseconds: v.nanoseconds(),
                })
            }),
            OracleType::IntervalYM(_) => read!(IntervalYM, |v: IntervalYM| {
                SourceValue::Vendor(VendorValue::OracleIntervalYm {
                    years: v.years(),
                    months: v.months(),
                })
            }),
            OracleType::Rowid => read!(String, |v| SourceValue::Vendor(VendorValue::OracleRowId(v))),
            OracleType::Raw(_) | OracleType::LongRaw => read!(Vec<u8>, SourceValue::Bytes),
            _ => read!(String, SourceValue::Text),
        };
        Ok(value)
    }
}

/// Wraps `sql` so the server returns column metadata and no rows.
fn describe_sql(sql: &str) -> String {
    format!("SELECT * FROM ({}) WHERE 1 = 0", sql)
}

fn is_lob(oracle_type: &OracleType) -> bool {
    matches!(
        oracle_type,
        OracleType::BLOB | OracleType::CLOB | OracleType::NCLOB
    )
}

enum LobHandle {
    Blob(Blob),
    Clob(Clob),
    NClob(NClob),
}

/// A fetched LOB locator. Dropping the locator releases it on the server.
struct OracleLob {
    handle: Option<LobHandle>,
}

impl OracleLob {
    fn handle(&mut self) -> Result<&mut LobHandle> {
        self.handle
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("LOB locator already released"))
    }
}

impl std::fmt::Debug for OracleLob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.handle {
            Some(LobHandle::Blob(_)) => "BLOB",
            Some(LobHandle::Clob(_)) => "CLOB",
            Some(LobHandle::NClob(_)) => "NCLOB",
            None => "released",
        };
        f.debug_tuple("OracleLob").field(&kind).finish()
    }
}

impl LargeObject for OracleLob {
    fn length(&mut self) -> Result<u64> {
        let size = match self.handle()? {
            LobHandle::Blob(lob) => lob.size()?,
            LobHandle::Clob(lob) => lob.size()?,
            LobHandle::NClob(lob) => lob.size()?,
        };
        Ok(size)
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        match self.handle()? {
            LobHandle::Blob(lob) => lob.read_to_end(&mut content)?,
            LobHandle::Clob(lob) => lob.read_to_end(&mut content)?,
            LobHandle::NClob(lob) => lob.read_to_end(&mut content)?,
        };
        Ok(content)
    }

    fn free(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                drop(handle);
                Ok(())
            }
            None => bail!("LOB locator already released"),
        }
    }
}

/// JDBC type code, precision and scale the Oracle JDBC driver would report.
fn jdbc_type(oracle_type: &OracleType) -> (i32, i32, i32) {
    match oracle_type {
        OracleType::Varchar2(len) => (codes::VARCHAR, *len as i32, 0),
        OracleType::NVarchar2(len) => (codes::NVARCHAR, *len as i32, 0),
        OracleType::Char(len) => (codes::CHAR, *len as i32, 0),
        OracleType::NChar(len) => (codes::NCHAR, *len as i32, 0),
        OracleType::Number(precision, scale) => {
            (codes::NUMERIC, i32::from(*precision), i32::from(*scale))
        }
        OracleType::Float(precision) => (codes::NUMERIC, i32::from(*precision), -127),
        OracleType::Int64 => (codes::BIGINT, 19, 0),
        OracleType::BinaryFloat => (codes::ORACLE_BINARY_FLOAT, 0, 0),
        OracleType::BinaryDouble => (codes::ORACLE_BINARY_DOUBLE, 0, 0),
        OracleType::Boolean => (codes::BOOLEAN, 0, 0),
        OracleType::Date => (codes::TIMESTAMP, 0, 0),
        OracleType::Timestamp(fsp) => (codes::TIMESTAMP, 0, i32::from(*fsp)),
        OracleType::TimestampTZ(fsp) => (codes::ORACLE_TIMESTAMPTZ, 0, i32::from(*fsp)),
        OracleType::TimestampLTZ(fsp) => (codes::ORACLE_TIMESTAMPLTZ, 0, i32::from(*fsp)),
        OracleType::IntervalDS(_, _) => (codes::ORACLE_INTERVALDS, 0, 0),
        OracleType::IntervalYM(_) => (codes::ORACLE_INTERVALYM, 0, 0),
        OracleType::CLOB => (codes::CLOB, 0, 0),
        OracleType::NCLOB => (codes::NCLOB, 0, 0),
        OracleType::Long => (codes::LONGVARCHAR, 0, 0),
        OracleType::BLOB => (codes::BLOB, 0, 0),
        OracleType::Raw(len) => (codes::VARBINARY, *len as i32, 0),
        OracleType::LongRaw => (codes::LONGVARBINARY, 0, 0),
        OracleType::Rowid => (codes::ROWID, 0, 0),
        OracleType::Xml => (codes::SQLXML, 0, 0),
        _ => (codes::OTHER, 0, 0),
    }
}
