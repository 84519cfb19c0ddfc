// ABOUTME: Source database seam - connector, session and row accessor traits
// ABOUTME: Driver-neutral value model including Oracle temporal wrappers

pub mod catalog;
#[cfg(feature = "oracle")]
pub mod oracle;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

pub use catalog::{SchemaObjectSet, SequenceDescriptor};

/// Per-column metadata reported by the source driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// 1-based position in the result set
    pub ordinal: usize,
    /// JDBC type code (see [`crate::typemap::codes`])
    pub type_code: i32,
    /// Declared precision, or length for character types
    pub precision: i32,
    pub scale: i32,
}

impl ColumnDescriptor {
    pub fn new(name: &str, ordinal: usize, type_code: i32, precision: i32, scale: i32) -> Self {
        Self {
            name: name.to_string(),
            ordinal,
            type_code,
            precision,
            scale,
        }
    }
}

/// Opens sessions against the source database.
///
/// Shared by every worker of a run, so it must be `Send + Sync`. Each call to
/// [`connect`](SourceConnector::connect) returns a session that the caller
/// owns exclusively; dropping it releases the connection.
pub trait SourceConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SourceSession>>;
}

/// Build the connector described by `[source]`.
///
/// # Errors
///
/// A configuration error when no password is available or when the binary
/// was built without the `oracle` feature.
pub fn connector_from_config(
    config: &crate::config::SourceConfig,
) -> crate::error::Result<std::sync::Arc<dyn SourceConnector>> {
    let password = config.password.as_deref().ok_or_else(|| {
        crate::error::LoaderError::config(format!(
            "No source password: set source.password or {}",
            crate::config::PASSWORD_ENV
        ))
    })?;

    #[cfg(feature = "oracle")]
    {
        Ok(std::sync::Arc::new(oracle::OracleConnector::new(
            &config.connect_string,
            &config.username,
            password,
        )))
    }

    #[cfg(not(feature = "oracle"))]
    {
        let _ = password;
        Err(crate::error::LoaderError::config(
            "Built without Oracle support; rebuild with --features oracle",
        ))
    }
}

/// One open source connection.
pub trait SourceSession: Send {
    /// Column metadata of a query's result set, without fetching rows.
    fn describe(&mut self, sql: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Execute a query and hand every row to `visitor`, in cursor order.
    ///
    /// `fetch_size` is a hint for the driver's prefetch buffer. An error from
    /// the visitor stops iteration and is returned unchanged.
    fn query(
        &mut self,
        sql: &str,
        fetch_size: usize,
        visitor: &mut dyn FnMut(&dyn SourceRow) -> Result<()>,
    ) -> Result<()>;
}

/// Typed access to the current row. Indexes are 1-based ordinals and `None`
/// means SQL NULL.
///
/// Drivers that fetch LOB columns as locators hand them out from `get_value`
/// as [`SourceValue::Blob`]/[`SourceValue::Clob`], and pass them through
/// [`materialize`] in `get_bytes`/`get_string`.
pub trait SourceRow {
    fn get_timestamp(&self, index: usize) -> Result<Option<NaiveDateTime>>;
    fn get_bytes(&self, index: usize) -> Result<Option<Vec<u8>>>;
    fn get_string(&self, index: usize) -> Result<Option<String>>;
    fn get_value(&self, index: usize) -> Result<SourceValue>;
}

/// A server-side large object handle (BLOB or CLOB locator).
pub trait LargeObject: Send + fmt::Debug {
    /// Length in bytes (BLOB) or characters (CLOB)
    fn length(&mut self) -> Result<u64>;
    fn read_all(&mut self) -> Result<Vec<u8>>;
    /// Release the server-side handle. Drivers may not support this.
    fn free(&mut self) -> Result<()>;
}

/// Read a large object fully into memory, then release its handle.
///
/// The handle is released whether or not reading succeeded. Release errors
/// are ignored; several drivers do not implement it.
pub fn materialize(mut lob: Box<dyn LargeObject>) -> Result<Vec<u8>> {
    let result = read_lob(lob.as_mut());
    if let Err(e) = lob.free() {
        tracing::trace!("Ignoring large object release failure: {}", e);
    }
    result
}

fn read_lob(lob: &mut dyn LargeObject) -> Result<Vec<u8>> {
    let length = lob.length().context("Failed to read large object length")?;
    if length > i32::MAX as u64 {
        bail!("Large object of {} bytes exceeds the supported size", length);
    }
    lob.read_all().context("Failed to read large object content")
}

/// A value as returned by the generic accessor.
#[derive(Debug)]
pub enum SourceValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Number(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Blob(Box<dyn LargeObject>),
    Clob(Box<dyn LargeObject>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Instant(DateTime<Utc>),
    Offset(DateTime<FixedOffset>),
    Vendor(VendorValue),
}

impl SourceValue {
    /// Numeric view of the value, used for counts and sequence numbers.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            SourceValue::Integer(i) => Some(Decimal::from(*i)),
            SourceValue::Number(d) => Some(*d),
            SourceValue::Float(f) => Decimal::from_f64(*f),
            SourceValue::Text(s) => Decimal::from_str(s.trim())
                .or_else(|_| Decimal::from_scientific(s.trim()))
                .ok(),
            _ => None,
        }
    }
}

/// Oracle driver value types that carry temporal data in a proprietary form.
///
/// Closed on purpose: only wrappers actually produced by the driver are listed
/// and each one declares which temporal views it supports.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorValue {
    OracleDate(NaiveDateTime),
    OracleTimestamp(NaiveDateTime),
    OracleTimestampTz(DateTime<FixedOffset>),
    OracleTimestampLtz(DateTime<FixedOffset>),
    OracleIntervalDs {
        days: i32,
        hours: i32,
        minutes: i32,
        seconds: i32,
        nanoseconds: i32,
    },
    OracleIntervalYm {
        years: i32,
        months: i32,
    },
    OracleRowId(String),
}

/// Narrow extraction interface for vendor temporal wrappers.
pub trait VendorTemporal {
    fn try_as_timestamp(&self) -> Option<NaiveDateTime>;
    fn try_as_date(&self) -> Option<NaiveDate>;
    fn try_as_time(&self) -> Option<NaiveTime>;
}

impl VendorTemporal for VendorValue {
    fn try_as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            VendorValue::OracleDate(ts) | VendorValue::OracleTimestamp(ts) => Some(*ts),
            VendorValue::OracleTimestampTz(ts) | VendorValue::OracleTimestampLtz(ts) => {
                Some(ts.naive_local())
            }
            _ => None,
        }
    }

    fn try_as_date(&self) -> Option<NaiveDate> {
        self.try_as_timestamp().map(|ts| ts.date())
    }

    fn try_as_time(&self) -> Option<NaiveTime> {
        self.try_as_timestamp().map(|ts| ts.time())
    }
}

impl fmt::Display for VendorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorValue::OracleDate(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            VendorValue::OracleTimestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            VendorValue::OracleTimestampTz(ts) | VendorValue::OracleTimestampLtz(ts) => {
                write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f %:z"))
            }
            VendorValue::OracleIntervalDs {
                days,
                hours,
                minutes,
                seconds,
                nanoseconds,
            } => {
                let negative =
                    *days < 0 || *hours < 0 || *minutes < 0 || *seconds < 0 || *nanoseconds < 0;
                write!(
                    f,
                    "{}{:02} {:02}:{:02}:{:02}.{:09}",
                    if negative { '-' } else { '+' },
                    days.unsigned_abs(),
                    hours.unsigned_abs(),
                    minutes.unsigned_abs(),
                    seconds.unsigned_abs(),
                    nanoseconds.unsigned_abs()
                )
            }
            VendorValue::OracleIntervalYm { years, months } => {
                let negative = *years < 0 || *months < 0;
                write!(
                    f,
                    "{}{:02}-{:02}",
                    if negative { '-' } else { '+' },
                    years.unsigned_abs(),
                    months.unsigned_abs()
                )
            }
            VendorValue::OracleRowId(id) => f.write_str(id),
        }
    }
}
