// ABOUTME: Converts source column values into values DuckDB can bind
// ABOUTME: Materializes large objects and normalizes temporal representations

use crate::source::{
    materialize, ColumnDescriptor, SourceRow, SourceValue, VendorTemporal, VendorValue,
};
use crate::typemap;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use duckdb::types::{ToSql, ToSqlOutput, Value};
use rust_decimal::Decimal;

/// Text form used to bind timestamps; DuckDB casts it on insert.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A converted value ready to be bound into an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    /// Vendor wrapper without a temporal view, bound as its display text
    Vendor(VendorValue),
}

impl ToSql for ColumnValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            ColumnValue::Null => Value::Null,
            ColumnValue::Boolean(b) => Value::Boolean(*b),
            ColumnValue::Integer(i) => Value::BigInt(*i),
            ColumnValue::Float(f) => Value::Double(*f),
            ColumnValue::Decimal(d) => Value::Text(d.to_string()),
            ColumnValue::Text(s) => Value::Text(s.clone()),
            ColumnValue::Bytes(b) => Value::Blob(b.clone()),
            ColumnValue::Timestamp(ts) => Value::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
            ColumnValue::Vendor(v) => Value::Text(v.to_string()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

/// Read and convert one column of the current row
///
/// Binary and character large objects go through the byte/string accessors.
/// Temporal columns prefer the driver's timestamp accessor and fall back to
/// the generic accessor when the driver cannot produce one. Everything else
/// passes through, except vendor wrappers which are always normalized.
pub fn read_value(column: &ColumnDescriptor, row: &dyn SourceRow) -> Result<ColumnValue> {
    let index = column.ordinal;

    if typemap::is_binary(column.type_code) {
        return Ok(match row.get_bytes(index)? {
            Some(bytes) => ColumnValue::Bytes(bytes),
            None => ColumnValue::Null,
        });
    }

    if typemap::is_character_lob(column.type_code) {
        return Ok(match row.get_string(index)? {
            Some(text) => ColumnValue::Text(text),
            None => ColumnValue::Null,
        });
    }

    if typemap::is_temporal(column.type_code) {
        match row.get_timestamp(index) {
            Ok(Some(ts)) => return Ok(ColumnValue::Timestamp(ts)),
            Ok(None) => return Ok(ColumnValue::Null),
            Err(e) => {
                tracing::debug!(
                    "Timestamp accessor failed for column {} ({}), using generic accessor",
                    column.name,
                    e
                );
                let value = row
                    .get_value(index)
                    .with_context(|| format!("Failed to read column {}", column.name))?;
                return normalize_temporal(value);
            }
        }
    }

    let value = row
        .get_value(index)
        .with_context(|| format!("Failed to read column {}", column.name))?;
    match value {
        SourceValue::Vendor(_) => normalize_temporal(value),
        other => convert_plain(other),
    }
}

/// Collapse any temporal representation into a single timestamp.
///
/// Non-temporal values are converted as-is.
pub fn normalize_temporal(value: SourceValue) -> Result<ColumnValue> {
    match value {
        SourceValue::Date(d) => Ok(ColumnValue::Timestamp(midnight(d))),
        SourceValue::Time(t) => Ok(ColumnValue::Timestamp(epoch_date().and_time(t))),
        SourceValue::DateTime(ts) => Ok(ColumnValue::Timestamp(ts)),
        SourceValue::Instant(ts) => Ok(ColumnValue::Timestamp(ts.naive_utc())),
        SourceValue::Offset(ts) => Ok(ColumnValue::Timestamp(ts.naive_local())),
        SourceValue::Vendor(vendor) => Ok(normalize_vendor(vendor)),
        other => convert_plain(other),
    }
}

fn normalize_vendor(vendor: VendorValue) -> ColumnValue {
    if let Some(ts) = vendor.try_as_timestamp() {
        return ColumnValue::Timestamp(ts);
    }
    if let Some(d) = vendor.try_as_date() {
        return ColumnValue::Timestamp(midnight(d));
    }
    if let Some(t) = vendor.try_as_time() {
        return ColumnValue::Timestamp(epoch_date().and_time(t));
    }
    ColumnValue::Vendor(vendor)
}

fn convert_plain(value: SourceValue) -> Result<ColumnValue> {
    Ok(match value {
        SourceValue::Null => ColumnValue::Null,
        SourceValue::Boolean(b) => ColumnValue::Boolean(b),
        SourceValue::Integer(i) => ColumnValue::Integer(i),
        SourceValue::Float(f) => ColumnValue::Float(f),
        SourceValue::Number(d) => ColumnValue::Decimal(d),
        SourceValue::Text(s) => ColumnValue::Text(s),
        SourceValue::Bytes(b) => ColumnValue::Bytes(b),
        SourceValue::Blob(lob) => ColumnValue::Bytes(materialize(lob)?),
        SourceValue::Clob(lob) => {
            let bytes = materialize(lob)?;
            ColumnValue::Text(String::from_utf8(bytes).context("CLOB content is not valid UTF-8")?)
        }
        temporal @ (SourceValue::Date(_)
        | SourceValue::Time(_)
        | SourceValue::DateTime(_)
        | SourceValue::Instant(_)
        | SourceValue::Offset(_)
        | SourceValue::Vendor(_)) => normalize_temporal(temporal)?,
    })
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::default())
}

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}
