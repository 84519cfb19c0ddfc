// ABOUTME: Maps source column metadata (JDBC type codes) to DuckDB DDL types
// ABOUTME: Total function, including Oracle NUMBER sentinel handling

/// JDBC type codes as reported by Oracle drivers.
///
/// Plain `i32` constants rather than an enum: drivers report codes outside any
/// closed set and every unknown code must still map to something.
pub mod codes {
    pub const BIT: i32 = -7;
    pub const TINYINT: i32 = -6;
    pub const SMALLINT: i32 = 5;
    pub const INTEGER: i32 = 4;
    pub const BIGINT: i32 = -5;
    pub const FLOAT: i32 = 6;
    pub const REAL: i32 = 7;
    pub const DOUBLE: i32 = 8;
    pub const NUMERIC: i32 = 2;
    pub const DECIMAL: i32 = 3;
    pub const BOOLEAN: i32 = 16;

    pub const CHAR: i32 = 1;
    pub const VARCHAR: i32 = 12;
    pub const LONGVARCHAR: i32 = -1;
    pub const NCHAR: i32 = -15;
    pub const NVARCHAR: i32 = -9;
    pub const LONGNVARCHAR: i32 = -16;

    pub const DATE: i32 = 91;
    pub const TIME: i32 = 92;
    pub const TIMESTAMP: i32 = 93;
    pub const TIME_WITH_TIMEZONE: i32 = 2013;
    pub const TIMESTAMP_WITH_TIMEZONE: i32 = 2014;

    pub const BINARY: i32 = -2;
    pub const VARBINARY: i32 = -3;
    pub const LONGVARBINARY: i32 = -4;
    pub const BLOB: i32 = 2004;
    pub const CLOB: i32 = 2005;
    pub const NCLOB: i32 = 2011;
    pub const SQLXML: i32 = 2009;
    pub const OTHER: i32 = 1111;
    pub const ROWID: i32 = -8;

    // Oracle driver extensions
    pub const ORACLE_TIMESTAMPTZ: i32 = -101;
    pub const ORACLE_TIMESTAMPLTZ: i32 = -102;
    pub const ORACLE_INTERVALYM: i32 = -103;
    pub const ORACLE_INTERVALDS: i32 = -104;
    pub const ORACLE_BINARY_FLOAT: i32 = 100;
    pub const ORACLE_BINARY_DOUBLE: i32 = 101;
}

/// Oracle reports `NUMBER` without precision/scale using this value.
pub const ORACLE_UNKNOWN_PRECISION: i32 = -127;

/// Largest precision DuckDB's DECIMAL accepts.
pub const MAX_DECIMAL_PRECISION: i32 = 38;

/// Mapping for numerics whose precision is unknown or too wide.
pub const FLOATING_DECIMAL: &str = "DECIMAL(38,12)";

/// Map a source column type to a DuckDB column type
///
/// # Arguments
///
/// * `type_code` - JDBC type code of the column
/// * `scale` - Declared scale (`-127` when Oracle does not know it)
/// * `precision` - Declared precision, or length for character types
///
/// # Returns
///
/// A non-empty DDL type string. Unknown codes map to `VARCHAR` so the copy
/// never aborts on an exotic column.
///
/// # Examples
///
/// ```
/// use oracle_duckdb_loader::typemap::{codes, map_type};
/// assert_eq!(map_type(codes::NUMERIC, 0, -127), "DECIMAL(38,12)");
/// assert_eq!(map_type(codes::NUMERIC, 0, 5), "INTEGER");
/// assert_eq!(map_type(codes::VARCHAR, 0, 64), "VARCHAR(64)");
/// ```
pub fn map_type(type_code: i32, scale: i32, precision: i32) -> String {
    use codes::*;

    match type_code {
        NUMERIC | DECIMAL => map_numeric(scale, precision),
        TINYINT | SMALLINT | INTEGER => "INTEGER".to_string(),
        BIGINT => "BIGINT".to_string(),
        FLOAT | DOUBLE | ORACLE_BINARY_DOUBLE => "DOUBLE".to_string(),
        REAL | ORACLE_BINARY_FLOAT => "REAL".to_string(),
        BIT | BOOLEAN => "BOOLEAN".to_string(),
        CHAR | VARCHAR | NCHAR | NVARCHAR => {
            if precision > 0 {
                format!("VARCHAR({})", precision)
            } else {
                "VARCHAR".to_string()
            }
        }
        LONGVARCHAR | LONGNVARCHAR | CLOB | NCLOB | SQLXML => "VARCHAR".to_string(),
        BINARY | VARBINARY | LONGVARBINARY | BLOB => "BLOB".to_string(),
        DATE | TIME | TIMESTAMP | TIME_WITH_TIMEZONE | TIMESTAMP_WITH_TIMEZONE
        | ORACLE_TIMESTAMPTZ | ORACLE_TIMESTAMPLTZ => "TIMESTAMP".to_string(),
        _ => "VARCHAR".to_string(),
    }
}

fn map_numeric(scale: i32, precision: i32) -> String {
    let unknown = scale == ORACLE_UNKNOWN_PRECISION || precision == ORACLE_UNKNOWN_PRECISION;
    let unbounded = precision <= 0 || precision > MAX_DECIMAL_PRECISION;
    if unknown || (scale <= 0 && unbounded) {
        return FLOATING_DECIMAL.to_string();
    }

    if scale == 0 && (1..=9).contains(&precision) {
        return "INTEGER".to_string();
    }

    if scale < 0 {
        // NUMBER(5,-2) stores multiples of 100: up to 7 integer digits.
        let digits = (precision - scale).min(MAX_DECIMAL_PRECISION);
        return format!("DECIMAL({},0)", digits);
    }

    if unbounded || scale > MAX_DECIMAL_PRECISION {
        return FLOATING_DECIMAL.to_string();
    }

    // DuckDB rejects scale > precision; NUMBER(2,5) widens to DECIMAL(5,5).
    format!("DECIMAL({},{})", precision.max(scale), scale)
}

/// Whether a type code denotes binary content read through the byte accessor.
pub fn is_binary(type_code: i32) -> bool {
    matches!(
        type_code,
        codes::BINARY | codes::VARBINARY | codes::LONGVARBINARY | codes::BLOB
    )
}

/// Whether a type code denotes character large-object content.
pub fn is_character_lob(type_code: i32) -> bool {
    matches!(
        type_code,
        codes::CLOB | codes::NCLOB | codes::LONGVARCHAR | codes::LONGNVARCHAR
    )
}

/// Whether a type code denotes a date, time or timestamp.
pub fn is_temporal(type_code: i32) -> bool {
    matches!(
        type_code,
        codes::DATE
            | codes::TIME
            | codes::TIMESTAMP
            | codes::TIME_WITH_TIMEZONE
            | codes::TIMESTAMP_WITH_TIMEZONE
            | codes::ORACLE_TIMESTAMPTZ
            | codes::ORACLE_TIMESTAMPLTZ
    )
}
