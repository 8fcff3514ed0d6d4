//! SQL values and typed coercion.
//!
//! [`SqlValue`] is the dynamic value exchanged with a
//! [`QueryExecutor`](crate::executor::QueryExecutor). Record fields are
//! converted to it with [`ToSqlValue`] and assigned back from result
//! columns with [`FromSqlValue`]. Conversions are lenient in the way stored
//! data usually needs: numbers parse from text, booleans accept `0`/`1`
//! and `y`/`n`, and timestamps accept several text layouts.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::LogicalType;

/// Text layout used when a timestamp is rendered as a string.
///
/// Fractional seconds are written only when present.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Layouts accepted when a timestamp is parsed from text, tried in order.
const TIMESTAMP_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Timestamp without time zone, interpreted as UTC.
    Timestamp(NaiveDateTime),
    /// Binary blob value.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns a short name for the kind of value, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Blob(_) => "blob",
        }
    }

    /// Returns `true` for [`SqlValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Errors raised when a stored value cannot be assigned to a field type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoerceError {
    /// NULL was read into a field that is not an `Option`.
    #[error("Unexpected NULL for non-optional {target}")]
    Null {
        /// Target Rust type.
        target: &'static str,
    },

    /// The value kind has no conversion to the target type.
    #[error("Cannot convert {found} to {target}")]
    Incompatible {
        /// Kind of the stored value.
        found: &'static str,
        /// Target Rust type.
        target: &'static str,
    },

    /// The value does not fit in the target type.
    #[error("Value {value} is out of range for {target}")]
    OutOfRange {
        /// The offending value, rendered as text.
        value: String,
        /// Target Rust type.
        target: &'static str,
    },

    /// Text could not be parsed as the target type.
    #[error("Cannot parse '{text}' as {target}")]
    Unparseable {
        /// The offending text.
        text: String,
        /// Target Rust type.
        target: &'static str,
    },
}

/// Trait for field types that can be written to the database.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(&self) -> SqlValue;
}

/// Trait for field types that can be assigned from a stored value.
pub trait FromSqlValue: Sized {
    /// Converts a stored value into `Self`.
    ///
    /// # Errors
    ///
    /// Returns a [`CoerceError`] when the value is NULL for a non-optional
    /// type, out of range, unparseable, or of an unrelated kind.
    fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError>;
}

/// A Rust type usable as a mapped record field.
///
/// The associated [`LogicalType`] drives the column type each dialect
/// renders for the field.
pub trait FieldType: ToSqlValue + FromSqlValue {
    /// Logical column type of this Rust type.
    const LOGICAL_TYPE: LogicalType;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(&self) -> SqlValue {
        self.clone()
    }
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError> {
        Ok(value)
    }
}

/// Parses a timestamp from any of the accepted text layouts.
///
/// RFC 3339 strings are converted to UTC; a bare date maps to midnight.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for layout in TIMESTAMP_LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "" => Some(false),
        _ => None,
    }
}

fn blob_to_text(bytes: Vec<u8>, target: &'static str) -> Result<String, CoerceError> {
    String::from_utf8(bytes).map_err(|_| CoerceError::Incompatible {
        found: "blob",
        target,
    })
}

/// Widens any integer-like value to `i128` so every target width can be
/// range-checked with one `try_from`.
fn integer_of(value: SqlValue, target: &'static str) -> Result<i128, CoerceError> {
    match value {
        SqlValue::Null => Err(CoerceError::Null { target }),
        SqlValue::Int(i) => Ok(i128::from(i)),
        SqlValue::Bool(b) => Ok(i128::from(b)),
        #[allow(clippy::cast_possible_truncation)]
        SqlValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(f as i128),
        SqlValue::Float(f) => Err(CoerceError::OutOfRange {
            value: f.to_string(),
            target,
        }),
        SqlValue::Text(s) => s.trim().parse::<i128>().map_err(|_| CoerceError::Unparseable {
            text: s.clone(),
            target,
        }),
        SqlValue::Blob(bytes) => {
            let text = blob_to_text(bytes, target)?;
            text.trim()
                .parse::<i128>()
                .map_err(|_| CoerceError::Unparseable { text, target })
        }
        other @ SqlValue::Timestamp(_) => Err(CoerceError::Incompatible {
            found: other.kind(),
            target,
        }),
    }
}

macro_rules! impl_integer {
    ($($ty:ty => $logical:ident),+ $(,)?) => {
        $(
            impl FromSqlValue for $ty {
                fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError> {
                    let wide = integer_of(value, stringify!($ty))?;
                    <$ty>::try_from(wide).map_err(|_| CoerceError::OutOfRange {
                        value: wide.to_string(),
                        target: stringify!($ty),
                    })
                }
            }

            impl FieldType for $ty {
                const LOGICAL_TYPE: LogicalType = LogicalType::$logical;
            }
        )+
    };
}

impl_integer!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
);

macro_rules! impl_to_sql_lossless_int {
    ($($ty:ty),+) => {
        $(
            impl ToSqlValue for $ty {
                fn to_sql_value(&self) -> SqlValue {
                    SqlValue::Int(i64::from(*self))
                }
            }
        )+
    };
}

impl_to_sql_lossless_int!(i8, i16, i32, i64, u8, u16, u32);

impl ToSqlValue for u64 {
    fn to_sql_value(&self) -> SqlValue {
        // Values past i64::MAX travel as text and parse back on read.
        i64::try_from(*self).map_or_else(|_| SqlValue::Text(self.to_string()), SqlValue::Int)
    }
}

fn float_of(value: SqlValue, target: &'static str) -> Result<f64, CoerceError> {
    match value {
        SqlValue::Null => Err(CoerceError::Null { target }),
        SqlValue::Float(f) => Ok(f),
        #[allow(clippy::cast_precision_loss)]
        SqlValue::Int(i) => Ok(i as f64),
        SqlValue::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        SqlValue::Text(s) => s.trim().parse::<f64>().map_err(|_| CoerceError::Unparseable {
            text: s.clone(),
            target,
        }),
        other => Err(CoerceError::Incompatible {
            found: other.kind(),
            target,
        }),
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError> {
        float_of(value, "f64")
    }
}

impl FromSqlValue for f32 {
    fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError> {
        #[allow(clippy::cast_possible_truncation)]
        float_of(value, "f32").map(|f| f as Self)
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Float(*self)
    }
}

impl ToSqlValue for f32 {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Float(f64::from(*self))
    }
}

impl FieldType for f64 {
    const LOGICAL_TYPE: LogicalType = LogicalType::Float64;
}

impl FieldType for f32 {
    const LOGICAL_TYPE: LogicalType = LogicalType::Float32;
}

impl FromSqlValue for bool {
    fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError> {
        match value {
            SqlValue::Null => Err(CoerceError::Null { target: "bool" }),
            SqlValue::Bool(b) => Ok(b),
            SqlValue::Int(i) => Ok(i != 0),
            SqlValue::Float(f) => Ok(f != 0.0),
            SqlValue::Text(s) => parse_bool(&s).ok_or(CoerceError::Unparseable {
                text: s,
                target: "bool",
            }),
            other => Err(CoerceError::Incompatible {
                found: other.kind(),
                target: "bool",
            }),
        }
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Bool(*self)
    }
}

impl FieldType for bool {
    const LOGICAL_TYPE: LogicalType = LogicalType::Bool;
}

impl FromSqlValue for String {
    fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError> {
        match value {
            SqlValue::Null => Err(CoerceError::Null { target: "String" }),
            SqlValue::Text(s) => Ok(s),
            SqlValue::Int(i) => Ok(i.to_string()),
            SqlValue::Float(f) => Ok(f.to_string()),
            SqlValue::Bool(b) => Ok(b.to_string()),
            SqlValue::Timestamp(ts) => Ok(ts.format(TIMESTAMP_FORMAT).to_string()),
            SqlValue::Blob(bytes) => blob_to_text(bytes, "String"),
        }
    }
}

impl ToSqlValue for String {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Text((*self).to_string())
    }
}

impl FieldType for String {
    const LOGICAL_TYPE: LogicalType = LogicalType::Text;
}

impl FromSqlValue for NaiveDateTime {
    fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError> {
        const TARGET: &str = "NaiveDateTime";
        match value {
            SqlValue::Null => Err(CoerceError::Null { target: TARGET }),
            SqlValue::Timestamp(ts) => Ok(ts),
            SqlValue::Text(s) => parse_timestamp(&s).ok_or(CoerceError::Unparseable {
                text: s,
                target: TARGET,
            }),
            SqlValue::Int(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or(CoerceError::OutOfRange {
                    value: secs.to_string(),
                    target: TARGET,
                }),
            other => Err(CoerceError::Incompatible {
                found: other.kind(),
                target: TARGET,
            }),
        }
    }
}

impl ToSqlValue for NaiveDateTime {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Timestamp(*self)
    }
}

impl FieldType for NaiveDateTime {
    const LOGICAL_TYPE: LogicalType = LogicalType::Timestamp;
}

impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError> {
        NaiveDateTime::from_sql_value(value).map(|ts| ts.and_utc())
    }
}

impl ToSqlValue for DateTime<Utc> {
    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Timestamp(self.naive_utc())
    }
}

impl FieldType for DateTime<Utc> {
    const LOGICAL_TYPE: LogicalType = LogicalType::Timestamp;
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: SqlValue) -> Result<Self, CoerceError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_sql_value(value).map(Some)
        }
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(&self) -> SqlValue {
        self.as_ref().map_or(SqlValue::Null, ToSqlValue::to_sql_value)
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const LOGICAL_TYPE: LogicalType = T::LOGICAL_TYPE;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn integers_range_check() {
        assert_eq!(u8::from_sql_value(SqlValue::Int(255)), Ok(255));
        assert!(matches!(
            u8::from_sql_value(SqlValue::Int(256)),
            Err(CoerceError::OutOfRange { .. })
        ));
        assert!(matches!(
            u32::from_sql_value(SqlValue::Int(-1)),
            Err(CoerceError::OutOfRange { .. })
        ));
        assert_eq!(i16::from_sql_value(SqlValue::Text(" -42 ".into())), Ok(-42));
        assert_eq!(i64::from_sql_value(SqlValue::Float(7.0)), Ok(7));
    }

    #[test]
    fn large_u64_survives_as_text() {
        let big = u64::MAX;
        let stored = big.to_sql_value();
        assert_eq!(stored, SqlValue::Text(big.to_string()));
        assert_eq!(u64::from_sql_value(stored), Ok(big));
    }

    #[test]
    fn null_requires_option() {
        assert_eq!(
            String::from_sql_value(SqlValue::Null),
            Err(CoerceError::Null { target: "String" })
        );
        assert_eq!(Option::<String>::from_sql_value(SqlValue::Null), Ok(None));
        assert_eq!(None::<i32>.to_sql_value(), SqlValue::Null);
        assert_eq!(Some(3_i32).to_sql_value(), SqlValue::Int(3));
    }

    #[test]
    fn booleans_accept_stored_forms() {
        assert_eq!(bool::from_sql_value(SqlValue::Int(1)), Ok(true));
        assert_eq!(bool::from_sql_value(SqlValue::Int(0)), Ok(false));
        assert_eq!(bool::from_sql_value(SqlValue::Text("y".into())), Ok(true));
        assert_eq!(bool::from_sql_value(SqlValue::Text("FALSE".into())), Ok(false));
        assert!(bool::from_sql_value(SqlValue::Text("maybe".into())).is_err());
    }

    #[test]
    fn timestamps_parse_several_layouts() {
        let expected = ts("2017-03-04 05:06:07");
        for text in [
            "2017-03-04 05:06:07",
            "2017-03-04T05:06:07",
            "2017-03-04T05:06:07Z",
            "2017-03-04T07:06:07+02:00",
            "2017-03-04 05:06:07.000",
        ] {
            assert_eq!(parse_timestamp(text), Some(expected), "{text}");
        }
        assert_eq!(parse_timestamp("2017-03-04"), Some(ts("2017-03-04 00:00:00")));
        assert_eq!(parse_timestamp("2017-03-04 05:06"), Some(ts("2017-03-04 05:06:00")));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn timestamp_from_unix_seconds() {
        let value = NaiveDateTime::from_sql_value(SqlValue::Int(0)).unwrap();
        assert_eq!(value, ts("1970-01-01 00:00:00"));
    }

    #[test]
    fn strings_from_other_kinds() {
        assert_eq!(String::from_sql_value(SqlValue::Int(12)).unwrap(), "12");
        assert_eq!(
            String::from_sql_value(SqlValue::Blob(b"abc".to_vec())).unwrap(),
            "abc"
        );
        assert_eq!(
            String::from_sql_value(SqlValue::Timestamp(ts("2020-01-02 03:04:05"))).unwrap(),
            "2020-01-02 03:04:05"
        );
    }

    #[test]
    fn logical_types_follow_rust_types() {
        assert_eq!(<u32 as FieldType>::LOGICAL_TYPE, LogicalType::UInt32);
        assert_eq!(<Option<f32> as FieldType>::LOGICAL_TYPE, LogicalType::Float32);
        assert_eq!(
            <DateTime<Utc> as FieldType>::LOGICAL_TYPE,
            LogicalType::Timestamp
        );
    }
}
