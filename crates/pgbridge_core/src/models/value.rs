//! Bound parameter and result cell values.
//!
//! `SqlValue` is what callers put into a `RowRecord` and what comes back in
//! result rows. Encoding looks at the parameter type the server reports, so an
//! `Int` can land in an `INT2` column and text can land in a `DATE` column.

use super::numeric;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use std::error::Error;
use std::fmt;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

/// A single row of query results.
pub type Row = Vec<SqlValue>;

/// A value that can be bound as a parameter or read from a result column.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// SQL NULL
    #[default]
    Null,
    /// BOOLEAN
    Bool(bool),
    /// SMALLINT / INTEGER / BIGINT / OID
    Int(i64),
    /// REAL / DOUBLE PRECISION
    Float(f64),
    /// NUMERIC / DECIMAL as decimal text
    Numeric(String),
    /// TEXT / VARCHAR / CHAR / NAME / enum labels
    Text(String),
    /// BYTEA
    Bytes(Vec<u8>),
    /// UUID
    Uuid(Uuid),
    /// JSON / JSONB
    Json(serde_json::Value),
    /// TIMESTAMP (without time zone)
    Timestamp(NaiveDateTime),
    /// TIMESTAMPTZ
    TimestampTz(DateTime<Utc>),
    /// DATE
    Date(NaiveDate),
    /// TIME
    Time(NaiveTime),
    /// One-dimensional array of any of the above
    Array(Vec<SqlValue>),
}

impl SqlValue {
    /// Check for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view of the value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point view of integer, float and numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Numeric(v) => v.parse().ok(),
            _ => None,
        }
    }

    /// String view of text and numeric values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) | Self::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Numeric(_) => "numeric",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Json(_) => "json",
            Self::Timestamp(_) => "timestamp",
            Self::TimestampTz(_) => "timestamptz",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Array(_) => "array",
        }
    }

    /// Convert to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as JsonValue;

        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::Number((*v).into()),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Json(v) => v.clone(),
            Self::TimestampTz(v) => JsonValue::String(v.to_rfc3339()),
            Self::Array(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            other => JsonValue::String(other.to_string()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Numeric(v) | Self::Text(v) => f.write_str(v),
            Self::Bytes(v) => {
                f.write_str("\\x")?;
                v.iter().try_for_each(|b| write!(f, "{b:02x}"))
            }
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{v}"),
            Self::TimestampTz(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{v}"),
            Self::Time(v) => write!(f, "{v}"),
            Self::Array(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// ========== Conversions into SqlValue ==========

macro_rules! impl_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    serde_json::Value => Json,
    NaiveDateTime => Timestamp,
    DateTime<Utc> => TimestampTz,
    NaiveDate => Date,
    NaiveTime => Time,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

macro_rules! impl_from_vec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for SqlValue {
                fn from(v: Vec<$ty>) -> Self {
                    Self::Array(v.into_iter().map(Into::into).collect())
                }
            }
        )*
    };
}

impl_from_vec!(bool, i16, i32, i64, f64, String, &str, Uuid, SqlValue);

// ========== Parameter encoding ==========

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if let Kind::Domain(inner) = ty.kind() {
            return self.to_sql(inner, out);
        }

        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Array(items) => match ty.kind() {
                Kind::Array(_) => items.to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Self::Text(s) => encode_text(s, ty, out),
            _ if is_text_type(ty) => self.to_string().to_sql(ty, out),
            Self::Bool(v) if *ty == Type::BOOL => v.to_sql(ty, out),
            Self::Int(v) => encode_int(*v, ty, out).map_err(|e| e.unwrap_or_else(|| mismatch(self, ty))),
            Self::Float(v) => encode_float(*v, ty, out).map_err(|e| e.unwrap_or_else(|| mismatch(self, ty))),
            Self::Numeric(s) => match *ty {
                Type::NUMERIC => {
                    numeric::encode(s, out)?;
                    Ok(IsNull::No)
                }
                _ => encode_text(s, ty, out),
            },
            Self::Bytes(v) if *ty == Type::BYTEA => v.to_sql(ty, out),
            Self::Uuid(v) if *ty == Type::UUID => v.to_sql(ty, out),
            Self::Json(v) if matches!(*ty, Type::JSON | Type::JSONB) => v.to_sql(ty, out),
            Self::Timestamp(v) => match *ty {
                Type::TIMESTAMP => v.to_sql(ty, out),
                Type::TIMESTAMPTZ => Utc.from_utc_datetime(v).to_sql(ty, out),
                Type::DATE => v.date().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Self::TimestampTz(v) => match *ty {
                Type::TIMESTAMPTZ => v.to_sql(ty, out),
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                Type::DATE => v.date_naive().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Self::Date(v) => match *ty {
                Type::DATE => v.to_sql(ty, out),
                Type::TIMESTAMP | Type::TIMESTAMPTZ => {
                    let midnight = v.and_hms_opt(0, 0, 0).ok_or("invalid date")?;
                    Self::Timestamp(midnight).to_sql(ty, out)
                }
                _ => Err(mismatch(self, ty)),
            },
            Self::Time(v) if *ty == Type::TIME => v.to_sql(ty, out),
            _ => Err(mismatch(self, ty)),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn is_text_type(ty: &Type) -> bool {
    <&str as ToSql>::accepts(ty)
}

fn mismatch(value: &SqlValue, ty: &Type) -> BoxError {
    format!("cannot bind a {} value to a parameter of type {}", value.kind_name(), ty.name()).into()
}

/// `Err(None)` means the target type is not numeric at all.
fn encode_int(v: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Option<BoxError>> {
    let out_of_range =
        || -> Option<BoxError> { Some(format!("value {v} out of range for type {}", ty.name()).into()) };
    match *ty {
        Type::INT2 => i16::try_from(v).map_err(|_| out_of_range())?.to_sql(ty, out).map_err(Some),
        Type::INT4 => i32::try_from(v).map_err(|_| out_of_range())?.to_sql(ty, out).map_err(Some),
        Type::INT8 => v.to_sql(ty, out).map_err(Some),
        Type::OID => u32::try_from(v).map_err(|_| out_of_range())?.to_sql(ty, out).map_err(Some),
        Type::FLOAT4 => (v as f32).to_sql(ty, out).map_err(Some),
        Type::FLOAT8 => (v as f64).to_sql(ty, out).map_err(Some),
        Type::NUMERIC => {
            numeric::encode(&v.to_string(), out).map_err(Some)?;
            Ok(IsNull::No)
        }
        _ => Err(None),
    }
}

fn encode_float(v: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Option<BoxError>> {
    match *ty {
        Type::FLOAT4 => (v as f32).to_sql(ty, out).map_err(Some),
        Type::FLOAT8 => v.to_sql(ty, out).map_err(Some),
        Type::NUMERIC => {
            numeric::encode(&v.to_string(), out).map_err(Some)?;
            Ok(IsNull::No)
        }
        Type::INT2 | Type::INT4 | Type::INT8 if v.fract() == 0.0 && v.is_finite() => {
            encode_int(v as i64, ty, out)
        }
        Type::INT2 | Type::INT4 | Type::INT8 => {
            Err(Some(format!("value {v} is not an integer").into()))
        }
        _ => Err(None),
    }
}

/// Text goes verbatim into text-like columns and is parsed for typed ones.
fn encode_text(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if is_text_type(ty) {
        return s.to_sql(ty, out);
    }
    if let Kind::Enum(_) = ty.kind() {
        out.extend_from_slice(s.as_bytes());
        return Ok(IsNull::No);
    }

    let trimmed = s.trim();
    match *ty {
        Type::BOOL => parse_bool(trimmed)?.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            let v: i64 = trimmed.parse()?;
            encode_int(v, ty, out).map_err(|e| e.unwrap_or_else(|| mismatch(&SqlValue::Int(v), ty)))
        }
        Type::FLOAT4 => trimmed.parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => trimmed.parse::<f64>()?.to_sql(ty, out),
        Type::NUMERIC => {
            numeric::encode(trimmed, out)?;
            Ok(IsNull::No)
        }
        Type::UUID => Uuid::parse_str(trimmed)?.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIME => parse_time(trimmed)?.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(trimmed)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => parse_timestamptz(trimmed)?.to_sql(ty, out),
        Type::BYTEA => s.as_bytes().to_sql(ty, out),
        _ => Err(format!("cannot bind a text value to a parameter of type {}", ty.name()).into()),
    }
}

fn parse_bool(s: &str) -> Result<bool, BoxError> {
    match s.to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("invalid boolean '{s}'").into()),
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, BoxError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(Into::into)
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxError> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    for format in FORMATS {
        if let Ok(v) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(v);
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
    date.and_hms_opt(0, 0, 0).ok_or_else(|| format!("invalid timestamp '{s}'").into())
}

fn parse_timestamptz(s: &str) -> Result<DateTime<Utc>, BoxError> {
    if let Ok(v) = DateTime::parse_from_rfc3339(s) {
        return Ok(v.with_timezone(&Utc));
    }
    if let Ok(v) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(v.with_timezone(&Utc));
    }
    // No offset given: read as UTC.
    Ok(Utc.from_utc_datetime(&parse_timestamp(s)?))
}

// ========== Result decoding ==========

impl<'a> FromSql<'a> for SqlValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        match ty.kind() {
            Kind::Domain(inner) => return Self::from_sql(inner, raw),
            Kind::Array(_) => return Ok(Self::Array(Vec::<SqlValue>::from_sql(ty, raw)?)),
            Kind::Enum(_) => return Ok(Self::Text(std::str::from_utf8(raw)?.to_string())),
            _ => {}
        }

        let value = match *ty {
            Type::BOOL => Self::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Self::Int(i16::from_sql(ty, raw)? as i64),
            Type::INT4 => Self::Int(i32::from_sql(ty, raw)? as i64),
            Type::INT8 => Self::Int(i64::from_sql(ty, raw)?),
            Type::OID => Self::Int(u32::from_sql(ty, raw)? as i64),
            Type::FLOAT4 => Self::Float(f32::from_sql(ty, raw)? as f64),
            Type::FLOAT8 => Self::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => Self::Numeric(numeric::decode(raw)?),
            Type::BYTEA => Self::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::UUID => Self::Uuid(Uuid::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => Self::Json(serde_json::Value::from_sql(ty, raw)?),
            Type::TIMESTAMP => Self::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Self::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::DATE => Self::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => Self::Time(NaiveTime::from_sql(ty, raw)?),
            _ if <&str as FromSql>::accepts(ty) => Self::Text(String::from_sql(ty, raw)?),
            _ => {
                return Err(format!(
                    "unsupported column type '{}'; cast it to text in the query",
                    ty.name()
                )
                .into())
            }
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Self::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &SqlValue, ty: &Type) -> Result<Vec<u8>, BoxError> {
        let mut out = BytesMut::new();
        match value.to_sql(ty, &mut out)? {
            IsNull::Yes => Ok(Vec::new()),
            IsNull::No => Ok(out.to_vec()),
        }
    }

    #[test]
    fn test_int_narrows_to_column_width() {
        assert_eq!(encode(&SqlValue::Int(7), &Type::INT4).unwrap(), vec![0, 0, 0, 7]);
        assert_eq!(encode(&SqlValue::Int(7), &Type::INT2).unwrap(), vec![0, 7]);
        assert_eq!(encode(&SqlValue::Int(7), &Type::INT8).unwrap().len(), 8);
    }

    #[test]
    fn test_int_out_of_range() {
        let err = encode(&SqlValue::Int(70_000), &Type::INT2).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_float_into_numeric_column() {
        let bytes = encode(&SqlValue::Float(999.99), &Type::NUMERIC).unwrap();
        assert_eq!(numeric::decode(&bytes).unwrap(), "999.99");
    }

    #[test]
    fn test_integral_float_into_int_column() {
        assert_eq!(encode(&SqlValue::Float(3.0), &Type::INT4).unwrap(), vec![0, 0, 0, 3]);
        assert!(encode(&SqlValue::Float(3.5), &Type::INT4).is_err());
    }

    #[test]
    fn test_text_is_parsed_for_typed_columns() {
        assert_eq!(encode(&"42".into(), &Type::INT4).unwrap(), vec![0, 0, 0, 42]);
        assert_eq!(encode(&"true".into(), &Type::BOOL).unwrap(), vec![1]);
        assert_eq!(encode(&"2024-01-02".into(), &Type::DATE).unwrap().len(), 4);
        assert_eq!(encode(&"2024-01-02 03:04:05".into(), &Type::TIMESTAMP).unwrap().len(), 8);
        assert_eq!(encode(&"2024-01-02T03:04:05+02:00".into(), &Type::TIMESTAMPTZ).unwrap().len(), 8);
        assert!(encode(&"not a number".into(), &Type::INT4).is_err());
    }

    #[test]
    fn test_text_column_takes_display_form() {
        assert_eq!(encode(&SqlValue::Int(5), &Type::TEXT).unwrap(), b"5".to_vec());
        assert_eq!(encode(&"abc".into(), &Type::VARCHAR).unwrap(), b"abc".to_vec());
    }

    #[test]
    fn test_null_binds_to_any_type() {
        let mut out = BytesMut::new();
        assert!(matches!(SqlValue::Null.to_sql(&Type::INT4, &mut out).unwrap(), IsNull::Yes));
        assert!(out.is_empty());
    }

    #[test]
    fn test_mismatch_reports_types() {
        let err = encode(&SqlValue::Bool(true), &Type::INT4).unwrap_err();
        assert_eq!(err.to_string(), "cannot bind a bool value to a parameter of type int4");
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(SqlValue::from_sql(&Type::INT4, &[0, 0, 1, 0]).unwrap(), SqlValue::Int(256));
        assert_eq!(SqlValue::from_sql(&Type::TEXT, b"hi").unwrap(), SqlValue::Text("hi".into()));
        assert_eq!(SqlValue::from_sql(&Type::BOOL, &[0]).unwrap(), SqlValue::Bool(false));
        assert_eq!(SqlValue::from_sql_null(&Type::INT4).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_decode_numeric() {
        let mut out = BytesMut::new();
        numeric::encode("12.50", &mut out).unwrap();
        assert_eq!(
            SqlValue::from_sql(&Type::NUMERIC, &out).unwrap(),
            SqlValue::Numeric("12.50".into())
        );
    }

    #[test]
    fn test_decode_unsupported_type() {
        let err = SqlValue::from_sql(&Type::INTERVAL, &[0; 16]).unwrap_err();
        assert!(err.to_string().contains("cast it to text"));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(SqlValue::from(5i32), SqlValue::Int(5));
        assert_eq!(SqlValue::from(None::<i32>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
        assert_eq!(SqlValue::from(vec![1i32, 2]), SqlValue::Array(vec![1.into(), 2.into()]));
        assert_eq!(SqlValue::from(vec![1u8, 2]), SqlValue::Bytes(vec![1, 2]));
    }

    #[test]
    fn test_display_and_json() {
        assert_eq!(SqlValue::Null.to_string(), "NULL");
        assert_eq!(SqlValue::Bytes(vec![0xde, 0xad]).to_string(), "\\xdead");
        assert_eq!(SqlValue::Array(vec![1.into(), SqlValue::Null]).to_string(), "{1,NULL}");
        assert_eq!(SqlValue::Numeric("1.50".into()).to_json(), serde_json::json!("1.50"));
        assert_eq!(SqlValue::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(serde_json::to_string(&SqlValue::Int(3)).unwrap(), "3");
    }
}
