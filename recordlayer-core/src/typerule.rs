//! Type tags and the conformance check behind schema validation.
//!
//! [`conforms`] is a pure function from a value and a [`TypeTag`] to a verdict.
//! It never fails: a value either satisfies the tag or it does not.
//!
//! Date checking is intentionally lenient. A string counts as a date whenever
//! one of several common layouts parses it, including a bare year such as
//! `"2024"`. Numbers never count as dates, even when they look like epochs.

use std::{fmt, str::FromStr, sync::OnceLock};

use bson::{Bson, Decimal128};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;
use url::Url;

use crate::error::RecordStoreError;

/// The closed set of types a schema field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    String,
    Text,
    Char,
    Number,
    Integer,
    Float,
    BigInt,
    Boolean,
    Date,
    Array,
    Object,
    Json,
    Blob,
    Uuid,
    Email,
    Url,
    Any,
}

impl TypeTag {
    /// Every tag, in declaration order.
    pub const ALL: [TypeTag; 17] = [
        TypeTag::String,
        TypeTag::Text,
        TypeTag::Char,
        TypeTag::Number,
        TypeTag::Integer,
        TypeTag::Float,
        TypeTag::BigInt,
        TypeTag::Boolean,
        TypeTag::Date,
        TypeTag::Array,
        TypeTag::Object,
        TypeTag::Json,
        TypeTag::Blob,
        TypeTag::Uuid,
        TypeTag::Email,
        TypeTag::Url,
        TypeTag::Any,
    ];

    /// Returns the lowercase name used in configuration and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Text => "text",
            TypeTag::Char => "char",
            TypeTag::Number => "number",
            TypeTag::Integer => "integer",
            TypeTag::Float => "float",
            TypeTag::BigInt => "bigint",
            TypeTag::Boolean => "boolean",
            TypeTag::Date => "date",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
            TypeTag::Json => "json",
            TypeTag::Blob => "blob",
            TypeTag::Uuid => "uuid",
            TypeTag::Email => "email",
            TypeTag::Url => "url",
            TypeTag::Any => "any",
        }
    }

    /// Looks a tag up by name, case-insensitively.
    pub fn parse(name: &str) -> Option<TypeTag> {
        TypeTag::ALL
            .into_iter()
            .find(|tag| tag.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Returns `true` if `value` satisfies this tag. See [`conforms`].
    pub fn accepts(&self, value: &Bson) -> bool {
        conforms(value, *self)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = RecordStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeTag::parse(s)
            .ok_or_else(|| RecordStoreError::Configuration(format!("unknown type tag: {s}")))
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    /// Unknown names deserialize to [`TypeTag::Any`], which accepts every value.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;

        Ok(TypeTag::parse(&name).unwrap_or_else(|| {
            warn!(type_tag = %name, "unknown type tag, accepting any value");
            TypeTag::Any
        }))
    }
}

/// Decides whether `value` conforms to `tag`.
///
/// | tag | accepted values |
/// |-----|-----------------|
/// | `string`, `text`, `char` | strings |
/// | `number`, `float` | 32/64-bit integers and non-NaN doubles |
/// | `integer` | 32/64-bit integers and finite doubles without a fractional part |
/// | `bigint` | 64-bit integers and integral 128-bit decimals (not 32-bit integers) |
/// | `boolean` | booleans |
/// | `array` | arrays |
/// | `object`, `json` | embedded documents |
/// | `date` | BSON datetimes and timestamps, and strings that parse as a date |
/// | `blob` | binary buffers |
/// | `uuid` | strings in canonical 8-4-4-4-12 hex form |
/// | `email` | strings shaped like `local@domain.tld` |
/// | `url` | strings accepted by the URL parser |
/// | `any` | everything |
pub fn conforms(value: &Bson, tag: TypeTag) -> bool {
    match tag {
        TypeTag::String | TypeTag::Text | TypeTag::Char => matches!(value, Bson::String(_)),
        TypeTag::Number | TypeTag::Float => match value {
            Bson::Int32(_) | Bson::Int64(_) => true,
            Bson::Double(number) => !number.is_nan(),
            _ => false,
        },
        TypeTag::Integer => match value {
            Bson::Int32(_) | Bson::Int64(_) => true,
            Bson::Double(number) => number.is_finite() && number.fract() == 0.0,
            _ => false,
        },
        TypeTag::BigInt => match value {
            Bson::Int64(_) => true,
            Bson::Decimal128(decimal) => decimal_is_integral(decimal),
            _ => false,
        },
        TypeTag::Boolean => matches!(value, Bson::Boolean(_)),
        TypeTag::Array => matches!(value, Bson::Array(_)),
        TypeTag::Object | TypeTag::Json => matches!(value, Bson::Document(_)),
        TypeTag::Date => match value {
            Bson::DateTime(_) | Bson::Timestamp(_) => true,
            Bson::String(text) => parses_as_date(text),
            _ => false,
        },
        TypeTag::Blob => matches!(value, Bson::Binary(_)),
        TypeTag::Uuid => matches!(value, Bson::String(text) if uuid_pattern().is_match(text)),
        TypeTag::Email => matches!(value, Bson::String(text) if email_pattern().is_match(text)),
        TypeTag::Url => matches!(value, Bson::String(text) if Url::parse(text).is_ok()),
        TypeTag::Any => true,
    }
}

const DATE_LAYOUTS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

const DATETIME_LAYOUTS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn parses_as_date(text: &str) -> bool {
    let text = text.trim();

    if text.is_empty() {
        return false;
    }

    if DateTime::parse_from_rfc3339(text).is_ok() || DateTime::parse_from_rfc2822(text).is_ok() {
        return true;
    }

    if DATE_LAYOUTS
        .iter()
        .any(|layout| NaiveDate::parse_from_str(text, layout).is_ok())
    {
        return true;
    }

    if DATETIME_LAYOUTS
        .iter()
        .any(|layout| NaiveDateTime::parse_from_str(text, layout).is_ok())
    {
        return true;
    }

    // "YYYY" and "YYYY-MM"
    match partial_date_pattern().captures(text) {
        Some(captures) => captures
            .get(2)
            .map(|month| matches!(month.as_str().parse::<u32>(), Ok(1..=12)))
            .unwrap_or(true),
        None => false,
    }
}

const DECIMAL128_EXPONENT_BIAS: i32 = 6176;

/// Whether a BID-encoded decimal is finite and has no fractional part.
fn decimal_is_integral(decimal: &Decimal128) -> bool {
    let bits = u128::from_le_bytes(decimal.bytes());

    let (biased, coefficient) = if (bits >> 125) & 0b11 == 0b11 {
        if (bits >> 123) & 0b11 == 0b11 {
            // NaN or infinity
            return false;
        }
        // Coefficients in this form exceed 34 digits and read as zero.
        ((bits >> 111) & 0x3FFF, 0)
    } else {
        ((bits >> 113) & 0x3FFF, bits & ((1 << 113) - 1))
    };

    let exponent = biased as i32 - DECIMAL128_EXPONENT_BIAS;
    if exponent >= 0 || coefficient == 0 {
        return true;
    }

    10u128
        .checked_pow(exponent.unsigned_abs())
        .is_some_and(|scale| coefficient % scale == 0)
}

fn uuid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
            .expect("uuid pattern is valid")
    })
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
    })
}

fn partial_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4})(?:-(\d{2}))?$").expect("partial date pattern is valid")
    })
}
