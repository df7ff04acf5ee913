//! Filter evaluation for in-memory record matching.
//!
//! A filter is a document of field/value pairs. A record matches when every
//! pair matches: nested documents are matched recursively, with the filter's
//! nested document acting as a filter on the record's nested document, and
//! everything else is compared for strict equality.

use bson::{Bson, Document};

/// Equality view of a BSON value.
///
/// Integers and doubles are compared by numeric value, so a filter written
/// with `1` matches a stored `1.0`. Everything else falls back to BSON
/// equality, under which `Null` only equals `Null` and `NaN` equals nothing.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Int(i64),
    Float(f64),
    Value(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Int32(value) => Comparable::Int(*value as i64),
            Bson::Int64(value) => Comparable::Int(*value),
            Bson::Double(value) => Comparable::Float(*value),
            other => Comparable::Value(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Int(a), Comparable::Int(b)) => a == b,
            (Comparable::Float(a), Comparable::Float(b)) => a == b,
            (Comparable::Int(a), Comparable::Float(b))
            | (Comparable::Float(b), Comparable::Int(a)) => *a as f64 == *b,
            (Comparable::Value(a), Comparable::Value(b)) => a == b,
            _ => false,
        }
    }
}

/// Returns `true` if `record` satisfies every constraint in `filter`.
///
/// An empty filter matches every record. A filter field that is absent from
/// the record never matches, not even against `Null`.
pub fn matches(record: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| match record.get(field) {
            Some(actual) => value_matches(actual, expected),
            None => false,
        })
}

/// Matches a stored value against a filter value.
///
/// Two documents recurse through [`matches`]. Two arrays are matched
/// position by position: each filter element must match the stored element
/// at the same index, and stored elements past the end of the filter are
/// ignored.
fn value_matches(actual: &Bson, expected: &Bson) -> bool {
    match (actual, expected) {
        (Bson::Document(actual), Bson::Document(expected)) => matches(actual, expected),
        (Bson::Array(actual), Bson::Array(expected)) => {
            expected.len() <= actual.len()
                && actual
                    .iter()
                    .zip(expected)
                    .all(|(actual, expected)| value_matches(actual, expected))
        }
        _ => Comparable::from(actual) == Comparable::from(expected),
    }
}
