use crate::{ArcStr, StayId};
use serde::{de, Deserialize, Deserializer};
use std::{error::Error as StdError, fmt, fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// Values that pandas would have read as a missing value.
fn is_missing(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("nan")
}

/// Parse a string, but map "null" and "nan" to `None` (in addition to the default "" -> None
/// mapping)
pub fn optional_string<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    if is_missing(&s) {
        Ok(None)
    } else {
        Ok(Some(s.into()))
    }
}

/// Parse a stay identifier.
///
/// Pandas writes integer columns containing missing values as floats, so `30000001.0` is
/// accepted as long as there is no fractional part.
pub fn optional_stay_id<'de, D>(d: D) -> Result<Option<StayId>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    if is_missing(&s) {
        return Ok(None);
    }
    parse_integral(&s)
        .and_then(|v| StayId::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("invalid stay id {:?}", s)))
}

/// Parse an integer, also accepting floats with no fractional part.
pub fn parse_integral(s: &str) -> Option<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let v = s.parse::<f64>().ok()?;
    if !v.is_finite() || v != v.trunc() || v.abs() > i64::MAX as f64 {
        return None;
    }
    Some(v as i64)
}

/// Parse an integer, truncating floats towards zero (`1.5` -> `1`).
pub fn parse_truncating(s: &str) -> Option<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let v = s.parse::<f64>().ok()?.trunc();
    if !v.is_finite() || v.abs() > i64::MAX as f64 {
        return None;
    }
    Some(v as i64)
}

/// A table did not contain the columns we need from it.
///
/// This is always fatal: nothing is written when a source fails this check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingColumns {
    pub source: ArcStr,
    pub missing: Vec<ArcStr>,
}

impl fmt::Display for MissingColumns {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is missing required column(s): ", self.source)?;
        let mut cols = self.missing.iter();
        if let Some(col) = cols.next() {
            write!(f, "{}", col)?;
        }
        for col in cols {
            write!(f, ", {}", col)?;
        }
        Ok(())
    }
}

impl StdError for MissingColumns {}

/// Check that every column in `required` is present in `headers`.
pub fn check_columns(
    headers: &csv::StringRecord,
    source: &str,
    required: &[&str],
) -> Result<(), MissingColumns> {
    let missing: Vec<ArcStr> = required
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| ArcStr::from(*col))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingColumns {
            source: source.into(),
            missing,
        })
    }
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}
