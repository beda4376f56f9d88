//! ICD diagnosis codes as they appear in the MIMIC-IV-ED extracts, and their normalized form.

use crate::{
    util::{optional_stay_id, optional_string},
    ArcStr, StayId,
};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{fmt, ops::Deref, path::Path};

/// Characters that separate parts of a code (`A01.1`) and carry no meaning.
const SEPARATORS: &[char] = &['.'];

/// A normalized ICD code: uppercase, without separators or surrounding whitespace, never empty.
///
/// The only way to make one is [`IcdCode::normalize`], so two `IcdCode`s are equal exactly when
/// their raw forms normalize to the same thing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct IcdCode(ArcStr);

impl IcdCode {
    /// Normalize a raw code. Returns `None` when nothing is left.
    ///
    /// Separators are removed before trimming so that e.g. `"A. ."` ends up as `"A"`, not
    /// `"A "`, which keeps this idempotent.
    pub fn normalize(raw: &str) -> Option<Self> {
        let upper = raw.to_uppercase();
        let joined: String = upper.chars().filter(|ch| !SEPARATORS.contains(ch)).collect();
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(IcdCode(trimmed.into()))
        }
    }

    /// Like `normalize`, but a missing value is absent too.
    pub fn normalize_opt(raw: Option<&str>) -> Option<Self> {
        raw.and_then(Self::normalize)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for IcdCode {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for IcdCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IcdCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A row of the raw code source, one per (stay, code) occurrence.
#[derive(Debug, Clone, Deserialize)]
struct CodeRecordRaw {
    #[serde(deserialize_with = "optional_stay_id")]
    stay_id: Option<StayId>,
    #[serde(deserialize_with = "optional_string")]
    icd_code: Option<ArcStr>,
}

/// A code occurrence for a stay, after normalization.
///
/// `code` is `None` when the raw value was missing or normalized to nothing. These records are
/// kept (rather than filtered on load) because they still count towards the code total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRecord {
    pub stay_id: StayId,
    pub code: Option<IcdCode>,
}

impl CodeRecord {
    pub fn new(stay_id: StayId, raw: Option<&str>) -> Self {
        Self {
            stay_id,
            code: IcdCode::normalize_opt(raw),
        }
    }

    fn from_raw(raw: CodeRecordRaw) -> Option<Self> {
        let stay_id = raw.stay_id?;
        Some(Self::new(stay_id, raw.icd_code.as_deref()))
    }
}

pub const CODE_SOURCE_COLUMNS: &[&str] = &["stay_id", "icd_code"];

/// Load the raw code source (`stay_id`, `icd_code`) and normalize every code.
///
/// Rows without a stay id are dropped with a warning.
pub fn load_code_records(path: impl AsRef<Path>) -> Result<Vec<CodeRecord>> {
    let raw: Vec<CodeRecordRaw> = crate::load_csv(path, CODE_SOURCE_COLUMNS)?;
    Ok(records_from_raw(raw))
}

/// Read the raw code source from any reader. See [`load_code_records`].
pub fn read_code_records(reader: impl std::io::Read) -> Result<Vec<CodeRecord>> {
    let raw: Vec<CodeRecordRaw> = crate::read_csv(reader, "code source", CODE_SOURCE_COLUMNS)?;
    Ok(records_from_raw(raw))
}

fn records_from_raw(raw: Vec<CodeRecordRaw>) -> Vec<CodeRecord> {
    let raw_len = raw.len();
    let records: Vec<CodeRecord> = raw.into_iter().filter_map(CodeRecord::from_raw).collect();
    if records.len() < raw_len {
        event!(
            Level::WARN,
            "dropped {} code rows without a stay id",
            raw_len - records.len()
        );
    }
    records
}
