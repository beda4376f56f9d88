//! Flattening the `icd_list` column, where each stay's codes are stored as a python set literal
//! (e.g. `{'A01.1', 'R07.9'}`, or `set()` when empty), into one row per (stay, code).

use crate::{
    util::{optional_stay_id, optional_string},
    ArcStr, StayId,
};
use logos::Logos;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, io, path::Path};

#[derive(Logos, Copy, Clone, Debug, PartialEq)]
enum SetLiteralTok<'input> {
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unquote(lex.slice()))]
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unquote(lex.slice()))]
    Str(&'input str),
    #[token("set()")]
    EmptySet,
    #[token("{")]
    #[token("[")]
    Open,
    #[token("}")]
    #[token("]")]
    Close,
    #[token(",")]
    Comma,
    #[error]
    #[regex(r"[ \t\n\f]+", logos::skip)]
    Error,
}

fn unquote(quoted: &str) -> &str {
    &quoted[1..quoted.len() - 1]
}

impl fmt::Display for SetLiteralTok<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SetLiteralTok::Str(s) => write!(f, "string {:?}", s),
            SetLiteralTok::EmptySet => f.write_str("`set()`"),
            SetLiteralTok::Open => f.write_str("opening bracket"),
            SetLiteralTok::Close => f.write_str("closing bracket"),
            SetLiteralTok::Comma => f.write_str("`,`"),
            SetLiteralTok::Error => f.write_str("lexer error"),
        }
    }
}

/// Undo python's backslash escaping inside a string literal.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Parse a python set (or list) literal of strings.
///
/// Duplicates collapse and codes come out in lexical order, so the result does not depend on
/// python's set iteration order. Codes are returned exactly as written.
pub fn parse_icd_set(literal: &str) -> Result<BTreeSet<ArcStr>> {
    let mut toks = SetLiteralTok::lexer(literal);
    let mut codes = BTreeSet::new();
    match toks.next() {
        None => return Ok(codes),
        Some(SetLiteralTok::EmptySet) => {
            if let Some(tok) = toks.next() {
                bail!("unexpected {} after `set()`", tok);
            }
            return Ok(codes);
        }
        Some(SetLiteralTok::Open) => (),
        Some(tok) => bail!("expected `{{` or `set()`, found {}", tok),
    }

    // after `{` we want a string or `}`, after a string we want `,` or `}`, and after `,` the
    // same as after `{` (python allows a trailing comma).
    let mut expect_item = true;
    loop {
        match toks.next() {
            Some(SetLiteralTok::Str(s)) if expect_item => {
                codes.insert(ArcStr::from(unescape(s)));
                expect_item = false;
            }
            Some(SetLiteralTok::Comma) if !expect_item => expect_item = true,
            Some(SetLiteralTok::Close) => break,
            Some(tok) => bail!("unexpected {} at {:?}", tok, toks.span()),
            None => bail!("unterminated literal"),
        }
    }
    if let Some(tok) = toks.next() {
        bail!("unexpected {} after closing bracket", tok);
    }
    Ok(codes)
}

#[derive(Debug, Deserialize)]
struct IcdListRaw {
    #[serde(deserialize_with = "optional_stay_id")]
    stay_id: Option<StayId>,
    #[serde(deserialize_with = "optional_string")]
    icd_list: Option<ArcStr>,
}

/// One (stay, code) pair in the flattened table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatCode {
    pub stay_id: StayId,
    pub icd_code: ArcStr,
}

pub const ICD_LIST_COLUMNS: &[&str] = &["stay_id", "icd_list"];

/// Flatten an `icd_list` table (`stay_id`, `icd_list`) read from `reader`.
///
/// Stays with a missing or empty list produce no rows. Rows without a stay id are skipped.
pub fn flatten(reader: impl io::Read) -> Result<Vec<FlatCode>> {
    let rows: Vec<IcdListRaw> = crate::read_csv(reader, "icd list", ICD_LIST_COLUMNS)?;
    flatten_rows(rows)
}

/// Load and flatten an `icd_list` table from disk. See [`flatten`].
pub fn flatten_file(path: impl AsRef<Path>) -> Result<Vec<FlatCode>> {
    let rows: Vec<IcdListRaw> = crate::load_csv(path, ICD_LIST_COLUMNS)?;
    flatten_rows(rows)
}

fn flatten_rows(rows: Vec<IcdListRaw>) -> Result<Vec<FlatCode>> {
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for row in rows {
        let Some(stay_id) = row.stay_id else {
            skipped += 1;
            continue;
        };
        let Some(literal) = row.icd_list else {
            continue;
        };
        let codes = parse_icd_set(&literal)
            .with_context(|| format!("invalid icd_list {:?} for stay {}", literal, stay_id))?;
        out.extend(codes.into_iter().map(|icd_code| FlatCode { stay_id, icd_code }));
    }
    if skipped > 0 {
        event!(Level::WARN, "skipped {} rows without a stay id", skipped);
    }
    Ok(out)
}
