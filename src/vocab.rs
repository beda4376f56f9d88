//! The code vocabulary: a fixed map from normalized ICD codes to dense integer indices.

use crate::{
    icd::IcdCode,
    util::{self, optional_string, parse_truncating},
    ArcStr,
};
use itertools::Itertools;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt, io,
    path::Path,
};

/// Where a vocabulary came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Loaded from an external mapping.
    Official,
    /// Derived from code frequencies in the input.
    Built,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Provenance::Official => f.write_str("official"),
            Provenance::Built => f.write_str("built"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VocabRaw {
    #[serde(deserialize_with = "optional_string")]
    icd_norm: Option<ArcStr>,
    #[serde(deserialize_with = "optional_string")]
    idx: Option<ArcStr>,
}

/// A row of the vocabulary table, as written out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VocabEntry {
    pub icd_norm: IcdCode,
    pub idx: u32,
}

pub const VOCAB_COLUMNS: &[&str] = &["icd_norm", "idx"];

/// Normalized code -> index, built once per run and never changed afterwards.
///
/// `size` is the number of slots a model needs, which for official vocabularies can be larger
/// than the number of codes (indices may be sparse).
#[derive(Debug, Clone)]
pub struct Vocabulary {
    codes: HashMap<IcdCode, u32>,
    size: usize,
    provenance: Provenance,
}

impl Vocabulary {
    /// Load an official vocabulary from a csv file with `icd_norm` and `idx` columns.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let rows: Vec<VocabRaw> = crate::load_csv(path, VOCAB_COLUMNS)?;
        Self::from_rows(rows)
            .with_context(|| format!("invalid vocabulary in \"{}\"", path.display()))
    }

    /// Read an official vocabulary from any reader. See [`Vocabulary::load`].
    pub fn from_reader(reader: impl io::Read) -> Result<Self> {
        let rows: Vec<VocabRaw> = crate::read_csv(reader, "vocabulary", VOCAB_COLUMNS)?;
        Self::from_rows(rows)
    }

    /// Rows missing either field are dropped. Codes are normalized, so a code listed twice (in
    /// any spelling) keeps the index of its last row. The size is one past the largest index of
    /// any retained row.
    fn from_rows(rows: Vec<VocabRaw>) -> Result<Self> {
        let mut codes = HashMap::new();
        let mut max_idx: Option<u32> = None;
        let mut dropped = 0usize;
        for row in rows {
            let (Some(raw_code), Some(raw_idx)) = (row.icd_norm, row.idx) else {
                dropped += 1;
                continue;
            };
            let Some(code) = IcdCode::normalize(&raw_code) else {
                dropped += 1;
                continue;
            };
            // fractional indices are truncated
            let idx = parse_truncating(&raw_idx).ok_or_else(|| {
                format_err!("index {:?} for code {} is not a number", raw_idx, code)
            })?;
            let idx = u32::try_from(idx)
                .map_err(|_| format_err!("index {} for code {} is out of range", idx, code))?;

            max_idx = max_idx.max(Some(idx));
            match codes.entry(code) {
                Entry::Vacant(entry) => {
                    entry.insert(idx);
                }
                Entry::Occupied(mut entry) => {
                    if *entry.get() != idx {
                        event!(
                            Level::WARN,
                            "code {} listed with indices {} and {}, using {}",
                            entry.key(),
                            entry.get(),
                            idx,
                            idx
                        );
                    }
                    entry.insert(idx);
                }
            }
        }
        if dropped > 0 {
            event!(Level::WARN, "dropped {} incomplete vocabulary rows", dropped);
        }
        let size = max_idx.map(|idx| idx as usize + 1).unwrap_or(0);
        event!(Level::INFO, "vocabulary loaded: size={}", size);
        Ok(Self {
            codes,
            size,
            provenance: Provenance::Official,
        })
    }

    /// Build a vocabulary from the codes observed in the input.
    ///
    /// Codes are ranked by descending frequency, ties broken by the code itself in lexical
    /// order, then the first `max_size` (if given) get indices `0..N`.
    pub fn build<'a>(
        codes: impl IntoIterator<Item = &'a IcdCode>,
        max_size: Option<usize>,
    ) -> Self {
        let mut counts: HashMap<&IcdCode, usize> = HashMap::new();
        for code in codes {
            *counts.entry(code).or_insert(0) += 1;
        }
        let ranked = counts
            .into_iter()
            .sorted_by(|(code_a, count_a), (code_b, count_b)| {
                count_b.cmp(count_a).then_with(|| code_a.cmp(code_b))
            })
            .take(max_size.unwrap_or(usize::MAX));

        let codes: HashMap<IcdCode, u32> = ranked
            .enumerate()
            .map(|(idx, (code, _))| (code.clone(), idx as u32))
            .collect();
        let size = codes.len();
        event!(Level::INFO, "vocabulary built: size={}", size);
        Self {
            codes,
            size,
            provenance: Provenance::Built,
        }
    }

    /// Load the official vocabulary at `path` if it exists, otherwise build one from `codes`.
    pub fn load_or_build<'a>(
        path: Option<&Path>,
        codes: impl IntoIterator<Item = &'a IcdCode>,
        max_size: Option<usize>,
    ) -> Result<Self> {
        if let Some(path) = path {
            if util::path_exists(path)? {
                return Self::load(path);
            }
            event!(
                Level::WARN,
                "no vocabulary at \"{}\", building one from the data",
                path.display()
            );
        } else {
            event!(
                Level::WARN,
                "no official vocabulary given, building one from the data"
            );
        }
        Ok(Self::build(codes, max_size))
    }

    /// The index of a code, if it is in the vocabulary.
    pub fn get(&self, code: &IcdCode) -> Option<u32> {
        self.codes.get(code).copied()
    }

    pub fn contains(&self, code: &IcdCode) -> bool {
        self.codes.contains_key(code)
    }

    /// The number of index slots (see the type docs).
    pub fn size(&self) -> usize {
        self.size
    }

    /// The number of distinct codes.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// All entries ordered by index (then by code, for codes sharing an index).
    pub fn entries(&self) -> Vec<VocabEntry> {
        self.codes
            .iter()
            .map(|(code, idx)| VocabEntry {
                icd_norm: code.clone(),
                idx: *idx,
            })
            .sorted_by(|a, b| a.idx.cmp(&b.idx).then_with(|| a.icd_norm.cmp(&b.icd_norm)))
            .collect()
    }

    /// Write the vocabulary as csv (`icd_norm`, `idx`), ordered by index.
    pub fn write(&self, writer: impl io::Write) -> Result {
        crate::write_csv(self.entries(), writer)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        crate::save_csv(self.entries(), path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn code(s: &str) -> IcdCode {
        IcdCode::normalize(s).unwrap()
    }

    #[test]
    fn load() {
        let input = "icd_norm,idx,description\n\
                     A011,0,typhoid\n\
                     B20,3.0,hiv\n\
                     ,4,missing code\n\
                     C50,,missing index\n\
                     A011,0,duplicate row\n";
        let vocab = Vocabulary::from_reader(input.as_bytes()).unwrap();
        assert_eq!(vocab.provenance(), Provenance::Official);
        assert_eq!(vocab.len(), 2);
        // sparse indices are kept as they are
        assert_eq!(vocab.size(), 4);
        assert_eq!(vocab.get(&code("A01.1")), Some(0));
        assert_eq!(vocab.get(&code("B20")), Some(3));
        assert!(!vocab.contains(&code("C50")));
    }

    #[test]
    fn load_dedups_by_normalized_code() {
        let input = "icd_norm,idx\nA011,0\na01.1,1\nB20,2\n";
        let vocab = Vocabulary::from_reader(input.as_bytes()).unwrap();
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.get(&code("A011")), Some(1));
        assert_eq!(vocab.size(), 3);
    }

    #[test]
    fn load_missing_columns() {
        let input = "code,index\nA011,0\n";
        let err = Vocabulary::from_reader(input.as_bytes()).unwrap_err();
        let missing = err.downcast_ref::<crate::MissingColumns>().unwrap();
        assert_eq!(missing.missing.len(), 2);

        let input = "icd_norm\nA011\n";
        let err = Vocabulary::from_reader(input.as_bytes()).unwrap_err();
        assert!(err.downcast_ref::<crate::MissingColumns>().is_some());
    }

    #[test]
    fn load_bad_index() {
        assert!(Vocabulary::from_reader("icd_norm,idx\nA011,zero\n".as_bytes()).is_err());
        assert!(Vocabulary::from_reader("icd_norm,idx\nA011,-1\n".as_bytes()).is_err());
    }

    #[test]
    fn load_truncates_fractional_index() {
        let vocab = Vocabulary::from_reader("icd_norm,idx\nA011,0\nB20,1.5\n".as_bytes()).unwrap();
        assert_eq!(vocab.get(&code("B20")), Some(1));
        assert_eq!(vocab.size(), 2);
    }

    #[test]
    fn load_empty() {
        let vocab = Vocabulary::from_reader("icd_norm,idx\n".as_bytes()).unwrap();
        assert_eq!(vocab.size(), 0);
        assert!(vocab.is_empty());
    }

    #[test]
    fn build() {
        let codes: Vec<IcdCode> = ["B20", "A011", "B20", "C50", "B20", "A011", "D00"]
            .into_iter()
            .map(code)
            .collect();
        let vocab = Vocabulary::build(&codes, None);
        assert_eq!(vocab.provenance(), Provenance::Built);
        assert_eq!(vocab.size(), 4);
        assert_eq!(vocab.get(&code("B20")), Some(0));
        assert_eq!(vocab.get(&code("A011")), Some(1));
        // C50 and D00 both appear once: lexical order decides
        assert_eq!(vocab.get(&code("C50")), Some(2));
        assert_eq!(vocab.get(&code("D00")), Some(3));

        let idxs: Vec<u32> = vocab.entries().iter().map(|e| e.idx).collect();
        assert_eq!(idxs, [0, 1, 2, 3]);
    }

    #[test]
    fn build_capped() {
        let codes: Vec<IcdCode> = ["B20", "A011", "B20", "C50"].into_iter().map(code).collect();
        let vocab = Vocabulary::build(&codes, Some(2));
        assert_eq!(vocab.size(), 2);
        assert_eq!(vocab.get(&code("B20")), Some(0));
        assert_eq!(vocab.get(&code("A011")), Some(1));
        assert_eq!(vocab.get(&code("C50")), None);

        assert_eq!(Vocabulary::build(&codes, Some(10)).size(), 3);
        assert_eq!(Vocabulary::build(&codes, Some(0)).size(), 0);
    }

    #[test]
    fn build_does_not_depend_on_input_order() {
        let fwd: Vec<IcdCode> = ["X1", "Y1", "Z1", "Y1"].into_iter().map(code).collect();
        let rev: Vec<IcdCode> = fwd.iter().rev().cloned().collect();
        assert_eq!(
            Vocabulary::build(&fwd, None).entries(),
            Vocabulary::build(&rev, None).entries()
        );
    }

    #[test]
    fn write() {
        let vocab = Vocabulary::from_reader("icd_norm,idx\nB20,1\nA011,0\n".as_bytes()).unwrap();
        let mut out = Vec::new();
        vocab.write(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "icd_norm,idx\nA011,0\nB20,1\n"
        );
    }
}
