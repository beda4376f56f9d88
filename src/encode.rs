//! Encoding each stay's diagnosis codes as a sorted list of vocabulary indices.

use crate::{
    icd::{self, CodeRecord, IcdCode},
    vocab::{Provenance, Vocabulary},
    StayId,
};
use itertools::Itertools;
use qu::ick_use::*;
use serde::{Serialize, Serializer};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs, io,
    path::{Path, PathBuf},
};

/// One entry in an encoded stay.
///
/// `Oov` orders before every real index, so it always comes first in a sorted list.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncodedIndex {
    /// At least one code on the stay was not in the vocabulary.
    Oov,
    Code(u32),
}

impl EncodedIndex {
    /// How `Oov` is written out. Not a vocabulary slot.
    pub const OOV_SENTINEL: i64 = -2;

    pub fn as_i64(self) -> i64 {
        match self {
            EncodedIndex::Oov => Self::OOV_SENTINEL,
            EncodedIndex::Code(idx) => idx as i64,
        }
    }
}

impl fmt::Display for EncodedIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

impl Serialize for EncodedIndex {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(self.as_i64())
    }
}

/// What to do with codes that are not in the vocabulary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OovPolicy {
    /// Mark the stay with [`EncodedIndex::Oov`] and count the code.
    Permissive,
    /// Drop the code.
    Strict,
}

impl OovPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            OovPolicy::Strict
        } else {
            OovPolicy::Permissive
        }
    }
}

/// Normalized codes grouped by stay, in input order within each stay.
///
/// Absent codes are kept as `None` so they are counted when encoding.
#[derive(Debug, Default, Clone)]
pub struct StayCodes {
    stays: BTreeMap<StayId, Vec<Option<IcdCode>>>,
}

impl StayCodes {
    pub fn from_records(records: impl IntoIterator<Item = CodeRecord>) -> Self {
        let mut stays: BTreeMap<StayId, Vec<Option<IcdCode>>> = BTreeMap::new();
        for record in records {
            stays.entry(record.stay_id).or_default().push(record.code);
        }
        Self { stays }
    }

    /// Number of stays.
    pub fn len(&self) -> usize {
        self.stays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stays.is_empty()
    }

    /// Every present code occurrence, for building a vocabulary.
    pub fn codes(&self) -> impl Iterator<Item = &IcdCode> + '_ {
        self.stays.values().flatten().flatten()
    }

    /// Stays in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (StayId, &[Option<IcdCode>])> + '_ {
        self.stays.iter().map(|(id, codes)| (*id, codes.as_slice()))
    }
}

impl FromIterator<CodeRecord> for StayCodes {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = CodeRecord>,
    {
        Self::from_records(iter)
    }
}

/// A stay and its sorted, deduplicated code indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStay {
    pub stay_id: StayId,
    pub indices: Vec<EncodedIndex>,
}

impl EncodedStay {
    pub fn has_oov(&self) -> bool {
        self.indices.first() == Some(&EncodedIndex::Oov)
    }

    /// The list as python would print it, e.g. `[-2, 0, 17]`.
    pub fn list_string(&self) -> String {
        format!("[{}]", self.indices.iter().join(", "))
    }
}

#[derive(Serialize)]
struct EncodedStayRow {
    stay_id: StayId,
    icd_encoded_list: String,
}

impl From<&EncodedStay> for EncodedStayRow {
    fn from(stay: &EncodedStay) -> Self {
        Self {
            stay_id: stay.stay_id,
            icd_encoded_list: stay.list_string(),
        }
    }
}

/// Code counts across a whole encoding run.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingSummary {
    /// Every record seen, including absent codes.
    pub total_codes: usize,
    /// Codes marked out-of-vocabulary. Always 0 in strict mode.
    pub oov_codes: usize,
}

impl EncodingSummary {
    /// `oov_codes / max(total_codes, 1)`
    pub fn oov_fraction(&self) -> f64 {
        self.oov_codes as f64 / self.total_codes.max(1) as f64
    }
}

/// The output of [`encode_stays`].
#[derive(Debug, Clone)]
pub struct Encoding {
    pub stays: Vec<EncodedStay>,
    pub summary: EncodingSummary,
}

impl Encoding {
    /// Write the encoded table as csv (`stay_id`, `icd_encoded_list`).
    pub fn write(&self, writer: impl io::Write) -> crate::Result {
        crate::write_csv(self.stays.iter().map(EncodedStayRow::from), writer)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> crate::Result {
        crate::save_csv(self.stays.iter().map(EncodedStayRow::from), path)
    }
}

/// Encode every stay against the vocabulary.
///
/// Each record counts towards the total before its code is checked, so absent codes are part
/// of the denominator of the OOV fraction. Every stay gets exactly one row, even if all of its
/// codes were dropped.
pub fn encode_stays(stays: &StayCodes, vocab: &Vocabulary, policy: OovPolicy) -> Encoding {
    let mut summary = EncodingSummary::default();
    let mut out = Vec::with_capacity(stays.len());
    for (stay_id, codes) in stays.iter() {
        let mut indices = BTreeSet::new();
        for code in codes {
            summary.total_codes += 1;
            let Some(code) = code else {
                continue;
            };
            if let Some(idx) = vocab.get(code) {
                indices.insert(EncodedIndex::Code(idx));
            } else if policy == OovPolicy::Permissive {
                indices.insert(EncodedIndex::Oov);
                summary.oov_codes += 1;
            }
        }
        out.push(EncodedStay {
            stay_id,
            indices: indices.into_iter().collect(),
        });
    }
    Encoding {
        stays: out,
        summary,
    }
}

/// Everything worth knowing about a run, saved next to the outputs.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub version: String,
    pub provenance: Provenance,
    pub vocab_size: usize,
    pub vocab_codes: usize,
    pub strict: bool,
    pub stays: usize,
    pub total_codes: usize,
    pub oov_codes: usize,
    pub oov_fraction: f64,
}

impl RunSummary {
    pub fn new(version: &str, vocab: &Vocabulary, policy: OovPolicy, encoding: &Encoding) -> Self {
        Self {
            version: version.to_owned(),
            provenance: vocab.provenance(),
            vocab_size: vocab.size(),
            vocab_codes: vocab.len(),
            strict: policy == OovPolicy::Strict,
            stays: encoding.stays.len(),
            total_codes: encoding.summary.total_codes,
            oov_codes: encoding.summary.oov_codes,
            oov_fraction: encoding.summary.oov_fraction(),
        }
    }

    pub fn term_table(&self) -> term_data_table::Table<'_> {
        use term_data_table::{Cell, Row, Table};
        let rows = [
            ("version", self.version.clone()),
            ("vocabulary", self.provenance.to_string()),
            ("vocabulary size", self.vocab_size.to_string()),
            ("vocabulary codes", self.vocab_codes.to_string()),
            ("strict", self.strict.to_string()),
            ("stays", self.stays.to_string()),
            ("total codes", self.total_codes.to_string()),
            ("OOV codes", self.oov_codes.to_string()),
            ("OOV fraction", format!("{:.2}%", self.oov_fraction * 100.)),
        ];
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("Statistic"))
                .with_cell(Cell::from("Value")),
        );
        for (label, value) in rows {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(label))
                    .with_cell(Cell::from(value)),
            );
        }
        table
    }
}

/// Settings for a full encoding run.
#[derive(Debug, Clone)]
pub struct RegenOptions {
    /// Directory the outputs are written to.
    pub path: PathBuf,
    /// Csv with columns `stay_id`, `icd_code`.
    pub icd_source_csv: PathBuf,
    /// Official vocabulary. A vocabulary is built from the data when this is `None` or the file
    /// does not exist.
    pub vocab_csv: Option<PathBuf>,
    /// Label used in output file names.
    pub version: String,
    pub strict: bool,
    /// Cap on the size of a built vocabulary.
    pub max_vocab_size: Option<usize>,
}

impl RegenOptions {
    pub fn encoded_path(&self) -> PathBuf {
        self.path.join(format!("icd_list_dataset_{}.csv", self.version))
    }

    pub fn vocab_path(&self, provenance: Provenance) -> PathBuf {
        self.path.join(format!("vocab_{}_{}.csv", self.version, provenance))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path.join(format!("summary_{}.json", self.version))
    }
}

/// Load the code source, pick a vocabulary, encode every stay, then write the encoded table,
/// the effective vocabulary and the run summary into `opts.path`.
///
/// Nothing is created on disk until all inputs have been read and encoded.
pub fn regen(opts: &RegenOptions) -> Result<RunSummary> {
    let policy = OovPolicy::from_strict(opts.strict);

    let records = icd::load_code_records(&opts.icd_source_csv)?;
    event!(
        Level::INFO,
        "loaded {} code rows from \"{}\"",
        records.len(),
        opts.icd_source_csv.display()
    );
    let stays = StayCodes::from_records(records);
    let vocab =
        Vocabulary::load_or_build(opts.vocab_csv.as_deref(), stays.codes(), opts.max_vocab_size)?;
    let encoding = encode_stays(&stays, &vocab, policy);
    let summary = RunSummary::new(&opts.version, &vocab, policy, &encoding);
    event!(
        Level::INFO,
        "total codes={} | OOV={} ({:.2}%)",
        summary.total_codes,
        summary.oov_codes,
        summary.oov_fraction * 100.
    );

    fs::create_dir_all(&opts.path)
        .with_context(|| format!("creating output directory \"{}\"", opts.path.display()))?;

    let encoded_path = opts.encoded_path();
    encoding.save(&encoded_path)?;
    event!(Level::INFO, "saved \"{}\"", encoded_path.display());

    let vocab_path = opts.vocab_path(vocab.provenance());
    vocab.save(&vocab_path)?;
    event!(
        Level::INFO,
        "saved effective vocabulary to \"{}\"",
        vocab_path.display()
    );

    crate::save_json(&summary, opts.summary_path())?;
    Ok(summary)
}

#[cfg(test)]
mod test {
    use super::*;

    fn stays(records: &[(StayId, Option<&str>)]) -> StayCodes {
        records
            .iter()
            .map(|(stay_id, raw)| CodeRecord::new(*stay_id, *raw))
            .collect()
    }

    fn vocab(codes: &[&str]) -> Vocabulary {
        let mut input = String::from("icd_norm,idx\n");
        for (idx, code) in codes.iter().enumerate() {
            input.push_str(&format!("{},{}\n", code, idx));
        }
        Vocabulary::from_reader(input.as_bytes()).unwrap()
    }

    fn lists(encoding: &Encoding) -> Vec<(StayId, Vec<i64>)> {
        encoding
            .stays
            .iter()
            .map(|s| (s.stay_id, s.indices.iter().map(|i| i.as_i64()).collect()))
            .collect()
    }

    #[test]
    fn spellings_of_one_code_dedup() {
        let input = stays(&[(1, Some("A01.1")), (1, Some("a011")), (1, Some(" A01.1 "))]);
        let enc = encode_stays(&input, &vocab(&["A011"]), OovPolicy::Permissive);
        assert_eq!(lists(&enc), vec![(1, vec![0])]);
        assert_eq!(enc.summary.total_codes, 3);
        assert_eq!(enc.summary.oov_codes, 0);
    }

    #[test]
    fn oov_permissive() {
        let input = stays(&[(2, Some("Z99.9"))]);
        let enc = encode_stays(&input, &vocab(&["A011"]), OovPolicy::Permissive);
        assert_eq!(lists(&enc), vec![(2, vec![-2])]);
        assert!(enc.stays[0].has_oov());
        assert_eq!(enc.summary.oov_codes, 1);
        assert_eq!(enc.summary.oov_fraction(), 1.0);
    }

    #[test]
    fn oov_strict() {
        let input = stays(&[(2, Some("Z99.9"))]);
        let enc = encode_stays(&input, &vocab(&["A011"]), OovPolicy::Strict);
        assert_eq!(lists(&enc), vec![(2, vec![])]);
        assert_eq!(enc.summary.total_codes, 1);
        assert_eq!(enc.summary.oov_codes, 0);
    }

    #[test]
    fn sorted_with_sentinel_first() {
        let input = stays(&[
            (7, Some("C50")),
            (7, Some("Q00")),
            (7, Some("A011")),
            (7, Some("R00")),
            (7, Some("C50")),
        ]);
        let v = vocab(&["A011", "B20", "C50"]);
        let enc = encode_stays(&input, &v, OovPolicy::Permissive);
        assert_eq!(lists(&enc), vec![(7, vec![-2, 0, 2])]);
        // both unknown codes are counted, even though the stay carries one sentinel
        assert_eq!(enc.summary.oov_codes, 2);
        assert_eq!(enc.stays[0].list_string(), "[-2, 0, 2]");

        let enc = encode_stays(&input, &v, OovPolicy::Strict);
        assert_eq!(lists(&enc), vec![(7, vec![0, 2])]);
    }

    #[test]
    fn every_stay_has_one_row() {
        let input = stays(&[
            (3, Some("A011")),
            (1, None),
            (2, Some("Z999")),
            (3, Some("B20")),
            (1, Some("")),
        ]);
        let enc = encode_stays(&input, &vocab(&["A011", "B20"]), OovPolicy::Strict);
        assert_eq!(
            lists(&enc),
            vec![(1, vec![]), (2, vec![]), (3, vec![0, 1])]
        );
        // absent codes are counted before being skipped
        assert_eq!(enc.summary.total_codes, 5);
    }

    #[test]
    fn oov_fraction() {
        assert_eq!(EncodingSummary::default().oov_fraction(), 0.0);
        let summary = EncodingSummary {
            total_codes: 8,
            oov_codes: 2,
        };
        assert_eq!(summary.oov_fraction(), 0.25);

        let enc = encode_stays(&StayCodes::default(), &vocab(&["A011"]), OovPolicy::Permissive);
        assert!(enc.stays.is_empty());
        assert_eq!(enc.summary.oov_fraction(), 0.0);
    }

    #[test]
    fn codes_skip_absent() {
        let input = stays(&[(1, Some("A01.1")), (1, None), (2, Some("a011"))]);
        let codes: Vec<&str> = input.codes().map(|c| c.as_str()).collect();
        assert_eq!(codes, ["A011", "A011"]);
    }

    #[test]
    fn write() {
        let input = stays(&[(2, Some("Z99.9")), (1, Some("B20")), (1, Some("A011"))]);
        let enc = encode_stays(&input, &vocab(&["A011", "B20"]), OovPolicy::Permissive);
        let mut out = Vec::new();
        enc.write(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "stay_id,icd_encoded_list\n1,\"[0, 1]\"\n2,[-2]\n"
        );
    }

    /// A scratch directory, removed on drop.
    struct Scratch(PathBuf);

    impl Scratch {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir()
                .join(format!("mimic-ed-prep-{}-{}", std::process::id(), name));
            let _ = fs::remove_dir_all(&dir);
            fs::create_dir_all(&dir).unwrap();
            Scratch(dir)
        }

        fn file(&self, name: &str, contents: &str) -> PathBuf {
            let path = self.0.join(name);
            fs::write(&path, contents).unwrap();
            path
        }

        fn opts(&self, icd_source_csv: PathBuf) -> RegenOptions {
            RegenOptions {
                path: self.0.join("out"),
                icd_source_csv,
                vocab_csv: None,
                version: "v10".into(),
                strict: false,
                max_vocab_size: None,
            }
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn regen_bad_source_writes_nothing() {
        let scratch = Scratch::new("regen_bad_source");
        let source = scratch.file("codes.csv", "stay_id,code\n1,A011\n");
        let opts = scratch.opts(source);
        let err = regen(&opts).unwrap_err();
        assert!(err.downcast_ref::<crate::MissingColumns>().is_some());
        assert!(!opts.path.exists());
    }

    #[test]
    fn regen_bad_vocab_writes_nothing() {
        let scratch = Scratch::new("regen_bad_vocab");
        let source = scratch.file("codes.csv", "stay_id,icd_code\n1,A011\n");
        let vocab = scratch.file("vocab.csv", "code,index\nA011,0\n");
        let opts = RegenOptions {
            vocab_csv: Some(vocab),
            ..scratch.opts(source)
        };
        let err = regen(&opts).unwrap_err();
        assert!(err.downcast_ref::<crate::MissingColumns>().is_some());
        assert!(!opts.path.exists());
    }

    #[test]
    fn regen_writes_outputs() {
        let scratch = Scratch::new("regen_writes_outputs");
        let source = scratch.file(
            "codes.csv",
            "stay_id,icd_code\n1,A01.1\n1,a011\n2,Z99.9\n2,A01.1\n3,\n",
        );
        let opts = RegenOptions {
            max_vocab_size: Some(1),
            ..scratch.opts(source)
        };
        let summary = regen(&opts).unwrap();
        assert_eq!(summary.provenance, Provenance::Built);
        assert_eq!(summary.total_codes, 5);
        assert_eq!(summary.oov_codes, 1);

        assert_eq!(
            fs::read_to_string(opts.encoded_path()).unwrap(),
            "stay_id,icd_encoded_list\n1,[0]\n2,\"[-2, 0]\"\n3,[]\n"
        );
        assert_eq!(
            fs::read_to_string(opts.path.join("vocab_v10_built.csv")).unwrap(),
            "icd_norm,idx\nA011,0\n"
        );
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(opts.summary_path()).unwrap()).unwrap();
        assert_eq!(json["provenance"], "built");
        assert_eq!(json["vocab_size"], 1);
        assert_eq!(json["stays"], 3);
        assert_eq!(json["oov_codes"], 1);
    }
}
