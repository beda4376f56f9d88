pub mod baseline;
pub mod encode;
pub mod icd;
pub mod icd_list;
mod util;
pub mod vocab;

pub use anyhow::{Context, Error};
use flate2::read::GzDecoder;
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use crate::{
    encode::{encode_stays, EncodedIndex, EncodedStay, Encoding, EncodingSummary, OovPolicy},
    icd::{CodeRecord, IcdCode},
    util::{header, MissingColumns},
    vocab::{Provenance, Vocabulary},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
/// Identifies one emergency department visit.
///
/// MIMIC stay ids are non-negative integers, so they are stored as one. This is narrower than
/// treating ids as opaque keys: a code source with a non-numeric or negative `stay_id` fails to
/// load instead of passing through.
pub type StayId = u64;

/// The MIMIC-IV-ED version used when none is given.
pub const DEFAULT_MIMIC_ED_VERSION: &str = "1.0";

/// Open a file for reading, transparently decompressing it if it ends in `.gz`.
pub fn open_input(path: impl AsRef<Path>) -> Result<Box<dyn io::Read>> {
    let path = path.as_ref();
    let file = fs::File::open(path)
        .with_context(|| format!("unable to open \"{}\"", path.display()))?;
    let file = io::BufReader::new(file);
    if matches!(path.extension(), Some(ext) if ext == "gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// The csv reader settings used for the code, vocabulary and icd list tables (values trimmed).
pub fn csv_reader<R: io::Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Deserialize all rows of a csv table, after checking that the `required` columns exist.
///
/// `source` names the table in error messages.
pub fn read_csv<T: DeserializeOwned>(
    reader: impl io::Read,
    source: &str,
    required: &[&str],
) -> Result<Vec<T>> {
    let mut reader = csv_reader(reader);
    util::check_columns(reader.headers()?, source, required)?;
    reader
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(Into::into)
}

/// Load a csv table from disk. See [`read_csv`].
pub fn load_csv<T: DeserializeOwned>(path: impl AsRef<Path>, required: &[&str]) -> Result<Vec<T>> {
    let path = path.as_ref();
    let source = path.display().to_string();
    open_input(path)
        .and_then(|reader| read_csv(reader, &source, required))
        .with_context(|| format!("while loading \"{}\"", path.display()))
}

/// Serialize rows as csv, with a header row taken from the field names.
pub fn write_csv<T: Serialize>(
    rows: impl IntoIterator<Item = T>,
    writer: impl io::Write,
) -> Result {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Save rows to a csv file, creating parent directories as needed.
pub fn save_csv<T: Serialize>(rows: impl IntoIterator<Item = T>, path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(rows: impl IntoIterator<Item = T>, path: &Path) -> Result {
        let out = create_output(path)?;
        write_csv(rows, out)
    }
    let path = path.as_ref();
    inner(rows, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Save a value as pretty-printed json.
pub fn save_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(value: &T, path: &Path) -> Result {
        let mut out = create_output(path)?;
        serde_json::to_writer_pretty(&mut out, value)?;
        io::Write::flush(&mut out)?;
        Ok(())
    }
    let path = path.as_ref();
    inner(value, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

fn create_output(path: &Path) -> Result<io::BufWriter<fs::File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("could not create parent")?;
    }
    if util::path_exists(path)? {
        event!(
            Level::WARN,
            "overwriting existing file at \"{}\"",
            path.display()
        );
    }
    Ok(io::BufWriter::new(fs::File::create(path)?))
}

/// Note: No protection from escaping the root directory.
pub fn raw_path(root: &Path, version: &str) -> PathBuf {
    root.join("data/raw/mimic-iv-ed").join(version)
}

/// Note: No protection from escaping the root directory.
pub fn interim_path(root: &Path, version: &str) -> PathBuf {
    root.join("data/interim/mimic-iv-ed").join(version)
}

/// Note: No protection from escaping the root directory.
pub fn processed_path(root: &Path, version: &str) -> PathBuf {
    root.join("data/processed/mimic-iv-ed").join(version)
}
