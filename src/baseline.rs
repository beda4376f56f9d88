//! Joining the raw ED tables into one baseline table for triage models.

use crate::{util::MissingColumns, ArcStr};
use qu::ick_use::*;
use std::{collections::HashMap, io, path::Path};

/// The join key shared by all ED tables.
pub const STAY_ID: &str = "stay_id";

/// Columns kept in the baseline table. Anything else (including suffixed duplicates from the
/// joins) is dropped.
pub const BASELINE_COLUMNS: &[&str] = &[
    "subject_id",
    "stay_id",
    "charttime",
    "intime",
    "outtime",
    "age",
    "gender",
    "acuity",
    "temperature",
    "heartrate",
    "resprate",
    "o2sat",
    "sbp",
    "dbp",
    "chiefcomplaint",
    "edregtime",
    "edouttime",
    "disposition",
    "icd_code",
    "icd_version",
];

/// A table of strings. Values are not interpreted, so they pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    headers: Vec<ArcStr>,
    rows: Vec<Vec<ArcStr>>,
}

impl Table {
    /// Load a csv table (optionally gzipped), requiring a `stay_id` column.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        crate::open_input(path)
            .and_then(|reader| Self::from_reader(reader, &path.display().to_string()))
            .with_context(|| format!("while loading \"{}\"", path.display()))
    }

    /// Read a csv table, requiring a `stay_id` column. `source` names the table in errors.
    ///
    /// Values are kept exactly as written, surrounding whitespace included. Short rows are
    /// filled with empty values; rows with more fields than the header are an error.
    pub fn from_reader(reader: impl io::Read, source: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        crate::util::check_columns(&headers, source, &[STAY_ID])?;
        let headers: Vec<ArcStr> = headers.iter().map(ArcStr::from).collect();
        let empty = ArcStr::from("");
        let mut rows: Vec<Vec<ArcStr>> = Vec::new();
        for (line, record) in reader.into_records().enumerate() {
            let record = record?;
            ensure!(
                record.len() <= headers.len(),
                "{} row {} has {} fields but the header has {}",
                source,
                line + 1,
                record.len(),
                headers.len()
            );
            let mut row: Vec<ArcStr> = record.iter().map(ArcStr::from).collect();
            row.resize(headers.len(), empty.clone());
            rows.push(row);
        }
        Ok(Table { headers, rows })
    }

    pub fn headers(&self) -> &[ArcStr] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<ArcStr>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| &**h == name)
    }

    fn require_column(&self, name: &str) -> Result<usize, MissingColumns> {
        self.column(name).ok_or_else(|| MissingColumns {
            source: "joined table".into(),
            missing: vec![name.into()],
        })
    }

    /// Left join `right` onto `self` on the column `key`.
    ///
    /// Every left row appears once per matching right row, or once with empty right-hand values
    /// if nothing matches. Left rows keep their order, matches follow the right table's order.
    /// Right columns whose names are already taken get `suffix` appended; the key column is only
    /// kept from the left. Empty keys never match.
    pub fn left_join(&self, right: &Table, key: &str, suffix: &str) -> Result<Table> {
        let left_key = self.require_column(key)?;
        let right_key = right.require_column(key)?;

        let right_cols: Vec<usize> = (0..right.headers.len())
            .filter(|idx| *idx != right_key)
            .collect();
        let mut headers = self.headers.clone();
        for idx in right_cols.iter().copied() {
            let name = &right.headers[idx];
            if self.column(name).is_some() {
                headers.push(format!("{}{}", name, suffix).into());
            } else {
                headers.push(name.clone());
            }
        }

        let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
        for (row_idx, row) in right.rows.iter().enumerate() {
            let value = &*row[right_key];
            if !value.is_empty() {
                index.entry(value).or_default().push(row_idx);
            }
        }

        let empty: ArcStr = ArcStr::from("");
        let mut rows = Vec::with_capacity(self.rows.len());
        for row in self.rows.iter() {
            let matches = index
                .get(&*row[left_key])
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if matches.is_empty() {
                let mut out = row.clone();
                out.extend(right_cols.iter().map(|_| empty.clone()));
                rows.push(out);
            }
            for right_idx in matches {
                let right_row = &right.rows[*right_idx];
                let mut out = row.clone();
                out.extend(right_cols.iter().map(|idx| right_row[*idx].clone()));
                rows.push(out);
            }
        }
        Ok(Table { headers, rows })
    }

    /// Keep only the columns in `keep`, in the order they appear in this table.
    pub fn select(&self, keep: &[&str]) -> Table {
        let cols: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, name)| keep.contains(&&***name))
            .map(|(idx, _)| idx)
            .collect();
        let headers = cols.iter().map(|idx| self.headers[*idx].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| cols.iter().map(|idx| row[*idx].clone()).collect())
            .collect();
        Table { headers, rows }
    }

    pub fn write(&self, writer: impl io::Write) -> Result {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(self.headers.iter().map(|h| h.as_bytes()))?;
        for row in self.rows.iter() {
            writer.write_record(row.iter().map(|v| v.as_bytes()))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        let path = path.as_ref();
        crate::create_output(path)
            .and_then(|out| self.write(out))
            .with_context(|| format!("unable to save data to \"{}\"", path.display()))
    }
}

/// The triage baseline: `edstays ⟕ triage ⟕ diagnosis` on `stay_id`, cut down to
/// [`BASELINE_COLUMNS`].
pub fn triage_baseline(edstays: &Table, triage: &Table, diagnosis: &Table) -> Result<Table> {
    let joined = edstays
        .left_join(triage, STAY_ID, "_tri")?
        .left_join(diagnosis, STAY_ID, "_dx")?;
    event!(
        Level::INFO,
        "joined table has {} rows and {} columns",
        joined.len(),
        joined.headers().len()
    );
    Ok(joined.select(BASELINE_COLUMNS))
}
