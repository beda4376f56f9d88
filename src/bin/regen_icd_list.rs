use clap::Parser;
use mimic_ed_prep::{
    encode::{self, RegenOptions},
    header,
};
use qu::ick_use::*;
use std::path::PathBuf;

/// Encode each stay's ICD codes as a sorted list of vocabulary indices.
#[derive(Parser)]
struct Opt {
    /// Directory the outputs are written to (created if needed).
    #[clap(long)]
    path: PathBuf,
    /// Csv with columns `stay_id`, `icd_code` (one row per code per stay).
    #[clap(long, alias = "icd_source_csv")]
    icd_source_csv: PathBuf,
    /// Official vocabulary csv with columns `icd_norm`, `idx`.
    ///
    /// If not given, or the file doesn't exist, a vocabulary is built from the data.
    #[clap(long, alias = "vocab_csv")]
    vocab_csv: Option<PathBuf>,
    /// Version label used in output file names.
    #[clap(long, default_value = "v10")]
    version: String,
    /// Drop codes that are not in the vocabulary instead of marking them with -2.
    #[clap(long)]
    strict: bool,
    /// When building a vocabulary, keep only the most frequent codes.
    #[clap(long, alias = "max_vocab_size")]
    max_vocab_size: Option<usize>,
}

impl From<Opt> for RegenOptions {
    fn from(opt: Opt) -> Self {
        RegenOptions {
            path: opt.path,
            icd_source_csv: opt.icd_source_csv,
            vocab_csv: opt.vocab_csv,
            version: opt.version,
            strict: opt.strict,
            max_vocab_size: opt.max_vocab_size,
        }
    }
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let summary = encode::regen(&opt.into())?;

    header("Summary");
    println!("{}", summary.term_table());
    println!(
        "Use vocab_size={} downstream (vocabulary mode '{}').",
        summary.vocab_size, summary.provenance
    );
    Ok(())
}
