use clap::Parser;
use mimic_ed_prep::{
    baseline::{self, Table},
    interim_path, processed_path, raw_path, DEFAULT_MIMIC_ED_VERSION,
};
use qu::ick_use::*;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Join the raw MIMIC-IV-ED tables into the triage baseline table.
#[derive(Parser)]
struct Opt {
    /// Project root, containing `data/raw/mimic-iv-ed/<version>`.
    #[clap(long, default_value = ".")]
    root: PathBuf,
    /// MIMIC-IV-ED version directory to use.
    #[clap(long, env = "MIMIC_ED_VERSION", default_value = DEFAULT_MIMIC_ED_VERSION)]
    version: String,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let raw = raw_path(&opt.root, &opt.version);
    let edstays = load_table(&raw, "edstays")?;
    let triage = load_table(&raw, "triage")?;
    let diagnosis = load_table(&raw, "diagnosis")?;

    let base = baseline::triage_baseline(&edstays, &triage, &diagnosis)?;

    let interim = interim_path(&opt.root, &opt.version);
    fs::create_dir_all(&interim)
        .with_context(|| format!("creating \"{}\"", interim.display()))?;
    let out_path = processed_path(&opt.root, &opt.version).join("triage_baseline.csv");
    base.save(&out_path)?;
    event!(
        Level::INFO,
        "wrote {} rows to \"{}\"",
        base.len(),
        out_path.display()
    );
    Ok(())
}

/// Tables are normally gzipped, but an uncompressed copy is used if that's all there is.
fn load_table(dir: &Path, name: &str) -> Result<Table> {
    let gz = dir.join(format!("{}.csv.gz", name));
    let path = if gz.exists() {
        gz
    } else {
        dir.join(format!("{}.csv", name))
    };
    let table = Table::load(&path)?;
    event!(
        Level::INFO,
        "loaded {} rows from \"{}\"",
        table.len(),
        path.display()
    );
    Ok(table)
}
