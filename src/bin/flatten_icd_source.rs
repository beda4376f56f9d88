use clap::Parser;
use mimic_ed_prep::icd_list;
use qu::ick_use::*;
use std::path::PathBuf;

/// Turn the `icd_list` column (a python set of codes per stay) into one row per (stay, code).
#[derive(Parser)]
struct Opt {
    /// The icd list csv, with columns `stay_id`, `icd_list`.
    #[clap(long)]
    input: PathBuf,
    /// Where to write the `stay_id`, `icd_code` csv.
    #[clap(long)]
    output: PathBuf,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let rows = icd_list::flatten_file(&opt.input)?;
    mimic_ed_prep::save_csv(&rows, &opt.output)?;
    event!(
        Level::INFO,
        "wrote {} rows to \"{}\"",
        rows.len(),
        opt.output.display()
    );
    Ok(())
}
