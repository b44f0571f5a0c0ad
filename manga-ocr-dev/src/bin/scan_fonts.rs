use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use manga_ocr_dev::{charsets::Charsets, init_tracing, synthetic::scan_fonts::scan_fonts, DataPaths};

/// Find the vocabulary characters every font can draw and write `fonts.csv`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Defaults to the configured fonts root
    #[arg(long)]
    fonts_root: Option<PathBuf>,

    /// Defaults to `fonts.csv` in the assets directory
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let paths = DataPaths::from_env();

    let charsets = Charsets::load(&paths.vocab_csv())
        .with_context(|| format!("failed to read {}", paths.vocab_csv().display()))?;
    let fonts_root = args.fonts_root.unwrap_or(paths.fonts_root.clone());
    let out = args.out.unwrap_or_else(|| paths.fonts_csv());

    let rows = scan_fonts(&fonts_root, &charsets.vocab, &out)?;
    let empty = rows.iter().filter(|r| r.num_chars == 0).count();
    tracing::info!(
        "Scanned {} fonts ({} without usable characters) into {}",
        rows.len(),
        empty,
        out.display()
    );
    Ok(())
}
