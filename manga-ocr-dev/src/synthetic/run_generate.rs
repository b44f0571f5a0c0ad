//! Render one numbered package of synthetic samples.
//!
//! Input is `lines/NNNN.csv` under the synthetic root. Images land in
//! `img/NNNN/` and ground truth in `meta/NNNN.csv`.

use std::path::{Path, PathBuf};

use rand::{rngs::StdRng, seq::IndexedRandom, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{css::CssOverrides, generator::SyntheticDataGenerator};
use crate::{progress_bar, DevError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRow {
    pub source: String,
    pub id: String,
    pub line: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRow {
    pub source: String,
    pub id: String,
    pub text: String,
    pub vertical: bool,
    pub font_path: String,
}

#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub package: u32,
    pub n_random: usize,
    pub n_limit: Option<usize>,
    pub max_workers: usize,
    /// Makes the run reproducible. Each item derives its own generator from it.
    pub seed: Option<u64>,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            package: 0,
            n_random: 1000,
            n_limit: None,
            max_workers: 16,
            seed: None,
        }
    }
}

pub fn package_name(package: u32) -> String {
    format!("{package:04}")
}

pub fn read_lines(path: &Path) -> Result<Vec<LineRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<LineRow>() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Source lines followed by `n_random` rows without text, optionally sampled
/// down to `n_limit`.
pub fn package_lines(
    mut lines: Vec<LineRow>,
    package: &str,
    n_random: usize,
    n_limit: Option<usize>,
    rng: &mut StdRng,
) -> Vec<LineRow> {
    lines.extend((0..n_random).map(|i| LineRow {
        source: "random".into(),
        id: format!("random_{package}_{i}"),
        line: None,
    }));
    match n_limit {
        Some(n) if n < lines.len() => lines.choose_multiple(rng, n).cloned().collect(),
        _ => lines,
    }
}

fn generate_one(
    generator: &SyntheticDataGenerator,
    row: &LineRow,
    out_dir: &Path,
    rng: &mut StdRng,
) -> Result<MetaRow> {
    let text = row.line.as_deref().filter(|l| !l.is_empty());
    let sample = generator.process(text, &CssOverrides::default(), rng)?;
    sample.image.save(out_dir.join(format!("{}.jpg", row.id)))?;

    let font_path = sample
        .params
        .font_path
        .as_deref()
        .map(|p| generator.fonts().relative_path(p).to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(MetaRow {
        source: row.source.clone(),
        id: row.id.clone(),
        text: sample.text,
        vertical: sample.params.vertical,
        font_path,
    })
}

/// Generate a package and return the path of its metadata file.
pub fn run_generate(
    generator: &SyntheticDataGenerator,
    synthetic_root: &Path,
    opts: &PackageOptions,
) -> Result<PathBuf> {
    let package = package_name(opts.package);
    let lines = read_lines(&synthetic_root.join("lines").join(format!("{package}.csv")))?;

    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    let lines = package_lines(lines, &package, opts.n_random, opts.n_limit, &mut rng);

    let out_dir = synthetic_root.join("img").join(&package);
    std::fs::create_dir_all(&out_dir)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.max_workers)
        .build()
        .map_err(|e| DevError::Data(format!("failed to build thread pool: {e}")))?;

    tracing::info!("Processing package {} ({} items)", package, lines.len());
    let pb = progress_bar(lines.len(), "generating");
    let seeds: Vec<u64> = lines.iter().map(|_| rand::Rng::random(&mut rng)).collect();
    let rows: Vec<MetaRow> = pool.install(|| {
        lines
            .par_iter()
            .zip(seeds.par_iter())
            .filter_map(|(row, &seed)| {
                let mut rng = StdRng::seed_from_u64(seed);
                let result = generate_one(generator, row, &out_dir, &mut rng);
                pb.inc(1);
                match result {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        tracing::warn!("Failed to generate {}: {}", row.id, e);
                        None
                    }
                }
            })
            .collect()
    });
    pb.finish();

    let meta_dir = synthetic_root.join("meta");
    std::fs::create_dir_all(&meta_dir)?;
    let meta_path = meta_dir.join(format!("{package}.csv"));
    let mut writer = csv::Writer::from_path(&meta_path)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} samples to {}", rows.len(), meta_path.display());
    Ok(meta_path)
}
