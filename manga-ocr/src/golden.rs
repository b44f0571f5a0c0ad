//! Recorded OCR outputs for a fixed image set, used as a regression fixture.
//!
//! Layout of a fixture directory:
//!
//! ```text
//! <root>/images/*            input crops
//! <root>/expected_results.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::Recognizer;

pub const EXPECTED_RESULTS: &str = "expected_results.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedResult {
    pub filename: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub filename: String,
    pub expected: String,
    pub actual: String,
}

fn sorted_images(root: &Path) -> Result<Vec<PathBuf>> {
    let dir = root.join("images");
    let mut paths = std::fs::read_dir(&dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

pub fn load_expected_results(root: &Path) -> Result<Vec<ExpectedResult>> {
    let path = root.join(EXPECTED_RESULTS);
    let data = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let results = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(results)
}

pub fn save_expected_results(root: &Path, results: &[ExpectedResult]) -> Result<()> {
    let path = root.join(EXPECTED_RESULTS);
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Recognize every image under `<root>/images` and record the outputs.
pub fn generate_expected_results<R: Recognizer>(
    ocr: &mut R,
    root: &Path,
) -> Result<Vec<ExpectedResult>> {
    let mut results = Vec::new();
    for path in sorted_images(root)? {
        let img =
            image::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
        let result = ocr.recognize(&img)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!("{}: {}", filename, result);
        results.push(ExpectedResult { filename, result });
    }
    save_expected_results(root, &results)?;
    Ok(results)
}

/// Re-run recognition over a recorded fixture and return every difference.
pub fn check_expected_results<R: Recognizer>(ocr: &mut R, root: &Path) -> Result<Vec<Mismatch>> {
    let mut mismatches = Vec::new();
    for item in load_expected_results(root)? {
        let path = root.join("images").join(&item.filename);
        let img =
            image::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
        let actual = ocr.recognize(&img)?;
        if actual != item.result {
            mismatches.push(Mismatch {
                filename: item.filename,
                expected: item.result,
                actual,
            });
        }
    }
    Ok(mismatches)
}
