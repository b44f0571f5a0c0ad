use std::path::PathBuf;

use clap::Parser;
use manga_ocr::{
    golden::generate_expected_results, LoadOptions, MangaOcr, ModelSource, DEFAULT_MODEL,
};
use tracing_subscriber::EnvFilter;

/// Record the current OCR output for every image of a fixture directory.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fixture directory containing `images/`
    #[arg(long, env = "MANGA_OCR_TEST_DATA", default_value = "tests/data")]
    data_dir: PathBuf,

    #[arg(long, env = "MANGA_OCR_MODEL", default_value = DEFAULT_MODEL)]
    pretrained_model_name_or_path: String,

    /// Hub repository id or local directory with the ONNX encoder and decoder.
    /// Defaults to the model directory for local models, otherwise to DEFAULT_ONNX_MODEL
    #[arg(long, env = "MANGA_OCR_ONNX_MODEL")]
    onnx_model: Option<String>,

    #[arg(long, default_value_t = false)]
    force_cpu: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut ocr = MangaOcr::load(
        &ModelSource::new(&args.pretrained_model_name_or_path, args.onnx_model.as_deref()),
        LoadOptions {
            force_cpu: args.force_cpu,
            warm_up: false,
        },
    )
    .await?;
    let results = generate_expected_results(&mut ocr, &args.data_dir)?;
    tracing::info!(
        "Wrote {} results to {}",
        results.len(),
        args.data_dir.join("expected_results.json").display()
    );
    Ok(())
}
