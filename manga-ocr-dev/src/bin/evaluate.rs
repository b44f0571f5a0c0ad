use clap::Parser;
use manga_ocr::{post_process, LoadOptions, MangaOcr, ModelSource, DEFAULT_MODEL};
use manga_ocr_dev::{
    init_tracing,
    training::{load_entries, Metrics},
    DataPaths,
};

/// Run the OCR over a dataset split and report CER and accuracy as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "test")]
    split: String,

    /// Only evaluate Manga109-s crops
    #[arg(long, default_value_t = false)]
    manga109_only: bool,

    /// Evaluate the first N samples only
    #[arg(long)]
    limit: Option<usize>,

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
    init_tracing();
    let args = Args::parse();
    let paths = DataPaths::from_env();

    let mut entries = load_entries(&paths, &args.split, &[])?;
    if args.manga109_only {
        entries.retain(|e| !e.synthetic);
    }
    if let Some(limit) = args.limit {
        entries.truncate(limit);
    }
    tracing::info!("Evaluating {} samples of split {}", entries.len(), args.split);

    let mut ocr = MangaOcr::load(
        &ModelSource::new(&args.pretrained_model_name_or_path, args.onnx_model.as_deref()),
        LoadOptions {
            force_cpu: args.force_cpu,
            warm_up: false,
        },
    )
    .await?;
    let mut predictions = Vec::with_capacity(entries.len());
    let mut references = Vec::with_capacity(entries.len());
    for entry in &entries {
        match ocr.recognize_path(&entry.path) {
            Ok(text) => {
                tracing::debug!("{}: {} / {}", entry.path.display(), text, entry.text);
                predictions.push(text);
                references.push(post_process(&entry.text));
            }
            Err(e) => tracing::warn!("Skipping {}: {:#}", entry.path.display(), e),
        }
    }

    let metrics = Metrics::compute(&predictions, &references);
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
