use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use manga_ocr::{
    run::{run, ReadFrom, WriteTo},
    LoadOptions, MangaOcr, ModelSource, DEFAULT_MODEL,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Images to recognize once; when given, the watcher is not started
    images: Vec<PathBuf>,

    /// "clipboard" or a directory to watch for new images
    #[arg(long, default_value = "clipboard")]
    read_from: ReadFrom,

    /// "clipboard" or a .txt file to append results to
    #[arg(long, default_value = "clipboard")]
    write_to: WriteTo,

    /// Hub repository id or local directory with the model files
    #[arg(long, env = "MANGA_OCR_MODEL", default_value = DEFAULT_MODEL)]
    pretrained_model_name_or_path: String,

    /// Hub repository id or local directory with the ONNX encoder and decoder.
    /// Defaults to the model directory for local models, otherwise to DEFAULT_ONNX_MODEL
    #[arg(long, env = "MANGA_OCR_ONNX_MODEL")]
    onnx_model: Option<String>,

    /// Use CPU instead of GPU
    #[arg(long, default_value_t = false)]
    force_cpu: bool,

    /// Skip the warm-up recognition after loading
    #[arg(long, default_value_t = false)]
    no_warm_up: bool,

    /// Seconds to wait between polls
    #[arg(long, default_value_t = 0.1)]
    delay_secs: f64,

    /// Also log clipboard reads that carry no image
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let delay = Duration::try_from_secs_f64(args.delay_secs)
        .context("--delay-secs must be a non-negative number")?;

    let mut ocr = MangaOcr::load(
        &ModelSource::new(&args.pretrained_model_name_or_path, args.onnx_model.as_deref()),
        LoadOptions {
            force_cpu: args.force_cpu,
            warm_up: !args.no_warm_up,
        },
    )
    .await?;

    if !args.images.is_empty() {
        for path in &args.images {
            let text = ocr.recognize_path(path)?;
            println!("{}", text);
        }
        return Ok(());
    }

    run(
        &mut ocr,
        &args.read_from,
        &args.write_to,
        delay,
        args.verbose,
    )
    .await
}
