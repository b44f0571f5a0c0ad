use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use image::{GrayImage, Luma};
use manga_ocr::{ModelFiles, ModelSource, OcrTokenizer, PreprocessorConfig, DEFAULT_MODEL};
use manga_ocr_dev::{
    init_tracing,
    training::{MangaDataset, IGNORE_INDEX},
    DataPaths,
};
use ndarray::Array3;

/// Save a few dataset samples as the model sees them, with their decoded labels.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "train")]
    split: String,

    /// Index of the sample to preview
    #[arg(long, default_value_t = 0)]
    index: usize,

    /// How many augmented variants to save
    #[arg(short, default_value_t = 20)]
    n: usize,

    #[arg(long, default_value_t = false)]
    no_augment: bool,

    #[arg(long, default_value_t = 300)]
    max_target_length: usize,

    #[arg(long, default_value = "preview")]
    out: PathBuf,

    #[arg(long, env = "MANGA_OCR_MODEL", default_value = DEFAULT_MODEL)]
    pretrained_model_name_or_path: String,

    /// Hub repository id or local directory with the ONNX encoder and decoder.
    /// Defaults to the model directory for local models, otherwise to DEFAULT_ONNX_MODEL
    #[arg(long, env = "MANGA_OCR_ONNX_MODEL")]
    onnx_model: Option<String>,
}

fn to_image(pixel_values: &Array3<f32>, config: &PreprocessorConfig) -> GrayImage {
    let (_, h, w) = pixel_values.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let v = pixel_values[[0, y as usize, x as usize]];
        let v = if config.do_normalize {
            v * config.image_std[0] + config.image_mean[0]
        } else {
            v
        };
        Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let paths = DataPaths::from_env();

    let source = ModelSource::new(&args.pretrained_model_name_or_path, args.onnx_model.as_deref());
    let files = ModelFiles::resolve(&source).await?;
    let tokenizer = OcrTokenizer::load(&files.vocab, &files.special_tokens_map)?;
    let file = std::fs::File::open(&files.preprocessor_config)
        .with_context(|| format!("failed to open {}", files.preprocessor_config.display()))?;
    let preprocessor: PreprocessorConfig = serde_json::from_reader(std::io::BufReader::new(file))
        .context("failed to parse preprocessor config")?;

    let dataset = MangaDataset::new(
        &tokenizer,
        &preprocessor,
        &paths,
        &args.split,
        args.max_target_length,
        None,
        !args.no_augment,
        &[],
    )?;

    std::fs::create_dir_all(&args.out)?;
    for i in 0..args.n {
        let item = dataset.get(args.index)?;
        let ids: Vec<u32> = item
            .labels
            .iter()
            .map(|&id| if id == IGNORE_INDEX { tokenizer.pad_id() } else { id as u32 })
            .collect();
        let text: String = tokenizer.decode(&ids)?.split_whitespace().collect();

        let path = args.out.join(format!("{i:03}.png"));
        to_image(&item.pixel_values, &preprocessor).save(&path)?;
        println!("{i}: {text}");
    }
    tracing::info!("Saved {} previews to {}", args.n, args.out.display());
    Ok(())
}
