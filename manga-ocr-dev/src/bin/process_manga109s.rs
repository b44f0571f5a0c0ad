use clap::Parser;
use manga_ocr_dev::{
    data::manga109::{export_crops, export_frames},
    init_tracing, DataPaths,
};
use rand::{rngs::StdRng, SeedableRng};

/// Export Manga109-s frame and text annotations to CSV and crop every text box.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seed of the train/test split
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let paths = DataPaths::from_env();

    export_frames(&paths.manga109_root)?;
    let mut rng = StdRng::seed_from_u64(args.seed);
    export_crops(&paths.manga109_root, &mut rng)?;
    Ok(())
}
