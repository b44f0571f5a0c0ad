use clap::Parser;
use manga_ocr_dev::{
    data::backgrounds::{generate_backgrounds, BackgroundOptions},
    init_tracing, DataPaths,
};
use rand::{rngs::StdRng, SeedableRng};

/// Cut text-free background crops out of Manga109-s pages.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seed points tried per page
    #[arg(long, default_value_t = 5)]
    crops_per_page: usize,

    /// Smaller crops are discarded
    #[arg(long, default_value_t = 40)]
    min_size: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let paths = DataPaths::from_env();

    let options = BackgroundOptions {
        crops_per_page: args.crops_per_page,
        min_size: args.min_size,
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    generate_backgrounds(&paths.manga109_root, &paths.background_dir, &options, &mut rng)?;
    Ok(())
}
