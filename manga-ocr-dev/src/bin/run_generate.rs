use clap::Parser;
use manga_ocr_dev::{
    init_tracing,
    synthetic::{
        run_generate::{run_generate, PackageOptions},
        SyntheticDataGenerator,
    },
    DataPaths,
};

/// Render one package of synthetic training samples.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of the package to generate
    #[arg(long, default_value_t = 0)]
    package: u32,

    /// How many samples with random text to add
    #[arg(long, default_value_t = 1000)]
    n_random: usize,

    /// Only generate this many samples
    #[arg(long)]
    n_limit: Option<usize>,

    #[arg(long, default_value_t = 16)]
    max_workers: usize,

    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let paths = DataPaths::from_env();

    let generator = SyntheticDataGenerator::from_paths(&paths)?;
    let opts = PackageOptions {
        package: args.package,
        n_random: args.n_random,
        n_limit: args.n_limit,
        max_workers: args.max_workers,
        seed: args.seed,
    };
    run_generate(&generator, &paths.synthetic_root, &opts)?;
    Ok(())
}
