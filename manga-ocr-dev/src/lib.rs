//! Data tooling for training the manga OCR model: synthetic text rendering,
//! Manga109 preparation, augmentation, datasets and evaluation metrics.

pub mod augment;
pub mod charsets;
pub mod data;
pub mod env;
pub mod error;
pub mod synthetic;
pub mod training;

pub use env::DataPaths;
pub use error::{DevError, Result};

/// Log filter used by every binary of this crate unless `RUST_LOG` is set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

pub(crate) fn progress_bar(len: usize, msg: &'static str) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new(len as u64);
    if let Ok(style) = indicatif::ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(msg);
    pb
}
