//! Data side of training: datasets of labelled crops and evaluation metrics.

pub mod dataset;
pub mod metrics;

pub use dataset::{load_entries, Entry, Item, MangaDataset, IGNORE_INDEX};
pub use metrics::Metrics;
