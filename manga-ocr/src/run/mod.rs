//! Watch the clipboard or a directory for new images and write out the recognized text.

mod sink;
mod source;

use std::{
    future::Future,
    path::{Path, PathBuf},
    str::FromStr,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use image::DynamicImage;

use crate::Recognizer;
pub use sink::{ClipboardSink, TextFileSink, TextSink};
pub use source::{ClipboardSource, DirectorySource, ImageSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFrom {
    Clipboard,
    Directory(PathBuf),
}

impl FromStr for ReadFrom {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "clipboard" {
            return Ok(Self::Clipboard);
        }
        let path = Path::new(s);
        if !path.is_dir() {
            bail!(r#"read_from must be either "clipboard" or a path to a directory"#);
        }
        Ok(Self::Directory(path.to_path_buf()))
    }
}

impl ReadFrom {
    pub fn open(&self, verbose: bool) -> Result<Box<dyn ImageSource>> {
        Ok(match self {
            Self::Clipboard => Box::new(ClipboardSource::new(verbose)?),
            Self::Directory(dir) => Box::new(DirectorySource::new(dir)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTo {
    Clipboard,
    TextFile(PathBuf),
}

impl FromStr for WriteTo {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "clipboard" {
            return Ok(Self::Clipboard);
        }
        let path = Path::new(s);
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            bail!(r#"write_to must be either "clipboard" or a path to a text file"#);
        }
        Ok(Self::TextFile(path.to_path_buf()))
    }
}

impl WriteTo {
    pub fn open(&self) -> Result<Box<dyn TextSink>> {
        Ok(match self {
            Self::Clipboard => Box::new(ClipboardSink::new()?),
            Self::TextFile(path) => Box::new(TextFileSink::new(path)),
        })
    }
}

pub fn process_and_write_results<R: Recognizer + ?Sized>(
    ocr: &mut R,
    img: &DynamicImage,
    sink: &mut dyn TextSink,
) -> Result<String> {
    let start = Instant::now();
    let text = ocr.recognize(img)?;
    tracing::info!(
        "Text recognized in {:.3} s: {}",
        start.elapsed().as_secs_f64(),
        text
    );
    sink.write(&text)?;
    Ok(text)
}

/// Poll `source` every `delay` until `shutdown` resolves.
pub async fn run_until<R, F>(
    ocr: &mut R,
    source: &mut dyn ImageSource,
    sink: &mut dyn TextSink,
    delay: Duration,
    shutdown: F,
) where
    R: Recognizer + ?Sized,
    F: Future,
{
    tokio::pin!(shutdown);
    loop {
        for img in source.poll() {
            if let Err(e) = process_and_write_results(ocr, &img, sink) {
                tracing::warn!("Failed to process image: {:#}", e);
            }
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Run the watcher until Ctrl-C.
pub async fn run<R: Recognizer + ?Sized>(
    ocr: &mut R,
    read_from: &ReadFrom,
    write_to: &WriteTo,
    delay: Duration,
    verbose: bool,
) -> Result<()> {
    let mut source = read_from.open(verbose)?;
    let mut sink = write_to.open()?;

    match read_from {
        ReadFrom::Clipboard => tracing::info!("Reading from clipboard"),
        ReadFrom::Directory(dir) => tracing::info!("Reading from directory {}", dir.display()),
    }
    match write_to {
        WriteTo::Clipboard => tracing::info!("Writing to clipboard"),
        WriteTo::TextFile(path) => tracing::info!("Writing to file {}", path.display()),
    }

    run_until(ocr, source.as_mut(), sink.as_mut(), delay, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;

    tracing::info!("Stopped");
    Ok(())
}
