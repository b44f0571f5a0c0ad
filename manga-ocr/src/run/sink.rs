use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::{Context, Result};

/// Destination for recognized text.
pub trait TextSink {
    fn write(&mut self, text: &str) -> Result<()>;
}

pub struct ClipboardSink {
    clipboard: arboard::Clipboard,
}

impl ClipboardSink {
    pub fn new() -> Result<Self> {
        let clipboard = arboard::Clipboard::new().context("failed to open clipboard")?;
        Ok(Self { clipboard })
    }
}

impl TextSink for ClipboardSink {
    fn write(&mut self, text: &str) -> Result<()> {
        self.clipboard
            .set_text(text)
            .context("failed to copy text to clipboard")
    }
}

/// Appends one line per result.
pub struct TextFileSink {
    path: PathBuf,
}

impl TextFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TextSink for TextFileSink {
    fn write(&mut self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{}", text)?;
        Ok(())
    }
}
