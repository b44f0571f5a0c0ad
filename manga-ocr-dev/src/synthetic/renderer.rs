use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use image::RgbaImage;

use crate::{DevError, Result};

/// Lays out an HTML document and rasterizes it.
pub trait HtmlRenderer: Send + Sync {
    /// Screenshot of `html` styled with `css` in a `size.0` x `size.1` viewport,
    /// on a transparent background.
    fn render(&self, html: &str, css: &str, size: (u32, u32)) -> Result<RgbaImage>;
}

const CHROME_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Headless Chrome/Chromium driven through its `--screenshot` flag.
#[derive(Debug, Clone)]
pub struct ChromeRenderer {
    binary: PathBuf,
    work_dir: PathBuf,
}

impl ChromeRenderer {
    /// Use `$CHROME_PATH`, or the first Chrome/Chromium binary found on `$PATH`.
    pub fn new() -> Result<Self> {
        if let Some(path) = std::env::var_os("CHROME_PATH") {
            return Ok(Self::with_binary(path));
        }
        let search = std::env::var_os("PATH").unwrap_or_default();
        for dir in std::env::split_paths(&search) {
            for name in CHROME_CANDIDATES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    tracing::debug!("Using browser {}", candidate.display());
                    return Ok(Self::with_binary(candidate));
                }
            }
        }
        Err(DevError::Render(
            "no Chrome/Chromium binary found; set CHROME_PATH".into(),
        ))
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: std::env::temp_dir(),
        }
    }

    fn screenshot(&self, page: &Path, out: &Path, size: (u32, u32)) -> Result<RgbaImage> {
        let status = Command::new(&self.binary)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg("--default-background-color=00000000")
            .arg(format!("--window-size={},{}", size.0, size.1))
            .arg(format!("--screenshot={}", out.display()))
            .arg(format!("file://{}", page.display()))
            .output()
            .map_err(|e| {
                DevError::Render(format!(
                    "failed to invoke {}: {}",
                    self.binary.display(),
                    e
                ))
            })?
            .status;

        if !status.success() {
            return Err(DevError::Render(format!(
                "browser failed with status: {status}"
            )));
        }
        Ok(image::open(out)?.to_rgba8())
    }
}

/// Full document with the stylesheet inlined in `<head>`.
pub fn inline_css(html: &str, css: &str) -> String {
    let head = format!("<html><head><meta charset=\"utf-8\"><style>{}</style></head>", css);
    if html.contains("<html>") {
        html.replacen("<html>", &head, 1)
    } else {
        format!("{}<body>{}</body></html>", head, html)
    }
}

impl HtmlRenderer for ChromeRenderer {
    fn render(&self, html: &str, css: &str, size: (u32, u32)) -> Result<RgbaImage> {
        let stem = uuid::Uuid::new_v4().to_string();
        let page = self.work_dir.join(format!("{stem}.html"));
        let out = self.work_dir.join(format!("{stem}.png"));

        fs::write(&page, inline_css(html, css))?;
        let result = self.screenshot(&page, &out, size);

        let _ = fs::remove_file(&page);
        let _ = fs::remove_file(&out);
        result
    }
}
