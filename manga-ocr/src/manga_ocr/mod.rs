mod model;
mod tokenizer;

use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use ndarray::Array4;
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::{
    hub::{ModelFiles, ModelSource},
    Recognizer,
};
pub use model::{GenerationConfig, ImageSize, PreprocessorConfig, VisionEncoderDecoder};
pub use tokenizer::OcrTokenizer;

/// Upper bound on generated tokens, start token included.
pub const MAX_LENGTH: usize = 300;

pub struct MangaOcr {
    model: VisionEncoderDecoder,
    tokenizer: OcrTokenizer,
    preprocessor: PreprocessorConfig,
}

/// How [`MangaOcr::load`] prepares the model.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub force_cpu: bool,
    /// Run one throwaway recognition so the first real image does not pay
    /// for session initialisation.
    pub warm_up: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            force_cpu: false,
            warm_up: true,
        }
    }
}

impl MangaOcr {
    pub async fn load(source: &ModelSource, options: LoadOptions) -> Result<Self> {
        tracing::info!("Loading OCR model from {}", source);
        let files = ModelFiles::resolve(source).await?;
        let mut ocr = Self::from_files(&files, options.force_cpu)?;
        if options.warm_up {
            ocr.warm_up()?;
        }
        tracing::info!("OCR ready");
        Ok(ocr)
    }

    pub fn from_files(files: &ModelFiles, force_cpu: bool) -> Result<Self> {
        let config: GenerationConfig =
            load_json(&files.config).context("failed to parse model config")?;
        let preprocessor: PreprocessorConfig = load_json(&files.preprocessor_config)
            .context("failed to parse preprocessor config")?;
        let tokenizer = OcrTokenizer::load(&files.vocab, &files.special_tokens_map)?;
        tracing::debug!("Tokenizer vocabulary: {} tokens", tokenizer.vocab_size());

        tracing::info!("Using {}", crate::device_name(force_cpu));
        let model =
            VisionEncoderDecoder::load(&files.encoder, &files.decoder, config, force_cpu)?;

        Ok(Self {
            model,
            tokenizer,
            preprocessor,
        })
    }

    pub fn tokenizer(&self) -> &OcrTokenizer {
        &self.tokenizer
    }

    pub fn preprocessor(&self) -> &PreprocessorConfig {
        &self.preprocessor
    }

    #[instrument(level = "debug", skip_all)]
    pub fn inference(&mut self, images: &[DynamicImage]) -> Result<Vec<String>> {
        let mut results = Vec::with_capacity(images.len());

        for img in images {
            let pixel_values = preprocess(img, &self.preprocessor);
            let token_ids = self.model.forward(&pixel_values, MAX_LENGTH)?;
            let text = self.tokenizer.decode(&token_ids)?;
            results.push(post_process(&text));
        }

        Ok(results)
    }

    pub fn recognize_path(&mut self, path: &Path) -> Result<String> {
        let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        self.recognize(&img)
    }
}

impl Recognizer for MangaOcr {
    fn recognize(&mut self, image: &DynamicImage) -> Result<String> {
        let mut texts = self.inference(std::slice::from_ref(image))?;
        Ok(texts.pop().unwrap_or_default())
    }
}

/// Grayscale, resize and normalize an image into a `[1, 3, H, W]` tensor.
pub fn preprocess(img: &DynamicImage, config: &PreprocessorConfig) -> Array4<f32> {
    // all three channels carry the same gray value
    let gray = DynamicImage::ImageRgb8(img.grayscale().to_rgb8());
    let rgb = if config.do_resize {
        let (w, h) = config.size.dims();
        gray.resize_exact(w, h, image::imageops::FilterType::Triangle)
            .to_rgb8()
    } else {
        gray.to_rgb8()
    };

    let (w, h) = rgb.dimensions();
    let mean = config.image_mean;
    let std = config.image_std;

    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            let v = if config.do_normalize {
                (v - mean[c]) / std[c]
            } else {
                v
            };
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }
    tensor
}

/// Normalize decoded text: drop whitespace, unify ellipses, widen half-width
/// characters. Empty output becomes `<no ocr>`.
pub fn post_process(text: &str) -> String {
    let clean = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .replace('\u{2026}', "...");
    let clean = collapse_dots(&clean);
    let clean = halfwidth_to_fullwidth(&clean);

    if clean.trim().is_empty() {
        return "<no ocr>".to_string();
    }
    clean
}

/// Runs of two or more `・`/`.` become the same number of `.`.
fn collapse_dots(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();
    for ch in text.chars() {
        if ch == '.' || ch == '\u{30fb}' {
            run.push(ch);
            continue;
        }
        flush_dots(&mut out, &mut run);
        out.push(ch);
    }
    flush_dots(&mut out, &mut run);
    out
}

fn flush_dots(out: &mut String, run: &mut String) {
    let count = run.chars().count();
    if count >= 2 {
        out.extend(std::iter::repeat('.').take(count));
    } else {
        out.push_str(run);
    }
    run.clear();
}

const HALFWIDTH_KATAKANA: [char; 63] = [
    '。', '「', '」', '、', '・', 'ヲ', 'ァ', 'ィ', 'ゥ', 'ェ', 'ォ', 'ャ', 'ュ', 'ョ', 'ッ', 'ー',
    'ア', 'イ', 'ウ', 'エ', 'オ', 'カ', 'キ', 'ク', 'ケ', 'コ', 'サ', 'シ', 'ス', 'セ', 'ソ', 'タ',
    'チ', 'ツ', 'テ', 'ト', 'ナ', 'ニ', 'ヌ', 'ネ', 'ノ', 'ハ', 'ヒ', 'フ', 'ヘ', 'ホ', 'マ', 'ミ',
    'ム', 'メ', 'モ', 'ヤ', 'ユ', 'ヨ', 'ラ', 'リ', 'ル', 'レ', 'ロ', 'ワ', 'ン', '゛', '゜',
];

/// Map U+FF61..=U+FF9F to the full-width form.
fn widen_katakana(ch: char) -> Option<char> {
    let offset = (ch as u32).checked_sub(0xFF61)?;
    HALFWIDTH_KATAKANA.get(offset as usize).copied()
}

/// Combine a widened kana with its voicing mark, if such a glyph exists.
fn combine_voicing(base: char, mark: char) -> Option<char> {
    let code = base as u32;
    match mark {
        '゛' => {
            let voiced = matches!(code, 0x30AB..=0x30C2 if code % 2 == 1)
                || matches!(code, 0x30C4..=0x30C8 if code % 2 == 0)
                || matches!(code, 0x30CF..=0x30DD if (code - 0x30CF) % 3 == 0);
            if voiced {
                char::from_u32(code + 1)
            } else if base == 'ウ' {
                Some('ヴ')
            } else {
                None
            }
        }
        '゜' if matches!(code, 0x30CF..=0x30DD if (code - 0x30CF) % 3 == 0) => {
            char::from_u32(code + 2)
        }
        _ => None,
    }
}

fn is_halfwidth_kana(ch: char) -> bool {
    ('\u{FF66}'..='\u{FF9D}').contains(&ch)
}

/// Half-width voicing marks only merge into a preceding half-width kana;
/// after anything else they become standalone `゛`/`゜`.
fn halfwidth_to_fullwidth(text: &str) -> String {
    let mut out: Vec<char> = Vec::with_capacity(text.len());
    let mut prev_half_kana = false;
    for ch in text.chars() {
        let wide = match ch {
            '!'..='~' => char::from_u32(ch as u32 + 0xFEE0).unwrap_or(ch),
            ' ' => '\u{3000}',
            '\u{FF61}'..='\u{FF9F}' => widen_katakana(ch).unwrap_or(ch),
            _ => ch,
        };
        let half_mark = ch == '\u{FF9E}' || ch == '\u{FF9F}';
        let merged = half_mark && prev_half_kana;
        prev_half_kana = is_halfwidth_kana(ch);
        if merged {
            if let Some(combined) = out.last().and_then(|&prev| combine_voicing(prev, wide)) {
                out.pop();
                out.push(combined);
                continue;
            }
        }
        out.push(wide);
    }
    out.into_iter().collect()
}

pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_process_removes_whitespace() {
        assert_eq!(post_process("こ ん\nに　ち"), "こんにち");
    }

    #[test]
    fn test_post_process_ellipsis() {
        assert_eq!(post_process("え…"), "え．．．");
        assert_eq!(post_process("あ・・・"), "あ．．．");
    }

    #[test]
    fn test_single_middle_dot_is_kept() {
        assert_eq!(post_process("ア・イ"), "ア・イ");
    }

    #[test]
    fn test_post_process_fullwidth_ascii() {
        assert_eq!(post_process("OK!12"), "ＯＫ！１２");
    }

    #[test]
    fn test_post_process_halfwidth_katakana() {
        assert_eq!(post_process("ｶﾞﾝﾊﾞﾚ"), "ガンバレ");
        assert_eq!(post_process("ﾊﾟﾝ"), "パン");
        assert_eq!(post_process("ｳﾞ"), "ヴ");
        assert_eq!(post_process("ｱﾞ"), "ア゛");
    }

    #[test]
    fn test_voicing_mark_after_fullwidth_kana_stays_separate() {
        assert_eq!(post_process("カﾞ"), "カ゛");
        assert_eq!(post_process("ハﾟ"), "ハ゜");
        assert_eq!(post_process("ｶﾞカﾞ"), "ガカ゛");
        // the mark after a merged pair has no half-width base left
        assert_eq!(post_process("ｶﾞﾞ"), "ガ゛");
    }

    #[test]
    fn test_post_process_empty() {
        assert_eq!(post_process(""), "<no ocr>");
        assert_eq!(post_process(" \n "), "<no ocr>");
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            50,
            30,
            image::Rgb([255, 255, 255]),
        ));
        let tensor = preprocess(&img, &PreprocessorConfig::default());
        assert_eq!(tensor.dim(), (1, 3, 224, 224));
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_preprocess_without_resize() {
        let img = DynamicImage::ImageLuma8(image::GrayImage::new(8, 4));
        let config = PreprocessorConfig {
            do_resize: false,
            ..Default::default()
        };
        let tensor = preprocess(&img, &config);
        assert_eq!(tensor.dim(), (1, 3, 4, 8));
        assert!(tensor.iter().all(|&v| (v + 1.0).abs() < 1e-5));
    }
}
