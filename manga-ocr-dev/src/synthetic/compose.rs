//! Rendered text composited over speech bubbles and page backgrounds.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_filled_rect_mut},
    rect::Rect,
};
use rand::{Rng, RngCore};

use super::{
    css::{get_css, lines_to_html, CssOverrides, CssParams},
    renderer::HtmlRenderer,
};
use crate::{
    augment::{
        Blur, Compose, ElasticTransform, HorizontalFlip, InvertImg, LongestMaxSize,
        RandomBrightnessContrast, RandomRotate90, Resize, Transform,
    },
    data::BackgroundCatalog,
    DevError, Result,
};

pub const MAX_SIZE: u32 = 600;

/// Grayscale image with a separate alpha channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub gray: GrayImage,
    pub alpha: GrayImage,
}

impl Layer {
    pub fn from_rgba(img: &RgbaImage) -> Self {
        let (w, h) = img.dimensions();
        let mut gray = GrayImage::new(w, h);
        let mut alpha = GrayImage::new(w, h);
        for (x, y, p) in img.enumerate_pixels() {
            let [r, g, b, a] = p.0;
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            gray.put_pixel(x, y, Luma([luma.round().min(255.0) as u8]));
            alpha.put_pixel(x, y, Luma([a]));
        }
        Self { gray, alpha }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }
}

/// `background * (1 - a) + layer * a`, truncated to u8.
pub fn blend(layer: &Layer, background: &GrayImage) -> GrayImage {
    let (w, h) = layer.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let a = layer.alpha.get_pixel(x, y)[0] as f32 / 255.0;
        let fg = layer.gray.get_pixel(x, y)[0] as f32;
        let bg = background.get_pixel(x, y)[0] as f32;
        Luma([(bg * (1.0 - a) + fg * a) as u8])
    })
}

/// Crop to the bounding box of non-transparent pixels, then pad with `margin`
/// transparent pixels on every side. `None` when nothing is visible.
pub fn crop_by_alpha(img: &RgbaImage, margin: u32) -> Option<RgbaImage> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in img.enumerate_pixels() {
        if p[3] > 0 {
            let (x0, y0, x1, y1) = bounds.get_or_insert((x, y, x, y));
            *x0 = (*x0).min(x);
            *y0 = (*y0).min(y);
            *x1 = (*x1).max(x);
            *y1 = (*y1).max(y);
        }
    }
    let (x0, y0, x1, y1) = bounds?;
    let (w, h) = (x1 - x0 + 1, y1 - y0 + 1);

    let mut out = RgbaImage::new(w + 2 * margin, h + 2 * margin);
    image::imageops::replace(
        &mut out,
        &image::imageops::crop_imm(img, x0, y0, w, h).to_image(),
        margin as i64,
        margin as i64,
    );
    Some(out)
}

/// Filled rectangle with corners rounded by `radius` pixels.
fn fill_rounded_rect(img: &mut GrayImage, (x0, y0, x1, y1): (i32, i32, i32, i32), radius: i32, value: u8) {
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let color = Luma([value]);
    let r = radius.clamp(0, (x1 - x0).min(y1 - y0) / 2);

    let rects = [
        (x0 + r, y0, x1 - x0 - 2 * r, y1 - y0),
        (x0, y0 + r, x1 - x0, y1 - y0 - 2 * r),
    ];
    for (x, y, w, h) in rects {
        if w > 0 && h > 0 {
            draw_filled_rect_mut(img, Rect::at(x, y).of_size(w as u32, h as u32), color);
        }
    }
    if r > 0 {
        for (cx, cy) in [
            (x0 + r, y0 + r),
            (x1 - r, y0 + r),
            (x0 + r, y1 - r),
            (x1 - r, y1 - r),
        ] {
            draw_filled_circle_mut(img, (cx, cy), r, color);
        }
    }
}

/// White rounded bubble with a black contour of `thickness` px.
/// `radius` is the corner radius as a fraction of half the shorter side.
pub fn draw_bubble(
    (w, h): (u32, u32),
    rect: (i32, i32, i32, i32),
    radius: f32,
    thickness: i32,
) -> Layer {
    let (x0, y0, x1, y1) = rect;
    let corner = (radius.min(1.0) * (x1 - x0).min(y1 - y0) as f32 / 2.0) as i32;

    let mut gray = GrayImage::new(w, h);
    let mut alpha = GrayImage::new(w, h);
    fill_rounded_rect(&mut alpha, rect, corner, 255);
    fill_rounded_rect(&mut gray, rect, corner, 0);
    fill_rounded_rect(
        &mut gray,
        (x0 + thickness, y0 + thickness, x1 - thickness, y1 - thickness),
        corner - thickness,
        255,
    );
    Layer { gray, alpha }
}

/// Crop `img` to `[ymin, ymax) x [xmin, xmax)` clamped to its bounds.
fn crop_clamped(img: &GrayImage, ymin: i32, ymax: i32, xmin: i32, xmax: i32) -> GrayImage {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let (x0, x1) = (xmin.clamp(0, w), xmax.clamp(0, w));
    let (y0, y1) = (ymin.clamp(0, h), ymax.clamp(0, h));
    if x1 <= x0 || y1 <= y0 {
        return img.clone();
    }
    image::imageops::crop_imm(img, x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
        .to_image()
}

/// Box `m0` px inside the image, pushed outwards by a random fraction of the shorter side.
fn jittered_box<R: Rng + ?Sized>(
    (w, h): (u32, u32),
    m0: i32,
    range: (f32, f32),
    rng: &mut R,
) -> (i32, i32, i32, i32) {
    let min_side = w.min(h) as f32;
    let mut offset = || (min_side * rng.random_range(range.0..range.1)) as i32;
    let ymin = m0 - offset();
    let ymax = h as i32 - m0 + offset();
    let xmin = m0 - offset();
    let xmax = w as i32 - m0 + offset();
    (xmin, ymin, xmax, ymax)
}

/// Text rendering plus background compositing.
pub struct Renderer {
    html: Box<dyn HtmlRenderer>,
    backgrounds: BackgroundCatalog,
    max_size: u32,
}

impl Renderer {
    pub fn new(html: Box<dyn HtmlRenderer>, backgrounds: BackgroundCatalog) -> Self {
        Self {
            html,
            backgrounds,
            max_size: MAX_SIZE,
        }
    }

    pub fn render(
        &self,
        lines: &[String],
        overrides: &CssOverrides,
        rng: &mut dyn RngCore,
    ) -> Result<(GrayImage, CssParams)> {
        let (img, params) = self.render_text(lines, overrides, rng)?;
        let img = self.render_background(&img, rng)?;
        let img = LongestMaxSize {
            max_size: self.max_size,
        }
        .apply(&img, rng);
        Ok((img, params))
    }

    /// Render text on a transparent background.
    pub fn render_text(
        &self,
        lines: &[String],
        overrides: &CssOverrides,
        rng: &mut dyn RngCore,
    ) -> Result<(RgbaImage, CssParams)> {
        let mut params = CssParams::random(rng);
        overrides.apply(&mut params);
        let css = get_css(&params);

        // rough estimate, the image is cropped to the text later
        let max_len = lines.iter().map(|l| l.chars().count()).max().unwrap_or(1).max(1);
        let font = params.font_size as f32;
        let mut size = (
            (max_len as f32 * font * 1.5) as u32,
            (lines.len().max(1) as f32 * font * (3.0 + params.line_height)) as u32,
        );
        if params.vertical {
            size = (size.1, size.0);
        }

        let img = self.html.render(&lines_to_html(lines), &css, size)?;
        Ok((img, params))
    }

    /// Put rendered text over a random background, optionally inside a bubble,
    /// and crop with a random margin.
    pub fn render_background(&self, img: &RgbaImage, rng: &mut dyn RngCore) -> Result<GrayImage> {
        let draw_bubble_p = rng.random::<f32>() < 0.7;

        let m0 = (img.width().min(img.height()) as f32 * 0.3) as u32;
        let cropped = crop_by_alpha(img, m0)
            .ok_or_else(|| DevError::Render("rendered text is empty".into()))?;
        let mut text = Layer::from_rgba(&cropped);
        let (w, h) = text.dimensions();
        let m0 = m0 as i32;

        let background = self
            .backgrounds
            .sample(rng)
            .ok_or_else(|| DevError::Render("no background images".into()))?;
        let background = image::open(&background.path)?.to_luma8();
        let mut background = Compose::new()
            .then(HorizontalFlip, 0.5)
            .then(RandomRotate90, 0.5)
            .then(InvertImg, 0.5)
            .then(
                RandomBrightnessContrast {
                    brightness_limit: (-0.2, 0.4),
                    contrast_limit: (-0.8, -0.3),
                },
                if draw_bubble_p { 0.5 } else { 1.0 },
            )
            .then(Blur { blur_limit: (3, 5) }, 0.3)
            .always(Resize {
                width: w,
                height: h,
            })
            .apply(&background, rng);

        if draw_bubble_p {
            let radius = rng.random_range(0.7..1.0);
            let thickness = rng.random_range(1..=3);
            let elastic = ElasticTransform {
                alpha: rng.random_range(60..100) as f32,
                sigma: rng.random_range(10..15) as f32,
            };

            let rect = jittered_box((w, h), m0, (0.07, 0.12), rng);
            let mut bubble = draw_bubble((w, h), rect, radius, thickness);
            if rng.random::<f32>() < 0.8 {
                let mut warped = elastic.apply_layers(&[&bubble.gray, &bubble.alpha], rng);
                if let (Some(alpha), Some(gray)) = (warped.pop(), warped.pop()) {
                    bubble = Layer { gray, alpha };
                }
            }
            background = blend(&bubble, &background);
        } else if rng.random::<f32>() < 0.5 {
            for p in text.gray.pixels_mut() {
                p[0] = 255 - p[0];
            }
        }

        let img = blend(&text, &background);

        let (xmin, ymin, xmax, ymax) = jittered_box((w, h), m0, (0.01, 0.2), rng);
        Ok(crop_clamped(&img, ymin, ymax, xmin, xmax))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_crop_by_alpha() {
        let mut img = RgbaImage::new(20, 10);
        img.put_pixel(5, 2, Rgba([0, 0, 0, 255]));
        img.put_pixel(8, 6, Rgba([0, 0, 0, 128]));

        let out = crop_by_alpha(&img, 3).unwrap();
        assert_eq!(out.dimensions(), (4 + 6, 5 + 6));
        assert_eq!(out.get_pixel(3, 3)[3], 255);
        assert_eq!(out.get_pixel(0, 0)[3], 0);

        assert!(crop_by_alpha(&RgbaImage::new(4, 4), 2).is_none());
    }

    #[test]
    fn test_blend() {
        let layer = Layer {
            gray: GrayImage::from_pixel(2, 1, Luma([0])),
            alpha: GrayImage::from_raw(2, 1, vec![255, 0]).unwrap(),
        };
        let bg = GrayImage::from_pixel(2, 1, Luma([200]));
        let out = blend(&layer, &bg);
        assert_eq!(out.as_raw(), &vec![0, 200]);
    }

    #[test]
    fn test_bubble_layers() {
        let bubble = draw_bubble((60, 40), (10, 10, 50, 30), 1.0, 2);
        // center is white and opaque
        assert_eq!(bubble.gray.get_pixel(30, 20)[0], 255);
        assert_eq!(bubble.alpha.get_pixel(30, 20)[0], 255);
        // contour is black
        assert_eq!(bubble.gray.get_pixel(30, 10)[0], 0);
        // outside is transparent
        assert_eq!(bubble.alpha.get_pixel(2, 2)[0], 0);
        assert_eq!(bubble.alpha.get_pixel(10, 10)[0], 0, "corner is rounded");
    }

    #[test]
    fn test_crop_clamped() {
        let img = GrayImage::new(10, 8);
        assert_eq!(crop_clamped(&img, -3, 20, 2, 5).dimensions(), (3, 8));
    }

    #[test]
    fn test_layer_from_rgba() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 40]));
        let layer = Layer::from_rgba(&img);
        assert_eq!(layer.gray.get_pixel(0, 0)[0], 255);
        assert_eq!(layer.alpha.get_pixel(0, 0)[0], 40);
    }
}
