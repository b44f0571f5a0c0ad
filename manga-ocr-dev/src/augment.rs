//! Randomized image augmentation over grayscale images.
//!
//! Every op is a [`Transform`]; [`Compose`] applies a list of ops, each with its
//! own probability, and [`OneOf`] picks a single op from a list. Geometric ops
//! sample outside the image by repeating the nearest edge pixel.

use std::io::Cursor;

use image::{
    codecs::jpeg::JpegEncoder, imageops, imageops::FilterType, GrayImage, ImageBuffer, Luma,
};
use imageproc::geometric_transformations::Projection;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};

pub trait Transform: Send + Sync {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage;
}

/// Ops applied in order, each with probability `p`.
#[derive(Default)]
pub struct Compose {
    steps: Vec<(Box<dyn Transform>, f32)>,
}

impl Compose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, transform: impl Transform + 'static, p: f32) -> Self {
        self.steps.push((Box::new(transform), p));
        self
    }

    pub fn always(self, transform: impl Transform + 'static) -> Self {
        self.then(transform, 1.0)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Transform for Compose {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        let mut out = img.clone();
        for (transform, p) in &self.steps {
            if rng.random::<f32>() < *p {
                out = transform.apply(&out, rng);
            }
        }
        out
    }
}

/// Applies one op chosen uniformly at random.
pub struct OneOf {
    options: Vec<Box<dyn Transform>>,
}

impl OneOf {
    pub fn new(options: Vec<Box<dyn Transform>>) -> Self {
        Self { options }
    }
}

impl Transform for OneOf {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        if self.options.is_empty() {
            return img.clone();
        }
        let idx = rng.random_range(0..self.options.len());
        self.options[idx].apply(img, rng)
    }
}

fn uniform(rng: &mut dyn RngCore, (lo, hi): (f32, f32)) -> f32 {
    if hi > lo {
        rng.random_range(lo..hi)
    } else {
        lo
    }
}

/// Bilinear sample with coordinates clamped to the image.
fn sample(img: &GrayImage, x: f32, y: f32) -> f32 {
    let (w, h) = img.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p = |x, y| img.get_pixel(x, y)[0] as f32;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Build an image of the same size where each output pixel is read from `source(x, y)`.
fn remap(img: &GrayImage, source: impl Fn(f32, f32) -> (f32, f32)) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    GrayImage::from_fn(w, h, |x, y| {
        let (sx, sy) = source(x as f32, y as f32);
        Luma([sample(img, sx, sy).round().clamp(0.0, 255.0) as u8])
    })
}

fn map_pixels(img: &GrayImage, f: impl Fn(u8) -> u8) -> GrayImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = f(pixel[0]);
    }
    out
}

/// Rotate about the center by an angle drawn from `[-limit, limit]` degrees.
pub struct Rotate {
    pub limit: f32,
}

impl Transform for Rotate {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        let angle = uniform(rng, (-self.limit, self.limit)).to_radians();
        let (sin, cos) = angle.sin_cos();
        let cx = (img.width() as f32 - 1.0) / 2.0;
        let cy = (img.height() as f32 - 1.0) / 2.0;
        remap(img, |x, y| {
            let dx = x - cx;
            let dy = y - cy;
            (cx + cos * dx + sin * dy, cy - sin * dx + cos * dy)
        })
    }
}

/// Move each corner by a random fraction of the image size drawn from `scale`
/// and warp the image accordingly.
pub struct Perspective {
    pub scale: (f32, f32),
}

impl Transform for Perspective {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        let w = img.width() as f32;
        let h = img.height() as f32;
        let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
        let mut moved = corners;
        for (x, y) in moved.iter_mut() {
            let sx = if *x > 0.0 { -1.0 } else { 1.0 };
            let sy = if *y > 0.0 { -1.0 } else { 1.0 };
            *x += sx * uniform(rng, self.scale) * w;
            *y += sy * uniform(rng, self.scale) * h;
        }

        // maps output coordinates back into the source image
        match Projection::from_control_points(moved, corners) {
            Some(projection) => remap(img, |x, y| projection * (x, y)),
            None => img.clone(),
        }
    }
}

pub struct InvertImg;

impl Transform for InvertImg {
    fn apply(&self, img: &GrayImage, _rng: &mut dyn RngCore) -> GrayImage {
        map_pixels(img, |v| 255 - v)
    }
}

/// Shrink by a random factor and scale back up, with the same filter both ways.
pub struct Downscale {
    pub scale: (f32, f32),
    pub filter: FilterType,
}

impl Transform for Downscale {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        let (w, h) = img.dimensions();
        let scale = uniform(rng, self.scale);
        let sw = ((w as f32 * scale) as u32).max(1);
        let sh = ((h as f32 * scale) as u32).max(1);
        let small = imageops::resize(img, sw, sh, self.filter);
        imageops::resize(&small, w, h, self.filter)
    }
}

/// Box blur with an odd kernel size drawn from `blur_limit`.
pub struct Blur {
    pub blur_limit: (u32, u32),
}

impl Default for Blur {
    fn default() -> Self {
        Self { blur_limit: (3, 7) }
    }
}

impl Transform for Blur {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        let hi = self.blur_limit.1.max(3);
        let lo = self.blur_limit.0.clamp(3, hi);
        let ksize = rng.random_range(lo..=hi) | 1;
        imageproc::filter::box_filter(img, ksize / 2, ksize / 2)
    }
}

/// Blend the image with its sharpened version.
pub struct Sharpen {
    pub alpha: (f32, f32),
    pub lightness: (f32, f32),
}

impl Default for Sharpen {
    fn default() -> Self {
        Self {
            alpha: (0.2, 0.5),
            lightness: (0.5, 1.0),
        }
    }
}

impl Transform for Sharpen {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        let alpha = uniform(rng, self.alpha);
        let lightness = uniform(rng, self.lightness);
        let identity = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let sharp = [-1.0, -1.0, -1.0, -1.0, 8.0 + lightness, -1.0, -1.0, -1.0, -1.0];
        let mut kernel = [0.0f32; 9];
        for (k, (i, s)) in kernel.iter_mut().zip(identity.iter().zip(sharp.iter())) {
            *k = (1.0 - alpha) * i + alpha * s;
        }
        let out: GrayImage = imageproc::filter::filter3x3(img, &kernel);
        out
    }
}

/// `v * (1 + contrast) + brightness * 255`, with both factors drawn from their limits.
pub struct RandomBrightnessContrast {
    pub brightness_limit: (f32, f32),
    pub contrast_limit: (f32, f32),
}

impl RandomBrightnessContrast {
    pub fn symmetric(brightness: f32, contrast: f32) -> Self {
        Self {
            brightness_limit: (-brightness, brightness),
            contrast_limit: (-contrast, contrast),
        }
    }
}

impl Default for RandomBrightnessContrast {
    fn default() -> Self {
        Self::symmetric(0.2, 0.2)
    }
}

impl Transform for RandomBrightnessContrast {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        let alpha = 1.0 + uniform(rng, self.contrast_limit);
        let beta = uniform(rng, self.brightness_limit) * 255.0;
        map_pixels(img, |v| (v as f32 * alpha + beta).round().clamp(0.0, 255.0) as u8)
    }
}

/// Additive gaussian noise with variance drawn from `var_limit`.
pub struct GaussNoise {
    pub var_limit: (f32, f32),
}

impl Transform for GaussNoise {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        let sigma = uniform(rng, self.var_limit).sqrt();
        let Ok(normal) = Normal::new(0.0f32, sigma) else {
            return img.clone();
        };
        let mut out = img.clone();
        for pixel in out.pixels_mut() {
            let noisy = pixel[0] as f32 + normal.sample(rng);
            pixel[0] = noisy.round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

/// Round-trip through JPEG at a quality drawn from `quality`.
pub struct ImageCompression {
    pub quality: (u8, u8),
}

impl Transform for ImageCompression {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        let (lo, hi) = self.quality;
        let quality = rng.random_range(lo.min(hi)..=hi).clamp(1, 100);

        let mut buf = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        if let Err(e) = img.write_with_encoder(encoder) {
            tracing::debug!("JPEG encoding failed: {}", e);
            return img.clone();
        }
        match image::load(Cursor::new(buf), image::ImageFormat::Jpeg) {
            Ok(decoded) => decoded.to_luma8(),
            Err(e) => {
                tracing::debug!("JPEG decoding failed: {}", e);
                img.clone()
            }
        }
    }
}

pub struct HorizontalFlip;

impl Transform for HorizontalFlip {
    fn apply(&self, img: &GrayImage, _rng: &mut dyn RngCore) -> GrayImage {
        imageops::flip_horizontal(img)
    }
}

/// Rotate by 0, 90, 180 or 270 degrees.
pub struct RandomRotate90;

impl Transform for RandomRotate90 {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        match rng.random_range(0..4) {
            0 => img.clone(),
            1 => imageops::rotate90(img),
            2 => imageops::rotate180(img),
            _ => imageops::rotate270(img),
        }
    }
}

pub struct Resize {
    pub width: u32,
    pub height: u32,
}

impl Transform for Resize {
    fn apply(&self, img: &GrayImage, _rng: &mut dyn RngCore) -> GrayImage {
        imageops::resize(
            img,
            self.width.max(1),
            self.height.max(1),
            FilterType::Triangle,
        )
    }
}

/// Scale so the longer side equals `max_size`, keeping the aspect ratio.
pub struct LongestMaxSize {
    pub max_size: u32,
}

impl Transform for LongestMaxSize {
    fn apply(&self, img: &GrayImage, _rng: &mut dyn RngCore) -> GrayImage {
        let (w, h) = img.dimensions();
        let longest = w.max(h);
        if longest == 0 || longest == self.max_size {
            return img.clone();
        }
        let scale = self.max_size as f32 / longest as f32;
        let nw = ((w as f32 * scale).round() as u32).max(1);
        let nh = ((h as f32 * scale).round() as u32).max(1);
        imageops::resize(img, nw, nh, FilterType::Triangle)
    }
}

/// Smooth random displacement field: uniform noise blurred with `sigma`, scaled by `alpha`.
pub struct ElasticTransform {
    pub alpha: f32,
    pub sigma: f32,
}

impl ElasticTransform {
    fn field(&self, w: u32, h: u32, rng: &mut dyn RngCore) -> Vec<f32> {
        // u16 keeps enough precision for the blurred noise
        let noise: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_fn(w, h, |_, _| {
            Luma([rng.random_range(0..=u16::MAX)])
        });
        let smooth = imageproc::filter::gaussian_blur_f32(&noise, self.sigma.max(0.1));
        smooth
            .pixels()
            .map(|p| (p[0] as f32 / u16::MAX as f32 * 2.0 - 1.0) * self.alpha)
            .collect()
    }

    /// Warp several same-sized layers with one shared displacement field.
    pub fn apply_layers(&self, layers: &[&GrayImage], rng: &mut dyn RngCore) -> Vec<GrayImage> {
        let Some(first) = layers.first() else {
            return Vec::new();
        };
        let (w, h) = first.dimensions();
        if w == 0 || h == 0 {
            return layers.iter().map(|l| (*l).clone()).collect();
        }
        let dx = self.field(w, h, rng);
        let dy = self.field(w, h, rng);
        layers
            .iter()
            .map(|layer| {
                remap(layer, |x, y| {
                    let idx = y as usize * w as usize + x as usize;
                    (x + dx[idx], y + dy[idx])
                })
            })
            .collect()
    }
}

impl Transform for ElasticTransform {
    fn apply(&self, img: &GrayImage, rng: &mut dyn RngCore) -> GrayImage {
        self.apply_layers(&[img], rng)
            .pop()
            .unwrap_or_else(|| img.clone())
    }
}

/// Augmentation used for most training samples.
pub fn medium() -> Compose {
    Compose::new()
        .then(Rotate { limit: 5.0 }, 0.2)
        .then(Perspective { scale: (0.01, 0.05) }, 0.2)
        .then(InvertImg, 0.05)
        .then(
            OneOf::new(vec![
                Box::new(Downscale {
                    scale: (0.25, 0.5),
                    filter: FilterType::Triangle,
                }),
                Box::new(Downscale {
                    scale: (0.25, 0.5),
                    filter: FilterType::Nearest,
                }),
            ]),
            0.1,
        )
        .then(Blur::default(), 0.2)
        .then(Sharpen::default(), 0.2)
        .then(RandomBrightnessContrast::default(), 0.5)
        .then(
            GaussNoise {
                var_limit: (50.0, 200.0),
            },
            0.3,
        )
        .then(ImageCompression { quality: (0, 30) }, 0.1)
}

/// Stronger augmentation used for a small share of samples.
pub fn heavy() -> Compose {
    Compose::new()
        .then(Rotate { limit: 10.0 }, 0.2)
        .then(Perspective { scale: (0.01, 0.05) }, 0.2)
        .then(InvertImg, 0.05)
        .then(
            OneOf::new(vec![
                Box::new(Downscale {
                    scale: (0.1, 0.2),
                    filter: FilterType::Triangle,
                }),
                Box::new(Downscale {
                    scale: (0.1, 0.2),
                    filter: FilterType::Nearest,
                }),
            ]),
            0.1,
        )
        .then(Blur { blur_limit: (4, 9) }, 0.5)
        .then(Sharpen::default(), 0.5)
        .always(RandomBrightnessContrast::symmetric(0.8, 0.8))
        .then(
            GaussNoise {
                var_limit: (1000.0, 10000.0),
            },
            0.3,
        )
        .then(ImageCompression { quality: (0, 10) }, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    #[test]
    fn test_invert() {
        let mut rng = StdRng::seed_from_u64(0);
        let img = GrayImage::from_pixel(3, 2, Luma([10]));
        let out = InvertImg.apply(&img, &mut rng);
        assert!(out.pixels().all(|p| p[0] == 245));
    }

    #[test]
    fn test_compose_probability() {
        let mut rng = StdRng::seed_from_u64(1);
        let img = GrayImage::from_pixel(4, 4, Luma([0]));

        let never = Compose::new().then(InvertImg, 0.0);
        assert_eq!(never.apply(&img, &mut rng), img);

        let always = Compose::new().always(InvertImg).always(InvertImg);
        assert_eq!(always.apply(&img, &mut rng), img);
    }

    #[test]
    fn test_shape_preserving_ops() {
        let mut rng = StdRng::seed_from_u64(2);
        let img = gradient(40, 24);
        let ops: Vec<Box<dyn Transform>> = vec![
            Box::new(Rotate { limit: 10.0 }),
            Box::new(Perspective { scale: (0.01, 0.05) }),
            Box::new(Downscale {
                scale: (0.1, 0.2),
                filter: FilterType::Nearest,
            }),
            Box::new(Blur { blur_limit: (4, 9) }),
            Box::new(Sharpen::default()),
            Box::new(RandomBrightnessContrast::symmetric(0.8, 0.8)),
            Box::new(GaussNoise {
                var_limit: (50.0, 200.0),
            }),
            Box::new(ImageCompression { quality: (0, 30) }),
            Box::new(HorizontalFlip),
            Box::new(ElasticTransform {
                alpha: 60.0,
                sigma: 10.0,
            }),
        ];
        for op in ops {
            assert_eq!(op.apply(&img, &mut rng).dimensions(), (40, 24));
        }
    }

    #[test]
    fn test_rotate_zero_is_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        let img = gradient(9, 5);
        assert_eq!(Rotate { limit: 0.0 }.apply(&img, &mut rng), img);
    }

    #[test]
    fn test_rotate_replicates_edges() {
        let mut rng = StdRng::seed_from_u64(4);
        let img = GrayImage::from_pixel(20, 20, Luma([200]));
        let out = Rotate { limit: 45.0 }.apply(&img, &mut rng);
        assert!(out.pixels().all(|p| p[0] == 200), "no black corners");
    }

    #[test]
    fn test_rotate90_dims() {
        let mut rng = StdRng::seed_from_u64(5);
        let img = gradient(10, 4);
        for _ in 0..8 {
            let dims = RandomRotate90.apply(&img, &mut rng).dimensions();
            assert!(dims == (10, 4) || dims == (4, 10));
        }
    }

    #[test]
    fn test_longest_max_size() {
        let mut rng = StdRng::seed_from_u64(6);
        let out = LongestMaxSize { max_size: 600 }.apply(&gradient(300, 100), &mut rng);
        assert_eq!(out.dimensions(), (600, 200));
        let out = LongestMaxSize { max_size: 600 }.apply(&gradient(100, 1200), &mut rng);
        assert_eq!(out.dimensions(), (50, 600));
    }

    #[test]
    fn test_elastic_layers_share_field() {
        let mut rng = StdRng::seed_from_u64(7);
        let img = gradient(32, 32);
        let warped = ElasticTransform {
            alpha: 80.0,
            sigma: 12.0,
        }
        .apply_layers(&[&img, &img], &mut rng);
        assert_eq!(warped.len(), 2);
        assert_eq!(warped[0], warped[1]);
    }

    #[test]
    fn test_presets_run() {
        let mut rng = StdRng::seed_from_u64(8);
        let img = gradient(64, 48);
        for _ in 0..5 {
            assert_eq!(medium().apply(&img, &mut rng).dimensions(), (64, 48));
            assert_eq!(heavy().apply(&img, &mut rng).dimensions(), (64, 48));
        }
    }
}
