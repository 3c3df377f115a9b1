use crate::config::PreprocessConfig;
use crate::error::{KapchaError, Result};
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};

/// Denoising filter applied as step 4 of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoiseFilter {
    #[default]
    Median,
    Gaussian,
    None,
}

impl NoiseFilter {
    fn as_str(&self) -> &'static str {
        match self {
            NoiseFilter::Median => "median",
            NoiseFilter::Gaussian => "gaussian",
            NoiseFilter::None => "none",
        }
    }
}

/// Preprocessing options, applied in a fixed order:
/// grayscale, contrast, sharpness, noise filter, threshold.
///
/// The order is part of the contract; identical (image, options) always
/// produce identical output bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Convert to single-channel luminance before enhancement.
    pub grayscale: bool,
    /// Contrast multiplier about the mean luminance. 1.0 is identity.
    pub contrast: f32,
    /// Unsharp-mask strength. 1.0 is identity, 0.0 fully blurred.
    pub sharpness: f32,
    pub noise: NoiseFilter,
    /// Binarization cutoff; pixels above become white, the rest black.
    /// Unset skips the step.
    pub threshold: Option<u8>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            grayscale: true,
            contrast: 2.0,
            sharpness: 1.5,
            noise: NoiseFilter::Median,
            threshold: None,
        }
    }
}

impl PreprocessOptions {
    /// Full pipeline with binarization, for noisy or low-contrast captchas.
    pub fn aggressive() -> Self {
        Self {
            grayscale: true,
            contrast: 2.0,
            sharpness: 1.5,
            noise: NoiseFilter::Median,
            threshold: Some(140),
        }
    }

    /// Minimal touch-up for clean inputs, which aggressive filtering degrades.
    pub fn light() -> Self {
        Self {
            grayscale: true,
            contrast: 1.2,
            sharpness: 1.0,
            noise: NoiseFilter::None,
            threshold: None,
        }
    }

    /// Rejects out-of-range numeric options before any image work happens.
    pub fn validate(&self) -> Result<()> {
        if !self.contrast.is_finite() || self.contrast < 0.0 {
            return Err(KapchaError::InvalidParameter(format!(
                "contrast must be a non-negative finite number, got {}",
                self.contrast
            )));
        }
        if !self.sharpness.is_finite() || self.sharpness < 0.0 {
            return Err(KapchaError::InvalidParameter(format!(
                "sharpness must be a non-negative finite number, got {}",
                self.sharpness
            )));
        }
        Ok(())
    }

    /// Stable textual form used inside cache fingerprints. Two option sets
    /// with different effective behavior must never canonicalize equal.
    pub fn canonical(&self) -> String {
        format!(
            "gray={};contrast={:.4};sharp={:.4};noise={};threshold={}",
            self.grayscale,
            self.contrast,
            self.sharpness,
            self.noise.as_str(),
            self.threshold
                .map(|t| t.to_string())
                .unwrap_or_else(|| "off".to_string()),
        )
    }
}

/// Decode raw bytes and enforce the configured size limits.
///
/// Undecodable bytes, oversized payloads and degenerate dimensions are all
/// `InvalidImage`; nothing is silently passed through.
pub fn decode_image(bytes: &[u8], config: &PreprocessConfig) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(KapchaError::InvalidImage("empty image payload".to_string()));
    }
    if bytes.len() > config.max_image_bytes {
        return Err(KapchaError::InvalidImage(format!(
            "image is {} bytes, limit is {}",
            bytes.len(),
            config.max_image_bytes
        )));
    }

    let reader = ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| KapchaError::InvalidImage(format!("failed to read image: {e}")))?;

    let img = reader
        .decode()
        .map_err(|e| KapchaError::InvalidImage(format!("failed to decode image: {e}")))?;

    let (width, height) = img.dimensions();
    if width < config.min_dimension || height < config.min_dimension {
        return Err(KapchaError::InvalidImage(format!(
            "image too small: {}x{}, minimum {}x{}",
            width, height, config.min_dimension, config.min_dimension
        )));
    }
    if width > config.max_dimension || height > config.max_dimension {
        return Err(KapchaError::InvalidImage(format!(
            "image too large: {}x{}, maximum {}x{}",
            width, height, config.max_dimension, config.max_dimension
        )));
    }

    Ok(img)
}

/// Run the full preprocessing pipeline over raw image bytes.
///
/// Pure with respect to its inputs: no side effects, and deterministic for
/// identical (bytes, options). Output is PNG-encoded.
pub fn preprocess_image(
    bytes: &[u8],
    options: &PreprocessOptions,
    config: &PreprocessConfig,
) -> Result<Vec<u8>> {
    options.validate()?;
    let img = decode_image(bytes, config)?;

    // 1. Channel normalization. Alpha is dropped either way so later steps
    //    only ever see Luma8 or Rgb8.
    let img = if options.grayscale {
        DynamicImage::ImageLuma8(img.to_luma8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };

    // 2. Contrast about the mean luminance.
    let img = apply_contrast(img, options.contrast);

    // 3. Unsharp-mask sharpening.
    let img = apply_sharpness(img, options.sharpness);

    // 4. Denoise.
    let img = apply_noise(img, options.noise);

    // 5. Optional binarization.
    let img = match options.threshold {
        Some(t) => apply_threshold(img, t),
        None => img,
    };

    let mut output = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| KapchaError::InternalError(format!("failed to encode image: {e}")))?;

    Ok(output)
}

/// Pick effective options for a request: explicit options win, otherwise the
/// quality gate (when enabled) selects a preset, otherwise defaults.
pub fn effective_options(
    explicit: Option<PreprocessOptions>,
    bytes: &[u8],
    config: &PreprocessConfig,
) -> Result<PreprocessOptions> {
    if let Some(opts) = explicit {
        opts.validate()?;
        return Ok(opts);
    }
    if config.quality_gate {
        let img = decode_image(bytes, config)?;
        let score = quality_score(&img);
        let opts = if score < config.quality_threshold {
            PreprocessOptions::aggressive()
        } else {
            PreprocessOptions::light()
        };
        tracing::debug!(score = %score, threshold = %config.quality_threshold, "quality gate selected preset");
        return Ok(opts);
    }
    Ok(PreprocessOptions::default())
}

/// Image quality score in [0, 1], combining normalized luminance spread with
/// edge energy. Low scores indicate flat or blurry inputs that benefit from
/// aggressive preprocessing.
pub fn quality_score(img: &DynamicImage) -> f32 {
    let gray = img.to_luma8();
    let (width, height) = gray.dimensions();
    let count = (width as u64 * height as u64).max(1) as f32;

    let mut sum = 0.0f32;
    for pixel in gray.pixels() {
        sum += pixel[0] as f32;
    }
    let mean = sum / count;

    let mut var = 0.0f32;
    for pixel in gray.pixels() {
        let d = pixel[0] as f32 - mean;
        var += d * d;
    }
    let stddev = (var / count).sqrt();

    // 4-neighbor Laplacian magnitude, averaged over interior pixels.
    let mut edge_sum = 0.0f32;
    let mut edge_count = 0u64;
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let c = gray.get_pixel(x, y)[0] as f32;
            let lap = gray.get_pixel(x - 1, y)[0] as f32
                + gray.get_pixel(x + 1, y)[0] as f32
                + gray.get_pixel(x, y - 1)[0] as f32
                + gray.get_pixel(x, y + 1)[0] as f32
                - 4.0 * c;
            edge_sum += lap.abs();
            edge_count += 1;
        }
    }
    let edge_mean = if edge_count > 0 {
        edge_sum / edge_count as f32
    } else {
        0.0
    };

    let contrast_score = (stddev / 80.0).clamp(0.0, 1.0);
    let edge_score = (edge_mean / 20.0).clamp(0.0, 1.0);
    0.6 * contrast_score + 0.4 * edge_score
}

/// Scale pixel values away from the mean luminance. Factor 1.0 is identity,
/// 0.0 collapses to flat gray.
fn apply_contrast(img: DynamicImage, factor: f32) -> DynamicImage {
    if (factor - 1.0).abs() < f32::EPSILON {
        return img;
    }
    match img {
        DynamicImage::ImageLuma8(gray) => {
            let mean = channel_mean(gray.as_raw());
            let out = image::GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
                let v = gray.get_pixel(x, y)[0] as f32;
                image::Luma([stretch(v, mean, factor)])
            });
            DynamicImage::ImageLuma8(out)
        }
        DynamicImage::ImageRgb8(rgb) => {
            let mean = channel_mean(rgb.as_raw());
            let out = image::RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let p = rgb.get_pixel(x, y);
                image::Rgb([
                    stretch(p[0] as f32, mean, factor),
                    stretch(p[1] as f32, mean, factor),
                    stretch(p[2] as f32, mean, factor),
                ])
            });
            DynamicImage::ImageRgb8(out)
        }
        other => other,
    }
}

fn channel_mean(raw: &[u8]) -> f32 {
    if raw.is_empty() {
        return 128.0;
    }
    let sum: u64 = raw.iter().map(|&v| v as u64).sum();
    sum as f32 / raw.len() as f32
}

fn stretch(value: f32, pivot: f32, factor: f32) -> u8 {
    (pivot + (value - pivot) * factor).clamp(0.0, 255.0) as u8
}

/// Interpolate between a blurred copy and the original. Factor above 1.0
/// amplifies the difference, which is the classic unsharp mask.
fn apply_sharpness(img: DynamicImage, factor: f32) -> DynamicImage {
    if (factor - 1.0).abs() < f32::EPSILON {
        return img;
    }
    let blurred = img.blur(1.0);
    match (&img, &blurred) {
        (DynamicImage::ImageLuma8(orig), DynamicImage::ImageLuma8(soft)) => {
            let out = image::GrayImage::from_fn(orig.width(), orig.height(), |x, y| {
                let o = orig.get_pixel(x, y)[0] as f32;
                let b = soft.get_pixel(x, y)[0] as f32;
                image::Luma([(b + factor * (o - b)).clamp(0.0, 255.0) as u8])
            });
            DynamicImage::ImageLuma8(out)
        }
        (DynamicImage::ImageRgb8(orig), DynamicImage::ImageRgb8(soft)) => {
            let out = image::RgbImage::from_fn(orig.width(), orig.height(), |x, y| {
                let o = orig.get_pixel(x, y);
                let b = soft.get_pixel(x, y);
                let mix = |i: usize| {
                    (b[i] as f32 + factor * (o[i] as f32 - b[i] as f32)).clamp(0.0, 255.0) as u8
                };
                image::Rgb([mix(0), mix(1), mix(2)])
            });
            DynamicImage::ImageRgb8(out)
        }
        _ => img,
    }
}

fn apply_noise(img: DynamicImage, filter: NoiseFilter) -> DynamicImage {
    match filter {
        NoiseFilter::Median => match img {
            DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(median_filter_gray(&gray)),
            DynamicImage::ImageRgb8(rgb) => DynamicImage::ImageRgb8(median_filter_rgb(&rgb)),
            other => other,
        },
        NoiseFilter::Gaussian => img.blur(1.0),
        NoiseFilter::None => img,
    }
}

/// 3x3 median filter; edge pixels use a clamped neighborhood.
fn median_filter_gray(gray: &image::GrayImage) -> image::GrayImage {
    let (width, height) = gray.dimensions();
    image::GrayImage::from_fn(width, height, |x, y| {
        let mut window = [0u8; 9];
        let mut i = 0;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                let ny = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                window[i] = gray.get_pixel(nx, ny)[0];
                i += 1;
            }
        }
        window.sort_unstable();
        image::Luma([window[4]])
    })
}

fn median_filter_rgb(rgb: &image::RgbImage) -> image::RgbImage {
    let (width, height) = rgb.dimensions();
    image::RgbImage::from_fn(width, height, |x, y| {
        let mut channels = [[0u8; 9]; 3];
        let mut i = 0;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                let ny = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                let p = rgb.get_pixel(nx, ny);
                channels[0][i] = p[0];
                channels[1][i] = p[1];
                channels[2][i] = p[2];
                i += 1;
            }
        }
        for c in channels.iter_mut() {
            c.sort_unstable();
        }
        image::Rgb([channels[0][4], channels[1][4], channels[2][4]])
    })
}

/// Binarize: values above the cutoff become 255, the rest 0.
fn apply_threshold(img: DynamicImage, cutoff: u8) -> DynamicImage {
    let step = |v: u8| if v > cutoff { 255u8 } else { 0u8 };
    match img {
        DynamicImage::ImageLuma8(gray) => {
            let out = image::GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
                image::Luma([step(gray.get_pixel(x, y)[0])])
            });
            DynamicImage::ImageLuma8(out)
        }
        DynamicImage::ImageRgb8(rgb) => {
            let out = image::RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let p = rgb.get_pixel(x, y);
                image::Rgb([step(p[0]), step(p[1]), step(p[2])])
            });
            DynamicImage::ImageRgb8(out)
        }
        other => other,
    }
}
