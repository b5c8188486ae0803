//! Image normalization ahead of feature extraction.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageReader, Limits};
use tracing::{debug, warn};

use crate::config::PreprocessConfig;
use crate::error::{PipelineError, Result};

/// A source photo that did not make it into the working set.
#[derive(Debug, Clone)]
pub struct SkippedImage {
    pub source: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct PreprocessReport {
    /// Normalized files, in source order.
    pub images: Vec<PathBuf>,
    pub skipped: Vec<SkippedImage>,
}

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    config: PreprocessConfig,
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Decode, clamp and re-encode every source into `output_dir`.
    ///
    /// Individual decode failures are recorded and skipped; the call only
    /// fails when nothing survives.
    pub fn prepare(
        &self,
        sources: &[PathBuf],
        output_dir: &Path,
    ) -> Result<PreprocessReport> {
        std::fs::create_dir_all(output_dir)?;

        let mut report = PreprocessReport::default();
        for (index, source) in sources.iter().enumerate() {
            let image = match self.decode(source) {
                Ok(image) => image,
                Err(reason) => {
                    warn!(source = %source.display(), %reason, "skipping unreadable image");
                    report.skipped.push(SkippedImage {
                        source: source.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let image = self.normalize(image);
            let output = output_dir.join(format!("image_{index:04}.jpg"));
            self.write_jpeg(&image, &output)?;
            debug!(
                source = %source.display(),
                output = %output.display(),
                width = image.width(),
                height = image.height(),
                "prepared image"
            );
            report.images.push(output);
        }

        if report.images.is_empty() {
            return Err(PipelineError::Input(format!(
                "none of the {} submitted images could be decoded",
                sources.len()
            )));
        }

        Ok(report)
    }

    fn decode(&self, source: &Path) -> std::result::Result<DynamicImage, String> {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.config.max_decode_dimension);
        limits.max_image_height = Some(self.config.max_decode_dimension);
        limits.max_alloc = Some(self.config.max_decode_alloc_bytes);

        let mut reader = ImageReader::open(source)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|err| format!("cannot open: {err}"))?;
        reader.limits(limits);
        reader.decode().map_err(|err| format!("cannot decode: {err}"))
    }

    fn normalize(&self, image: DynamicImage) -> DynamicImage {
        let image = match clamped_dimensions(
            image.width(),
            image.height(),
            self.config.max_dimension,
        ) {
            Some((width, height)) => {
                image.resize_exact(width, height, FilterType::Lanczos3)
            }
            None => image,
        };

        if self.config.enhance_contrast {
            image.adjust_contrast(self.config.contrast_amount)
        } else {
            image
        }
    }

    fn write_jpeg(&self, image: &DynamicImage, output: &Path) -> Result<()> {
        let rgb = image.to_rgb8();
        let file = File::create(output)?;
        let mut encoder = JpegEncoder::new_with_quality(
            BufWriter::new(file),
            self.config.jpeg_quality,
        );
        encoder
            .encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(|err| {
                PipelineError::Storage(format!(
                    "failed to encode {}: {err}",
                    output.display()
                ))
            })
    }
}

/// Target size when the longer side exceeds `max_side`; `None` when the
/// image already fits.
pub fn clamped_dimensions(
    width: u32,
    height: u32,
    max_side: u32,
) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= max_side || max_side == 0 {
        return None;
    }

    let scale = max_side as f64 / longest as f64;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).max(1);
    if width >= height {
        Some((max_side, scaled(height)))
    } else {
        Some((scaled(width), max_side))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        })
        .save(path)
        .unwrap();
    }

    #[test]
    fn clamps_longer_side_preserving_aspect() {
        assert_eq!(clamped_dimensions(4000, 3000, 2000), Some((2000, 1500)));
        assert_eq!(clamped_dimensions(1000, 3000, 2000), Some((667, 2000)));
        assert_eq!(clamped_dimensions(2000, 1000, 2000), None);
        assert_eq!(clamped_dimensions(640, 480, 2000), None);
    }

    #[test]
    fn oversize_images_are_downscaled() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let big = src.path().join("big.png");
        let small = src.path().join("small.png");
        write_png(&big, 2400, 1200);
        write_png(&small, 320, 240);

        let pre = ImagePreprocessor::new(PreprocessConfig::default());
        let report = pre.prepare(&[big, small], out.path()).unwrap();

        assert_eq!(report.images.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(
            report.images[0].file_name().unwrap().to_string_lossy(),
            "image_0000.jpg"
        );

        let first = image::open(&report.images[0]).unwrap();
        assert_eq!((first.width(), first.height()), (2000, 1000));
        let second = image::open(&report.images[1]).unwrap();
        assert_eq!((second.width(), second.height()), (320, 240));
    }

    #[test]
    fn undecodable_images_are_skipped() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let garbage = src.path().join("broken.jpg");
        std::fs::write(&garbage, b"definitely not a jpeg").unwrap();
        let missing = src.path().join("missing.png");
        let good = src.path().join("good.png");
        RgbaImage::from_pixel(64, 48, Rgba([10, 20, 30, 128]))
            .save(&good)
            .unwrap();

        let pre = ImagePreprocessor::new(PreprocessConfig::default());
        let report = pre
            .prepare(&[garbage.clone(), missing, good], out.path())
            .unwrap();

        assert_eq!(report.images.len(), 1);
        assert_eq!(
            report.images[0].file_name().unwrap().to_string_lossy(),
            "image_0002.jpg"
        );
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].source, garbage);
    }

    #[test]
    fn zero_survivors_is_an_input_error() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let a = src.path().join("a.jpg");
        std::fs::write(&a, b"nope").unwrap();

        let pre = ImagePreprocessor::new(PreprocessConfig::default());
        let err = pre.prepare(&[a], out.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn decoder_limits_reject_oversized_inputs() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let wide = src.path().join("wide.png");
        write_png(&wide, 300, 10);

        let config = PreprocessConfig {
            max_decode_dimension: 256,
            ..PreprocessConfig::default()
        };
        let err = ImagePreprocessor::new(config)
            .prepare(&[wide], out.path())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[test]
    fn contrast_enhancement_still_produces_output() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let path = src.path().join("flat.png");
        write_png(&path, 100, 100);

        let config = PreprocessConfig {
            enhance_contrast: true,
            ..PreprocessConfig::default()
        };
        let report = ImagePreprocessor::new(config)
            .prepare(&[path], out.path())
            .unwrap();
        let decoded = image::open(&report.images[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 100));
    }
}
