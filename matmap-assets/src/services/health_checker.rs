//! Image health checks
//!
//! Short-circuiting verdicts: missing → zero-length → undecodable → degenerate → healthy.
//! A degenerate image decodes fine but is near-uniformly dark, the usual symptom of
//! a failed upstream generation.

use image::{DynamicImage, GenericImageView, ImageFormat};
use matmap_common::config::HealthSettings;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy,
    Missing,
    ZeroLength,
    Undecodable,
    Degenerate,
}

impl HealthVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthVerdict::Healthy => "healthy",
            HealthVerdict::Missing => "missing",
            HealthVerdict::ZeroLength => "zero_length",
            HealthVerdict::Undecodable => "undecodable",
            HealthVerdict::Degenerate => "degenerate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub verdict: HealthVerdict,
    pub byte_len: u64,
    pub dimensions: Option<(u32, u32)>,
    /// Mean RGB brightness on 0-255 after compositing over white
    pub mean_luminance: Option<f64>,
    /// Decoder or I/O message for non-healthy verdicts
    pub detail: Option<String>,
}

impl HealthReport {
    fn verdict_only(verdict: HealthVerdict, byte_len: u64, detail: Option<String>) -> Self {
        Self {
            verdict,
            byte_len,
            dimensions: None,
            mean_luminance: None,
            detail,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.verdict == HealthVerdict::Healthy
    }
}

/// Health checker with configurable degenerate-image heuristic
#[derive(Debug, Clone)]
pub struct HealthChecker {
    luminance_threshold: f64,
    max_samples_per_axis: u32,
}

impl HealthChecker {
    pub fn new(luminance_threshold: f64, max_samples_per_axis: u32) -> Self {
        Self {
            luminance_threshold,
            max_samples_per_axis: max_samples_per_axis.max(1),
        }
    }

    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self::new(settings.luminance_threshold, settings.max_samples_per_axis)
    }

    /// Check a file (blocking)
    pub fn check(&self, path: &Path) -> HealthReport {
        let metadata = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return HealthReport::verdict_only(
                    HealthVerdict::Missing,
                    0,
                    Some("not a regular file".to_string()),
                )
            }
            Err(e) => return HealthReport::verdict_only(HealthVerdict::Missing, 0, Some(e.to_string())),
        };

        if metadata.len() == 0 {
            return HealthReport::verdict_only(HealthVerdict::ZeroLength, 0, None);
        }

        match std::fs::read(path) {
            Ok(bytes) => self.check_bytes(&bytes),
            Err(e) => HealthReport::verdict_only(
                HealthVerdict::Undecodable,
                metadata.len(),
                Some(e.to_string()),
            ),
        }
    }

    /// Check a file on the blocking pool
    pub async fn check_async(&self, path: &Path) -> HealthReport {
        let checker = self.clone();
        let path_buf = path.to_path_buf();
        match tokio::task::spawn_blocking(move || checker.check(&path_buf)).await {
            Ok(report) => report,
            Err(e) => HealthReport::verdict_only(
                HealthVerdict::Undecodable,
                0,
                Some(format!("health check task failed: {}", e)),
            ),
        }
    }

    /// Check in-memory image bytes
    pub fn check_bytes(&self, bytes: &[u8]) -> HealthReport {
        let byte_len = bytes.len() as u64;
        if bytes.is_empty() {
            return HealthReport::verdict_only(HealthVerdict::ZeroLength, 0, None);
        }

        let format = match image::guess_format(bytes) {
            Ok(f @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)) => f,
            Ok(other) => {
                return HealthReport::verdict_only(
                    HealthVerdict::Undecodable,
                    byte_len,
                    Some(format!("unsupported format {:?}", other)),
                )
            }
            Err(e) => {
                return HealthReport::verdict_only(
                    HealthVerdict::Undecodable,
                    byte_len,
                    Some(e.to_string()),
                )
            }
        };

        let img = match image::load_from_memory_with_format(bytes, format) {
            Ok(img) => img,
            Err(e) => {
                return HealthReport::verdict_only(
                    HealthVerdict::Undecodable,
                    byte_len,
                    Some(e.to_string()),
                )
            }
        };

        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return HealthReport::verdict_only(
                HealthVerdict::Undecodable,
                byte_len,
                Some("image has no pixels".to_string()),
            );
        }

        let luminance = mean_luminance(&img, self.max_samples_per_axis);
        let verdict = if luminance <= self.luminance_threshold {
            HealthVerdict::Degenerate
        } else {
            HealthVerdict::Healthy
        };

        HealthReport {
            verdict,
            byte_len,
            dimensions: Some((width, height)),
            mean_luminance: Some(luminance),
            detail: None,
        }
    }
}

/// Mean of R, G and B over an evenly strided grid, alpha composited over white
pub fn mean_luminance(img: &DynamicImage, max_samples_per_axis: u32) -> f64 {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }

    let nx = width.min(max_samples_per_axis.max(1));
    let ny = height.min(max_samples_per_axis.max(1));

    let mut total = 0.0f64;
    for j in 0..ny {
        let y = (u64::from(j) * u64::from(height) / u64::from(ny)) as u32;
        for i in 0..nx {
            let x = (u64::from(i) * u64::from(width) / u64::from(nx)) as u32;
            let [r, g, b, a] = img.get_pixel(x, y).0;
            let alpha = f64::from(a) / 255.0;
            let over_white = |c: u8| f64::from(c) * alpha + 255.0 * (1.0 - alpha);
            total += (over_white(r) + over_white(g) + over_white(b)) / 3.0;
        }
    }

    total / f64::from(nx * ny)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn solid_rgb(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, image::Rgb([value, value, value])))
    }

    fn checker() -> HealthChecker {
        HealthChecker::new(10.0, 256)
    }

    #[test]
    fn test_missing_and_zero_length() {
        let dir = TempDir::new().unwrap();
        let report = checker().check(&dir.path().join("none.png"));
        assert_eq!(report.verdict, HealthVerdict::Missing);

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(checker().check(&empty).verdict, HealthVerdict::ZeroLength);

        // A directory is not an image
        assert_eq!(checker().check(dir.path()).verdict, HealthVerdict::Missing);
    }

    #[test]
    fn test_garbage_is_undecodable() {
        let report = checker().check_bytes(b"definitely not an image, just some text bytes");
        assert_eq!(report.verdict, HealthVerdict::Undecodable);
        assert!(report.detail.is_some());
    }

    #[test]
    fn test_truncated_png_is_undecodable() {
        let bytes = encode(solid_rgb(200), ImageFormat::Png);
        let report = checker().check_bytes(&bytes[..bytes.len() / 2]);
        assert_eq!(report.verdict, HealthVerdict::Undecodable);
    }

    #[test]
    fn test_black_image_is_degenerate() {
        let bytes = encode(solid_rgb(0), ImageFormat::Png);
        let report = checker().check_bytes(&bytes);
        assert_eq!(report.verdict, HealthVerdict::Degenerate);
        assert_eq!(report.dimensions, Some((32, 24)));
        assert_eq!(report.mean_luminance, Some(0.0));
    }

    #[test]
    fn test_bright_image_is_healthy() {
        let bytes = encode(solid_rgb(180), ImageFormat::Png);
        let report = checker().check_bytes(&bytes);
        assert!(report.is_healthy());
    }

    #[test]
    fn test_transparent_pixels_composite_over_white() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(8, 8, Rgba([0, 0, 0, 0])));
        assert_eq!(mean_luminance(&img, 256), 255.0);
        let bytes = encode(img, ImageFormat::Png);
        assert!(checker().check_bytes(&bytes).is_healthy());
    }

    #[test]
    fn test_threshold_is_configurable() {
        let bytes = encode(solid_rgb(40), ImageFormat::Png);
        assert!(HealthChecker::new(10.0, 256).check_bytes(&bytes).is_healthy());
        assert_eq!(
            HealthChecker::new(50.0, 256).check_bytes(&bytes).verdict,
            HealthVerdict::Degenerate
        );
    }

    #[test]
    fn test_sampling_grid_is_bounded() {
        // Left half white, right half black: a 2-sample grid sees one of each
        let img = RgbImage::from_fn(100, 10, |x, _| {
            if x < 50 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        });
        let lum = mean_luminance(&DynamicImage::ImageRgb8(img), 2);
        assert_eq!(lum, 127.5);
    }
}
