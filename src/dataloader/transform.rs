use image::imageops::FilterType;
use image::DynamicImage;

use super::error::{ChunkCacheError, Result};

/// Turns one decoded image into a fixed-shape `f32` sample, written into `out`.
///
/// Must be deterministic: the same image always produces the same sample.
pub trait SampleTransform: Send + Sync {
    fn apply(&self, image: DynamicImage, out: &mut [f32]) -> Result<()>;
}

impl<F> SampleTransform for F
where
    F: Fn(DynamicImage, &mut [f32]) -> Result<()> + Send + Sync,
{
    fn apply(&self, image: DynamicImage, out: &mut [f32]) -> Result<()> {
        self(image, out)
    }
}

/// Resizes to `width` x `height` and lays pixels out channel-first, scaled to `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransform {
    pub width: u32,
    pub height: u32,
    pub grayscale: bool,
    pub filter: FilterType,
}

impl ImageTransform {
    pub fn new(width: u32, height: u32) -> Self {
        ImageTransform {
            width,
            height,
            grayscale: false,
            filter: FilterType::Triangle,
        }
    }

    pub fn grayscale(mut self, yes: bool) -> Self {
        self.grayscale = yes;
        self
    }

    pub fn channels(&self) -> usize {
        if self.grayscale { 1 } else { 3 }
    }

    /// `[channels, height, width]`
    pub fn sample_shape(&self) -> Vec<usize> {
        vec![self.channels(), self.height as usize, self.width as usize]
    }
}

impl SampleTransform for ImageTransform {
    fn apply(&self, image: DynamicImage, out: &mut [f32]) -> Result<()> {
        let plane = self.width as usize * self.height as usize;
        let channels = self.channels();
        if out.len() != plane * channels {
            return Err(ChunkCacheError::ConfigError(format!(
                "transform produces {} values per sample but the dataset expects {}",
                plane * channels,
                out.len()
            )));
        }

        let image = if image.width() == self.width && image.height() == self.height {
            image
        } else {
            image.resize_exact(self.width, self.height, self.filter)
        };

        if self.grayscale {
            let pixels = image.to_luma8();
            for (dst, &src) in out.iter_mut().zip(pixels.as_raw()) {
                *dst = src as f32 / 255.0;
            }
        } else {
            // HWC interleaved -> CHW planes
            let pixels = image.to_rgb8();
            for (i, rgb) in pixels.as_raw().chunks_exact(3).enumerate() {
                for (c, &value) in rgb.iter().enumerate() {
                    out[c * plane + i] = value as f32 / 255.0;
                }
            }
        }

        Ok(())
    }
}
