use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// One in-memory sample handed to the classifier. Owned by the cycle that
/// captured it and dropped once the decision is made.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn from_rgb_image(image: RgbImage, captured_at: DateTime<Utc>) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgb8,
            data: image.into_raw(),
            captured_at,
        }
    }

    /// Copies the frame into an RGB image, swapping channels for BGR input.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let expected = self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        if self.data.len() != expected {
            bail!(
                "frame buffer holds {} bytes, expected {} for {}x{}",
                self.data.len(),
                expected,
                self.width,
                self.height
            );
        }

        let mut data = self.data.clone();
        if self.format == PixelFormat::Bgr8 {
            for pixel in data.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
        }

        match RgbImage::from_raw(self.width, self.height, data) {
            Some(image) => Ok(image),
            None => bail!("frame dimensions {}x{} rejected", self.width, self.height),
        }
    }
}

/// A slice of the encoded live recording, stamped with the camera clock.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub captured_at: DateTime<Utc>,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_frames_convert_to_rgb() {
        let frame = Frame {
            width: 1,
            height: 2,
            format: PixelFormat::Bgr8,
            data: vec![1, 2, 3, 4, 5, 6],
            captured_at: Utc::now(),
        };

        let image = frame.to_rgb_image().unwrap();
        assert_eq!(image.into_raw(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let frame = Frame {
            width: 2,
            height: 2,
            format: PixelFormat::Rgb8,
            data: vec![0; 5],
            captured_at: Utc::now(),
        };

        assert!(frame.to_rgb_image().is_err());
    }
}
