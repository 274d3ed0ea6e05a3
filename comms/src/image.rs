use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed dimensions shared by every image of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl ImageShape {
    /// The 32x32 RGB shape of CIFAR-10 images.
    pub const CIFAR: Self = Self {
        width: 32,
        height: 32,
        channels: 3,
    };

    /// Creates a new `ImageShape`.
    ///
    /// # Arguments
    /// * `width` - Pixels per row.
    /// * `height` - Rows per channel plane.
    /// * `channels` - Amount of channel planes.
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// The amount of pixel bytes of a single image.
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height * self.channels
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The amount of bytes of a single channel plane.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }
}

impl Default for ImageShape {
    fn default() -> Self {
        Self::CIFAR
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// A single labeled image, pixels are stored channel-planar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    label: u8,
    pixels: Box<[u8]>,
}

impl Image {
    /// Creates a new `Image`.
    ///
    /// # Arguments
    /// * `label` - The ground truth class of the image.
    /// * `pixels` - The raw pixel bytes.
    pub fn new(label: u8, pixels: impl Into<Box<[u8]>>) -> Self {
        Self {
            label,
            pixels: pixels.into(),
        }
    }

    #[inline]
    pub fn label(&self) -> u8 {
        self.label
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Returns the pixels of channel `c` given the image's `shape`.
    ///
    /// # Panics
    /// If `c` is out of bounds for `shape`.
    pub fn plane(&self, shape: ImageShape, c: usize) -> &[u8] {
        let len = shape.plane_len();
        &self.pixels[c * len..(c + 1) * len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cifar_shape_len() {
        assert_eq!(ImageShape::CIFAR.len(), 3072);
        assert_eq!(ImageShape::CIFAR.plane_len(), 1024);
        assert_eq!(ImageShape::CIFAR.to_string(), "32x32x3");
    }

    #[test]
    fn planes_are_contiguous() {
        let shape = ImageShape::new(2, 1, 3);
        let img = Image::new(4, vec![1, 2, 3, 4, 5, 6]);

        assert_eq!(img.plane(shape, 0), &[1, 2]);
        assert_eq!(img.plane(shape, 2), &[5, 6]);
        assert_eq!(img.label(), 4);
    }
}
