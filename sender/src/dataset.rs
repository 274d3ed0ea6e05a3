use std::{fs, path::Path};

use comms::{FrameCodec, Image, ImageShape};
use log::info;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{Result, SenderErr};

// Centered pixels are shifted back into the byte range around this value.
const CENTER: f32 = 128.0;

/// A minimal in-memory image dataset, cycled with wraparound.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    shape: ImageShape,
    images: Vec<Image>,
}

impl InMemoryDataset {
    /// Creates a new dataset from owned images.
    ///
    /// # Arguments
    /// * `codec` - The codec every image must fit.
    /// * `images` - The images of the dataset.
    ///
    /// # Returns
    /// A `Dataset` error if `images` is empty or any image doesn't fit `codec`.
    pub fn new(codec: FrameCodec, images: Vec<Image>) -> Result<Self> {
        if images.is_empty() {
            return Err(SenderErr::Dataset("dataset must be non-empty".into()));
        }

        for (i, img) in images.iter().enumerate() {
            codec
                .check(img)
                .map_err(|e| SenderErr::Dataset(format!("image {i}: {e}")))?;
        }

        Ok(Self {
            shape: codec.shape(),
            images,
        })
    }

    /// Generates `size` random images with random labels.
    ///
    /// # Arguments
    /// * `codec` - The codec the images must fit.
    /// * `size` - The amount of images.
    /// * `seed` - The seed of the generator, the same seed yields the same dataset.
    pub fn synthetic(codec: FrameCodec, size: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let len = codec.shape().len();

        let images = (0..size)
            .map(|_| {
                let label = rng.random_range(0..codec.num_classes()) as u8;
                let mut pixels = vec![0; len];
                rng.fill(pixels.as_mut_slice());
                Image::new(label, pixels)
            })
            .collect();

        Self::new(codec, images)
    }

    /// Parses a CIFAR-10 style binary batch, where every record is a label byte
    /// followed by the channel-planar pixels.
    ///
    /// # Arguments
    /// * `codec` - The codec the images must fit.
    /// * `bytes` - The whole contents of the batch file.
    pub fn from_cifar_bytes(codec: FrameCodec, bytes: &[u8]) -> Result<Self> {
        let record = 1 + codec.shape().len();

        if bytes.len() % record != 0 {
            return Err(SenderErr::Dataset(format!(
                "{} bytes isn't a whole amount of {record} byte records",
                bytes.len()
            )));
        }

        let images = bytes
            .chunks_exact(record)
            .map(|chunk| Image::new(chunk[0], &chunk[1..]))
            .collect();

        Self::new(codec, images)
    }

    /// Loads a CIFAR-10 style binary batch file.
    pub fn from_cifar_file(codec: FrameCodec, path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let dataset = Self::from_cifar_bytes(codec, &bytes)?;

        info!("loaded {} images from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    #[inline]
    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    /// Returns the image at `idx` wrapping around the end of the dataset.
    #[inline]
    pub fn cycled(&self, idx: u64) -> &Image {
        &self.images[(idx % self.images.len() as u64) as usize]
    }

    /// Computes the mean of every channel over the whole dataset.
    pub fn channel_means(&self) -> Vec<f32> {
        let mut sums = vec![0u64; self.shape.channels];

        for img in &self.images {
            for (c, sum) in sums.iter_mut().enumerate() {
                *sum += img.plane(self.shape, c).iter().map(|&p| p as u64).sum::<u64>();
            }
        }

        let count = (self.images.len() * self.shape.plane_len()) as f64;
        sums.into_iter().map(|sum| (sum as f64 / count) as f32).collect()
    }

    /// Replaces every image by its transformed version.
    pub fn apply(&mut self, transform: &MeanTransform) {
        let shape = self.shape;
        for img in &mut self.images {
            *img = transform.apply(shape, img);
        }
    }
}

/// Global per channel mean subtraction.
///
/// Records carry bytes, so centered pixels are written as
/// `clamp(round(p - mean) + 128, 0, 255)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanTransform {
    means: Vec<f32>,
}

impl MeanTransform {
    /// Creates a transform from known per channel means.
    pub fn pinned(means: Vec<f32>) -> Self {
        Self { means }
    }

    /// Creates a transform from the means of `dataset`.
    pub fn computed(dataset: &InMemoryDataset) -> Self {
        Self {
            means: dataset.channel_means(),
        }
    }

    #[inline]
    pub fn means(&self) -> &[f32] {
        &self.means
    }

    /// Returns the centered version of `img`.
    ///
    /// # Panics
    /// If the transform has fewer means than `shape` has channels.
    pub fn apply(&self, shape: ImageShape, img: &Image) -> Image {
        let mut pixels = Vec::with_capacity(shape.len());

        for (c, &mean) in self.means.iter().enumerate().take(shape.channels) {
            pixels.extend(img.plane(shape, c).iter().map(|&p| {
                let centered = (p as f32 - mean).round() + CENTER;
                centered.clamp(0.0, 255.0) as u8
            }));
        }

        Image::new(img.label(), pixels)
    }
}
