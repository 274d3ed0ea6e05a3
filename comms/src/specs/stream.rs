use serde::{Deserialize, Serialize};

use super::{SpecErr, invalid};
use crate::{FrameCodec, ImageShape};

/// What both ends agree on about the images of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSpec {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub num_classes: u16,
}

impl Default for StreamSpec {
    fn default() -> Self {
        let ImageShape {
            width,
            height,
            channels,
        } = ImageShape::CIFAR;

        Self {
            width,
            height,
            channels,
            num_classes: 10,
        }
    }
}

impl StreamSpec {
    pub fn shape(&self) -> ImageShape {
        ImageShape::new(self.width, self.height, self.channels)
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.shape(), self.num_classes)
    }

    pub fn validate(&self) -> Result<(), SpecErr> {
        let shape = self.shape();
        if shape.is_empty() {
            return invalid(format!("image shape {shape} has no pixels"));
        }

        if u32::try_from(shape.len() + 1).is_err() {
            return invalid(format!("image shape {shape} doesn't fit a record"));
        }

        if !(1..=256).contains(&self.num_classes) {
            return invalid(format!(
                "num_classes must be within 1..=256, got {}",
                self.num_classes
            ));
        }

        Ok(())
    }
}
