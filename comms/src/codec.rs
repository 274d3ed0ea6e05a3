//! Implements the self-delimiting wire record, writes the length of the record first using 4 bytes.
//!
//! ```text
//! +-------------------+-----------+--------------------------------+
//! | len: u32 (BE)     | label: u8 | pixels: width*height*channels  |
//! +-------------------+-----------+--------------------------------+
//! ```
//!
//! A record with `len == 0` is the end of stream marker.

use std::{error::Error, fmt, io};

use bytes::BufMut;

use crate::{Image, ImageShape};

type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();
const LABEL_SIZE: usize = size_of::<u8>();

/// A single decoded wire record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Image(Image),
    End,
}

/// Inconsistent framing metadata, the stream can't be trusted after this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    Length { got: usize, expected: usize },
    Label { got: u8, num_classes: u16 },
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length { got, expected } => {
                write!(f, "record length {got} doesn't match the expected {expected}")
            }
            Self::Label { got, num_classes } => {
                write!(f, "label {got} is out of range for {num_classes} classes")
            }
        }
    }
}

impl Error for MalformedRecord {}

/// Decoding failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecErr {
    /// At least `needed` bytes must be available before retrying.
    Incomplete { needed: usize },
    Malformed(MalformedRecord),
}

impl fmt::Display for CodecErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete { needed } => write!(f, "incomplete record, need {needed} bytes"),
            Self::Malformed(e) => write!(f, "malformed record: {e}"),
        }
    }
}

impl Error for CodecErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MalformedRecord> for CodecErr {
    fn from(value: MalformedRecord) -> Self {
        Self::Malformed(value)
    }
}

/// Boundary conversion for I/O APIs.
impl From<MalformedRecord> for io::Error {
    fn from(value: MalformedRecord) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}

/// Serializes images into wire records and back for a single image shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    shape: ImageShape,
    num_classes: u16,
}

impl FrameCodec {
    /// Creates a new `FrameCodec`.
    ///
    /// # Arguments
    /// * `shape` - The shape every image of the stream has.
    /// * `num_classes` - The amount of valid labels, labels live in `[0, num_classes)`.
    pub fn new(shape: ImageShape, num_classes: u16) -> Self {
        Self { shape, num_classes }
    }

    #[inline]
    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    #[inline]
    pub fn num_classes(&self) -> u16 {
        self.num_classes
    }

    /// The length of the record body, what the prefix of a data record holds.
    #[inline]
    fn body_len(&self) -> usize {
        LABEL_SIZE + self.shape.len()
    }

    /// The total size in bytes of an encoded image record.
    #[inline]
    pub fn record_len(&self) -> usize {
        LEN_TYPE_SIZE + self.body_len()
    }

    /// Checks that `img` fits this codec's shape and label range.
    ///
    /// # Returns
    /// A `MalformedRecord` describing the first inconsistency found.
    pub fn check(&self, img: &Image) -> Result<(), MalformedRecord> {
        let got = img.pixels().len();
        let expected = self.shape.len();

        if got != expected {
            return Err(MalformedRecord::Length { got, expected });
        }

        self.check_label(img.label())
    }

    fn check_label(&self, label: u8) -> Result<(), MalformedRecord> {
        if label as u16 >= self.num_classes {
            return Err(MalformedRecord::Label {
                got: label,
                num_classes: self.num_classes,
            });
        }

        Ok(())
    }

    /// Writes the record for `img` at the end of `buf`.
    ///
    /// # Arguments
    /// * `img` - The image to serialize.
    /// * `buf` - Where to write the record.
    ///
    /// # Returns
    /// A `MalformedRecord` if `img` doesn't fit this codec, in which case nothing is written.
    pub fn encode<B: BufMut>(&self, img: &Image, buf: &mut B) -> Result<(), MalformedRecord> {
        self.check(img)?;

        buf.put_u32(self.body_len() as LenType);
        buf.put_u8(img.label());
        buf.put_slice(img.pixels());
        Ok(())
    }

    /// Writes the zero length end of stream marker at the end of `buf`.
    pub fn encode_end<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(0);
    }

    /// Reads a single record from the head of `buf`.
    ///
    /// # Arguments
    /// * `buf` - The unconsumed bytes of the stream.
    ///
    /// # Returns
    /// The decoded frame and the amount of bytes it took, or a `CodecErr`
    /// if there aren't enough bytes yet or the record is malformed.
    pub fn decode(&self, buf: &[u8]) -> Result<(Frame, usize), CodecErr> {
        let Some((prefix, rest)) = buf.split_first_chunk::<LEN_TYPE_SIZE>() else {
            return Err(CodecErr::Incomplete {
                needed: LEN_TYPE_SIZE,
            });
        };

        let len = LenType::from_be_bytes(*prefix) as usize;

        if len == 0 {
            return Ok((Frame::End, LEN_TYPE_SIZE));
        }

        let expected = self.body_len();
        if len != expected {
            return Err(MalformedRecord::Length { got: len, expected }.into());
        }

        // The label is checked as soon as it's available, there's no point in
        // waiting for the rest of a record that's already known to be broken.
        if let Some(&label) = rest.first() {
            self.check_label(label)?;
        }

        if rest.len() < len {
            return Err(CodecErr::Incomplete {
                needed: LEN_TYPE_SIZE + len,
            });
        }

        let img = Image::new(rest[0], &rest[LABEL_SIZE..len]);
        Ok((Frame::Image(img), LEN_TYPE_SIZE + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec::new(ImageShape::new(2, 2, 1), 10)
    }

    #[test]
    fn encode_then_decode() {
        let codec = codec();
        let img = Image::new(7, vec![1, 2, 3, 4]);

        let mut buf = Vec::new();
        codec.encode(&img, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 5, 7, 1, 2, 3, 4]);
        assert_eq!(buf.len(), codec.record_len());

        let (frame, used) = codec.decode(&buf).unwrap();
        assert_eq!(frame, Frame::Image(img));
        assert_eq!(used, buf.len());
    }

    #[test]
    fn decode_leaves_trailing_bytes() {
        let codec = codec();
        let mut buf = Vec::new();
        codec.encode(&Image::new(1, vec![0; 4]), &mut buf).unwrap();
        codec.encode_end(&mut buf);

        let (_, used) = codec.decode(&buf).unwrap();
        let (frame, end_used) = codec.decode(&buf[used..]).unwrap();

        assert_eq!(frame, Frame::End);
        assert_eq!(used + end_used, buf.len());
    }

    #[test]
    fn short_buffers_are_incomplete() {
        let codec = codec();
        let mut buf = Vec::new();
        codec.encode(&Image::new(3, vec![9; 4]), &mut buf).unwrap();

        for cut in 0..buf.len() {
            let err = codec.decode(&buf[..cut]).unwrap_err();
            assert!(matches!(err, CodecErr::Incomplete { .. }), "cut at {cut}");
        }
    }

    #[test]
    fn wrong_length_is_malformed() {
        let err = codec().decode(&[0, 0, 0, 9, 1]).unwrap_err();
        assert_eq!(
            err,
            CodecErr::Malformed(MalformedRecord::Length {
                got: 9,
                expected: 5
            })
        );
    }

    #[test]
    fn label_out_of_range_is_malformed_before_body_arrives() {
        let err = codec().decode(&[0, 0, 0, 5, 10]).unwrap_err();
        assert_eq!(
            err,
            CodecErr::Malformed(MalformedRecord::Label {
                got: 10,
                num_classes: 10
            })
        );
    }

    #[test]
    fn encode_rejects_mismatched_images() {
        let codec = codec();
        let mut buf = Vec::new();

        assert!(codec.encode(&Image::new(1, vec![0; 3]), &mut buf).is_err());
        assert!(codec.encode(&Image::new(11, vec![0; 4]), &mut buf).is_err());
        assert!(buf.is_empty());
    }
}
