use bytes::{Buf, BytesMut};

use crate::{CodecErr, Frame, FrameCodec, MalformedRecord};

/// Rebuilds the sequence of wire records out of arbitrarily chunked bytes.
///
/// Owns every byte that has been pushed but not yet decoded, a record split
/// across any amount of chunks is emitted once its last byte arrives.
#[derive(Debug)]
pub struct StreamReframer {
    codec: FrameCodec,
    buf: BytesMut,
    failed: bool,
}

impl StreamReframer {
    /// Creates a new `StreamReframer`.
    ///
    /// # Arguments
    /// * `codec` - The codec records were encoded with.
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            buf: BytesMut::with_capacity(codec.record_len()),
            codec,
            failed: false,
        }
    }

    #[inline]
    pub fn codec(&self) -> FrameCodec {
        self.codec
    }

    /// The amount of bytes waiting for the rest of their record.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends a freshly read chunk to the pending bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decodes the record at the head of the pending bytes.
    ///
    /// # Returns
    /// `Ok(None)` if the head record isn't complete yet, the next frame on
    /// success or a `MalformedRecord`. Once malformed, every later call fails
    /// the same way since the record boundaries are lost.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, MalformedRecord> {
        if self.failed {
            return Err(self.head_err());
        }

        match self.codec.decode(&self.buf) {
            Ok((frame, used)) => {
                self.buf.advance(used);
                Ok(Some(frame))
            }
            Err(CodecErr::Incomplete { needed }) => {
                if self.buf.capacity() < needed {
                    self.buf.reserve(needed - self.buf.len());
                }

                Ok(None)
            }
            Err(CodecErr::Malformed(e)) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Appends `chunk` and decodes every record that became complete.
    ///
    /// # Arguments
    /// * `chunk` - The newly read bytes.
    /// * `out` - Where to push the decoded frames, in stream order.
    ///
    /// # Returns
    /// A `MalformedRecord` if the stream broke, frames decoded before the
    /// broken record are still pushed into `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<Frame>) -> Result<(), MalformedRecord> {
        self.extend(chunk);

        while let Some(frame) = self.next_frame()? {
            out.push(frame);
        }

        Ok(())
    }

    /// Ends the stream, discarding the incomplete tail.
    ///
    /// # Returns
    /// The amount of bytes that were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buf.len();
        self.buf.clear();
        discarded
    }

    fn head_err(&self) -> MalformedRecord {
        match self.codec.decode(&self.buf) {
            Err(CodecErr::Malformed(e)) => e,
            _ => MalformedRecord::Length {
                got: self.buf.len(),
                expected: self.codec.record_len(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{Image, ImageShape};

    const N: usize = 25;

    fn codec() -> FrameCodec {
        FrameCodec::new(ImageShape::new(4, 3, 2), 10)
    }

    fn images() -> Vec<Image> {
        (0..N)
            .map(|i| {
                let pixels: Vec<u8> = (0..24).map(|p| (i * 31 + p) as u8).collect();
                Image::new((i % 10) as u8, pixels)
            })
            .collect()
    }

    fn stream(codec: FrameCodec, images: &[Image]) -> Vec<u8> {
        let mut buf = Vec::new();
        for img in images {
            codec.encode(img, &mut buf).unwrap();
        }
        buf
    }

    fn reframe<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<Image> {
        let mut reframer = StreamReframer::new(codec());
        let mut frames = Vec::new();

        for chunk in chunks {
            reframer.push(chunk, &mut frames).unwrap();
        }

        assert_eq!(reframer.finish(), 0);
        frames
            .into_iter()
            .map(|frame| match frame {
                Frame::Image(img) => img,
                Frame::End => panic!("unexpected end marker"),
            })
            .collect()
    }

    #[test]
    fn single_giant_chunk() {
        let images = images();
        let bytes = stream(codec(), &images);
        assert_eq!(reframe([bytes.as_slice()]), images);
    }

    #[test]
    fn one_byte_chunks() {
        let images = images();
        let bytes = stream(codec(), &images);
        assert_eq!(reframe(bytes.chunks(1)), images);
    }

    #[test]
    fn random_splits() {
        let images = images();
        let bytes = stream(codec(), &images);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..50 {
            let mut chunks = Vec::new();
            let mut rest = bytes.as_slice();

            while !rest.is_empty() {
                let at = rng.random_range(0..=rest.len().min(80));
                let (chunk, tail) = rest.split_at(at);
                chunks.push(chunk);
                rest = tail;
            }

            assert_eq!(reframe(chunks), images);
        }
    }

    #[test]
    fn partial_tail_is_discarded() {
        let codec = codec();
        let images = images();
        let bytes = stream(codec, &images[..2]);
        let cut = bytes.len() - 5;

        let mut reframer = StreamReframer::new(codec);
        let mut frames = Vec::new();
        reframer.push(&bytes[..cut], &mut frames).unwrap();

        assert_eq!(frames, vec![Frame::Image(images[0].clone())]);
        assert_eq!(reframer.finish(), codec.record_len() - 5);
        assert_eq!(reframer.buffered(), 0);
    }

    #[test]
    fn malformed_record_poisons_the_stream() {
        let codec = codec();
        let images = images();
        let mut bytes = stream(codec, &images[..1]);
        bytes.extend_from_slice(&[0, 0, 0, 3, 1, 2, 3]);
        bytes.extend_from_slice(&stream(codec, &images[1..2]));

        let mut reframer = StreamReframer::new(codec);
        let mut frames = Vec::new();

        let err = reframer.push(&bytes, &mut frames).unwrap_err();
        assert!(matches!(err, MalformedRecord::Length { got: 3, .. }));
        assert_eq!(frames.len(), 1);
        assert!(reframer.next_frame().is_err());
    }

    #[test]
    fn end_marker_is_a_frame() {
        let codec = codec();
        let mut bytes = stream(codec, &images()[..1]);
        codec.encode_end(&mut bytes);

        let mut reframer = StreamReframer::new(codec);
        let mut frames = Vec::new();
        reframer.push(&bytes, &mut frames).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], Frame::End);
    }
}
