//! The implementation of the sending end of the image stream.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{FrameCodec, Image};

/// The sending end handle of the image stream.
pub struct FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    codec: FrameCodec,
    buf: Vec<u8>,
    sent: u64,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a new `FrameWriter` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    /// * `codec` - The codec to encode records with.
    pub fn new(tx: W, codec: FrameCodec) -> Self {
        Self {
            tx,
            codec,
            buf: Vec::with_capacity(codec.record_len()),
            sent: 0,
        }
    }

    /// The amount of image records written so far.
    #[inline]
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Sends `img` through the inner writer.
    ///
    /// # Arguments
    /// * `img` - The image to send.
    ///
    /// # Returns
    /// An `io::Error` on failure, `InvalidData` if `img` doesn't fit the codec.
    pub async fn send(&mut self, img: &Image) -> io::Result<()> {
        let Self { tx, codec, buf, .. } = self;

        buf.clear();
        codec.encode(img, buf)?;
        tx.write_all(buf).await?;

        self.sent += 1;
        Ok(())
    }

    /// Sends the end of stream marker.
    pub async fn send_end(&mut self) -> io::Result<()> {
        let Self { tx, codec, buf, .. } = self;

        buf.clear();
        codec.encode_end(buf);
        tx.write_all(buf).await
    }

    /// Flushes everything buffered by the inner writer.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.tx.flush().await
    }

    /// Shuts down the write half, the peer will observe the end of the stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.tx
    }
}
