mod codec;
mod image;
mod reader;
mod reframer;
pub mod specs;
mod writer;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{CodecErr, Frame, FrameCodec, MalformedRecord};
pub use image::{Image, ImageShape};
pub use reader::{FrameReader, ReadEvent};
pub use reframer::StreamReframer;
pub use writer::FrameWriter;

/// Creates both `FrameReader` and `FrameWriter` stream parts.
///
/// Given a reader and a writer creates and returns both ends of the stream.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
/// * `codec` - The codec both ends agree on.
///
/// # Returns
/// The image stream in the form of a frame reader and writer.
pub fn channel<R, W>(rx: R, tx: W, codec: FrameCodec) -> (FrameReader<R>, FrameWriter<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReader::new(rx, codec), FrameWriter::new(tx, codec))
}
