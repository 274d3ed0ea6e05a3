use std::io;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Frame, FrameCodec, Image, StreamReframer};

const READ_CHUNK: usize = 64 * 1024;

/// What the byte source produced next.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadEvent {
    Image(Image),
    /// The stream ended cleanly, either by closing or by an end marker.
    /// `discarded` is the size of the incomplete tail that was dropped.
    End { discarded: usize },
}

/// The receiving end of the image stream.
pub struct FrameReader<R: AsyncRead + Unpin> {
    rx: R,
    reframer: StreamReframer,
    chunk: Box<[u8]>,
    received: u64,
    ended: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a new `FrameReader` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    /// * `codec` - The codec the sender encodes with.
    pub fn new(rx: R, codec: FrameCodec) -> Self {
        Self {
            rx,
            reframer: StreamReframer::new(codec),
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
            received: 0,
            ended: false,
        }
    }

    /// The total amount of bytes read from the source.
    #[inline]
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Waits for the next image of the stream.
    ///
    /// This method is cancel safe, bytes are only consumed from the source
    /// when a read completes, so it can be raced against a timeout.
    ///
    /// # Returns
    /// The next `ReadEvent`, once `End` is returned every later call returns
    /// `End { discarded: 0 }`. An `InvalidData` error is returned on a
    /// malformed record and any other `io::Error` is forwarded from the source.
    pub async fn next(&mut self) -> io::Result<ReadEvent> {
        loop {
            if self.ended {
                return Ok(ReadEvent::End { discarded: 0 });
            }

            match self.reframer.next_frame()? {
                Some(Frame::Image(img)) => return Ok(ReadEvent::Image(img)),
                Some(Frame::End) => {
                    let dropped = self.reframer.finish();
                    debug!(dropped = dropped; "end marker received, ignoring what follows it");
                    self.ended = true;
                    return Ok(ReadEvent::End { discarded: 0 });
                }
                None => {}
            }

            let read = self.rx.read(&mut self.chunk).await?;
            if read == 0 {
                return Ok(self.end());
            }

            self.received += read as u64;
            self.reframer.extend(&self.chunk[..read]);
        }
    }

    fn end(&mut self) -> ReadEvent {
        self.ended = true;

        let discarded = self.reframer.finish();
        if discarded > 0 {
            warn!(discarded = discarded; "stream ended mid record, discarding the incomplete tail");
        }

        ReadEvent::End { discarded }
    }
}
