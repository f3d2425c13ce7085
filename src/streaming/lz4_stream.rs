//! LZ4 frame wrappers over borrowed byte channels
//!
//! The wrappers only borrow the channel: closing a wrapper finishes the frame
//! and leaves the channel open for its owner.

use std::io::{self, Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

/// Compressing writer around `&mut W`
pub struct Lz4FrameWriter<'a, W: Write> {
    encoder: Option<FrameEncoder<&'a mut W>>,
}

impl<'a, W: Write> Lz4FrameWriter<'a, W> {
    pub fn new(inner: &'a mut W) -> Self {
        Self {
            encoder: Some(FrameEncoder::new(inner)),
        }
    }

    /// Write the frame end marker and flush the channel
    ///
    /// Calling `close` twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(encoder) = self.encoder.take() {
            let inner = encoder.finish().map_err(io::Error::other)?;
            inner.flush()?;
        }
        Ok(())
    }

    fn encoder(&mut self) -> io::Result<&mut FrameEncoder<&'a mut W>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "lz4 frame already closed"))
    }
}

impl<W: Write> Write for Lz4FrameWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder()?.flush()
    }
}

impl<W: Write> Drop for Lz4FrameWriter<'_, W> {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            if let Err(e) = self.close() {
                log::warn!("Failed to finish lz4 frame on drop: {}", e);
            }
        }
    }
}

/// Decompressing reader around `&mut R`
pub struct Lz4FrameReader<'a, R: Read> {
    decoder: FrameDecoder<&'a mut R>,
}

impl<'a, R: Read> Lz4FrameReader<'a, R> {
    pub fn new(inner: &'a mut R) -> Self {
        Self {
            decoder: FrameDecoder::new(inner),
        }
    }
}

impl<R: Read> Read for Lz4FrameReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip_keeps_channel_open() {
        let payload: Vec<u8> = (0..10_000u32).flat_map(|n| (n % 7).to_le_bytes()).collect();

        let mut channel: Vec<u8> = Vec::new();
        {
            let mut writer = Lz4FrameWriter::new(&mut channel);
            writer.write_all(&payload).unwrap();
            writer.close().unwrap();
            writer.close().unwrap();
            assert!(writer.write(b"x").is_err());
        }
        assert!(channel.len() < payload.len());

        let mut cursor = io::Cursor::new(channel);
        let mut out = Vec::new();
        Lz4FrameReader::new(&mut cursor).read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
        // the reader only borrowed the cursor
        assert_eq!(cursor.position() as usize, cursor.get_ref().len());
    }
}
