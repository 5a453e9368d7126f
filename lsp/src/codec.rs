//! JSON-RPC framing codec for analyzer communication.
//!
//! Messages are framed as `Content-Length: N\r\n\r\n{json}` in both
//! directions, whether the byte stream is a pipe socket or stdio.
//! [`FrameReader`] and [`FrameWriter`] read and write whole frames.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Default maximum frame size (16 MiB). Formatting replies carry the whole
/// document, so this is larger than a diagnostics-only client would need.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected EOF while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("malformed JSON-RPC frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF between frames (clean close).
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, FrameError> {
        let Some(len) = self.read_headers().await? else {
            return Ok(None);
        };

        if len > self.max_frame_bytes {
            return Err(FrameError::FrameTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }

        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::UnexpectedEof("frame body")
            } else {
                FrameError::Io(e)
            }
        })?;

        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Parse headers up to the blank separator line.
    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut content_length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                // EOF is only clean before the first header byte.
                if started {
                    return Err(FrameError::UnexpectedEof("headers"));
                }
                return Ok(None);
            }
            started = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let value = value.trim();
                let len = value
                    .parse()
                    .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?;
                content_length = Some(len);
            }
        }

        content_length.map(Some).ok_or(FrameError::MissingContentLength)
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), FrameError> {
        let body = serde_json::to_vec(msg)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flush and close the underlying writer.
    pub async fn close(&mut self) -> Result<(), FrameError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
