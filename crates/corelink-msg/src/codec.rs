//! ---
//! cl_section: "02-wire-protocol"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Message schema helpers and protocol codecs."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
//! Newline-delimited JSON framing over any tokio byte stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use crate::frame::Frame;

/// Errors raised while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The underlying stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A line was not a valid frame. The stream itself is still usable.
    #[error("malformed frame: {source}")]
    Malformed {
        /// Offending line, truncated for logging.
        line: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

impl CodecError {
    /// Whether reading may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CodecError::Malformed { .. })
    }
}

const MAX_LOGGED_LINE: usize = 256;

/// Serialize a frame into a single newline-terminated line.
pub fn encode(frame: &Frame) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line into a frame.
pub fn decode(line: &str) -> Result<Frame, CodecError> {
    serde_json::from_str(line).map_err(|source| CodecError::Malformed {
        line: line.chars().take(MAX_LOGGED_LINE).collect(),
        source,
    })
}

/// Reads frames from the inbound half of a connection.
pub struct FrameReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a raw reader.
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Next frame, or `Ok(None)` once the peer closed the stream.
    ///
    /// Blank lines are skipped. A malformed line yields
    /// [`CodecError::Malformed`] and the reader stays positioned after it.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return decode(trimmed).map(Some);
        }
    }
}

/// Writes frames to the outbound half of a connection.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a raw writer.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode, write and flush one frame.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), CodecError> {
        let line = encode(frame).map_err(|source| CodecError::Malformed {
            line: frame.kind().to_owned(),
            source,
        })?;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
