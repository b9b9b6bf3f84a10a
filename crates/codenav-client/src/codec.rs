//! Content-Length framing for LSP base protocol messages.

use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

const CONTENT_LENGTH: &str = "content-length";
const CRLF: &str = "\r\n";
const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024; // 64MB

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid Content-Length: {0}")]
    InvalidLength(String),
    #[error("Content-Length {0} exceeds limit")]
    TooLarge(usize),
    #[error("frame body is not UTF-8")]
    NotUtf8,
    #[error("IO: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Whether the reader can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FrameError::Io(e) => e.kind() == io::ErrorKind::Interrupted,
            _ => true,
        }
    }
}

/// Frame a message body with its Content-Length header.
pub fn encode_frame(content: &[u8]) -> Bytes {
    let header = format!("Content-Length: {}{}{}", content.len(), CRLF, CRLF);
    let mut buffer = BytesMut::with_capacity(header.len() + content.len());
    buffer.extend_from_slice(header.as_bytes());
    buffer.extend_from_slice(content);
    buffer.freeze()
}

/// Read one framed body. `Ok(None)` means the stream ended cleanly.
///
/// Lines before a Content-Length header that are not headers are skipped, since some
/// servers print log output to stdout.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    read_frame_limited(reader, MAX_CONTENT_LENGTH).await
}

async fn read_frame_limited<R>(reader: &mut R, limit: usize) -> Result<Option<String>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let header = line.trim();
        if header.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }

        match header.split_once(':') {
            Some((name, value)) if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) => {
                let value = value.trim();
                let length = value
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidLength(value.to_string()))?;
                content_length = Some(length);
            }
            // Content-Type and friends
            _ => continue,
        }
    }

    let length = content_length.unwrap_or_default();
    if length > limit {
        // Skip the body so the next header starts where the reader is.
        tokio::io::copy(&mut (&mut *reader).take(length as u64), &mut tokio::io::sink()).await?;
        return Err(FrameError::TooLarge(length));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    String::from_utf8(body).map(Some).map_err(|_| FrameError::NotUtf8)
}
