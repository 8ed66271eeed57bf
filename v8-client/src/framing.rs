// Content-Length framing
//
// Each message is a header block terminated by a blank line, then exactly
// Content-Length bytes of UTF-8 JSON. The engine's connect greeting is a
// headers-only frame with no body and is skipped here.

use bytes::{BufMut, BytesMut};
use debugger_core::protocol::{ProtocolError, ProtocolResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::{debug, warn};

use crate::wire::{WireMessage, WireRequest};

/// Upper bound on a frame body. Keeps a misbehaving engine from forcing an
/// unbounded allocation.
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Encodes one outgoing command frame.
pub fn encode_frame(request: &WireRequest<'_>) -> ProtocolResult<Vec<u8>> {
    let body = serde_json::to_vec(request)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = BytesMut::with_capacity(header.len() + body.len());
    frame.put_slice(header.as_bytes());
    frame.put_slice(&body);
    Ok(frame.to_vec())
}

/// Reads the next frame carrying a body. Returns `Ok(None)` on a clean
/// close between frames; any mid-frame close or malformed header is an
/// error.
pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<WireMessage>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut content_length: usize = 0;
        let mut saw_header = false;
        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                if saw_header {
                    return Err(ProtocolError::Decode(
                        "connection closed mid frame".to_string(),
                    ));
                }
                return Ok(None);
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            let trimmed = line.trim_end();
            let Some((key, value)) = trimmed.split_once(':') else {
                if trimmed.starts_with("Remote debugging session already active") {
                    warn!("target already has a debugger attached");
                }
                return Err(ProtocolError::Decode(format!(
                    "malformed header line: {}",
                    trimmed
                )));
            };
            saw_header = true;
            if key.eq_ignore_ascii_case("Content-Length") {
                content_length = value.trim().parse().map_err(|_| {
                    ProtocolError::Decode(format!("bad content length: {}", value.trim()))
                })?;
            }
        }

        if content_length == 0 {
            // Greeting and keepalive frames carry headers only.
            debug!("skipping bodyless frame");
            continue;
        }
        if content_length > MAX_BODY_SIZE {
            return Err(ProtocolError::Decode(format!(
                "frame body too large: {} bytes",
                content_length
            )));
        }

        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
        let message = serde_json::from_slice::<WireMessage>(&body)?;
        return Ok(Some(message));
    }
}
