//! Per-connection HTTP handling

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::dispatch::{dispatch, NotificationSink};
use super::protocol;

/// Hard ceiling on an accumulated request body
pub const MAX_BODY_BYTES: usize = 1_000_000;

/// Ceiling on the request line plus headers
const MAX_HEAD_BYTES: u64 = 8 * 1024;

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

struct RequestHead {
    method: String,
    content_length: usize,
    chunked: bool,
}

/// Handle one HTTP connection.
///
/// Only POST bodies are decoded and dispatched; every request of any method
/// is answered with an empty 200. The protocol is fire-and-forget: the
/// response never reflects whether a notification was actually dispatched.
/// The one exception is a body over [`MAX_BODY_BYTES`], which resets the
/// connection without answering at all.
pub async fn handle_connection(
    stream: TcpStream,
    sink: Arc<dyn NotificationSink>,
) -> Result<()> {
    let mut reader = BufReader::new(stream);

    let Some(head) = read_head(&mut reader).await? else {
        // Empty, truncated or oversized head; nothing worth answering
        return Ok(());
    };

    if head.method == "POST" {
        if head.chunked {
            // A streamed body has no declared length to bound; treat it the
            // same as one that crossed the ceiling
            tracing::debug!("chunked request body, resetting connection");
            reset(reader.get_ref());
            return Ok(());
        }
        match accumulate_body(&mut reader, head.content_length).await? {
            Some(body) => {
                let params = protocol::decode_payload(&body);
                match protocol::validate(&params) {
                    Some(request) => dispatch(sink.as_ref(), &request),
                    // Malformed pings are dropped without touching the response
                    None => tracing::debug!("dropping unrecognized payload"),
                }
            }
            None => {
                tracing::debug!(limit = MAX_BODY_BYTES, "request body over limit");
                reset(reader.get_ref());
                return Ok(());
            }
        }
    }

    let stream = reader.get_mut();
    stream.write_all(RESPONSE).await?;
    stream.flush().await?;
    Ok(())
}

/// Read the request line and headers, bounded by [`MAX_HEAD_BYTES`].
///
/// Returns `None` for connections that close early or never finish a head
/// within the bound.
async fn read_head<R>(reader: &mut R) -> std::io::Result<Option<RequestHead>>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = reader.take(MAX_HEAD_BYTES);
    let mut line = String::new();

    if limited.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let method = line
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();

    let mut content_length = 0usize;
    let mut chunked = false;
    loop {
        line.clear();
        if limited.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = value.to_ascii_lowercase().contains("chunked");
            }
        }
    }

    Ok(Some(RequestHead {
        method,
        content_length,
        chunked,
    }))
}

/// Accumulate one request body in chunks, enforcing [`MAX_BODY_BYTES`].
///
/// Returns `None` when the ceiling is crossed; the caller then resets the
/// connection without answering. A peer that closes before sending the
/// declared length yields whatever arrived so far.
async fn accumulate_body<R>(reader: &mut R, declared_len: usize) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    if declared_len > MAX_BODY_BYTES {
        return Ok(None);
    }

    let mut body = Vec::with_capacity(declared_len.min(64 * 1024));
    let mut chunk = [0u8; 8192];
    while body.len() < declared_len {
        let want = chunk.len().min(declared_len - body.len());
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
        if body.len() > MAX_BODY_BYTES {
            return Ok(None);
        }
    }
    Ok(Some(body))
}

/// Turn the close into a hard reset so the sender sees a broken connection
/// instead of a clean HTTP response.
fn reset(stream: &TcpStream) {
    if let Err(e) = stream.set_linger(Some(Duration::from_secs(0))) {
        tracing::debug!("Failed to set linger before reset: {e}");
    }
}
