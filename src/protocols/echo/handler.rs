//! Echo probe connection handler.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};

use super::parser::{FrameParser, ParseResult};
use crate::runtime::Connection;

/// Read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// Serve one admitted connection until the peer leaves, then release its slot.
///
/// Errors never escape: a reset or malformed peer only ends this connection.
pub async fn handle_connection<S>(mut conn: Connection<S>, max_probe_size: usize)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = echo(&mut conn.stream, max_probe_size).await;
    conn.begin_close();

    match result {
        Ok(()) => trace!(peer = %conn.peer, "Connection closed by client"),
        Err(e) => debug!(peer = %conn.peer, error = %e, "Connection error"),
    }

    let age_ms = conn.age().num_milliseconds();
    if let Some(remaining) = conn.close() {
        debug!(peer = %conn.peer, age_ms, "connection released");
        info!("Total connections: {remaining}");
    }
}

/// Echo every sentinel-terminated frame back without its sentinel.
///
/// Returns `Ok(())` on a clean EOF from the peer.
pub async fn echo<S>(stream: &mut S, max_probe_size: usize) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let mut parser = FrameParser::new(max_probe_size);

    loop {
        loop {
            match parser.parse(&mut buffer) {
                ParseResult::Complete(payload) => {
                    trace!(len = payload.len(), "Echoing probe");
                    stream.write_all(&payload).await?;
                }
                ParseResult::Incomplete => break,
                ParseResult::TooLarge => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("probe exceeds {max_probe_size} bytes"),
                    ));
                }
            }
        }
        stream.flush().await?;

        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }
    }
}
