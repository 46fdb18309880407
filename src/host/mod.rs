//! Stdio transport for the native messaging protocol. The browser talks to
//! the host over stdin/stdout with length-prefixed json frames; this module
//! bridges those pipes and the engine's channels.

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::{
    bytes::Bytes,
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
    sync::CancellationToken,
};
use tracing::{debug, warn};

use crate::engine::messages::{Incoming, Outgoing};

/// Browsers cap native messaging payloads well below this; a longer frame
/// means the stream is corrupted.
const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Chrome native messaging framing: a 4-byte little-endian payload length
/// followed by a json document.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Decodes incoming frames and feeds them to the engine. Cancels the token on
/// end of input: the browser closing the pipe is the host's normal shutdown
/// signal.
pub async fn read_events(
    input: impl AsyncRead + Unpin,
    events: mpsc::Sender<Incoming>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut frames = FramedRead::new(input, codec());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = frames.next() => match frame {
                Some(Ok(frame)) => match serde_json::from_slice::<Incoming>(&frame) {
                    Ok(message) => {
                        debug!("Received message {:?}", message);
                        if events.send(message).await.is_err() {
                            return Ok(());
                        }
                    }
                    // One bad message must not stop the rest of the stream.
                    Err(e) => warn!("Dropping malformed message: {e}"),
                },
                Some(Err(e)) => {
                    shutdown.cancel();
                    return Err(e.into());
                }
                None => {
                    debug!("Input closed, shutting down");
                    shutdown.cancel();
                    return Ok(());
                }
            }
        }
    }
}

/// Encodes outbound messages onto the output stream until the engine drops
/// its sender.
pub async fn write_actions(
    output: impl AsyncWrite + Unpin,
    mut outbound: mpsc::Receiver<Outgoing>,
) -> Result<()> {
    let mut frames = FramedWrite::new(output, codec());
    while let Some(message) = outbound.recv().await {
        debug!("Sending message {:?}", message);
        let payload = serde_json::to_vec(&message)?;
        frames.send(Bytes::from(payload)).await?;
    }
    Ok(())
}
