//! Frame writer task

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter, WriteHalf};
use tokio::sync::mpsc::UnboundedReceiver;

use super::WriterCommand;
use crate::connector::BoxedSocket;
use crate::error::Result;
use crate::frame::write_frame;
use crate::mask::generate_mask;
use crate::payload::OutgoingFrame;
use crate::state::Shared;

/// Write queued frames until the shutdown sentinel, then shut the half down
///
/// Once teardown starts the rest of the queue (the close frame included)
/// gets `close_timeout` to go out. After that the write half is dropped
/// where it stands, which closes the socket under a peer that stopped
/// reading or a stream part that stalled.
pub(crate) async fn run(
    shared: Arc<Shared>,
    write_half: WriteHalf<BoxedSocket>,
    rx: UnboundedReceiver<WriterCommand>,
    write_buffer_size: usize,
    close_timeout: Duration,
) {
    let mut drain = std::pin::pin!(drain(write_half, rx, write_buffer_size));

    let result = tokio::select! {
        result = &mut drain => result,
        () = shared.teardown_started() => {
            match tokio::time::timeout(close_timeout, &mut drain).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(url = %shared.url(), "close grace elapsed, dropping socket");
                    return;
                }
            }
        }
    };

    if let Err(e) = result {
        shared.fail(e);
    }
}

async fn drain(
    write_half: WriteHalf<BoxedSocket>,
    mut rx: UnboundedReceiver<WriterCommand>,
    write_buffer_size: usize,
) -> Result<()> {
    let mut writer = BufWriter::with_capacity(write_buffer_size, write_half);
    let mut chunk = BytesMut::with_capacity(write_buffer_size);

    while let Some(command) = rx.recv().await {
        let frame = match command {
            WriterCommand::Frame(frame) => frame,
            WriterCommand::Shutdown => break,
        };
        send_frame(&mut writer, frame, &mut chunk, write_buffer_size).await?;
    }

    if let Err(e) = writer.shutdown().await {
        tracing::trace!(error = %e, "write half shutdown failed");
    }
    Ok(())
}

async fn send_frame<W>(
    writer: &mut W,
    frame: OutgoingFrame,
    chunk: &mut BytesMut,
    chunk_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let opcode = frame.opcode;
    let len = frame.len;
    write_frame(writer, frame, generate_mask(), chunk, chunk_size).await?;
    writer.flush().await?;
    tracing::trace!(opcode = ?opcode, len, "frame written");
    Ok(())
}
