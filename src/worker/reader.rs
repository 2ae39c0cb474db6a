//! Frame reader task

use std::sync::Arc;

use tokio::io::{BufReader, ReadHalf};

use crate::connector::BoxedSocket;
use crate::frame::{OpCode, read_frame};
use crate::payload::OutgoingFrame;
use crate::protocol::Reassembler;
use crate::state::Shared;

/// Read buffer size (64KB for high throughput)
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Decode frames until a close frame or an error
///
/// Pings are answered here and never reach the handler; pongs are dropped.
pub(crate) async fn run(
    shared: Arc<Shared>,
    read_half: ReadHalf<BoxedSocket>,
    max_frame_size: usize,
    max_message_size: usize,
) {
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, read_half);
    let mut reassembler = Reassembler::new(max_message_size);

    let error = loop {
        let frame = match read_frame(&mut reader, max_frame_size).await {
            Ok(frame) => frame,
            Err(e) => break e,
        };
        tracing::trace!(
            opcode = ?frame.opcode,
            fin = frame.fin,
            len = frame.payload.len(),
            "frame received"
        );

        match frame.opcode {
            OpCode::Close => {
                shared.peer_closed(frame.parse_close());
                return;
            }
            OpCode::Ping => shared.send_control(OutgoingFrame::pong(frame.payload)),
            OpCode::Pong => {}
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                match reassembler.push(frame) {
                    Ok(Some(message)) => shared.dispatch(message),
                    Ok(None) => {}
                    Err(e) => break e,
                }
            }
        }
    };

    if let Some(code) = error.close_code() {
        shared.send_control(OutgoingFrame::close(Some(code)));
    }
    shared.fail(error);
}
