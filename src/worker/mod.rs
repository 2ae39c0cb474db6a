//! Connection workers
//!
//! Each connection runs three tasks:
//! - [`reader`]: decodes frames, answers pings, reassembles messages
//! - [`dispatcher`]: hands messages to the caller's handler
//! - [`writer`]: encodes, masks and flushes queued frames
//!
//! They are joined by unbounded queues that end with an explicit
//! `Shutdown` sentinel, so every item queued before teardown is finished.

pub(crate) mod dispatcher;
pub(crate) mod reader;
pub(crate) mod writer;

use std::sync::Arc;

use tokio::sync::mpsc::unbounded_channel;

use crate::Config;
use crate::connection::Handler;
use crate::handshake::Handshake;
use crate::payload::OutgoingFrame;
use crate::protocol::Message;
use crate::state::Shared;

/// Writer queue item
#[derive(Debug)]
pub(crate) enum WriterCommand {
    Frame(OutgoingFrame),
    Shutdown,
}

/// Dispatcher queue item
#[derive(Debug)]
pub(crate) enum DispatchCommand {
    Message(Message),
    Shutdown,
}

/// Split the upgraded socket and start the three workers
pub(crate) fn spawn<H: Handler>(handshake: Handshake, config: &Config, handler: H) -> Arc<Shared> {
    let Handshake {
        socket,
        url,
        protocol,
    } = handshake;

    let (out_tx, out_rx) = unbounded_channel();
    let (dispatch_tx, dispatch_rx) = unbounded_channel();
    let shared = Arc::new(Shared::new(url, protocol, out_tx, dispatch_tx));

    let (read_half, write_half) = tokio::io::split(socket);

    tokio::spawn(writer::run(
        shared.clone(),
        write_half,
        out_rx,
        config.write_buffer_size,
        config.close_timeout,
    ));
    tokio::spawn(dispatcher::run(shared.clone(), dispatch_rx, handler));
    let reader = tokio::spawn(reader::run(
        shared.clone(),
        read_half,
        config.max_frame_size,
        config.max_message_size,
    ));
    shared.set_reader(reader.abort_handle());

    shared
}
