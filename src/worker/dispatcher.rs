//! Message dispatcher task

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use super::DispatchCommand;
use crate::connection::{Connection, Event, Handler};
use crate::error::Error;
use crate::payload::OutgoingFrame;
use crate::state::Shared;

/// Feed queued messages to `handler` until the shutdown sentinel
///
/// A handler error or panic faults the connection and stops the loop.
/// Waiters are released however the loop ends.
pub(crate) async fn run<H: Handler>(
    shared: Arc<Shared>,
    mut rx: UnboundedReceiver<DispatchCommand>,
    mut handler: H,
) {
    while let Some(command) = rx.recv().await {
        let message = match command {
            DispatchCommand::Message(message) => message,
            DispatchCommand::Shutdown => break,
        };

        let event = Event::new(Connection::from_shared(shared.clone()), message);
        let error = match panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(&event))) {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => Error::Handler(e.to_string()),
            Err(payload) => {
                Error::Handler(format!("handler panicked: {}", panic_message(&*payload)))
            }
        };

        if shared.is_open() {
            shared.send_control(OutgoingFrame::close(error.close_code()));
        }
        shared.fail(error);
        break;
    }

    shared.cancel_results();
    tracing::trace!(url = %shared.url(), "dispatcher stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
