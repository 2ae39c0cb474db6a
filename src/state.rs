//! Per-connection shared state
//!
//! Everything the workers and the caller handles touch lives here: the
//! liveness flags, the first-fault-wins error cell, the completed result
//! tokens and the stored data map. The queue senders sit here too, so any
//! holder can enqueue frames or trigger teardown.

use std::any::Any;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;
use url::Url;

use crate::error::{CloseReason, Error, Result};
use crate::payload::OutgoingFrame;
use crate::protocol::Message;
use crate::worker::{DispatchCommand, WriterCommand};

/// Name of a result a handler can complete and a caller can wait for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(Cow<'static, str>);

impl Token {
    /// Create a token
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Token name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Token {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for Token {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recorded fault
#[derive(Debug)]
struct Fault {
    error: Arc<Error>,
    /// Whether the connection was still up when the fault hit
    was_open: bool,
    /// False for errors that follow an orderly close; those are kept but
    /// never raised to callers
    loggable: bool,
}

impl Fault {
    fn raised(&self) -> Option<Arc<Error>> {
        self.loggable.then(|| self.error.clone())
    }
}

/// Completed tokens plus the wake-all signal for waiters
///
/// A token stays in the set until a `wait_for` consumes it, also after the
/// dispatcher stops, so a waiter arriving late still sees it. Completing a
/// token twice keeps one entry.
#[derive(Default)]
struct Results {
    done: Mutex<HashSet<Token>>,
    cancelled: AtomicBool,
    notify: Notify,
}

impl Results {
    fn complete(&self, token: Token) {
        self.done.lock().insert(token);
        self.notify.notify_waiters();
    }

    fn take(&self, tokens: &[Token]) -> Option<Token> {
        let mut done = self.done.lock();
        tokens.iter().find_map(|t| done.take(t))
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// State shared by a connection's handles and workers
pub(crate) struct Shared {
    url: Url,
    protocol: Option<String>,

    fault: Mutex<Option<Fault>>,
    /// Set by a caller close or a peer close frame
    closed: AtomicBool,
    peer_closed: AtomicBool,
    torn_down: AtomicBool,
    /// Flips to true on teardown; the writer bounds its final drain by it
    teardown_signal: watch::Sender<bool>,
    close_reason: Mutex<Option<CloseReason>>,

    results: Results,
    data: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,

    outgoing: UnboundedSender<WriterCommand>,
    dispatch: UnboundedSender<DispatchCommand>,
    reader: Mutex<Option<AbortHandle>>,
}

impl Shared {
    pub(crate) fn new(
        url: Url,
        protocol: Option<String>,
        outgoing: UnboundedSender<WriterCommand>,
        dispatch: UnboundedSender<DispatchCommand>,
    ) -> Self {
        let (teardown_signal, _) = watch::channel(false);
        Self {
            url,
            protocol,
            fault: Mutex::new(None),
            closed: AtomicBool::new(false),
            peer_closed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            teardown_signal,
            close_reason: Mutex::new(None),
            results: Results::default(),
            data: Mutex::new(HashMap::new()),
            outgoing,
            dispatch,
            reader: Mutex::new(None),
        }
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    // -- liveness --

    /// Fail with the recorded fault, or a closed error, if the connection is down
    pub(crate) fn check_open(&self) -> Result<()> {
        if let Some(error) = self.error() {
            return Err(Error::Fault(error));
        }
        if self.peer_closed.load(Ordering::Acquire) {
            return Err(Error::Closed(self.close_reason()));
        }
        if self.closed.load(Ordering::Acquire) || self.torn_down.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    pub(crate) fn is_open(&self) -> bool {
        self.check_open().is_ok()
    }

    /// Fault that took the connection down, if any
    pub(crate) fn error(&self) -> Option<Arc<Error>> {
        self.fault.lock().as_ref().and_then(Fault::raised)
    }

    /// Error recorded after an orderly close, kept for diagnostics only
    pub(crate) fn suppressed_error(&self) -> Option<Arc<Error>> {
        self.fault
            .lock()
            .as_ref()
            .filter(|f| !f.loggable)
            .map(|f| f.error.clone())
    }

    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }

    /// Record `error` and tear down
    ///
    /// The first fault wins. Errors after an orderly close are recorded as
    /// not loggable: they show up in [`Shared::suppressed_error`] but callers
    /// still see the close as clean.
    pub(crate) fn fail(&self, error: Error) {
        {
            let mut fault = self.fault.lock();
            if fault.is_none() {
                let was_open = !self.torn_down.load(Ordering::Acquire);
                let loggable = !self.closed.load(Ordering::Acquire);
                match (loggable, was_open) {
                    (true, true) => {
                        tracing::warn!(url = %self.url, error = %error, "websocket connection failed")
                    }
                    (true, false) => {
                        tracing::debug!(url = %self.url, error = %error, "error after teardown")
                    }
                    (false, _) => tracing::trace!(error = %error, "error after close"),
                }
                *fault = Some(Fault {
                    error: Arc::new(error),
                    was_open,
                    loggable,
                });
            }
        }
        self.teardown();
    }

    /// Caller-initiated close; returns false if already closed
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if !self.torn_down.load(Ordering::Acquire) {
            tracing::debug!(url = %self.url, "closing websocket connection");
            let _ = self
                .outgoing
                .send(WriterCommand::Frame(OutgoingFrame::close(Some(CloseReason::NORMAL))));
        }
        self.teardown();
        true
    }

    /// Peer sent a close frame: echo it and tear down
    pub(crate) fn peer_closed(&self, reason: Option<CloseReason>) {
        tracing::debug!(url = %self.url, reason = ?reason, "peer closed websocket connection");
        let code = reason.as_ref().map(|r| r.code);
        *self.close_reason.lock() = reason;
        self.peer_closed.store(true, Ordering::Release);

        if !self.closed.swap(true, Ordering::AcqRel) {
            self.send_control(OutgoingFrame::close(code));
        }
        self.teardown();
    }

    /// Stop every worker; idempotent
    ///
    /// Sentinels go to the back of both queues so queued items finish first.
    /// The reader is aborted, which drops the read half. The writer gets the
    /// close grace to finish its queue, then drops the write half, which
    /// closes the socket even if the peer stopped reading.
    pub(crate) fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outgoing.send(WriterCommand::Shutdown);
        let _ = self.dispatch.send(DispatchCommand::Shutdown);
        self.teardown_signal.send_replace(true);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }

    /// Resolves once teardown has started
    pub(crate) fn teardown_started(&self) -> impl Future<Output = ()> + Send + use<> {
        let mut signal = self.teardown_signal.subscribe();
        async move {
            // A dropped sender means the state is gone, which counts too
            let _ = signal.wait_for(|down| *down).await;
        }
    }

    /// Hand over the reader task so teardown can abort it
    pub(crate) fn set_reader(&self, handle: AbortHandle) {
        let mut slot = self.reader.lock();
        if self.torn_down.load(Ordering::Acquire) {
            handle.abort();
        } else {
            *slot = Some(handle);
        }
    }

    // -- queues --

    /// Enqueue a caller frame, failing fast if the connection is down
    pub(crate) fn send(&self, frame: OutgoingFrame) -> Result<()> {
        self.check_open()?;
        tracing::trace!(opcode = ?frame.opcode, len = frame.len, "frame queued");
        self.outgoing
            .send(WriterCommand::Frame(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Enqueue a control reply regardless of close state
    pub(crate) fn send_control(&self, frame: OutgoingFrame) {
        let _ = self.outgoing.send(WriterCommand::Frame(frame));
    }

    pub(crate) fn dispatch(&self, message: Message) {
        let _ = self.dispatch.send(DispatchCommand::Message(message));
    }

    // -- results --

    pub(crate) fn complete(&self, token: Token) {
        tracing::trace!(token = %token, "result completed");
        self.results.complete(token);
    }

    /// Release every waiter; called when the dispatcher stops
    pub(crate) fn cancel_results(&self) {
        self.results.cancel();
    }

    /// Wait until one of `tokens` completes or the dispatcher stops
    ///
    /// Consumes the completed token. After the dispatcher stops, a recorded
    /// fault is returned as an error and an orderly close as `None`.
    pub(crate) async fn wait_for(&self, tokens: &[Token]) -> Result<Option<Token>> {
        loop {
            let mut notified = std::pin::pin!(self.results.notify.notified());
            // Register before checking so a wake between check and await is kept
            notified.as_mut().enable();

            if let Some(token) = self.results.take(tokens) {
                return Ok(Some(token));
            }
            if self.results.cancelled.load(Ordering::Acquire) {
                return match self.error() {
                    Some(error) => Err(Error::Fault(error)),
                    None => Ok(None),
                };
            }

            notified.await;
        }
    }

    // -- stored data --

    pub(crate) fn store(&self, key: String, value: Arc<dyn Any + Send + Sync>) {
        self.data.lock().insert(key, value);
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.data.lock().get(key).cloned()
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("url", &self.url.as_str())
            .field("protocol", &self.protocol)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("torn_down", &self.torn_down.load(Ordering::Relaxed))
            .field("fault", &self.fault.lock().as_ref().map(|f| (&f.error, f.was_open, f.loggable)))
            .finish_non_exhaustive()
    }
}
