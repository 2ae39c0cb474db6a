//! In-memory server side for connection tests

use std::future::Future;

use bytes::BytesMut;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::connector::{BoxedSocket, ConnectTarget, Connector};
use crate::error::Result;
use crate::frame::{Frame, OpCode, encode_frame, read_frame};
use crate::handshake::generate_accept_key;

type Serve = Box<dyn Fn(usize, DuplexStream) -> BoxFuture<'static, ()> + Send + Sync>;

/// Connector handing out duplex pipes with a scripted server on the far end
///
/// The script gets the zero-based attempt number and the server end.
pub(crate) struct MockConnector {
    serve: Serve,
    targets: Mutex<Vec<ConnectTarget>>,
}

impl MockConnector {
    pub(crate) fn new<F, Fut>(serve: F) -> Self
    where
        F: Fn(usize, DuplexStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            serve: Box::new(move |attempt, stream| Box::pin(serve(attempt, stream))),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.targets.lock().len()
    }

    pub(crate) fn targets(&self) -> Vec<ConnectTarget> {
        self.targets.lock().clone()
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, target: &'a ConnectTarget) -> BoxFuture<'a, Result<BoxedSocket>> {
        let attempt = {
            let mut targets = self.targets.lock();
            targets.push(target.clone());
            targets.len() - 1
        };
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn((self.serve)(attempt, server));
        Box::pin(async move { Ok(Box::new(client) as BoxedSocket) })
    }
}

/// Read a request head; returns it with its Sec-WebSocket-Key
pub(crate) async fn read_request(stream: &mut DuplexStream) -> (String, String) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    let key = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("sec-websocket-key")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_default();
    (head, key)
}

pub(crate) async fn respond(stream: &mut DuplexStream, response: &str) {
    stream.write_all(response.as_bytes()).await.unwrap();
}

/// Answer with a valid 101 for `key`
pub(crate) async fn accept_upgrade(stream: &mut DuplexStream, key: &str, protocol: Option<&str>) {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        generate_accept_key(key)
    );
    if let Some(protocol) = protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
    }
    response.push_str("\r\n");
    respond(stream, &response).await;
}

/// Send an unmasked server frame
pub(crate) async fn send_frame(stream: &mut DuplexStream, opcode: OpCode, payload: &[u8], fin: bool) {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, opcode, payload, fin, None);
    stream.write_all(&buf).await.unwrap();
}

/// Read one (masked) client frame
pub(crate) async fn recv_frame(stream: &mut DuplexStream) -> Frame {
    read_frame(stream, usize::MAX).await.unwrap()
}
