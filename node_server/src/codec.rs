//! Message framing over an opaque bidirectional transport.
//!
//! The transport carries whole JSON texts; a WebSocket or pipe adapter maps
//! its own message type onto [`Transport`]. Reads happen on the connection
//! task that owns the stream half. Writes go through [`MessageSink`], a
//! cloneable handle over an unbounded queue drained by a single writer
//! task, so every queued value reaches the wire as one atomic unit in
//! queue order.

use {
    futures_util::{
        stream::{SplitSink, SplitStream},
        Sink, SinkExt, Stream, StreamExt,
    },
    serde::Serialize,
    std::{
        pin::Pin,
        sync::Arc,
        task::{Context, Poll},
    },
    tokio::sync::{mpsc, watch},
};

/// Errors produced by the underlying byte-stream carrier.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Requirements on the carrier of one JSON-RPC session: a bidirectional
/// stream of whole JSON texts.
pub trait Transport:
    Stream<Item = Result<String, TransportError>>
    + Sink<String, Error = TransportError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<String, TransportError>>
        + Sink<String, Error = TransportError>
        + Send
        + Unpin
        + 'static
{
}

/// Cloneable write handle of one connection.
#[derive(Debug, Clone)]
pub struct MessageSink {
    tx: mpsc::UnboundedSender<String>,
    closed: Arc<watch::Sender<bool>>,
}

impl MessageSink {
    /// Serializes and queues a single frame. Returns `false` when the
    /// connection is already gone; the frame is dropped silently.
    pub fn send<T: Serialize>(&self, msg: &T) -> bool {
        match serde_json::to_string(msg) {
            Ok(raw) => self.send_raw(raw),
            Err(err) => {
                tracing::error!("failed to serialize outbound frame: {err}");
                false
            }
        }
    }

    /// Queues an already serialized frame.
    pub fn send_raw(&self, raw: String) -> bool {
        self.tx.send(raw).is_ok()
    }

    /// Orders the connection closed. Idempotent; queued frames that have
    /// not reached the transport yet are discarded.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// The single-shot termination signal of this connection.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

/// One JSON-RPC session over a [`Transport`].
///
/// Construction splits the transport: the read half stays with the caller's
/// serve loop, the write half moves into the writer task draining the
/// [`MessageSink`] queue.
pub struct ServerCodec<T: Transport> {
    reader: SplitStream<T>,
    sink: MessageSink,
}

impl<T: Transport> ServerCodec<T> {
    pub fn new(transport: T) -> Self {
        let (write_half, read_half) = transport.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let sink = MessageSink {
            tx,
            closed: Arc::new(closed),
        };

        tokio::spawn(write_loop(write_half, rx, sink.clone()));

        Self {
            reader: read_half,
            sink,
        }
    }

    pub fn sink(&self) -> MessageSink {
        self.sink.clone()
    }

    /// Reads the next inbound JSON text. `None` on end of stream or once
    /// the connection has been ordered closed.
    pub async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        let mut closed = self.sink.closed();

        tokio::select! {
            inbound = self.reader.next() => inbound,
            _ = wait_until_closed(&mut closed) => None,
        }
    }

    pub fn close(&self) {
        self.sink.close();
    }
}

/// Awaits until `closed` observes `true`, without holding the watch
/// channel's borrow guard across an await point (the guard is not `Send`).
async fn wait_until_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        if *closed.borrow() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

async fn write_loop<T: Transport>(
    mut write_half: SplitSink<T, String>,
    mut rx: mpsc::UnboundedReceiver<String>,
    sink: MessageSink,
) {
    let mut closed = sink.closed();

    loop {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(msg) => {
                    if let Err(err) = write_half.send(msg).await {
                        tracing::debug!("connection write failed: {err}");
                        sink.close();
                        break;
                    }
                }
                None => break,
            },
            _ = wait_until_closed(&mut closed) => {
                // Flush frames that were queued before the close order;
                // anything queued afterwards is discarded.
                while let Ok(msg) = rx.try_recv() {
                    if write_half.send(msg).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    write_half.close().await.ok();
}

/// In-memory [`Transport`] for tests and in-process clients.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: futures_channel::mpsc::UnboundedSender<String>,
    rx: futures_channel::mpsc::UnboundedReceiver<String>,
}

/// Creates a connected pair of in-memory transports.
pub fn duplex() -> (ChannelTransport, ChannelTransport) {
    let (a_tx, b_rx) = futures_channel::mpsc::unbounded();
    let (b_tx, a_rx) = futures_channel::mpsc::unbounded();

    (
        ChannelTransport { tx: a_tx, rx: a_rx },
        ChannelTransport { tx: b_tx, rx: b_rx },
    )
}

impl Stream for ChannelTransport {
    type Item = Result<String, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx).map(|item| item.map(Ok))
    }
}

impl Sink<String> for ChannelTransport {
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tx.poll_ready_unpin(cx).map_err(Into::into)
    }

    fn start_send(mut self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        self.tx.start_send_unpin(item).map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tx.poll_flush_unpin(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tx.poll_close_unpin(cx).map_err(Into::into)
    }
}
