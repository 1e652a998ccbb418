//! WebSocket transport built on tokio-tungstenite.
//!
//! The stream is split into a writer task fed by an outbound queue and a
//! reader task that decodes inbound messages into frames. Only the reader
//! emits [`TransportEvent::Closed`], once, when the stream ends for any
//! reason.

use std::cell::Cell;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async, connect_async, WebSocketStream};
use tracing::{debug, trace, warn};

use super::{Transport, TransportError, TransportEvent, TransportEvents};
use crate::codec::{JsonCodec, MessageCodec};
use crate::message::Frame;
use crate::providers::TaskProvider;

enum Outbound {
    Message(Message),
    Close,
}

fn ws_error(error: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::Io {
        message: error.to_string(),
    }
}

/// Transport over an established WebSocket stream.
///
/// Frames are encoded with the codec and sent as text when the encoding is
/// valid UTF-8, binary otherwise. Both kinds are accepted inbound. Payloads
/// that fail to decode are logged and dropped.
pub struct WebSocketTransport<C: MessageCodec = JsonCodec> {
    codec: C,
    outbound: mpsc::UnboundedSender<Outbound>,
    closing: Cell<bool>,
}

impl WebSocketTransport<JsonCodec> {
    /// Wrap an established stream using the JSON codec.
    pub fn spawn<S, T>(stream: WebSocketStream<S>, task: &T) -> (Self, TransportEvents)
    where
        S: AsyncRead + AsyncWrite + Unpin + 'static,
        T: TaskProvider,
    {
        Self::spawn_with_codec(stream, JsonCodec, task)
    }

    /// Open a client connection to `url`, for example `ws://127.0.0.1:9000/alice`.
    pub async fn connect<T: TaskProvider>(
        url: &str,
        task: &T,
    ) -> Result<(Self, TransportEvents), TransportError> {
        let (stream, _response) = connect_async(url).await.map_err(ws_error)?;
        debug!(url = url, "websocket connected");
        Ok(Self::spawn(stream, task))
    }

    /// Run the server handshake on an accepted TCP stream.
    pub async fn accept<T: TaskProvider>(
        stream: TcpStream,
        task: &T,
    ) -> Result<(Self, TransportEvents), TransportError> {
        let stream = accept_async(stream).await.map_err(ws_error)?;
        Ok(Self::spawn(stream, task))
    }

    /// Run the server handshake and also return the request path.
    pub async fn accept_with_path<T: TaskProvider>(
        stream: TcpStream,
        task: &T,
    ) -> Result<(Self, TransportEvents, String), TransportError> {
        let mut path = String::new();
        let callback = |request: &Request, response: Response| {
            path = request.uri().path().to_string();
            Ok::<Response, ErrorResponse>(response)
        };
        let stream = accept_hdr_async(stream, callback)
            .await
            .map_err(ws_error)?;
        let (transport, events) = Self::spawn(stream, task);
        Ok((transport, events, path))
    }
}

impl<C: MessageCodec> WebSocketTransport<C> {
    /// Wrap an established stream with a custom codec.
    pub fn spawn_with_codec<S, T>(
        stream: WebSocketStream<S>,
        codec: C,
        task: &T,
    ) -> (Self, TransportEvents)
    where
        S: AsyncRead + AsyncWrite + Unpin + 'static,
        T: TaskProvider,
    {
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        task.spawn_task("websocket_writer", async move {
            while let Some(item) = outbound_rx.recv().await {
                match item {
                    Outbound::Message(message) => {
                        if let Err(e) = sink.send(message).await {
                            debug!(error = %e, "websocket write failed");
                            return;
                        }
                    }
                    Outbound::Close => break,
                }
            }
            // Close requested or transport dropped.
            if let Err(e) = sink.send(Message::Close(None)).await {
                trace!(error = %e, "close frame not sent");
            }
            let _ = sink.close().await;
        });

        let reader_codec = codec.clone();
        task.spawn_task("websocket_reader", async move {
            while let Some(next) = source.next().await {
                let bytes = match next {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(data)) => data,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    }
                };
                match reader_codec.decode::<Frame>(&bytes) {
                    Ok(frame) => {
                        if events_tx.send(TransportEvent::Message(frame)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping undecodable websocket message"),
                }
            }
            let _ = events_tx.send(TransportEvent::Closed);
        });

        let transport = Self {
            codec,
            outbound: outbound_tx,
            closing: Cell::new(false),
        };
        (transport, events_rx)
    }
}

impl<C: MessageCodec> Transport for WebSocketTransport<C> {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.closing.get() {
            return Err(TransportError::Closed);
        }
        let bytes = self.codec.encode(frame)?;
        let message = match String::from_utf8(bytes) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.closing.replace(true) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);
    }
}
