//! Duplex signaling channel
//!
//! A connection is split into a read half and a write half. The signaling
//! loop owns both, so each connection has exactly one writer.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        Message,
    },
    WebSocketStream,
};
use tracing::debug;

use crate::error::TransportError;

/// Read half: yields one raw envelope per message, `None` once closed.
///
/// `read_message` must be cancel safe; the signaling loop races it
/// against engine events.
#[async_trait]
pub trait SignalSource: Send {
    async fn read_message(&mut self) -> Option<Result<Vec<u8>, TransportError>>;
}

/// Write half.
#[async_trait]
pub trait SignalSink: Send {
    async fn write_message(&mut self, message: Vec<u8>) -> Result<(), TransportError>;

    async fn close(&mut self);
}

pub type WsStream = WebSocketStream<TcpStream>;

pub struct WsSource(SplitStream<WsStream>);

pub struct WsSink(SplitSink<WsStream, Message>);

/// Upgrade an accepted TCP connection to a websocket on `path`.
pub async fn upgrade(stream: TcpStream, path: &str) -> Result<(WsSource, WsSink), TransportError> {
    let check_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut error = ErrorResponse::new(Some(format!("no endpoint at {}", request.uri())));
            *error.status_mut() = StatusCode::NOT_FOUND;
            Err(error)
        }
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, check_path)
        .await
        .map_err(|e| TransportError::UpgradeFailed(e.to_string()))?;

    let (sink, source) = ws.split();
    Ok((WsSource(source), WsSink(sink)))
}

#[async_trait]
impl SignalSource for WsSource {
    async fn read_message(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.into_bytes())),
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Close(frame)) => {
                    debug!("websocket closed by peer: {:?}", frame);
                    return None;
                }
                // tungstenite answers pings on its own.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

#[async_trait]
impl SignalSink for WsSink {
    async fn write_message(&mut self, message: Vec<u8>) -> Result<(), TransportError> {
        let frame = match String::from_utf8(message) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.0.send(frame).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory duplex channel for driving a signaling loop in tests.

    use tokio::sync::mpsc;

    use super::*;

    pub struct MemorySource(mpsc::UnboundedReceiver<Vec<u8>>);

    pub struct MemorySink(Option<mpsc::UnboundedSender<Vec<u8>>>);

    /// The client's end: what the test sends and what the server wrote.
    pub struct MemoryClient {
        pub to_server: mpsc::UnboundedSender<Vec<u8>>,
        pub from_server: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    pub fn duplex() -> (MemorySource, MemorySink, MemoryClient) {
        let (to_server, server_in) = mpsc::unbounded_channel();
        let (server_out, from_server) = mpsc::unbounded_channel();
        (
            MemorySource(server_in),
            MemorySink(Some(server_out)),
            MemoryClient {
                to_server,
                from_server,
            },
        )
    }

    #[async_trait]
    impl SignalSource for MemorySource {
        async fn read_message(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
            self.0.recv().await.map(Ok)
        }
    }

    #[async_trait]
    impl SignalSink for MemorySink {
        async fn write_message(&mut self, message: Vec<u8>) -> Result<(), TransportError> {
            let sender = self.0.as_ref().ok_or(TransportError::Closed)?;
            sender.send(message).map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) {
            self.0 = None;
        }
    }
}
