//! Frame transports: the browser WebSocket and an in-memory pair.

use std::pin::Pin;

use futures::channel::mpsc;
use futures::future;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::HOST;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

/// Write half: one text frame per item.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Read half: one text frame per item. Ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid Host header: {0}")]
    InvalidHeader(String),

    #[error("Channel closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(e.to_string())
    }
}

/// Open the debugger WebSocket.
///
/// `host_header` replaces the `Host` header of the upgrade request (host
/// override mode).
pub async fn connect_websocket(
    url: &str,
    host_header: Option<&str>,
) -> Result<(FrameSink, FrameStream), TransportError> {
    let mut request = url.into_client_request()?;
    if let Some(host) = host_header {
        let value =
            HeaderValue::from_str(host).map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
        request.headers_mut().insert(HOST, value);
    }

    let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
    debug!("WebSocket connected to {}", url);

    let (ws_sink, ws_source) = ws_stream.split();

    let sink = ws_sink
        .sink_map_err(TransportError::from)
        .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

    let stream = ws_source
        .take_while(|msg| {
            let open = !matches!(msg, Ok(Message::Close(_)));
            if !open {
                debug!("WebSocket closed by peer");
            }
            future::ready(open)
        })
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(other) => {
                    trace!("ignoring non-text WebSocket message ({} bytes)", other.len());
                    None
                }
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

    Ok((Box::pin(sink), Box::pin(stream)))
}

/// The far end of an [`in_memory`] transport, playing the browser.
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<String>>,
}

impl MemoryPeer {
    /// Next frame written by the client, parsed as JSON.
    pub async fn next_request(&mut self) -> Option<Value> {
        let text = self.from_client.next().await?;
        serde_json::from_str(&text).ok()
    }

    /// Next raw frame written by the client.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Deliver a JSON frame to the client.
    pub fn send(&self, frame: Value) -> bool {
        self.send_raw(frame.to_string())
    }

    /// Deliver raw text to the client, valid JSON or not.
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        match &self.to_client {
            Some(tx) => tx.unbounded_send(text.into()).is_ok(),
            None => false,
        }
    }

    /// End the client's read stream, as if the browser went away.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }
}

/// An in-process transport pair for embedding and tests.
pub fn in_memory() -> (FrameSink, FrameStream, MemoryPeer) {
    let (client_tx, from_client) = mpsc::unbounded::<String>();
    let (to_client, client_rx) = mpsc::unbounded::<String>();

    let sink = client_tx.sink_map_err(|_| TransportError::Closed);
    let stream = client_rx.map(Ok);

    (
        Box::pin(sink),
        Box::pin(stream),
        MemoryPeer {
            from_client,
            to_client: Some(to_client),
        },
    )
}
