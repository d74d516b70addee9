//! Text-message transport underneath the hub protocol.
//!
//! The connection driver only needs "open an authenticated socket, send
//! text, receive text". [`Transport`] is that seam; [`WsTransport`] backs it
//! with `tokio-tungstenite`, and tests swap in an in-memory link.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::ChatError;

/// Opens authenticated links to the hub.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to `url`, authenticating with `access_token`.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket cannot be established.
    async fn open(&self, url: &str, access_token: &str) -> Result<Box<dyn Link>, ChatError>;
}

/// One open, bidirectional text link.
#[async_trait::async_trait]
pub trait Link: Send {
    /// Send one text payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the link is broken.
    async fn send_text(&mut self, text: String) -> Result<(), ChatError>;

    /// Next text payload. `None` once the peer has closed the link.
    /// Must be cancel-safe: the driver polls it inside `select!`.
    async fn recv_text(&mut self) -> Option<Result<String, ChatError>>;

    /// Close the link politely.
    async fn close(&mut self);
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Production transport over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str, access_token: &str) -> Result<Box<dyn Link>, ChatError> {
        let ws_url = hub_socket_url(url, access_token)?;
        let (stream, _) = connect_async(ws_url.as_str()).await?;
        Ok(Box::new(WsLink { stream }))
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Link for WsLink {
    async fn send_text(&mut self, text: String) -> Result<(), ChatError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<Result<String, ChatError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::warn!(len = bytes.len(), "non-UTF-8 binary hub message ignored"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "websocket close failed");
        }
    }
}

/// Build the socket URL: `http(s)` becomes `ws(s)` and the credential is
/// appended as the `access_token` query parameter.
///
/// # Errors
///
/// Returns [`ChatError::ConfigParse`] for an unparseable URL or an
/// unsupported scheme.
pub fn hub_socket_url(url: &str, access_token: &str) -> Result<reqwest::Url, ChatError> {
    let mut parsed = reqwest::Url::parse(url).map_err(|e| ChatError::ConfigParse(format!("invalid hub URL {url}: {e}")))?;
    let scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ChatError::ConfigParse(format!("unsupported hub URL scheme: {other}"))),
    };
    parsed
        .set_scheme(scheme)
        .map_err(|()| ChatError::ConfigParse(format!("cannot use scheme {scheme} for {url}")))?;
    parsed.query_pairs_mut().append_pair("access_token", access_token);
    Ok(parsed)
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;

#[cfg(test)]
#[path = "transport_helpers_test.rs"]
pub(crate) mod test_helpers;
