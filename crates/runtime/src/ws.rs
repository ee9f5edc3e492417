//! Persistent pub/sub WebSocket transport.
//!
//! The real-time channel upstairs only sees the [`Transport`] trait plus a
//! stream of inbound [`Frame`]s, so its correlation and reconnect logic can
//! be driven by an in-memory transport in tests. [`WsTransport`] is the real
//! implementation: one WebSocket carrying JSON text frames `{topic, payload}`
//! in both directions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use msgr_protocol::Frame;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, ORIGIN, USER_AGENT};
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use crate::cookies::CookieJar;
use crate::error::{Result, TransportError};

/// Origin announced on the upgrade request; must match the page the session
/// was bootstrapped from or the server refuses the socket.
const WS_ORIGIN: &str = "https://www.facebook.com";

/// Frame-level pub/sub transport as seen by the real-time channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes one frame. Fails with [`TransportError::Closed`] once the
    /// underlying connection is gone.
    async fn publish(&self, frame: Frame) -> Result<()>;

    /// Tears the connection down. Idempotent. The inbound receiver handed
    /// out at connect time terminates shortly after.
    async fn close(&self);
}

/// WebSocket implementation of [`Transport`].
pub struct WsTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    closed: Arc<AtomicBool>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WsTransport {
    /// Dials `endpoint` with the session's cookies and fingerprint, and
    /// returns the transport plus the inbound frame stream.
    pub async fn connect(
        endpoint: &str,
        jar: &CookieJar,
        user_agent: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Frame>)> {
        let request = build_request(endpoint, jar, user_agent)?;
        let (stream, _response) = connect_async(request).await?;
        let (mut sink, mut source) = stream.split();

        let closed = Arc::new(AtomicBool::new(false));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Frame>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "websocket send failed");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let reader_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "dropping unparseable frame"),
                    },
                    Ok(Message::Close(_)) => {
                        debug!("server closed the websocket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            // inbound_tx drops here; the receiver terminates and the channel
            // observes the disconnect
        });

        Ok((
            Self {
                outbound: Mutex::new(Some(outbound_tx)),
                closed,
                writer,
                reader,
            },
            inbound_rx,
        ))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn publish(&self, frame: Frame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let text = serde_json::to_string(&frame)
            .map_err(|e| TransportError::WebSocket(format!("unserializable frame: {e}")))?;
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::Closed);
        };
        tx.send(Message::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // dropping the sender lets the writer flush its close frame
        self.outbound.lock().take();
        self.reader.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

fn build_request(
    endpoint: &str,
    jar: &CookieJar,
    user_agent: &str,
) -> Result<Request<()>> {
    let url = Url::parse(endpoint)
        .map_err(|e| TransportError::WebSocket(format!("invalid realtime endpoint {endpoint}: {e}")))?;
    let host = url.host_str().unwrap_or_default().to_string();

    let mut request = endpoint
        .into_client_request()
        .map_err(|e| TransportError::WebSocket(format!("invalid upgrade request: {e}")))?;
    let headers = request.headers_mut();
    headers.insert(ORIGIN, HeaderValue::from_static(WS_ORIGIN));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent)
            .map_err(|e| TransportError::WebSocket(format!("unsendable user agent: {e}")))?,
    );
    let cookie_value = jar.header_value(&host);
    if !cookie_value.is_empty() {
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&cookie_value)
                .map_err(|e| TransportError::WebSocket(format!("unsendable cookie value: {e}")))?,
        );
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use msgr_protocol::SessionCookie;

    #[test]
    fn upgrade_request_carries_session_fingerprint() {
        let jar = CookieJar::new();
        jar.set(SessionCookie::new("xs", "secret"));
        jar.set(SessionCookie::new("c_user", "100012345"));

        let request = build_request(
            "wss://edge-chat.facebook.com/chat?region=prn",
            &jar,
            "TestAgent/1.0",
        )
        .unwrap();

        let headers = request.headers();
        assert_eq!(headers.get(ORIGIN).unwrap(), WS_ORIGIN);
        assert_eq!(headers.get(USER_AGENT).unwrap(), "TestAgent/1.0");
        let cookie = headers.get(COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("xs=secret"));
        assert!(cookie.contains("c_user=100012345"));
    }

    #[test]
    fn upgrade_request_rejects_garbage_endpoint() {
        let jar = CookieJar::new();
        let err = build_request("not a url", &jar, "TestAgent/1.0").unwrap_err();
        assert!(matches!(err, TransportError::WebSocket(_)));
    }
}
