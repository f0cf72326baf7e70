//! HTTP side of the tunnel client.
//!
//! # Responsibilities
//! - Keep one long-poll GET outstanding so the server can push target data
//! - POST local socket data as sequenced payloads
//! - Reorder response payloads before writing them to the local socket
//!
//! # Design Decisions
//! - Every request runs on its own task; a finished request starts the next poll
//! - `410 Gone` ends the channel; `429` means a newer poll already replaced this one
//! - Any other unexpected status ends the channel instead of polling in a tight loop

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use url::Url;

use crate::observability::metrics::{self, Direction};
use crate::payload::{PayloadForwarder, Received, TunnelPayload};
use crate::tunnel::error::TunnelError;
use crate::tunnel::server::DISCONNECT_CONTENT_TYPE;

/// Local socket writer that receives target data.
pub type IncomingWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound for a single response body.
const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Connection details for a remote tunnel endpoint.
#[derive(Clone)]
pub struct HttpTunnelConnection {
    uri: Uri,
    headers: HeaderMap,
    client: Client<HttpConnector, Body>,
}

impl HttpTunnelConnection {
    pub fn new(url: &str) -> Result<Self, TunnelError> {
        if url.trim().is_empty() {
            return Err(TunnelError::InvalidUrl("URL must not be empty".to_string()));
        }
        let parsed = Url::parse(url).map_err(|_| TunnelError::InvalidUrl(format!("Malformed URL '{url}'")))?;
        if parsed.scheme() != "http" {
            return Err(TunnelError::InvalidUrl(format!(
                "Unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }
        let uri: Uri = parsed
            .as_str()
            .parse()
            .map_err(|_| TunnelError::InvalidUrl(format!("Malformed URL '{url}'")))?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            uri,
            headers: HeaderMap::new(),
            client,
        })
    }

    /// Send `name: value` with every tunnel request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Open a tunnel channel. Target data is written to `incoming`;
    /// `closer` is set to `true` when the remote side goes away.
    pub fn open(&self, incoming: IncomingWriter, closer: watch::Sender<bool>) -> TunnelChannel {
        tracing::trace!(url = %self.uri, "Opening HTTP tunnel");
        let inner = Arc::new(ChannelInner {
            connection: self.clone(),
            forwarder: PayloadForwarder::new(incoming),
            closer,
            open: AtomicBool::new(true),
            request_sequence: AtomicU64::new(0),
        });
        inner.open_new_connection(None);
        TunnelChannel { inner }
    }
}

/// Writable end of an open tunnel.
#[derive(Clone)]
pub struct TunnelChannel {
    inner: Arc<ChannelInner>,
}

impl TunnelChannel {
    /// Send `data` to the remote target. Returns the number of bytes taken.
    pub fn write(&self, data: Bytes) -> Result<usize, TunnelError> {
        if !self.inner.is_open() {
            return Err(TunnelError::ChannelClosed);
        }
        let size = data.len();
        if size > 0 {
            let sequence = self.inner.request_sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let payload = TunnelPayload::new(sequence, data)?;
            self.inner.open_new_connection(Some(payload));
        }
        Ok(size)
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Close the channel and tell the remote side to drop its target session.
    pub fn close(&self) {
        if self.inner.close() {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Err(e) = inner.send_disconnect().await {
                    tracing::trace!(error = %e, "Disconnect request failed");
                }
            });
        }
    }
}

struct ChannelInner {
    connection: HttpTunnelConnection,
    forwarder: PayloadForwarder<IncomingWriter>,
    closer: watch::Sender<bool>,
    open: AtomicBool,
    request_sequence: AtomicU64,
}

impl ChannelInner {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Returns `true` if this call closed the channel.
    fn close(&self) -> bool {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::debug!(url = %self.connection.uri, "Closing HTTP tunnel");
            self.closer.send_replace(true);
            true
        } else {
            false
        }
    }

    fn open_new_connection(self: &Arc<Self>, payload: Option<TunnelPayload>) {
        if !self.is_open() {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = inner.send_and_receive(payload).await {
                if e.is_connect() {
                    tracing::warn!(
                        url = %inner.connection.uri,
                        "Failed to connect to remote application at {}",
                        inner.connection.uri
                    );
                } else {
                    tracing::trace!(error = %e, "Unexpected connection error");
                }
                inner.close();
            }
        });
    }

    fn request(&self, method: Method, body: Body) -> Result<Request<Body>, TunnelError> {
        let mut request = Request::builder()
            .method(method)
            .uri(self.connection.uri.clone())
            .body(body)?;
        request.headers_mut().extend(self.connection.headers.clone());
        Ok(request)
    }

    async fn send_and_receive(self: &Arc<Self>, payload: Option<TunnelPayload>) -> Result<(), TunnelError> {
        let method = if payload.is_some() { Method::POST } else { Method::GET };
        let mut request = self.request(method, Body::empty())?;
        if let Some(payload) = &payload {
            payload.log_outgoing();
            metrics::record_payload(Direction::Outbound, payload.len());
            payload.assign_to(&mut request);
        }
        let response = self.connection.client.request(request).await?;
        self.handle_response(response).await
    }

    async fn handle_response(self: &Arc<Self>, response: Response<Incoming>) -> Result<(), TunnelError> {
        if !self.is_open() {
            return Ok(());
        }
        let status = response.status();
        match status {
            StatusCode::GONE => {
                self.close();
                return Ok(());
            }
            StatusCode::OK => {
                let (parts, body) = response.into_parts();
                let bytes = axum::body::to_bytes(Body::new(body), MAX_RESPONSE_SIZE).await?;
                let response = Response::from_parts(parts, bytes);
                if let Received::Payload(payload) = TunnelPayload::get(&response)? {
                    payload.log_incoming();
                    metrics::record_payload(Direction::Inbound, payload.len());
                    self.forwarder.forward(payload).await?;
                }
            }
            StatusCode::NO_CONTENT | StatusCode::TOO_MANY_REQUESTS => {}
            other => {
                tracing::warn!(status = %other, url = %self.connection.uri, "Unexpected tunnel response");
                return Err(TunnelError::UnexpectedStatus(other.as_u16()));
            }
        }
        if status != StatusCode::TOO_MANY_REQUESTS {
            self.open_new_connection(None);
        }
        Ok(())
    }

    async fn send_disconnect(&self) -> Result<(), TunnelError> {
        let mut request = self.request(Method::POST, Body::empty())?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(DISCONNECT_CONTENT_TYPE));
        self.connection.client.request(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_must_not_be_empty() {
        let err = HttpTunnelConnection::new("").err().unwrap();
        assert_eq!(err.to_string(), "URL must not be empty");
    }

    #[test]
    fn url_must_be_well_formed() {
        let err = HttpTunnelConnection::new("not a url").err().unwrap();
        assert!(err.to_string().contains("Malformed URL"), "{err}");
    }

    #[test]
    fn url_must_use_http() {
        let err = HttpTunnelConnection::new("ftp://example.com/tunnel").err().unwrap();
        assert!(err.to_string().contains("Unsupported URL scheme"));
    }

    #[tokio::test]
    async fn closes_when_remote_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connection = HttpTunnelConnection::new(&format!("http://127.0.0.1:{port}/tunnel")).unwrap();
        let (closer, mut closed) = watch::channel(false);
        let channel = connection.open(Box::new(tokio::io::sink()), closer);

        tokio::time::timeout(std::time::Duration::from_secs(5), closed.wait_for(|c| *c))
            .await
            .unwrap()
            .unwrap();
        assert!(!channel.is_open());
        assert!(matches!(channel.write(Bytes::from_static(b"x")), Err(TunnelError::ChannelClosed)));
    }
}
