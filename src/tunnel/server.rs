//! Long-poll tunnel server.
//!
//! # Responsibilities
//! - Open one target session on demand and keep it while HTTP keeps polling
//! - Forward request payloads to the target in sequence order
//! - Answer waiting requests with target data, or with a status when there is none
//!
//! # Response Statuses
//! - `200 OK`: carries a payload read from the target
//! - `204 No Content`: the request waited a full long-poll timeout
//! - `410 Gone`: the target is unreachable or the session ended
//! - `429 Too Many Requests`: displaced by newer requests
//!
//! At most two requests wait at once; when a third arrives the oldest is
//! answered with `429`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex, Notify};
use uuid::Uuid;

use crate::config::schema::ServerConfig;
use crate::observability::metrics::{self, Direction};
use crate::payload::{
    read_payload_data, PayloadForwarder, ReadOutcome, Received, TunnelPayload,
};
use crate::tunnel::error::TunnelError;
use crate::tunnel::target::TargetConnection;

/// Content type marking a request that ends the session.
pub const DISCONNECT_CONTENT_TYPE: &str = "application/x-disconnect";

pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type SessionSlot = Arc<Mutex<Option<Arc<Session>>>>;

/// Answer handed to a waiting HTTP request.
#[derive(Debug)]
pub enum TunnelResponse {
    Status(StatusCode),
    Payload(TunnelPayload),
    /// `400 Bad Request` explaining why the payload was refused.
    Rejected(String),
}

impl TunnelResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            TunnelResponse::Status(status) => *status,
            TunnelResponse::Payload(_) => StatusCode::OK,
            TunnelResponse::Rejected(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for TunnelResponse {
    fn into_response(self) -> Response {
        match self {
            TunnelResponse::Status(status) => status.into_response(),
            TunnelResponse::Payload(payload) => {
                let mut response = Response::new(Body::empty());
                payload.assign_to(&mut response);
                response
            }
            TunnelResponse::Rejected(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
        }
    }
}

/// Tunnel endpoint state shared by all HTTP requests.
pub struct TunnelServer<C> {
    target: C,
    long_poll_timeout: Duration,
    disconnect_timeout: Duration,
    slot: SessionSlot,
}

impl<C: TargetConnection> TunnelServer<C> {
    pub fn new(target: C) -> Self {
        Self {
            target,
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(target: C, config: &ServerConfig) -> Result<Self, TunnelError> {
        let mut server = Self::new(target);
        server.set_long_poll_timeout(Duration::from_millis(config.long_poll_timeout_ms))?;
        server.set_disconnect_timeout(Duration::from_millis(config.disconnect_timeout_ms))?;
        Ok(server)
    }

    pub fn set_long_poll_timeout(&mut self, timeout: Duration) -> Result<(), TunnelError> {
        if timeout.is_zero() {
            return Err(TunnelError::InvalidTimeout("LongPollTimeout"));
        }
        self.long_poll_timeout = timeout;
        Ok(())
    }

    pub fn set_disconnect_timeout(&mut self, timeout: Duration) -> Result<(), TunnelError> {
        if timeout.is_zero() {
            return Err(TunnelError::InvalidTimeout("DisconnectTimeout"));
        }
        self.disconnect_timeout = timeout;
        Ok(())
    }

    pub fn long_poll_timeout(&self) -> Duration {
        self.long_poll_timeout
    }

    pub fn disconnect_timeout(&self) -> Duration {
        self.disconnect_timeout
    }

    /// True while a target session is open.
    pub async fn has_session(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Handle one buffered tunnel request and produce its response.
    pub async fn handle(&self, request: Request<Bytes>) -> TunnelResponse {
        let disconnect = is_disconnect_request(request.headers());
        let received = match TunnelPayload::get(&request) {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting malformed tunnel request");
                return TunnelResponse::Rejected(e.to_string());
            }
        };

        let session = match self.session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!(error = %e, "Unable to open tunnel target connection");
                return TunnelResponse::Status(StatusCode::GONE);
            }
        };

        let (tx, rx) = oneshot::channel();
        session.handle_incoming(PendingRequest::new(tx), received, disconnect).await;
        rx.await.unwrap_or(TunnelResponse::Status(StatusCode::GONE))
    }

    async fn session(&self) -> std::io::Result<Arc<Session>> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }
        let stream = self.target.open(self.long_poll_timeout).await?;
        let session = Session::start(
            stream,
            self.long_poll_timeout,
            self.disconnect_timeout,
            Arc::clone(&self.slot),
        );
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }
}

fn is_disconnect_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case(DISCONNECT_CONTENT_TYPE))
        .unwrap_or(false)
}

/// An HTTP request waiting for its answer.
struct PendingRequest {
    created: Instant,
    responder: oneshot::Sender<TunnelResponse>,
}

impl PendingRequest {
    fn new(responder: oneshot::Sender<TunnelResponse>) -> Self {
        Self {
            created: Instant::now(),
            responder,
        }
    }

    fn is_older_than(&self, timeout: Duration) -> bool {
        self.created.elapsed() >= timeout
    }

    /// Hand back the response if the requester has gone away.
    fn respond(self, response: TunnelResponse) -> Result<(), TunnelResponse> {
        self.responder.send(response)
    }
}

/// One open connection to the target plus its waiting HTTP requests.
struct Session {
    id: Uuid,
    forwarder: PayloadForwarder<OwnedWriteHalf>,
    pending: StdMutex<VecDeque<PendingRequest>>,
    available: Notify,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    last_request: StdMutex<Option<Instant>>,
    response_sequence: AtomicU64,
    long_poll_timeout: Duration,
    disconnect_timeout: Duration,
}

impl Session {
    fn start(
        stream: TcpStream,
        long_poll_timeout: Duration,
        disconnect_timeout: Duration,
        slot: SessionSlot,
    ) -> Arc<Self> {
        let (reader, writer) = stream.into_split();
        let (close_tx, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            forwarder: PayloadForwarder::new(writer),
            pending: StdMutex::new(VecDeque::new()),
            available: Notify::new(),
            closed: AtomicBool::new(false),
            close_tx,
            last_request: StdMutex::new(None),
            response_sequence: AtomicU64::new(0),
            long_poll_timeout,
            disconnect_timeout,
        });

        tracing::info!(session = %session.id, "Tunnel session opened");
        metrics::session_opened();
        tokio::spawn(Arc::clone(&session).run(reader, slot));
        session
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn handle_incoming(&self, pending: PendingRequest, received: Received, disconnect: bool) {
        {
            let mut queue = self.lock_pending();
            if self.is_closed() {
                drop(queue);
                let _ = pending.respond(TunnelResponse::Status(StatusCode::GONE));
                return;
            }
            while queue.len() > 1 {
                if let Some(displaced) = queue.pop_front() {
                    let _ = displaced.respond(TunnelResponse::Status(StatusCode::TOO_MANY_REQUESTS));
                }
            }
            *self.last_request.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
            queue.push_back(pending);
        }
        self.available.notify_one();

        if disconnect {
            tracing::debug!(session = %self.id, "Disconnect requested");
            self.close_target();
        }

        if let Received::Payload(payload) = received {
            payload.log_incoming();
            metrics::record_payload(Direction::Inbound, payload.len());
            if let Err(e) = self.forwarder.forward(payload).await {
                tracing::warn!(session = %self.id, error = %e, "Failed to forward payload to target");
                self.close_target();
            }
        }
    }

    fn close_target(&self) {
        self.close_tx.send_replace(true);
    }

    async fn run(self: Arc<Self>, mut reader: OwnedReadHalf, slot: SessionSlot) {
        if let Err(e) = self.read_and_forward_target_data(&mut reader).await {
            tracing::debug!(session = %self.id, error = %e, "Tunnel session ended");
        }

        self.close_pending();
        if let Err(e) = self.forwarder.shutdown().await {
            tracing::trace!(session = %self.id, error = %e, "Error closing target connection");
        }

        let mut slot = slot.lock().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &self)) {
            *slot = None;
        }
        metrics::session_closed();
        tracing::info!(session = %self.id, "Tunnel session closed");
    }

    async fn read_and_forward_target_data(&self, reader: &mut OwnedReadHalf) -> Result<(), TunnelError> {
        let mut close_rx = self.close_tx.subscribe();
        loop {
            if *close_rx.borrow() {
                return Ok(());
            }
            self.close_stale_requests()?;

            let outcome = tokio::select! {
                outcome = read_payload_data(reader, self.long_poll_timeout) => outcome?,
                _ = close_rx.changed() => return Ok(()),
            };

            if let ReadOutcome::Data(data) = outcome {
                let sequence = self.response_sequence.fetch_add(1, Ordering::SeqCst) + 1;
                let payload = TunnelPayload::new(sequence, data)?;
                payload.log_outgoing();
                metrics::record_payload(Direction::Outbound, payload.len());
                if !self.deliver(payload, &mut close_rx).await? {
                    return Ok(());
                }
            }
        }
    }

    /// Give `payload` to the oldest live request, waiting for one if needed.
    /// Returns `false` when the session was closed first.
    async fn deliver(
        &self,
        payload: TunnelPayload,
        close_rx: &mut watch::Receiver<bool>,
    ) -> Result<bool, TunnelError> {
        let mut response = TunnelResponse::Payload(payload);
        loop {
            let next = self.lock_pending().pop_front();
            match next {
                Some(pending) => match pending.respond(response) {
                    Ok(()) => return Ok(true),
                    Err(unsent) => response = unsent,
                },
                None => {
                    self.check_not_disconnected()?;
                    tokio::select! {
                        _ = self.available.notified() => {}
                        _ = tokio::time::sleep(self.long_poll_timeout) => {}
                        _ = close_rx.changed() => return Ok(false),
                    }
                }
            }
        }
    }

    fn close_stale_requests(&self) -> Result<(), TunnelError> {
        let mut queue = self.lock_pending();
        self.check_not_disconnected()?;
        let mut fresh = VecDeque::with_capacity(queue.len());
        for pending in queue.drain(..) {
            if pending.is_older_than(self.long_poll_timeout) {
                let _ = pending.respond(TunnelResponse::Status(StatusCode::NO_CONTENT));
            } else {
                fresh.push_back(pending);
            }
        }
        *queue = fresh;
        Ok(())
    }

    fn check_not_disconnected(&self) -> Result<(), TunnelError> {
        let last_request = *self.last_request.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = last_request {
            let elapsed = last.elapsed();
            if elapsed >= self.disconnect_timeout {
                return Err(TunnelError::DisconnectTimeout {
                    timeout: self.disconnect_timeout,
                    elapsed,
                });
            }
        }
        Ok(())
    }

    /// Mark the session closed and release every waiting request.
    fn close_pending(&self) {
        let mut queue = self.lock_pending();
        self.closed.store(true, Ordering::SeqCst);
        for pending in queue.drain(..) {
            let _ = pending.respond(TunnelResponse::Status(StatusCode::GONE));
        }
    }
}
