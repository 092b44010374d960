//! Request envelope
//!
//! Every inbound request is bracketed by an [`EnvelopeHandle`]: it stamps a
//! request id and start time on entry, collects the events the handler
//! records, and on exit writes them together with the `http_request` event as
//! one batch. If the handle is dropped without `end` (handler panic, cancelled
//! future) it completes itself with status 500.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use loanrisk_core::{Event, EventLog, RequestEvent};
use uuid::Uuid;

use crate::http::HttpState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Handler-side view of the envelope, stored in request extensions.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    events: Arc<Mutex<Vec<Event>>>,
}

impl RequestContext {
    /// Queue an event for the request's batch.
    pub fn record(&self, event: Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(e) => tracing::warn!(request_id = %self.request_id, error = %e, "Dropped event: collector poisoned"),
        }
    }
}

pub struct EnvelopeHandle {
    request_id: Uuid,
    method: String,
    path: String,
    client_address: String,
    start_time: DateTime<Utc>,
    started: Instant,
    events: Arc<Mutex<Vec<Event>>>,
    log: Arc<EventLog>,
    ended: bool,
}

impl EnvelopeHandle {
    pub fn begin(
        log: Arc<EventLog>,
        method: impl Into<String>,
        path: impl Into<String>,
        client_address: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method: method.into(),
            path: path.into(),
            client_address: client_address.into(),
            start_time: Utc::now(),
            started: Instant::now(),
            events: Arc::new(Mutex::new(Vec::new())),
            log,
            ended: false,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn context(&self) -> RequestContext {
        RequestContext {
            request_id: self.request_id,
            events: Arc::clone(&self.events),
        }
    }

    /// Complete the envelope and persist its batch.
    pub fn end(mut self, status_code: u16) -> RequestEvent {
        self.finish(status_code)
    }

    fn finish(&mut self, status_code: u16) -> RequestEvent {
        self.ended = true;
        let request = RequestEvent {
            request_id: self.request_id,
            method: self.method.clone(),
            path: self.path.clone(),
            start_time: self.start_time,
            status_code,
            duration: self.started.elapsed().as_secs_f64(),
            client_address: self.client_address.clone(),
        };

        let mut batch = match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        batch.push(Event::HttpRequest(request.clone()));
        // Written inline: one bounded append, and the batch must be on disk
        // before the response leaves so `/logs` reflects it.
        self.log.emit_batch(&batch);

        tracing::debug!(
            request_id = %request.request_id,
            method = %request.method,
            path = %request.path,
            status = status_code,
            duration_ms = request.duration_ms(),
            "Request completed"
        );
        request
    }
}

impl Drop for EnvelopeHandle {
    fn drop(&mut self) {
        if !self.ended {
            tracing::warn!(request_id = %self.request_id, path = %self.path, "Request ended without a response");
            self.finish(500);
        }
    }
}

/// Axum middleware wrapping every route in an envelope.
pub async fn envelope_middleware(
    State(state): State<Arc<HttpState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let client_address = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let handle = EnvelopeHandle::begin(
        Arc::clone(&state.event_log),
        req.method().as_str(),
        req.uri().path(),
        client_address,
    );
    req.extensions_mut().insert(handle.context());

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&handle.request_id().to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    handle.end(response.status().as_u16());
    response
}
