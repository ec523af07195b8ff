//! Request dispatch: access decisions, local-content routing and in-flight
//! accounting for every request the document host issues.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::charset::CharsetDetector;
use crate::policy::{AccessGate, Decision};
use crate::reply::SyntheticReply;
use crate::types::{Exchange, FetchRequest, FetchResult, FORBIDDEN_URL};

const DEFAULT_CONTENT: &[u8] = b"<html></html>";
const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Number of dispatched requests whose completion has not been observed.
#[derive(Debug, Clone, Default)]
pub struct InFlightCounter(Arc<AtomicUsize>);

impl InFlightCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Count one request in; the returned ticket counts it out when dropped.
    pub fn admit(&self, url: &Url) -> InFlightTicket {
        self.0.fetch_add(1, Ordering::AcqRel);
        InFlightTicket {
            counter: Arc::clone(&self.0),
            url: url.clone(),
        }
    }
}

/// Proof that one request is in flight.
///
/// Dropping the ticket is the one and only decrement for its request.
#[derive(Debug)]
#[must_use = "dropping a ticket marks its request as finished"]
pub struct InFlightTicket {
    counter: Arc<AtomicUsize>,
    url: Url,
}

impl InFlightTicket {
    /// URL the request was dispatched to.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Document bytes supplied locally instead of fetched.
#[derive(Debug, Clone)]
pub struct LocalContent {
    body: Bytes,
    content_type: String,
}

impl LocalContent {
    /// Wrap locally read bytes.
    ///
    /// Empty input becomes an empty HTML document, a missing content type
    /// becomes `text/html`, and `detect` fills in the charset when the content
    /// type does not name one.
    pub fn new(body: impl Into<Bytes>, mime: Option<&str>, detect: CharsetDetector) -> Self {
        let mut body: Bytes = body.into();
        if body.is_empty() {
            body = Bytes::from_static(DEFAULT_CONTENT);
        }

        let mut content_type = mime
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        if !content_type.to_ascii_lowercase().contains("charset=") {
            if let Some(charset) = detect(&body) {
                content_type = format!("{content_type}; charset={charset}");
            }
        }

        Self { body, content_type }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

/// Where a dispatched request is routed.
#[derive(Debug)]
pub enum Dispatch {
    /// Refused by the access policy. `request` targets the forbidden sentinel
    /// for hosts that cannot refuse a request natively.
    Denied {
        request: FetchRequest,
        ticket: InFlightTicket,
    },
    /// Served from local content.
    Synthetic {
        request: FetchRequest,
        reply: SyntheticReply,
        ticket: InFlightTicket,
    },
    /// Handed to the real network.
    Network {
        request: FetchRequest,
        ticket: InFlightTicket,
    },
}

impl Dispatch {
    pub fn request(&self) -> &FetchRequest {
        match self {
            Dispatch::Denied { request, .. }
            | Dispatch::Synthetic { request, .. }
            | Dispatch::Network { request, .. } => request,
        }
    }
}

/// Routes host requests through the access gate.
#[derive(Debug)]
pub struct Transport {
    gate: AccessGate,
    local: Option<LocalContent>,
    in_flight: InFlightCounter,
    sentinel: Url,
}

impl Transport {
    pub fn new(gate: AccessGate) -> FetchResult<Self> {
        Ok(Self {
            gate,
            local: None,
            in_flight: InFlightCounter::new(),
            sentinel: Url::parse(FORBIDDEN_URL)?,
        })
    }

    /// Serve requests for the origin from `content` instead of the network.
    pub fn with_local_content(mut self, content: LocalContent) -> Self {
        self.local = Some(content);
        self
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// Shared handle on the in-flight counter.
    pub fn in_flight_counter(&self) -> InFlightCounter {
        self.in_flight.clone()
    }

    /// Decide, route and count one request.
    pub fn dispatch(&mut self, mut request: FetchRequest) -> Dispatch {
        let decision = self.gate.decide(&request.url);
        if decision == Decision::Deny {
            tracing::debug!("access denied: {}", request.url);
            request.url = self.sentinel.clone();
        } else {
            tracing::debug!("access allowed ({decision:?}): {}", request.url);
        }

        let ticket = self.in_flight.admit(&request.url);

        if !decision.is_allowed() {
            return Dispatch::Denied { request, ticket };
        }

        if request.url == *self.gate.origin() {
            if let Some(local) = &self.local {
                let reply = SyntheticReply::new(local.body.clone(), local.content_type.clone());
                return Dispatch::Synthetic {
                    request,
                    reply,
                    ticket,
                };
            }
        }

        Dispatch::Network { request, ticket }
    }

    /// Observe the completion of a dispatched request.
    ///
    /// Records any redirect target with the gate, then releases the ticket.
    pub fn complete(&mut self, ticket: InFlightTicket, exchange: &Exchange) {
        if let Some(target) = exchange.redirect_target() {
            self.gate.record_redirect(target);
        }
        drop(ticket);
    }
}
