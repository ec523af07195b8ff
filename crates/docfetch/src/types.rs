//! Core data types shared by the gate, the transport and the load session.

use bytes::Bytes;
use url::Url;

/// Target substituted for requests the access policy refuses.
pub const FORBIDDEN_URL: &str = "forbidden://localhost/";

/// Document identity used for standard-input content without a base URL.
pub const STDIN_URL: &str = "stdin://localhost/";

/// An outgoing request issued by the document host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub method: String,
    pub headers: Vec<(String, String)>,
    /// Upload data, such as a submitted form.
    pub body: Option<Bytes>,
}

impl FetchRequest {
    /// A plain GET request with no extra headers.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Path component of the target URL.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Whether the target has been rewritten to the forbidden sentinel.
    pub fn is_forbidden(&self) -> bool {
        self.url.as_str() == FORBIDDEN_URL
    }
}

/// A response received for a dispatched request.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// How a dispatched request ended.
#[derive(Debug, Clone)]
pub enum ExchangeOutcome {
    /// A response arrived, whatever its status.
    Response(Response),
    /// The access policy refused the request.
    Refused,
    /// The transport failed before any response arrived.
    Failed(String),
}

/// A finished request/reply exchange, handed back to the document host.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: Url,
    pub outcome: ExchangeOutcome,
}

impl Exchange {
    pub fn response(url: Url, response: Response) -> Self {
        Self {
            url,
            outcome: ExchangeOutcome::Response(response),
        }
    }

    pub fn refused(url: Url) -> Self {
        Self {
            url,
            outcome: ExchangeOutcome::Refused,
        }
    }

    pub fn failed(url: Url, reason: impl Into<String>) -> Self {
        Self {
            url,
            outcome: ExchangeOutcome::Failed(reason.into()),
        }
    }

    /// The resolved `Location` of a 3xx reply, if any.
    pub fn redirect_target(&self) -> Option<Url> {
        let ExchangeOutcome::Response(response) = &self.outcome else {
            return None;
        };
        if !response.is_redirect() {
            return None;
        }
        let location = response.header("location")?;
        self.url.join(location).ok()
    }

    /// True when a response arrived with a non-error status.
    pub fn is_success(&self) -> bool {
        matches!(&self.outcome, ExchangeOutcome::Response(r) if r.status < 400)
    }
}

/// Errors that can occur while loading and extracting a document.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience result type.
pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect(status: u16, location: &str) -> Response {
        Response {
            status,
            reason: String::new(),
            headers: vec![("Location".to_string(), location.to_string())],
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_redirect_target_resolves_relative_location() {
        let url = Url::parse("http://example/a/b").unwrap();
        let ex = Exchange::response(url, redirect(302, "/c"));
        assert_eq!(
            ex.redirect_target().unwrap().as_str(),
            "http://example/c"
        );
    }

    #[test]
    fn test_redirect_target_ignores_non_redirect_status() {
        let url = Url::parse("http://example/").unwrap();
        let ex = Exchange::response(url.clone(), redirect(200, "/c"));
        assert!(ex.redirect_target().is_none());
        assert!(Exchange::refused(url.clone()).redirect_target().is_none());
        assert!(Exchange::failed(url, "boom").redirect_target().is_none());
    }

    #[test]
    fn test_forbidden_request() {
        let req = FetchRequest::get(Url::parse(FORBIDDEN_URL).unwrap());
        assert!(req.is_forbidden());
        assert_eq!(req.path(), "/");
    }
}
