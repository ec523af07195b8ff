//! Document hosts the command-line tool can drive.
//!
//! Chromium only navigates to schemes it knows, so documents served under a
//! synthetic identity such as `stdin://localhost/` are loaded through an
//! `http` alias and mapped back before the request reaches the transport.

pub mod chromium;

pub use chromium::ChromiumHost;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use url::Url;

use docfetch::FetchResult;

/// Stand-in origin for documents whose scheme the browser will not load.
pub const LOCAL_ALIAS: &str = "http://docfetch.invalid/";

/// Request headers left to the network backend.
const DROPPED_REQUEST_HEADERS: [&str; 3] = ["accept-encoding", "host", "content-length"];

/// Response headers that no longer describe the body handed back.
const DROPPED_RESPONSE_HEADERS: [&str; 1] = ["transfer-encoding"];

/// The URL the browser navigates to for `origin`, and the mapping back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub target: Url,
    pub origin: Url,
}

impl Navigation {
    pub fn new(origin: &Url) -> FetchResult<Self> {
        let target = match origin.scheme() {
            "http" | "https" => origin.clone(),
            _ => {
                let mut alias = Url::parse(LOCAL_ALIAS)?;
                alias.set_path(origin.path());
                alias.set_query(origin.query());
                alias
            }
        };
        Ok(Self {
            target,
            origin: origin.clone(),
        })
    }

    pub fn is_aliased(&self) -> bool {
        self.target != self.origin
    }

    /// Map a URL the browser requested back to the identity the transport knows.
    pub fn resolve(&self, requested: Url) -> Url {
        if self.is_aliased() && requested == self.target {
            self.origin.clone()
        } else {
            requested
        }
    }
}

pub(crate) fn request_headers(headers: &serde_json::Value) -> Vec<(String, String)> {
    let Some(map) = headers.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(name, _)| {
            !DROPPED_REQUEST_HEADERS
                .iter()
                .any(|d| name.eq_ignore_ascii_case(d))
        })
        .filter_map(|(name, value)| value.as_str().map(|v| (name.clone(), v.to_string())))
        .collect()
}

/// Join base64 post data entries into one request body.
///
/// Returns `None` when there are no entries or one does not decode.
pub(crate) fn request_body<'a>(entries: impl IntoIterator<Item = &'a str>) -> Option<Bytes> {
    let mut body = Vec::new();
    let mut seen = false;
    for entry in entries {
        seen = true;
        match BASE64.decode(entry) {
            Ok(bytes) => body.extend_from_slice(&bytes),
            Err(e) => {
                tracing::debug!("dropping undecodable request body: {e}");
                return None;
            }
        }
    }
    seen.then(|| Bytes::from(body))
}

pub(crate) fn response_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            !DROPPED_RESPONSE_HEADERS
                .iter()
                .any(|d| name.eq_ignore_ascii_case(d))
        })
        .cloned()
        .collect()
}

/// Render one console argument the way a console would print it.
pub(crate) fn console_text(value: Option<&serde_json::Value>, description: Option<&str>) -> String {
    match (value, description) {
        (Some(serde_json::Value::String(s)), _) => s.clone(),
        (Some(v), _) => v.to_string(),
        (None, Some(d)) => d.to_string(),
        (None, None) => "undefined".to_string(),
    }
}
