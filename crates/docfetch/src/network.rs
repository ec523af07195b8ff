//! The real network behind the transport.
//!
//! One request, one exchange: redirects are not followed here. A 3xx reply
//! goes back to the host as-is, and the follow-up request it triggers passes
//! through the access gate like any other.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;

use crate::types::{FetchError, FetchRequest, FetchResult, Response};

/// Product token identifying this tool on the wire.
pub const PRODUCT_TOKEN: &str = concat!("docfetch/", env!("CARGO_PKG_VERSION"));

/// User agent for requests that arrive without one.
pub const USER_AGENT: &str = concat!("Mozilla/5.0 (compatible) docfetch/", env!("CARGO_PKG_VERSION"));

/// Performs a single HTTP exchange for a dispatched request.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<Response>;
}

/// HTTP backend wrapping reqwest.
#[derive(Clone)]
pub struct ReqwestNetwork {
    client: reqwest::Client,
}

impl ReqwestNetwork {
    /// Create a client that never follows redirects by itself.
    pub fn new() -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NetworkBackend for ReqwestNetwork {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<Response> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::Host(format!("bad method {}: {e}", request.method)))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            // Hop-by-hop and engine-internal headers the client manages itself.
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            let value = if name.eq_ignore_ascii_case("user-agent") {
                user_agent(value)
            } else {
                value.clone()
            };
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) else {
                tracing::debug!("skipping malformed request header {name}");
                continue;
            };
            builder = builder.header(name, value);
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let r = builder.send().await?;
        let status = r.status();
        let headers: Vec<(String, String)> = r
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = r.bytes().await?;

        Ok(Response {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

/// The host's user agent with this tool's product token appended.
fn user_agent(forwarded: &str) -> String {
    if forwarded.split_whitespace().any(|token| token == PRODUCT_TOKEN) {
        forwarded.to_string()
    } else {
        format!("{forwarded} {PRODUCT_TOKEN}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Exchange;
    use bytes::Bytes;
    use url::Url;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_returns_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<p>ok</p>"),
            )
            .mount(&server)
            .await;

        let network = ReqwestNetwork::new().unwrap();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let resp = network.fetch(&FetchRequest::get(url)).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.header("content-type"), Some("text/html"));
        assert_eq!(resp.body.as_ref(), b"<p>ok</p>");
    }

    #[tokio::test]
    async fn test_redirect_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&server)
            .await;

        let network = ReqwestNetwork::new().unwrap();
        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
        let resp = network.fetch(&FetchRequest::get(url.clone())).await.unwrap();
        assert_eq!(resp.status, 302);

        let exchange = Exchange::response(url, resp);
        assert_eq!(
            exchange.redirect_target().unwrap().as_str(),
            format!("{}/new", server.uri())
        );
    }

    #[tokio::test]
    async fn test_request_headers_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/h"))
            .and(header("accept", "text/css"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let network = ReqwestNetwork::new().unwrap();
        let mut request = FetchRequest::get(Url::parse(&format!("{}/h", server.uri())).unwrap());
        request
            .headers
            .push(("Accept".to_string(), "text/css".to_string()));
        request
            .headers
            .push(("Host".to_string(), "ignored.example".to_string()));
        let resp = network.fetch(&request).await.unwrap();
        assert_eq!(resp.status, 204);
    }

    #[tokio::test]
    async fn test_request_body_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/form"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string("q=docfetch&page=2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("posted"))
            .mount(&server)
            .await;

        let network = ReqwestNetwork::new().unwrap();
        let request = FetchRequest {
            url: Url::parse(&format!("{}/form", server.uri())).unwrap(),
            method: "POST".to_string(),
            headers: vec![
                (
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ),
                ("Content-Length".to_string(), "999".to_string()),
            ],
            body: Some(Bytes::from_static(b"q=docfetch&page=2")),
        };
        let resp = network.fetch(&request).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body.as_ref(), b"posted");
    }

    #[tokio::test]
    async fn test_forwarded_user_agent_carries_product_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ua"))
            .and(header(
                "user-agent",
                format!("HeadlessChrome/120.0 {PRODUCT_TOKEN}").as_str(),
            ))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let network = ReqwestNetwork::new().unwrap();
        let mut request = FetchRequest::get(Url::parse(&format!("{}/ua", server.uri())).unwrap());
        request
            .headers
            .push(("User-Agent".to_string(), "HeadlessChrome/120.0".to_string()));
        let resp = network.fetch(&request).await.unwrap();
        assert_eq!(resp.status, 204);
    }

    #[test]
    fn test_product_token_appended_once() {
        assert_eq!(user_agent("Chrome/120"), format!("Chrome/120 {PRODUCT_TOKEN}"));
        let tagged = format!("Chrome/120 {PRODUCT_TOKEN}");
        assert_eq!(user_agent(&tagged), tagged);
    }

    #[tokio::test]
    async fn test_connection_error_surfaces() {
        let network = ReqwestNetwork::new().unwrap();
        let request = FetchRequest::get(Url::parse("http://127.0.0.1:9/").unwrap());
        assert!(matches!(
            network.fetch(&request).await,
            Err(FetchError::Http(_))
        ));
    }
}
