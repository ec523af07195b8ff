//! The document host seam: the rendering/script engine a load runs against.

use std::path::Path;

use async_trait::async_trait;
use url::Url;

use crate::types::{Exchange, FetchRequest, FetchResult};

/// Something the host reports while a document loads.
#[derive(Debug, Clone)]
pub enum HostEvent<Id> {
    /// The engine wants to fetch a resource and waits for [`DocumentHost::respond`].
    Request { id: Id, request: FetchRequest },
    /// The document (or one of its frames) finished loading.
    LoadFinished { success: bool },
}

/// A rendering and script engine that loads one document through the transport.
#[async_trait]
pub trait DocumentHost: Send {
    /// Host-specific handle tying a response back to its request.
    type RequestId: Send + 'static;

    /// Start navigating to `origin`. Returns without waiting for the load.
    async fn navigate(&mut self, origin: &Url) -> FetchResult<()>;

    /// Next event from the engine, or `None` once the engine has gone away.
    ///
    /// Must be cancel safe: the load session drops pending calls whenever a
    /// reply completes first.
    async fn next_event(&mut self) -> Option<HostEvent<Self::RequestId>>;

    /// Deliver the outcome of a request issued through [`HostEvent::Request`].
    async fn respond(&mut self, id: Self::RequestId, exchange: Exchange) -> FetchResult<()>;

    /// Allow or forbid the document's own scripts.
    async fn set_scripts_enabled(&mut self, enabled: bool) -> FetchResult<()>;

    /// Evaluate script in the document. `None` means no usable result.
    async fn evaluate(&mut self, script: &str) -> FetchResult<Option<serde_json::Value>>;

    /// Serialize a value with the document's own `JSON.stringify`.
    async fn stringify(&mut self, value: &serde_json::Value) -> FetchResult<Option<String>>;

    /// Current plain-text rendering of the document.
    async fn plain_text(&mut self) -> FetchResult<String>;

    /// Current serialized markup of the document.
    async fn html(&mut self) -> FetchResult<String>;

    /// Render the document, paginated, into a file.
    async fn print_to_file(&mut self, path: &Path) -> FetchResult<()>;
}
