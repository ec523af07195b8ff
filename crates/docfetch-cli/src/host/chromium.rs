//! Chromium document host using chromiumoxide.
//!
//! Every request the page makes is paused through the Fetch domain and
//! reported as a [`HostEvent::Request`]. The load session's answer is then
//! fulfilled into the page, or failed with `BlockedByClient` when the access
//! policy refused it.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetScriptExecutionDisabledParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    EnableParams, EventRequestPaused, FailRequestParams, FulfillRequestParams, HeaderEntry,
    RequestId,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams, PrintToPdfParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, EventConsoleApiCalled};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use docfetch::{
    DocumentHost, Exchange, ExchangeOutcome, FetchError, FetchRequest, FetchResult, HostEvent,
};

use super::{console_text, request_body, request_headers, response_headers, Navigation};

const PLAIN_TEXT_JS: &str =
    "document.body ? document.body.innerText : document.documentElement.innerText";

type Event = HostEvent<RequestId>;

/// A headless Chromium page loading one document.
pub struct ChromiumHost {
    browser: Browser,
    page: Page,
    sender: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromiumHost {
    /// Launch a headless Chromium at `chrome_path` and open a blank page.
    pub async fn launch(chrome_path: &Path) -> Result<Self> {
        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--blink-settings=imagesEnabled=false")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        page.execute(EnableParams::default())
            .await
            .context("failed to enable request interception")?;

        let (sender, events) = mpsc::unbounded_channel();
        let mut host = Self {
            browser,
            page,
            sender,
            events,
            tasks: vec![handler_task],
        };
        host.watch_dialogs().await?;
        host.watch_console().await?;
        Ok(host)
    }

    /// Close the browser and stop the background tasks.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!("closing Chromium failed: {e}");
        }
        let _ = self.browser.wait().await;
        for task in self.tasks {
            task.abort();
        }
    }

    /// Dismiss dialogs as they open; `confirm` is answered with false.
    async fn watch_dialogs(&mut self) -> Result<()> {
        let mut dialogs = self
            .page
            .event_listener::<EventJavascriptDialogOpening>()
            .await
            .context("failed to listen for dialogs")?;
        let page = self.page.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(dialog) = dialogs.next().await {
                let kind = format!("{:?}", dialog.r#type).to_lowercase();
                tracing::warn!("{kind}: {}", dialog.message);
                if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(false)).await {
                    tracing::debug!("could not dismiss {kind} dialog: {e}");
                }
            }
        }));
        Ok(())
    }

    async fn watch_console(&mut self) -> Result<()> {
        let mut calls = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .context("failed to listen for console messages")?;
        self.tasks.push(tokio::spawn(async move {
            while let Some(call) = calls.next().await {
                let text: Vec<String> = call
                    .args
                    .iter()
                    .map(|arg| console_text(arg.value.as_ref(), arg.description.as_deref()))
                    .collect();
                tracing::warn!("console: {}", text.join(" "));
            }
        }));
        Ok(())
    }
}

#[async_trait]
impl DocumentHost for ChromiumHost {
    type RequestId = RequestId;

    async fn navigate(&mut self, origin: &Url) -> FetchResult<()> {
        let navigation = Navigation::new(origin)?;
        if navigation.is_aliased() {
            tracing::debug!("loading {} as {}", navigation.origin, navigation.target);
        }

        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(host_error)?;
        let page = self.page.clone();
        let sender = self.sender.clone();
        let resolver = navigation.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let Ok(url) = Url::parse(&event.request.url) else {
                    tracing::debug!("failing request to unparseable URL {}", event.request.url);
                    let _ = fail(&page, event.request_id.clone(), ErrorReason::Failed).await;
                    continue;
                };
                let request = FetchRequest {
                    url: resolver.resolve(url),
                    method: event.request.method.clone(),
                    headers: request_headers(event.request.headers.inner()),
                    body: request_body(
                        event
                            .request
                            .post_data_entries
                            .iter()
                            .flatten()
                            .filter_map(|entry| entry.bytes.as_ref())
                            .map(|bytes| AsRef::<str>::as_ref(bytes)),
                    ),
                };
                if request.body.is_none() && event.request.has_post_data == Some(true) {
                    tracing::debug!("request body for {} was not provided by Chromium", request.url);
                }
                let id = event.request_id.clone();
                if sender.send(HostEvent::Request { id, request }).is_err() {
                    break;
                }
            }
        }));

        let page = self.page.clone();
        let sender = self.sender.clone();
        self.tasks.push(tokio::spawn(async move {
            let target = navigation.target;
            let success = match page.goto(target.as_str()).await {
                Ok(page) => {
                    let _ = page.wait_for_navigation().await;
                    true
                }
                Err(e) => {
                    tracing::warn!("navigation to {target} failed: {e}");
                    false
                }
            };
            let _ = sender.send(HostEvent::LoadFinished { success });
        }));

        Ok(())
    }

    async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    async fn respond(&mut self, id: RequestId, exchange: Exchange) -> FetchResult<()> {
        let response = match exchange.outcome {
            ExchangeOutcome::Refused => return fail(&self.page, id, ErrorReason::BlockedByClient).await,
            ExchangeOutcome::Failed(_) => return fail(&self.page, id, ErrorReason::Failed).await,
            ExchangeOutcome::Response(response) => response,
        };

        let headers: Vec<HeaderEntry> = response_headers(&response.headers)
            .into_iter()
            .map(|(name, value)| HeaderEntry::new(name, value))
            .collect();
        let mut builder = FulfillRequestParams::builder()
            .request_id(id)
            .response_code(i64::from(response.status))
            .response_headers(headers)
            .body(BASE64.encode(&response.body));
        if !response.reason.is_empty() {
            builder = builder.response_phrase(response.reason);
        }
        let params = builder.build().map_err(FetchError::Host)?;

        self.page.execute(params).await.map_err(host_error)?;
        Ok(())
    }

    async fn set_scripts_enabled(&mut self, enabled: bool) -> FetchResult<()> {
        self.page
            .execute(SetScriptExecutionDisabledParams::new(!enabled))
            .await
            .map_err(host_error)?;
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> FetchResult<Option<Value>> {
        evaluate_value(&self.page, script).await
    }

    async fn stringify(&mut self, value: &Value) -> FetchResult<Option<String>> {
        let literal = serde_json::to_string(value)?;
        evaluate_string(&self.page, &format!("JSON.stringify({literal})")).await
    }

    async fn plain_text(&mut self) -> FetchResult<String> {
        Ok(evaluate_string(&self.page, PLAIN_TEXT_JS)
            .await?
            .unwrap_or_default())
    }

    async fn html(&mut self) -> FetchResult<String> {
        self.page.content().await.map_err(host_error)
    }

    async fn print_to_file(&mut self, path: &Path) -> FetchResult<()> {
        self.page
            .save_pdf(PrintToPdfParams::default(), path)
            .await
            .map_err(host_error)?;
        Ok(())
    }
}

async fn fail(page: &Page, id: RequestId, reason: ErrorReason) -> FetchResult<()> {
    page.execute(FailRequestParams::new(id, reason))
        .await
        .map_err(host_error)?;
    Ok(())
}

async fn evaluate_value(page: &Page, script: &str) -> FetchResult<Option<Value>> {
    let params = EvaluateParams::builder()
        .expression(script)
        .return_by_value(true)
        .build()
        .map_err(FetchError::Host)?;
    let result = page.evaluate_expression(params).await.map_err(host_error)?;
    Ok(result.value().cloned())
}

async fn evaluate_string(page: &Page, script: &str) -> FetchResult<Option<String>> {
    let value = evaluate_value(page, script).await?;
    Ok(value.and_then(|v| v.as_str().map(str::to_string)))
}

fn host_error(e: impl std::fmt::Display) -> FetchError {
    FetchError::Host(e.to_string())
}
