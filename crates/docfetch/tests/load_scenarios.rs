//! End-to-end load scenarios against an in-memory document host.
//!
//! The fake host behaves like a small engine: it requests the origin, then
//! every sub-resource the document references, follows redirects, and
//! reports load completion once nothing it asked for is outstanding.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use url::Url;

use docfetch::*;

// ─────────────────────── helpers ───────────────────────

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn ok_html(body: &str) -> Response {
    Response {
        status: 200,
        reason: "OK".to_string(),
        headers: vec![("Content-Type".to_string(), "text/html".to_string())],
        body: Bytes::from(body.to_string()),
    }
}

fn moved(location: &str) -> Response {
    Response {
        status: 301,
        reason: "Moved Permanently".to_string(),
        headers: vec![("Location".to_string(), location.to_string())],
        body: Bytes::new(),
    }
}

/// Network with canned responses; anything else is a connection failure.
#[derive(Default)]
struct FakeNetwork {
    routes: HashMap<String, (Response, u64)>,
    seen: Mutex<Vec<String>>,
}

impl FakeNetwork {
    fn route(mut self, u: &str, response: Response) -> Self {
        self.routes.insert(u.to_string(), (response, 0));
        self
    }

    fn slow_route(mut self, u: &str, response: Response, delay_ms: u64) -> Self {
        self.routes.insert(u.to_string(), (response, delay_ms));
        self
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkBackend for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<Response> {
        self.seen.lock().unwrap().push(request.url.to_string());
        match self.routes.get(request.url.as_str()) {
            Some((response, delay_ms)) => {
                if *delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                }
                Ok(response.clone())
            }
            None => Err(FetchError::Host("connection refused".to_string())),
        }
    }
}

/// A scripted engine loading one document.
#[derive(Default)]
struct FakeHost {
    subresources: Vec<Url>,
    follow_redirects_twice: bool,
    early_failure: bool,
    extra_finish_events: usize,

    origin: Option<Url>,
    document: Option<String>,
    queue: VecDeque<HostEvent<u32>>,
    requested: HashMap<u32, Url>,
    next_id: u32,
    outstanding: usize,
    refused: Vec<Url>,
    loaded: Vec<Url>,
    failed: Vec<Url>,
    scripts_enabled: Vec<bool>,
}

impl FakeHost {
    fn referencing(subresources: &[&str]) -> Self {
        Self {
            subresources: subresources.iter().map(|s| url(s)).collect(),
            ..Default::default()
        }
    }

    fn request(&mut self, target: Url) {
        let id = self.next_id;
        self.next_id += 1;
        self.requested.insert(id, target.clone());
        self.outstanding += 1;
        self.queue.push_back(HostEvent::Request {
            id,
            request: FetchRequest::get(target),
        });
    }

    fn finish(&mut self, success: bool) {
        self.queue.push_back(HostEvent::LoadFinished { success });
    }
}

#[async_trait]
impl DocumentHost for FakeHost {
    type RequestId = u32;

    async fn navigate(&mut self, origin: &Url) -> FetchResult<()> {
        self.origin = Some(origin.clone());
        self.request(origin.clone());
        Ok(())
    }

    async fn next_event(&mut self) -> Option<HostEvent<u32>> {
        match self.queue.pop_front() {
            Some(event) => Some(event),
            None => std::future::pending().await,
        }
    }

    async fn respond(&mut self, id: u32, exchange: Exchange) -> FetchResult<()> {
        let target = self
            .requested
            .remove(&id)
            .ok_or_else(|| FetchError::Host(format!("unknown request {id}")))?;
        self.outstanding -= 1;

        if self.document.is_none() && Some(&target) == self.origin.as_ref() {
            match &exchange.outcome {
                ExchangeOutcome::Response(r) if r.status < 400 => {
                    self.document = Some(String::from_utf8_lossy(&r.body).into_owned());
                    for sub in self.subresources.clone() {
                        self.request(sub);
                    }
                    if self.early_failure {
                        self.finish(false);
                    }
                }
                _ => {
                    self.finish(false);
                    return Ok(());
                }
            }
        } else {
            match &exchange.outcome {
                ExchangeOutcome::Refused => self.refused.push(target),
                ExchangeOutcome::Failed(_) => self.failed.push(target),
                ExchangeOutcome::Response(_) => {
                    self.loaded.push(target);
                    if let Some(next) = exchange.redirect_target() {
                        self.request(next.clone());
                        if self.follow_redirects_twice {
                            self.request(next);
                        }
                    }
                }
            }
        }

        if self.outstanding == 0 {
            for _ in 0..=self.extra_finish_events {
                self.finish(true);
            }
        }
        Ok(())
    }

    async fn set_scripts_enabled(&mut self, enabled: bool) -> FetchResult<()> {
        self.scripts_enabled.push(enabled);
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> FetchResult<Option<Value>> {
        Ok(match script {
            "2+2" => Some(json!(4)),
            "[1, 'a']" => Some(json!([1, "a"])),
            "document.title" => Some(json!("Fake")),
            _ => None,
        })
    }

    async fn stringify(&mut self, value: &Value) -> FetchResult<Option<String>> {
        Ok(serde_json::to_string(value).ok())
    }

    async fn plain_text(&mut self) -> FetchResult<String> {
        let doc = self.document.clone().unwrap_or_default();
        let mut text = String::new();
        let mut in_tag = false;
        for c in doc.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                c if !in_tag => text.push(c),
                _ => {}
            }
        }
        Ok(text.trim().to_string())
    }

    async fn html(&mut self) -> FetchResult<String> {
        Ok(self.document.clone().unwrap_or_default())
    }

    async fn print_to_file(&mut self, path: &Path) -> FetchResult<()> {
        std::fs::write(path, b"%PDF-1.4 fake")?;
        Ok(())
    }
}

fn remote(origin: &str, policy: AccessPolicy, steps: Vec<PipelineStep>) -> LoadConfig {
    LoadConfig {
        origin: Origin::Remote(url(origin)),
        policy,
        steps,
        enable_scripts: false,
    }
}

async fn run_load(
    config: LoadConfig,
    network: Arc<FakeNetwork>,
    host: &mut FakeHost,
) -> (Termination, String, usize) {
    let session = LoadSession::new(config, network).unwrap();
    let counter = session.in_flight_counter();
    let mut out = Vec::new();
    let termination = tokio::time::timeout(Duration::from_secs(5), session.run(host, &mut out))
        .await
        .expect("load did not terminate")
        .unwrap();
    (termination, String::from_utf8(out).unwrap(), counter.get())
}

// ─────────────────────── scenarios ───────────────────────

#[tokio::test]
async fn test_blocked_stylesheet_does_not_block_load() {
    let network = Arc::new(FakeNetwork::default().route(
        "http://example/",
        ok_html(r#"<html><head><link href="a.css"></head><body>page</body></html>"#),
    ));
    let mut host = FakeHost::referencing(&["http://example/a.css"]);

    let (termination, out, in_flight) = run_load(
        remote(
            "http://example/",
            AccessPolicy::NONE,
            vec![PipelineStep::emit(OutputGoal::Text)],
        ),
        Arc::clone(&network),
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(out, "page\n");
    assert_eq!(in_flight, 0);
    assert_eq!(host.refused, vec![url("http://example/a.css")]);
    assert_eq!(network.seen(), vec!["http://example/".to_string()]);
}

#[tokio::test]
async fn test_stdin_document_text() {
    let network = Arc::new(FakeNetwork::default());
    let content = LocalContent::new(
        &b"<html><body>hi</body></html>"[..],
        None,
        sniff_charset,
    );
    let config = LoadConfig {
        origin: Origin::Local {
            base: url(STDIN_URL),
            content,
        },
        policy: AccessPolicy::NONE,
        steps: vec![PipelineStep::emit(OutputGoal::Text)],
        enable_scripts: false,
    };
    let mut host = FakeHost::default();

    let (termination, out, in_flight) = run_load(config, Arc::clone(&network), &mut host).await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(out, "hi\n");
    assert_eq!(in_flight, 0);
    assert!(network.seen().is_empty());
}

#[tokio::test]
async fn test_script_value_printed() {
    let network = Arc::new(FakeNetwork::default().route("http://example/", ok_html("<p>x</p>")));
    let mut host = FakeHost::default();

    let (termination, out, _) = run_load(
        remote(
            "http://example/",
            AccessPolicy::NONE,
            vec![
                PipelineStep::script("2+2", OutputGoal::Value),
                PipelineStep::script("[1, 'a']", OutputGoal::Value),
            ],
        ),
        network,
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(out, "4\n[1,\"a\"]\n");
    assert_eq!(host.scripts_enabled, vec![false, true]);
}

#[tokio::test]
async fn test_failed_navigation_is_fatal() {
    let network = Arc::new(FakeNetwork::default());
    let mut host = FakeHost::default();

    let (termination, out, in_flight) = run_load(
        remote(
            "http://unreachable/",
            AccessPolicy::NONE,
            vec![PipelineStep::script("2+2", OutputGoal::Value)],
        ),
        network,
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::FatalLoadFailure);
    assert_eq!(termination.exit_code(), 1);
    assert!(out.is_empty());
    assert_eq!(in_flight, 0);
}

#[tokio::test]
async fn test_stylesheets_only_policy() {
    let network = Arc::new(
        FakeNetwork::default()
            .route("http://example/", ok_html("<body>styled</body>"))
            .route("http://example/a.css", ok_html("body {}")),
    );
    let mut host = FakeHost::referencing(&["http://example/a.css", "http://example/a.js"]);

    let (termination, _, in_flight) = run_load(
        remote(
            "http://example/",
            AccessPolicy::CSS,
            vec![PipelineStep::emit(OutputGoal::Text)],
        ),
        Arc::clone(&network),
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(in_flight, 0);
    assert_eq!(host.loaded, vec![url("http://example/a.css")]);
    assert_eq!(host.refused, vec![url("http://example/a.js")]);
    assert!(!network.seen().contains(&"http://example/a.js".to_string()));
}

#[tokio::test]
async fn test_redirect_follow_up_admitted_once() {
    let network = Arc::new(
        FakeNetwork::default()
            .route("http://example/", ok_html("<body>r</body>"))
            .route("http://example/style.css", moved("/moved-style"))
            .route("http://example/moved-style", ok_html("body {}")),
    );
    let mut host = FakeHost {
        follow_redirects_twice: true,
        ..FakeHost::referencing(&["http://example/style.css"])
    };

    let (termination, _, in_flight) = run_load(
        remote(
            "http://example/",
            AccessPolicy::CSS | AccessPolicy::REDIRECT,
            vec![PipelineStep::emit(OutputGoal::Text)],
        ),
        Arc::clone(&network),
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(in_flight, 0);
    let follow_ups = network
        .seen()
        .iter()
        .filter(|u| u.as_str() == "http://example/moved-style")
        .count();
    assert_eq!(follow_ups, 1);
    assert_eq!(host.refused, vec![url("http://example/moved-style")]);
}

#[tokio::test]
async fn test_redirect_not_followed_without_policy() {
    let network = Arc::new(
        FakeNetwork::default()
            .route("http://example/", ok_html("<body>r</body>"))
            .route("http://example/style.css", moved("/moved-style")),
    );
    let mut host = FakeHost::referencing(&["http://example/style.css"]);

    let (termination, _, _) = run_load(
        remote(
            "http://example/",
            AccessPolicy::CSS,
            vec![PipelineStep::emit(OutputGoal::Text)],
        ),
        network,
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(host.refused, vec![url("http://example/moved-style")]);
}

#[tokio::test]
async fn test_subframe_failure_while_requests_in_flight_is_noise() {
    let network = Arc::new(
        FakeNetwork::default()
            .route("http://example/", ok_html("<body>slow</body>"))
            .slow_route("http://example/big.js", ok_html("1;"), 50),
    );
    let mut host = FakeHost {
        early_failure: true,
        ..FakeHost::referencing(&["http://example/big.js"])
    };

    let (termination, out, in_flight) = run_load(
        remote(
            "http://example/",
            AccessPolicy::JS,
            vec![PipelineStep::emit(OutputGoal::Text)],
        ),
        network,
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(out, "slow\n");
    assert_eq!(in_flight, 0);
}

#[tokio::test]
async fn test_repeated_completion_runs_pipeline_once() {
    let network = Arc::new(FakeNetwork::default().route("http://example/", ok_html("<b>once</b>")));
    let mut host = FakeHost {
        extra_finish_events: 3,
        ..Default::default()
    };

    let (termination, out, _) = run_load(
        remote(
            "http://example/",
            AccessPolicy::NONE,
            vec![PipelineStep::emit(OutputGoal::Text)],
        ),
        network,
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(out, "once\n");
}

#[tokio::test]
async fn test_failing_sub_request_is_absorbed() {
    let network = Arc::new(FakeNetwork::default().route("http://example/", ok_html("<p>ok</p>")));
    let mut host = FakeHost::referencing(&["http://other/missing.js"]);

    let (termination, out, in_flight) = run_load(
        remote(
            "http://example/",
            AccessPolicy::ALL,
            vec![PipelineStep::emit(OutputGoal::Html)],
        ),
        network,
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(out, "<p>ok</p>\n");
    assert_eq!(in_flight, 0);
    assert_eq!(host.failed, vec![url("http://other/missing.js")]);
}

#[tokio::test]
async fn test_print_step_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("page.pdf");
    let network = Arc::new(FakeNetwork::default().route("http://example/", ok_html("<p>p</p>")));
    let mut host = FakeHost::default();

    let (termination, out, _) = run_load(
        remote(
            "http://example/",
            AccessPolicy::NONE,
            vec![
                PipelineStep::print(&pdf),
                PipelineStep::script("document.title", OutputGoal::Value),
            ],
        ),
        network,
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(out, "Fake\n");
    assert!(std::fs::read(&pdf).unwrap().starts_with(b"%PDF"));
}

#[tokio::test]
async fn test_evaluation_failure_keeps_earlier_output() {
    let network = Arc::new(FakeNetwork::default().route("http://example/", ok_html("<p>t</p>")));
    let mut host = FakeHost::default();

    let (termination, out, _) = run_load(
        remote(
            "http://example/",
            AccessPolicy::NONE,
            vec![
                PipelineStep::emit(OutputGoal::Text),
                PipelineStep::script("noSuchThing", OutputGoal::Value),
                PipelineStep::emit(OutputGoal::Html),
            ],
        ),
        network,
        &mut host,
    )
    .await;

    assert_eq!(termination, Termination::Success);
    assert_eq!(out, "t\n");
}
