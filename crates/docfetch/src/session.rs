//! The event loop for one document load.
//!
//! A [`LoadSession`] owns the transport and the coordinator. It feeds host
//! requests through the transport, runs each reply as a task, hands finished
//! exchanges back to the host, and passes load-completion events to the
//! coordinator until one of them ends the process.

use std::io::Write;
use std::sync::Arc;

use tokio::task::JoinSet;
use url::Url;

use crate::coordinator::{LoadCoordinator, Termination};
use crate::host::{DocumentHost, HostEvent};
use crate::network::NetworkBackend;
use crate::pipeline::{ExtractionPipeline, PipelineStep};
use crate::policy::{AccessGate, AccessPolicy};
use crate::transport::{Dispatch, InFlightCounter, InFlightTicket, LocalContent, Transport};
use crate::types::{Exchange, ExchangeOutcome, FetchError, FetchResult};

/// Where the document comes from.
#[derive(Debug, Clone)]
pub enum Origin {
    /// Navigate to a URL.
    Remote(Url),
    /// Serve locally read content under a base URL identity.
    Local { base: Url, content: LocalContent },
}

impl Origin {
    pub fn url(&self) -> &Url {
        match self {
            Origin::Remote(url) => url,
            Origin::Local { base, .. } => base,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local { .. })
    }
}

/// Everything one load needs, fixed before navigation starts.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub origin: Origin,
    pub policy: AccessPolicy,
    pub steps: Vec<PipelineStep>,
    /// Whether the document's own scripts run while it loads.
    pub enable_scripts: bool,
}

type Completed<Id> = (Id, InFlightTicket, Exchange);

/// Drives one document load to its termination.
pub struct LoadSession {
    origin: Url,
    enable_scripts: bool,
    transport: Transport,
    coordinator: LoadCoordinator,
    network: Arc<dyn NetworkBackend>,
}

impl LoadSession {
    pub fn new(config: LoadConfig, network: Arc<dyn NetworkBackend>) -> FetchResult<Self> {
        let stdin_origin = config.origin.is_local();
        let origin = config.origin.url().clone();

        let gate = AccessGate::new(config.policy, origin.clone());
        let mut transport = Transport::new(gate)?;
        if let Origin::Local { content, .. } = config.origin {
            transport = transport.with_local_content(content);
        }

        let coordinator =
            LoadCoordinator::new(ExtractionPipeline::new(config.steps), stdin_origin);

        Ok(Self {
            origin,
            enable_scripts: config.enable_scripts,
            transport,
            coordinator,
            network,
        })
    }

    /// Shared handle on the transport's in-flight counter.
    pub fn in_flight_counter(&self) -> InFlightCounter {
        self.transport.in_flight_counter()
    }

    /// Navigate and process events until the load terminates.
    pub async fn run<H, W>(mut self, host: &mut H, out: &mut W) -> FetchResult<Termination>
    where
        H: DocumentHost,
        W: Write + ?Sized,
    {
        host.set_scripts_enabled(self.enable_scripts).await?;
        tracing::info!("loading {}", self.origin);
        host.navigate(&self.origin).await?;

        let mut replies: JoinSet<Completed<H::RequestId>> = JoinSet::new();

        loop {
            tokio::select! {
                Some(joined) = replies.join_next(), if !replies.is_empty() => {
                    match joined {
                        Ok((id, ticket, exchange)) => {
                            log_completion(&exchange);
                            self.transport.complete(ticket, &exchange);
                            if let Err(e) = host.respond(id, exchange).await {
                                tracing::warn!("could not deliver reply to host: {e}");
                            }
                        }
                        Err(e) => tracing::warn!("reply task failed: {e}"),
                    }
                }
                event = host.next_event() => match event {
                    Some(HostEvent::Request { id, request }) => {
                        let dispatch = self.transport.dispatch(request);
                        self.spawn_reply(id, dispatch, &mut replies);
                    }
                    Some(HostEvent::LoadFinished { success }) => {
                        let in_flight = self.transport.in_flight();
                        if let Some(termination) = self
                            .coordinator
                            .on_load_finished(success, in_flight, host, out)
                            .await?
                        {
                            return Ok(termination);
                        }
                    }
                    None => {
                        return Err(FetchError::Host(
                            "document host went away before the load finished".to_string(),
                        ));
                    }
                },
            }
        }
    }

    fn spawn_reply<Id: Send + 'static>(
        &self,
        id: Id,
        dispatch: Dispatch,
        replies: &mut JoinSet<Completed<Id>>,
    ) {
        match dispatch {
            Dispatch::Denied { request, ticket } => {
                replies.spawn(async move { (id, ticket, Exchange::refused(request.url)) });
            }
            Dispatch::Synthetic {
                request,
                reply,
                ticket,
            } => {
                replies.spawn(async move { (id, ticket, reply.into_exchange(request.url).await) });
            }
            Dispatch::Network { request, ticket } => {
                let network = Arc::clone(&self.network);
                replies.spawn(async move {
                    let exchange = match network.fetch(&request).await {
                        Ok(response) => Exchange::response(request.url, response),
                        Err(e) => Exchange::failed(request.url, e.to_string()),
                    };
                    (id, ticket, exchange)
                });
            }
        }
    }
}

fn log_completion(exchange: &Exchange) {
    match &exchange.outcome {
        ExchangeOutcome::Refused => {}
        ExchangeOutcome::Failed(reason) => {
            tracing::warn!("error loading {}: {reason}", exchange.url)
        }
        ExchangeOutcome::Response(r) if r.status >= 400 => {
            tracing::warn!("HTTP error ({}) loading {}: {}", r.status, exchange.url, r.reason)
        }
        ExchangeOutcome::Response(r) => {
            tracing::debug!("loaded {} ({}, {} bytes)", exchange.url, r.status, r.body.len())
        }
    }
}
