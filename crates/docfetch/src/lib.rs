//! docfetch — load one document headlessly and extract what a pipeline asks for.
//!
//! Every request the document host issues goes through the [`Transport`],
//! which applies the [`AccessPolicy`], serves locally supplied content as a
//! [`SyntheticReply`] and counts what is in flight. The [`LoadCoordinator`]
//! turns the host's load-completion events into exactly one run of the
//! [`ExtractionPipeline`], or a fatal failure.

pub mod charset;
pub mod coordinator;
pub mod host;
pub mod network;
pub mod pipeline;
pub mod policy;
pub mod reply;
pub mod session;
pub mod transport;
pub mod types;

pub use charset::{sniff_charset, CharsetDetector};
pub use coordinator::{CompletionLatch, LoadCoordinator, Termination};
pub use host::{DocumentHost, HostEvent};
pub use network::{NetworkBackend, ReqwestNetwork};
pub use pipeline::{ExtractionPipeline, OutputGoal, PipelineOutcome, PipelineStep, READABILITY_JS};
pub use policy::{AccessGate, AccessPolicy, AllowReason, Decision};
pub use reply::{ReadChunk, ReplyEvent, SyntheticReply};
pub use session::{LoadConfig, LoadSession, Origin};
pub use transport::{Dispatch, InFlightCounter, InFlightTicket, LocalContent, Transport};
pub use types::*;
