//! Ingestion pipeline: discovery, batch import, and push-driven updates.
//!
//! Both entry points funnel every message through [`step::ingest_one`], so
//! membership filtering, dedup and failure accounting behave the same way
//! whether a message arrives through a historical import or a notification.

pub mod batch;
pub mod context;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod membership;
pub mod persist;
pub mod progress;
pub mod realtime;
pub mod step;

pub use batch::{run_batch, run_import, ImportRequest, ImportSummary};
pub use context::{IngestContext, IngestOptions, ProjectScope};
pub use discovery::{build_query, discover, DiscoveryRequest};
pub use error::IngestError;
pub use membership::Whitelist;
pub use progress::{BatchProgress, LogProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use realtime::{
    decode_notification, handle_notification, listen, start_watch, stop_watch, ChangeNotice,
    ListenEvent, ListenSummary, NotificationReport,
};
pub use step::{ingest_one, IngestOutcome, OutcomeTally, SkipReason};
