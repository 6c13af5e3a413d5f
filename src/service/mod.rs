//! Explicit service object tying ingestion, answering, feedback, and messaging together.
//!
//! Construct [`InsightService`] once at startup and share it through an `Arc`; HTTP handlers and
//! CLI subcommands only see the [`InsightApi`] trait.

mod insight;
mod types;

pub use insight::{InsightApi, InsightService, MAX_RELAY_CHARS, compose_relay_reply};
pub use types::{
    CapabilityStatus, InboundMessage, IndexStatus, ReloadSummary, ServiceError, StartupError,
    SystemInfo, UploadOutcome,
};
