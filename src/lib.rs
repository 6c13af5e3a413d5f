#![deny(missing_docs)]

//! Core library for the CareLens document answering and feedback analysis service.

/// Grounded question answering over the active index generation.
pub mod answer;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Patient feedback sentiment, risk, and recommendation pipeline.
pub mod feedback;
/// Generative client abstraction and adapters.
pub mod generation;
/// In-memory vector index with atomic generation swap.
pub mod index;
/// Change-aware document ingestion.
pub mod ingestion;
/// Structured logging and tracing setup.
pub mod logging;
/// Messaging gateway client.
pub mod messaging;
/// Service activity counters.
pub mod metrics;
/// Timeout and retry policy for external capabilities.
pub mod resilience;
/// Service object shared by the HTTP surface and the CLI.
pub mod service;
