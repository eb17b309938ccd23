//! HTTP binding of the remote assembly service.
//!
//! Chunks are posted as raw bodies to `{base}/upload`, keyed by query
//! parameters; `{base}/finalize` returns the compressed artifact.

pub mod client;

pub use client::{HttpRemote, RemoteConfig, RemoteError};
