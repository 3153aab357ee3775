//! All network and process interaction with the remote HPC platform.
//!
//! The client wraps the platform's REST endpoints; file transfers go
//! through one of two interchangeable strategies depending on whether the
//! platform's transfer tool is installed.

/// REST client over the jobs, runs, and files endpoints
pub mod client;
/// Upload/download strategies (transfer tool vs. plain HTTP)
pub mod transfer;
/// Typed response records
pub mod types;

use std::process::ExitStatus;

use thiserror::Error;

/// Errors surfaced by the API client; none of them are retried.
#[derive(Debug, Error)]
pub enum ApiError {
    /// transport failure or a non-success HTTP status
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// the transfer tool ran but exited non-zero
    #[error("transfer tool failed with {status}: {stderr}")]
    Process { status: ExitStatus, stderr: String },
    /// the transfer tool could not be started at all
    #[error("can't run transfer tool: {source}")]
    Spawn { source: std::io::Error },
    #[error("file i/o during transfer failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("api key contains characters not allowed in a header")]
    Credential,
}
