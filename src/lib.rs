//! Submission pilot for STAR-CCM+ batch jobs on the Rescale HPC platform.
//!
//! The crate uploads a case directory's input files, builds a job payload
//! for the selected hardware profile, then creates and submits the job
//! through the platform's REST API. Progress is reported over explicit
//! channels, and submissions drain through a single-slot queue so at most
//! one job talks to the service at a time.

/// Client for the platform's REST service and transfer tool
pub mod api;
/// Load and validate the static configuration record
pub mod config;
/// Build job payloads per hardware profile
pub mod job;
/// Background submission worker and its serial queue
pub mod worker;
