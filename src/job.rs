//! Build job payloads for the platform's job-creation endpoint.
//!
//! A profile pairs a hardware core type with its command template and
//! environment variables; selecting an unknown core type is a checked
//! error, never a fallthrough.

/// Hardware/software profiles and their command templates
pub mod profile;
/// Typed payload sent to the jobs endpoint
pub mod spec;
