//! Error taxonomy for a provisioning run.
//!
//! Only [`AuthError`] is fatal. Remote call failures are folded into
//! [`crate::gateway::CallResult`] values at the gateway boundary so the
//! runner never sees them as `Err`.
use thiserror::Error;

/// The login exchange did not establish a session.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login rejected by {url}: HTTP {status}")]
    Rejected { url: String, status: u16 },
    #[error("login request to {url} failed: {detail}")]
    Transport { url: String, detail: String },
}

/// A single remote operation did not succeed.
///
/// Never propagated past the gateway; its rendering becomes the `error`
/// field of the failed call result.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("{operation} returned HTTP {status}: {detail}")]
    Status {
        operation: String,
        status: u16,
        detail: String,
    },
    #[error("{operation} request failed: {detail}")]
    Transport { operation: String, detail: String },
    #[error("{operation}: {detail}")]
    Unexpected { operation: String, detail: String },
}
