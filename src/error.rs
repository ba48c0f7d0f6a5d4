//! Error types for the places where callers need to tell failures apart.
//!
//! Command-level plumbing uses [`anyhow`], but the OCR client and the capture
//! sources report typed errors, because the UI treats them differently:
//! pipeline errors end up in [`crate::pipeline::OcrResult`], while capture
//! errors are shown as alerts and leave the pipeline alone.

use thiserror::Error;

/// An error from one of the two OCR stages.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The API answered with a non-success HTTP status.
    #[error("API error: {status} - {body}")]
    RemoteApi {
        /// The HTTP status code.
        status: u16,
        /// The response body, as text.
        body: String,
    },

    /// The structuring stage returned text that isn't JSON.
    #[error("model did not return valid JSON: {0}")]
    MalformedResponse(#[source] serde_json::Error),

    /// The response envelope itself could not be decoded.
    #[error("could not decode API response: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// The response had no choices, or the first choice had no content.
    #[error("API response contained no message content")]
    EmptyResponse,

    /// We refused to send a request because the input was unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The request never got an HTTP response.
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// An error from a camera or gallery source.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The camera exists, but we aren't allowed to open it.
    #[error("camera permission not granted: {0}")]
    PermissionDenied(String),

    /// The camera or capture command failed.
    #[error("failed to take picture: {0}")]
    CaptureFailure(String),

    /// The selected file could not be used as an image.
    #[error("failed to select image: {0}")]
    SelectionFailure(String),
}
