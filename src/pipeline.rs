//! The OCR pipeline: one captured image, two model calls, one result.
//!
//! [`Pipeline`] owns the current image and result, and moves between three
//! phases:
//!
//! ```text
//!            capture             process()
//!   Idle ──────────────▶ Ready ──────────────▶ Processing
//!    ▲                   ▲  │                     │
//!    │      reset()      │  │ capture             │ done (Ok or Err)
//!    └───────────────────┼──┘                     │
//!                        └────────────────────────┘
//! ```
//!
//! `process` takes `&mut self`, so at most one run can be in flight, and
//! nothing can capture or reset underneath it.

use schemars::JsonSchema;
use tokio::sync::watch;

use crate::{capture::CapturedImage, client::OcrBackend, error::OcrError, prelude::*};

/// Where the pipeline is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No image.
    Idle,
    /// We have an image, and maybe a result from processing it.
    Ready,
    /// The model calls are in flight.
    Processing,
}

/// The outcome of processing one image.
///
/// Serialized as either `{"raw": ..., "structured": ...}` or
/// `{"error": ...}`, never a mix.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OcrResult {
    /// Both stages succeeded.
    Success {
        /// The extracted text, as markdown.
        raw: String,
        /// The model's JSON rendition of the text.
        structured: Value,
    },
    /// Some stage failed.
    Failure {
        /// What went wrong.
        error: String,
    },
}

impl OcrResult {
    /// The error message, if this is a failure.
    pub fn error(&self) -> Option<&str> {
        match self {
            OcrResult::Failure { error } => Some(error),
            OcrResult::Success { .. } => None,
        }
    }

    /// Did processing fail?
    pub fn is_failure(&self) -> bool {
        self.error().is_some()
    }
}

impl From<Result<(String, Value), OcrError>> for OcrResult {
    fn from(outcome: Result<(String, Value), OcrError>) -> Self {
        match outcome {
            Ok((raw, structured)) => OcrResult::Success { raw, structured },
            Err(err) => OcrResult::Failure {
                error: format!("Failed to process image: {err}"),
            },
        }
    }
}

/// Holds the phase at [`Phase::Processing`] until dropped.
///
/// Dropping happens on success, on error, on panic, and when the `process`
/// future itself is dropped half-way, so we can't get stuck.
struct ProcessingGuard<'a> {
    phase: &'a watch::Sender<Phase>,
}

impl<'a> ProcessingGuard<'a> {
    fn enter(phase: &'a watch::Sender<Phase>) -> Self {
        phase.send_replace(Phase::Processing);
        Self { phase }
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(Phase::Ready);
    }
}

/// Sequences the OCR stages for the current image.
#[derive(Debug)]
pub struct Pipeline<B> {
    /// The model client.
    backend: B,

    /// The current image, if any.
    image: Option<CapturedImage>,

    /// The result of the latest `process` call on this image.
    result: Option<OcrResult>,

    /// Current phase. Observers hold receivers.
    phase: watch::Sender<Phase>,
}

impl<B: OcrBackend> Pipeline<B> {
    /// Create an idle pipeline.
    pub fn new(backend: B) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            backend,
            image: None,
            result: None,
            phase,
        }
    }

    /// The backend we call.
    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Watch for phase changes.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// The current image.
    pub fn image(&self) -> Option<&CapturedImage> {
        self.image.as_ref()
    }

    /// The latest result.
    pub fn result(&self) -> Option<&OcrResult> {
        self.result.as_ref()
    }

    /// Use a new image, dropping any previous image and result.
    pub fn capture(&mut self, image: CapturedImage) {
        debug!(uri = %image.uri, "Captured image");
        self.image = Some(image);
        self.result = None;
        self.phase.send_replace(Phase::Ready);
    }

    /// Drop the image and result.
    pub fn reset(&mut self) {
        self.image = None;
        self.result = None;
        self.phase.send_replace(Phase::Idle);
    }

    /// OCR the current image, and structure the text.
    ///
    /// If there's no image, or it has no base64 payload, this does nothing
    /// and returns `None`. Otherwise it replaces the current result.
    #[instrument(level = "debug", skip_all)]
    pub async fn process(&mut self) -> Option<&OcrResult> {
        let Some(data_url) = self.image.as_ref().and_then(CapturedImage::to_data_url)
        else {
            debug!("No image payload to process");
            return None;
        };

        let processing = ProcessingGuard::enter(&self.phase);
        let outcome = run_stages(&self.backend, &data_url).await;
        if let Err(err) = &outcome {
            warn!("OCR failed: {err}");
        }
        self.result = Some(OcrResult::from(outcome));
        drop(processing);

        self.result.as_ref()
    }
}

/// Run both stages, stopping at the first failure.
async fn run_stages<B: OcrBackend>(
    backend: &B,
    data_url: &str,
) -> Result<(String, Value), OcrError> {
    let raw = backend.extract_text(data_url).await?;
    let structured_text = backend.structure_text(&raw).await?;
    let structured = serde_json::from_str::<Value>(&structured_text)
        .map_err(OcrError::MalformedResponse)?;
    Ok((raw, structured))
}
