//! Command-line entry points.

use clap::Args;

use crate::{
    capture::{DEFAULT_CAMERA_COMMAND, SystemCaptureSource},
    client::MistralClient,
    config::{ApiConfig, ApiOpts},
    pipeline::Pipeline,
    prelude::*,
    prompts::Prompts,
};

pub mod ocr;
pub mod schema;
pub mod shell;

/// Options for the camera and image picker.
#[derive(Debug, Clone, Args)]
pub struct CaptureOpts {
    /// Command used to take a picture. `{device}` is replaced with the camera
    /// device, and `{output}` with the JPEG file to write.
    #[clap(long, default_value = DEFAULT_CAMERA_COMMAND)]
    camera_command: String,

    /// The back (default) camera device.
    #[clap(long, default_value = "/dev/video0")]
    back_camera: PathBuf,

    /// The front camera device.
    #[clap(long, default_value = "/dev/video1")]
    front_camera: PathBuf,
}

impl CaptureOpts {
    /// Build an image source from these options.
    pub fn to_source(&self) -> Result<SystemCaptureSource> {
        SystemCaptureSource::new(
            &self.camera_command,
            self.back_camera.clone(),
            self.front_camera.clone(),
        )
    }
}

/// Build an OCR pipeline talking to the configured API.
pub async fn build_pipeline(opts: &ApiOpts) -> Result<Pipeline<MistralClient>> {
    let config = ApiConfig::from_opts(opts)?;
    let prompts = Prompts::load(opts.prompts_path.as_deref()).await?;
    debug!(?config, "Using API");
    Ok(Pipeline::new(MistralClient::new(config, prompts)))
}
