//! The `ocr` subcommand.

use clap::Args;

use crate::{
    async_utils::io::write_json_pretty,
    capture::{CameraFacing, CaptureSource as _},
    config::ApiOpts,
    prelude::*,
    ui::Ui,
};

use super::{CaptureOpts, build_pipeline};

/// Options for the `ocr` subcommand.
#[derive(Debug, Args)]
pub struct OcrOpts {
    /// A JPEG or PNG image to OCR. If omitted, take a picture with the camera.
    #[clap(value_name = "IMAGE")]
    pub image_path: Option<PathBuf>,

    /// Take the picture with the front camera.
    #[clap(long, conflicts_with = "image_path")]
    pub front: bool,

    /// Write the result to this file instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub api: ApiOpts,

    #[clap(flatten)]
    pub capture: CaptureOpts,
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    // Check our configuration before touching the camera.
    let mut pipeline = build_pipeline(&opts.api).await?;
    let source = opts.capture.to_source()?;

    let image = match &opts.image_path {
        Some(path) => match source.pick_from_gallery(Some(path)).await {
            Ok(Some(image)) => image,
            Ok(None) => return Err(anyhow!("no image selected")),
            Err(err) => {
                ui.alert("Error", "Failed to pick an image from the gallery.");
                return Err(err.into());
            }
        },
        None => {
            let facing = if opts.front {
                CameraFacing::Front
            } else {
                CameraFacing::Back
            };
            match source.capture_from_camera(facing).await {
                Ok(image) => image,
                Err(err) => {
                    ui.alert("Error", "Failed to take picture");
                    return Err(err.into());
                }
            }
        }
    };
    pipeline.capture(image);

    let spinner = ui.spawn_processing_spinner(pipeline.subscribe());
    let result = pipeline
        .process()
        .await
        .cloned()
        .ok_or_else(|| anyhow!("image has no data to process"))?;
    drop(pipeline);
    spinner.await.context("spinner task failed")?;

    write_json_pretty(opts.output_path.as_deref(), &result).await?;
    match result.error() {
        Some(error) => {
            ui.alert("Error", "Failed to process image with the OCR API");
            Err(anyhow!("{error}"))
        }
        None => Ok(()),
    }
}
