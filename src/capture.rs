//! Image sources: the camera, and image files picked by the user.
//!
//! Both produce a [`CapturedImage`] holding the base64-encoded bytes the OCR
//! pipeline needs. Failures here are reported as [`CaptureError`]s, which the
//! UI shows as alerts. They never become OCR results.

use std::{fmt, io::Cursor};

use image::ImageReader;
use schemars::JsonSchema;
use tokio::process::Command;

use crate::{
    async_utils::{DEFAULT_ERROR_REGEX, check_for_command_failure},
    data_url::{data_url_from_base64, encode_base64},
    error::CaptureError,
    prelude::*,
};

/// MIME type assumed for images which don't say otherwise.
pub const DEFAULT_IMAGE_MIME_TYPE: &str = "image/jpeg";

/// An image ready to be OCRed.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct CapturedImage {
    /// Where the image came from.
    pub uri: String,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// The image bytes, base64-encoded. Without this, the image can't be
    /// processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,

    /// The image's MIME type.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    DEFAULT_IMAGE_MIME_TYPE.to_owned()
}

impl CapturedImage {
    /// Build a `data:` URL for this image, if we have its bytes.
    pub fn to_data_url(&self) -> Option<String> {
        self.base64
            .as_deref()
            .filter(|data| !data.is_empty())
            .map(|data| data_url_from_base64(&self.mime_type, data))
    }

    /// Decode an in-memory JPEG or PNG.
    pub fn from_bytes(uri: String, bytes: &[u8]) -> Result<Self, String> {
        let mime_type = match infer::get(bytes) {
            Some(kind) if matches!(kind.mime_type(), "image/jpeg" | "image/png") => {
                kind.mime_type()
            }
            Some(kind) => {
                return Err(format!("unsupported image type {}", kind.mime_type()));
            }
            None => return Err("not a recognizable image".to_owned()),
        };
        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|err| format!("cannot read image header: {err}"))?
            .into_dimensions()
            .map_err(|err| format!("cannot read image dimensions: {err}"))?;
        Ok(Self {
            uri,
            width,
            height,
            base64: Some(encode_base64(bytes)),
            mime_type: mime_type.to_owned(),
        })
    }
}

/// Which camera to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraFacing {
    /// The rear (or only) camera.
    #[default]
    Back,
    /// The front camera.
    Front,
}

impl CameraFacing {
    /// The other camera.
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::Back => CameraFacing::Front,
            CameraFacing::Front => CameraFacing::Back,
        }
    }
}

impl fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraFacing::Back => write!(f, "back"),
            CameraFacing::Front => write!(f, "front"),
        }
    }
}

/// Whether we may use a camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    /// The camera can be opened.
    Granted,
    /// The camera exists, but we may not open it.
    Denied,
    /// There's no such camera.
    Unavailable,
}

/// Interface to the things that supply images.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// May we use the camera facing this way?
    async fn camera_permission(&self, facing: CameraFacing) -> PermissionStatus;

    /// Take a picture.
    async fn capture_from_camera(
        &self,
        facing: CameraFacing,
    ) -> Result<CapturedImage, CaptureError>;

    /// Load a picked image. `None` means the user cancelled, which is not an
    /// error.
    async fn pick_from_gallery(
        &self,
        path: Option<&Path>,
    ) -> Result<Option<CapturedImage>, CaptureError>;
}

/// Default camera command. `{device}` and `{output}` are filled in for each
/// capture. JPEG quality 80 is plenty for OCR.
pub const DEFAULT_CAMERA_COMMAND: &str =
    "fswebcam --no-banner --jpeg 80 --device {device} {output}";

/// Captures with an external command, and picks from the filesystem.
#[derive(Clone, Debug)]
pub struct SystemCaptureSource {
    /// Command template, already split into arguments.
    camera_command: Vec<String>,

    /// Device for [`CameraFacing::Back`].
    back_device: PathBuf,

    /// Device for [`CameraFacing::Front`].
    front_device: PathBuf,
}

impl SystemCaptureSource {
    /// Create a new source. `camera_command` is split on whitespace.
    pub fn new(
        camera_command: &str,
        back_device: PathBuf,
        front_device: PathBuf,
    ) -> Result<Self> {
        let camera_command = camera_command
            .split_whitespace()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        if camera_command.is_empty() {
            return Err(anyhow!("camera command is empty"));
        }
        if !camera_command.iter().any(|arg| arg.contains("{output}")) {
            return Err(anyhow!("camera command must include {{output}}"));
        }
        Ok(Self {
            camera_command,
            back_device,
            front_device,
        })
    }

    /// The device for a camera.
    fn device(&self, facing: CameraFacing) -> &Path {
        match facing {
            CameraFacing::Back => &self.back_device,
            CameraFacing::Front => &self.front_device,
        }
    }

    /// Fill in the command template.
    fn camera_args(&self, device: &Path, output: &Path) -> Vec<String> {
        let device = device.to_string_lossy();
        let output = output.to_string_lossy();
        self.camera_command
            .iter()
            .map(|arg| arg.replace("{device}", &device).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl CaptureSource for SystemCaptureSource {
    async fn camera_permission(&self, facing: CameraFacing) -> PermissionStatus {
        let device = self.device(facing);
        match tokio::fs::File::open(device).await {
            Ok(_) => PermissionStatus::Granted,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                PermissionStatus::Denied
            }
            Err(err) => {
                debug!(device = %device.display(), %err, "Camera unavailable");
                PermissionStatus::Unavailable
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn capture_from_camera(
        &self,
        facing: CameraFacing,
    ) -> Result<CapturedImage, CaptureError> {
        let device = self.device(facing);
        match self.camera_permission(facing).await {
            PermissionStatus::Granted => {}
            PermissionStatus::Denied => {
                return Err(CaptureError::PermissionDenied(format!(
                    "cannot open {} (is this user in the `video` group?)",
                    device.display()
                )));
            }
            PermissionStatus::Unavailable => {
                return Err(CaptureError::CaptureFailure(format!(
                    "no {facing} camera at {}",
                    device.display()
                )));
            }
        }

        let failure = |err: anyhow::Error| CaptureError::CaptureFailure(format!("{err:#}"));
        let tmpdir = tempfile::TempDir::with_prefix("snap-ocr")
            .context("cannot create temporary directory")
            .map_err(failure)?;
        let output_path = tmpdir.path().join("capture.jpg");
        let args = self.camera_args(device, &output_path);
        let (program, rest) = args.split_first().ok_or_else(|| {
            CaptureError::CaptureFailure("empty camera command".to_owned())
        })?;

        let output = Command::new(program)
            .args(rest)
            .output()
            .await
            .with_context(|| format!("cannot run {program}"))
            .map_err(failure)?;
        check_for_command_failure(program, &output, Some(&DEFAULT_ERROR_REGEX))
            .map_err(failure)?;

        let bytes = tokio::fs::read(&output_path)
            .await
            .context("camera command did not write an image")
            .map_err(failure)?;
        let uri = format!("camera://{facing}/{}.jpg", uuid::Uuid::new_v4());
        let image = CapturedImage::from_bytes(uri, &bytes)
            .map_err(CaptureError::CaptureFailure)?;
        info!(uri = %image.uri, width = image.width, height = image.height, "Took picture");
        Ok(image)
    }

    #[instrument(level = "debug", skip(self))]
    async fn pick_from_gallery(
        &self,
        path: Option<&Path>,
    ) -> Result<Option<CapturedImage>, CaptureError> {
        let Some(path) = path else {
            debug!("Image selection cancelled");
            return Ok(None);
        };
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            CaptureError::SelectionFailure(format!("cannot read {}: {err}", path.display()))
        })?;
        let uri = match tokio::fs::canonicalize(path).await {
            Ok(abs) => format!("file://{}", abs.display()),
            Err(_) => format!("file://{}", path.display()),
        };
        let image = CapturedImage::from_bytes(uri, &bytes).map_err(|err| {
            CaptureError::SelectionFailure(format!("{}: {err}", path.display()))
        })?;
        info!(uri = %image.uri, width = image.width, height = image.height, "Picked image");
        Ok(Some(image))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{ImageFormat, RgbImage};

    use super::*;

    /// Encode a small blank PNG.
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::new(width, height)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn source(command: &str, dir: &Path) -> SystemCaptureSource {
        SystemCaptureSource::new(command, dir.join("video0"), dir.join("video1")).unwrap()
    }

    #[test]
    fn decodes_png_dimensions_and_type() {
        let image =
            CapturedImage::from_bytes("file:///x.png".to_owned(), &png_bytes(3, 2)).unwrap();
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(image.mime_type, "image/png");
        let url = image.to_data_url().unwrap();
        assert!(url.starts_with("data:image/png;base64,iVBOR"), "{url}");
    }

    #[test]
    fn rejects_non_images() {
        let err = CapturedImage::from_bytes("file:///x.txt".to_owned(), b"hello").unwrap_err();
        assert!(err.contains("not a recognizable image"), "{err}");
    }

    #[test]
    fn image_without_payload_has_no_data_url() {
        let image = CapturedImage {
            uri: "file:///x.jpg".to_owned(),
            width: 1,
            height: 1,
            base64: None,
            mime_type: DEFAULT_IMAGE_MIME_TYPE.to_owned(),
        };
        assert_eq!(image.to_data_url(), None);
    }

    #[test]
    fn command_template_requires_output() {
        let err = SystemCaptureSource::new("fswebcam", "/a".into(), "/b".into()).unwrap_err();
        assert!(err.to_string().contains("{output}"));
    }

    #[test]
    fn flip_toggles_facing() {
        assert_eq!(CameraFacing::Back.flipped(), CameraFacing::Front);
        assert_eq!(CameraFacing::Back.flipped().flipped(), CameraFacing::Back);
    }

    #[tokio::test]
    async fn cancelled_pick_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let picked = source(DEFAULT_CAMERA_COMMAND, dir.path())
            .pick_from_gallery(None)
            .await
            .unwrap();
        assert_eq!(picked, None);
    }

    #[tokio::test]
    async fn picks_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        tokio::fs::write(&path, png_bytes(4, 5)).await.unwrap();
        let image = source(DEFAULT_CAMERA_COMMAND, dir.path())
            .pick_from_gallery(Some(&path))
            .await
            .unwrap()
            .unwrap();
        assert_eq!((image.width, image.height), (4, 5));
        assert!(image.uri.starts_with("file://"));
        assert!(image.base64.is_some());
    }

    #[tokio::test]
    async fn missing_file_is_a_selection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = source(DEFAULT_CAMERA_COMMAND, dir.path())
            .pick_from_gallery(Some(&dir.path().join("missing.jpg")))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::SelectionFailure(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_camera_is_a_capture_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(DEFAULT_CAMERA_COMMAND, dir.path());
        assert_eq!(
            source.camera_permission(CameraFacing::Back).await,
            PermissionStatus::Unavailable
        );
        let err = source.capture_from_camera(CameraFacing::Back).await.unwrap_err();
        assert!(matches!(err, CaptureError::CaptureFailure(_)), "{err:?}");
    }

    #[tokio::test]
    async fn captures_with_custom_command() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("fixture.png");
        tokio::fs::write(&fixture, png_bytes(6, 4)).await.unwrap();
        // Stand in for a camera device and a capture tool.
        tokio::fs::write(dir.path().join("video1"), b"").await.unwrap();
        let command = format!("cp {} {{output}}", fixture.display());

        let image = source(&command, dir.path())
            .capture_from_camera(CameraFacing::Front)
            .await
            .unwrap();
        assert!(image.uri.starts_with("camera://front/"), "{}", image.uri);
        assert_eq!((image.width, image.height), (6, 4));
    }

    #[tokio::test]
    async fn failing_camera_command_is_a_capture_failure() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("video0"), b"").await.unwrap();
        let err = source("false {output}", dir.path())
            .capture_from_camera(CameraFacing::Back)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::CaptureFailure(_)), "{err:?}");
    }
}
