//! The `shell` subcommand: an interactive session over one pipeline.
//!
//! Each command is one button in a camera app: take a picture, flip the
//! camera, upload a photo, process it, retake.

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _};

use crate::{
    capture::{CameraFacing, CaptureSource, PermissionStatus},
    client::OcrBackend,
    config::ApiOpts,
    error::CaptureError,
    pipeline::{OcrResult, Phase, Pipeline},
    prelude::*,
    ui::Ui,
};

use super::{CaptureOpts, build_pipeline};

/// Options for the `shell` subcommand.
#[derive(Debug, Args)]
pub struct ShellOpts {
    #[clap(flatten)]
    pub api: ApiOpts,

    #[clap(flatten)]
    pub capture: CaptureOpts,
}

/// The `shell` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_shell(ui: Ui, opts: &ShellOpts) -> Result<()> {
    let pipeline = build_pipeline(&opts.api).await?;
    let source = opts.capture.to_source()?;
    let mut shell = Shell::new(ui, pipeline, source);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    shell.run(stdin, tokio::io::stdout()).await
}

/// A line of shell input.
#[derive(Debug, Parser)]
#[clap(multicall = true)]
struct ShellLine {
    #[clap(subcommand)]
    command: ShellCommand,
}

/// Shell commands.
#[derive(Debug, Subcommand)]
enum ShellCommand {
    /// Take a picture with the current camera.
    #[clap(alias = "snap")]
    Camera,
    /// Switch between the back and front cameras.
    Flip,
    /// Upload a photo. Without a path, nothing is selected.
    #[clap(alias = "upload")]
    Pick {
        /// The JPEG or PNG file to use. It may be quoted, and may contain
        /// spaces.
        #[clap(value_name = "PATH", num_args = 0..)]
        path: Vec<String>,
    },
    /// OCR the current image and convert the text to JSON.
    Process,
    /// Discard the current image and result.
    #[clap(alias = "reset")]
    Retake,
    /// Show the current image and result.
    Show,
    /// Leave the shell.
    #[clap(alias = "exit")]
    Quit,
}

/// Should the shell keep reading?
enum Flow {
    Continue,
    Quit,
}

/// Interactive session state.
pub struct Shell<B, S> {
    ui: Ui,
    pipeline: Pipeline<B>,
    source: S,
    facing: CameraFacing,
}

impl<B: OcrBackend, S: CaptureSource> Shell<B, S> {
    /// Create a new shell around a pipeline.
    pub fn new(ui: Ui, pipeline: Pipeline<B>, source: S) -> Self {
        Self {
            ui,
            pipeline,
            source,
            facing: CameraFacing::default(),
        }
    }

    /// Read commands until `quit` or end of input.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let _spinner = self.ui.spawn_processing_spinner(self.pipeline.subscribe());
        write_out(
            &mut output,
            "Take a picture with `camera`, or upload one with `pick PATH`. Type `help` for more.\n",
        )
        .await?;

        let mut lines = input.lines();
        loop {
            write_out(&mut output, "> ").await?;
            let Some(line) = lines.next_line().await.context("cannot read input")? else {
                break;
            };
            let words = match split_words(&line) {
                Ok(words) => words,
                Err(err) => {
                    write_out(&mut output, &format!("error: {err}\n")).await?;
                    continue;
                }
            };
            if words.is_empty() {
                continue;
            }
            let command = match ShellLine::try_parse_from(words) {
                Ok(parsed) => parsed.command,
                Err(err) => {
                    write_out(&mut output, &err.render().to_string()).await?;
                    continue;
                }
            };
            let text = match self.execute(command).await {
                (Flow::Quit, text) => {
                    write_out(&mut output, &text).await?;
                    break;
                }
                (Flow::Continue, text) => text,
            };
            write_out(&mut output, &text).await?;
        }
        Ok(())
    }

    /// Run one command, returning what to print.
    async fn execute(&mut self, command: ShellCommand) -> (Flow, String) {
        let text = match command {
            ShellCommand::Camera => self.take_picture().await,
            ShellCommand::Flip => {
                self.facing = self.facing.flipped();
                format!("Using the {} camera.\n", self.facing)
            }
            ShellCommand::Pick { path } => {
                let path = (!path.is_empty()).then(|| PathBuf::from(path.join(" ")));
                self.pick_image(path.as_deref()).await
            }
            ShellCommand::Process => self.process().await,
            ShellCommand::Retake => {
                self.pipeline.reset();
                "Ready for a new picture.\n".to_owned()
            }
            ShellCommand::Show => self.show(),
            ShellCommand::Quit => return (Flow::Quit, "Bye.\n".to_owned()),
        };
        (Flow::Continue, text)
    }

    async fn take_picture(&mut self) -> String {
        if self.source.camera_permission(self.facing).await == PermissionStatus::Denied {
            return permission_request(self.facing);
        }
        match self.source.capture_from_camera(self.facing).await {
            Ok(image) => {
                let text = format!(
                    "Took a {}x{} picture with the {} camera.\n",
                    image.width, image.height, self.facing
                );
                self.pipeline.capture(image);
                text
            }
            Err(CaptureError::PermissionDenied(_)) => permission_request(self.facing),
            Err(err) => {
                error!(%err, "Error taking picture");
                self.ui.alert("Error", "Failed to take picture");
                String::new()
            }
        }
    }

    async fn pick_image(&mut self, path: Option<&Path>) -> String {
        match self.source.pick_from_gallery(path).await {
            Ok(Some(image)) => {
                let text = format!(
                    "Picked a {}x{} image from {}.\n",
                    image.width, image.height, image.uri
                );
                self.pipeline.capture(image);
                text
            }
            Ok(None) => "No image selected.\n".to_owned(),
            Err(err) => {
                error!(%err, "Error selecting an image");
                self.ui
                    .alert("Error", "Failed to pick an image from the gallery.");
                String::new()
            }
        }
    }

    async fn process(&mut self) -> String {
        if self.pipeline.phase() == Phase::Idle {
            return "No image yet. Use `camera` or `pick PATH` first.\n".to_owned();
        }
        let failed = match self.pipeline.process().await {
            None => return "This image has no data to process.\n".to_owned(),
            Some(result) => result.is_failure(),
        };
        if failed {
            self.ui
                .alert("Error", "Failed to process image with the OCR API");
        }
        self.pipeline.result().map(render_result).unwrap_or_default()
    }

    fn show(&self) -> String {
        let Some(image) = self.pipeline.image() else {
            return format!("No image. The {} camera is ready.\n", self.facing);
        };
        let mut text = format!("Image: {} ({}x{})\n", image.uri, image.width, image.height);
        match self.pipeline.result() {
            Some(result) => {
                if let OcrResult::Success { raw, .. } = result {
                    text.push_str("Raw Text:\n");
                    text.push_str(raw);
                    text.push('\n');
                }
                text.push_str(&render_result(result));
            }
            None => text.push_str("Not processed yet. Use `process`.\n"),
        }
        text
    }
}

/// Split a line into words. Single or double quotes group text into one word,
/// and a backslash outside single quotes escapes the next character.
fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word: Option<String> = None;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '"' | '\'') => {
                quote = Some(c);
                word.get_or_insert_with(String::new);
            }
            (None | Some('"'), '\\') => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| anyhow!("nothing to escape at end of line"))?;
                word.get_or_insert_with(String::new).push(escaped);
            }
            (None, c) if c.is_whitespace() => words.extend(word.take()),
            (_, c) => word.get_or_insert_with(String::new).push(c),
        }
    }
    if let Some(q) = quote {
        return Err(anyhow!("missing closing {q}"));
    }
    words.extend(word);
    Ok(words)
}

/// Ask the user to grant camera access.
fn permission_request(facing: CameraFacing) -> String {
    format!(
        "We need your permission to use the {facing} camera. Grant this user \
         access to the camera device (often by joining the `video` group), then \
         try again.\n"
    )
}

/// Format a result for display.
fn render_result(result: &OcrResult) -> String {
    match result {
        OcrResult::Success { structured, .. } => {
            let pretty = serde_json::to_string_pretty(structured)
                .unwrap_or_else(|_| structured.to_string());
            format!("OCR Results:\nStructured Data:\n{pretty}\n")
        }
        OcrResult::Failure { error } => format!("OCR Results:\n{error}\n"),
    }
}

async fn write_out<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    output
        .write_all(text.as_bytes())
        .await
        .context("cannot write output")?;
    output.flush().await.context("cannot flush output")
}
