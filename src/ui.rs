//! Application UI: the processing spinner, alerts, and a stderr writer that
//! cooperates with both.

use std::{borrow::Cow, io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::{sync::watch, task::JoinHandle};

use crate::{pipeline::Phase, prelude::*};

/// Application UI state.
#[derive(Clone)]
pub struct Ui {
    /// Our progress bars.
    multi_progress: Arc<MultiProgress>,
}

impl Ui {
    /// Create a new UI.
    pub fn init() -> Ui {
        let multi_progress = Arc::new(MultiProgress::new());
        Ui { multi_progress }
    }

    /// Create a new UI for unit tests, which never draws anything.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        let multi_progress =
            Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()));
        Ui { multi_progress }
    }

    /// Hide all our progress bars completely, for when we're writing actual
    /// output to `stdout`.
    pub fn hide_progress_bars(&self) {
        self.multi_progress
            .set_draw_target(ProgressDrawTarget::hidden());
    }

    /// Get a writer than can be used to write to stderr, for use with `tracing`
    /// and other output code.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Get a reference to our progress bars.
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Create a new spinner with default settings.
    pub fn new_spinner(&self, config: &ProgressConfig<'_>) -> ProgressBar {
        let sp = ProgressBar::new_spinner().with_style(default_spinner_style());
        let sp = self.multi_progress.add(sp);
        #[cfg(test)]
        sp.set_draw_target(ProgressDrawTarget::hidden());
        sp.set_prefix(config.emoji.to_owned());
        sp.set_message(config.msg.to_owned());
        sp.enable_steady_tick(Duration::from_millis(120));
        sp.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }

    /// Show a blocking-style alert on stderr. Alerts are for things the user
    /// must notice, like a failed capture, and are separate from OCR results.
    pub fn alert(&self, title: &str, message: &str) {
        use io::Write as _;
        if let Err(err) = self
            .get_stderr_writer()
            .write_fmt(format_args!("\n  ⚠️  {title}: {message}\n\n"))
        {
            warn!(%err, title, message, "Could not show alert");
        }
    }

    /// Show a spinner whenever `phases` reports [`Phase::Processing`]. The
    /// task ends when the pipeline is dropped.
    pub fn spawn_processing_spinner(
        &self,
        mut phases: watch::Receiver<Phase>,
    ) -> JoinHandle<()> {
        let ui = self.clone();
        tokio::spawn(async move {
            let mut spinner: Option<ProgressBar> = None;
            loop {
                let processing = *phases.borrow_and_update() == Phase::Processing;
                match (processing, spinner.take()) {
                    (true, None) => {
                        spinner = Some(ui.new_spinner(&ProgressConfig {
                            emoji: "🔎",
                            msg: "Processing image with OCR...",
                            done_msg: "Processed image",
                        }));
                    }
                    (true, Some(sp)) => spinner = Some(sp),
                    (false, Some(sp)) => sp.finish_and_clear(),
                    (false, None) => {}
                }
                if phases.changed().await.is_err() {
                    if let Some(sp) = spinner.take() {
                        sp.finish_and_clear();
                    }
                    break;
                }
            }
        })
    }
}

/// Configuration for a progress indicator.
pub struct ProgressConfig<'a> {
    /// Emoji to display in the spinner.
    pub emoji: &'a str,
    /// Message to display while running.
    pub msg: &'a str,
    /// Message to display when done.
    pub done_msg: &'a str,
}

fn default_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner} {prefix:3}{msg} {elapsed}")
        .expect("bad progress bar template")
}

/// A writer which can used to write to `stderr`. It will hide and show progress
/// bars as needed, so that they don't interfere with the output.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.multi_progress().suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.multi_progress().suspend(|| io::stderr().flush())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_all(buf))
    }

    fn write_fmt(&mut self, fmt: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_fmt(fmt))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spinner_task_exits_when_sender_is_dropped() {
        let ui = Ui::init_for_tests();
        let (tx, rx) = watch::channel(Phase::Ready);
        let task = ui.spawn_processing_spinner(rx);
        tx.send_replace(Phase::Processing);
        tx.send_replace(Phase::Ready);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("spinner task should exit")
            .unwrap();
    }
}
