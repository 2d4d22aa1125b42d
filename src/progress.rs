//! Terminal progress bars for running source paths.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use tracing_subscriber::fmt::MakeWriter;

const BAR_TEMPLATE: &str =
    "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}";

/// Owns the progress display shared by all source paths of a batch.
#[derive(Debug, Clone)]
pub struct Progress {
    multi: Option<MultiProgress>,
}

impl Progress {
    /// Progress bars are only drawn when requested and stderr is a terminal.
    pub fn new(enabled: bool) -> Self {
        let target = (enabled && atty::is(atty::Stream::Stderr)).then(ProgressDrawTarget::stderr);
        Self::with_target(target)
    }

    fn with_target(target: Option<ProgressDrawTarget>) -> Self {
        Self {
            multi: target.map(MultiProgress::with_draw_target),
        }
    }

    /// Creates the bar for one source path with `total` objects.
    pub fn path_bar(&self, source: &str, total: usize) -> ProgressBar {
        let Some(multi) = &self.multi else {
            return ProgressBar::hidden();
        };

        let bar = multi.add(ProgressBar::new(total as u64));
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("█▓▒░ "));
        }
        bar.set_message(source.to_string());
        bar
    }

    /// A log writer for `tracing_subscriber` that clears the bars while a
    /// line is written to stderr and redraws them afterwards.
    pub fn log_writer(&self) -> LogWriter {
        LogWriter {
            multi: self.multi.clone(),
        }
    }
}

/// Writes log lines to stderr around the live progress bars.
#[derive(Debug, Clone)]
pub struct LogWriter {
    multi: Option<MultiProgress>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.multi {
            Some(multi) => multi.suspend(|| io::stderr().write_all(buf))?,
            None => io::stderr().write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
