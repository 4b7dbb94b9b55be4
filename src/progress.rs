//! Progress bars for long-running stages, plus a log writer that prints
//! above them so log lines never tear a bar.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static BARS: OnceLock<MultiProgress> = OnceLock::new();

fn bars() -> &'static MultiProgress {
    BARS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

/// Start a bar for `len` units of work. Nothing to show for zero.
pub fn start_progress_bar(len: usize, message: &str) -> Option<ProgressBar> {
    if len == 0 {
        return None;
    }
    let pb = bars().add(ProgressBar::new(len as u64));
    pb.set_style(bar_style());
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

pub fn advance(pb: &Option<ProgressBar>, n: usize) {
    if let Some(pb) = pb {
        pb.inc(n as u64);
    }
}

pub fn finish(pb: Option<ProgressBar>) {
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
}

fn print_line(line: &str) {
    let _ = bars().println(line.trim_end_matches('\r'));
}

/// `MakeWriter` for tracing-subscriber that routes output through the bars
#[derive(Default, Clone)]
pub struct LogWriterFactory;

/// Buffers partial writes and emits whole lines
pub struct LogWriter {
    pending: String,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.push_str(&String::from_utf8_lossy(buf));
        while let Some(idx) = self.pending.find('\n') {
            print_line(&self.pending[..idx]);
            self.pending.drain(..=idx);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            print_line(&self.pending);
            self.pending.clear();
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            pending: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_bar_for_empty_work() {
        assert!(start_progress_bar(0, "nothing").is_none());
        advance(&None, 3);
        finish(None);
    }

    #[test]
    fn test_log_writer_accepts_partial_lines() {
        let mut writer = LogWriterFactory.make_writer();
        assert_eq!(writer.write(b"half a ").unwrap(), 7);
        assert_eq!(writer.write(b"line\nnext").unwrap(), 9);
        assert_eq!(writer.pending, "next");
        writer.flush().unwrap();
        assert!(writer.pending.is_empty());
    }
}
