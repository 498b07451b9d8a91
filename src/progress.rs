//! Transfer progress rendering.
//!
//! One byte-level bar per in-flight file, plus a final throughput summary.
//! Rendering is opt-in; totals are tracked either way so the summary line
//! is always available.

use std::time::Instant;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

pub struct TransferProgress {
    verb: &'static str,
    render: bool,
    bar: Option<ProgressBar>,
    files: u64,
    bytes: u64,
    started: Instant,
}

impl TransferProgress {
    pub fn new(verb: &'static str, render: bool) -> Self {
        Self {
            verb,
            render,
            bar: None,
            files: 0,
            bytes: 0,
            started: Instant::now(),
        }
    }

    pub fn begin_file(&mut self, name: &str, size: u64) {
        if !self.render {
            return;
        }
        let bar = ProgressBar::new(size);
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{wide_bar}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(format!("{} {name}", self.verb));
        self.bar = Some(bar);
    }

    /// Advances by the plaintext byte count of one processed chunk.
    pub fn advance(&mut self, bytes: u64) {
        self.bytes += bytes;
        if let Some(bar) = &self.bar {
            bar.inc(bytes);
        }
    }

    pub fn finish_file(&mut self) {
        self.files += 1;
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    /// Drops the bar without counting the file as done.
    pub fn abort_file(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }

    pub fn summary(&self) -> String {
        let seconds = self.started.elapsed().as_secs_f64();
        let rate = if seconds > 0.0 {
            self.bytes as f64 / seconds
        } else {
            0.0
        };
        format!(
            "{} files, {} in {seconds:.1}s ({}/s)",
            self.files,
            HumanBytes(self.bytes),
            HumanBytes(rate as u64),
        )
    }
}
