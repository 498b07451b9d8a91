//! Optional transfer log: one timestamped line per protocol-visible event.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use chrono::Utc;

pub trait Logger: Send + Sync {
    fn directory_created(&self, _path: &str) {}
    fn file_done(&self, _path: &str, _bytes: u64) {}
    fn error(&self, _kind: &str, _message: &str) {}
    fn done(&self, _summary: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn line(&self, text: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "[{}] {}", Utc::now().to_rfc3339(), text);
        }
    }
}

impl Logger for TextLogger {
    fn directory_created(&self, path: &str) {
        self.line(&format!("DIR path={path}"));
    }
    fn file_done(&self, path: &str, bytes: u64) {
        self.line(&format!("FILE path={path} bytes={bytes}"));
    }
    fn error(&self, kind: &str, message: &str) {
        self.line(&format!("ERROR kind={kind} msg={message}"));
    }
    fn done(&self, summary: &str) {
        self.line(&format!("DONE {summary}"));
    }
}
