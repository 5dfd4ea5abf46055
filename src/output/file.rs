//! Line-delimited JSON file sink.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
};

use log::Level;

use super::{DeliveryOutcome, OutputSink};
use crate::hound_log;

#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

/// Appends one JSON object per line, creating the file on first use.
///
/// The file is opened per event; appends from two writers to the same path
/// would interleave, so each path has exactly one collector.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn append(&self, json: &str) -> io::Result<()> {
        let mut line = String::with_capacity(json.len() + LINE_ENDING.len());
        line.push_str(json);
        line.push_str(LINE_ENDING);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

impl OutputSink for FileSink {
    fn deliver(&mut self, json: &str) -> DeliveryOutcome {
        match self.append(json) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                hound_log!(Level::Error, "output", "write to {} failed: {}", self.path.display(), e);
                DeliveryOutcome::FileWriteFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn appends_one_line_per_event_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");
        let mut sink = FileSink::new(path.clone());

        assert_eq!(sink.deliver(r#"{"n":1}"#), DeliveryOutcome::Delivered);
        assert_eq!(sink.deliver(r#"{"n":2}"#), DeliveryOutcome::Delivered);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, [r#"{"n":1}"#, r#"{"n":2}"#]);
        assert!(text.ends_with(LINE_ENDING));
    }

    #[test]
    fn missing_parent_is_a_write_failure() {
        let dir = tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("gone").join("events.json"));
        assert_eq!(sink.deliver("{}"), DeliveryOutcome::FileWriteFailed);
    }

    #[test]
    fn lifecycle_messages_are_not_written_to_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");
        let mut sink = FileSink::new(path.clone());
        assert_eq!(sink.lifecycle(super::super::EntryKind::Start, "{}"), DeliveryOutcome::Delivered);
        assert!(!path.exists());
    }
}
