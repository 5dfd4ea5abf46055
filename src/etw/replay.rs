//! Replay source: feeds recorded raw events from a JSON-lines file.
//!
//! Lets the service run the full pipeline against captured traces on hosts
//! without a live tracing subsystem. One file per collector,
//! `<replay_dir>/<collector id>.jsonl`, one `RecordedEvent` per line.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use log::Level;

use super::recorded::RecordedEvent;
use super::source::{
    Flow, ProviderSelection, RawEvent, SessionControl, SessionName, SourceError, SourceFactory, StopHandle,
    TraceSource,
};
use crate::config::CollectorConfig;
use crate::hound_log;

#[derive(Debug, Default)]
struct ReplayControl {
    stop_requested: AtomicBool,
    session: Mutex<Option<SessionName>>,
}

impl SessionControl for ReplayControl {
    fn stop_processing(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn stop_session(&self) -> Result<(), SourceError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| SourceError::Other("session state poisoned".into()))?;
        if let Some(name) = session.take() {
            hound_log!(Level::Debug, "replay", "session {} closed", name);
        }
        Ok(())
    }
}

pub struct ReplaySource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    control: Arc<ReplayControl>,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Recording {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(BufReader::new(file)),
            control: Arc::default(),
        })
    }
}

impl TraceSource for ReplaySource {
    fn enable_session(&mut self, name: &SessionName, _provider: &ProviderSelection) -> Result<(), SourceError> {
        let mut session = self
            .control
            .session
            .lock()
            .map_err(|_| SourceError::Other("session state poisoned".into()))?;
        if let Some(existing) = &*session {
            return Err(SourceError::SessionExists(existing.to_string()));
        }
        *session = Some(name.clone());
        Ok(())
    }

    fn stop_handle(&self) -> StopHandle {
        self.control.clone()
    }

    fn process_events(&mut self, callback: &mut dyn FnMut(&RawEvent<'_>) -> Flow) -> Result<(), SourceError> {
        let reader = self.reader.take().ok_or(SourceError::NotEnabled)?;
        // A line that cannot be read as an event is skipped; only I/O errors end the replay.
        for (idx, line) in reader.split(b'\n').enumerate() {
            if self.control.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            let line = line.map_err(|source| SourceError::Recording {
                path: self.path.display().to_string(),
                source,
            })?;
            if line.trim_ascii().is_empty() {
                continue;
            }
            match serde_json::from_slice::<RecordedEvent>(&line) {
                Ok(event) => {
                    if callback(&event.as_raw()).is_break() {
                        break;
                    }
                }
                Err(e) => {
                    hound_log!(Level::Warn, "replay", "{}:{} skipped: {}", self.path.display(), idx + 1, e);
                }
            }
        }
        Ok(())
    }
}

/// Opens `<dir>/<collector id>.jsonl` for every collector.
pub struct ReplayFactory {
    dir: PathBuf,
}

impl ReplayFactory {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn recording_path(&self, collector: &CollectorConfig) -> PathBuf {
        self.dir.join(format!("{}.jsonl", collector.id))
    }
}

impl SourceFactory for ReplayFactory {
    fn create(&self, collector: &CollectorConfig) -> Result<Box<dyn TraceSource>, SourceError> {
        let path = self.recording_path(collector);
        hound_log!(Level::Debug, "replay", "opening {}", path.display());
        Ok(Box::new(ReplaySource::open(&path)?))
    }
}
