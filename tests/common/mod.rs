//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::{self, BufRead, BufReader, Read, Write},
    net::TcpListener,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use reqwest::Url;
use tracehound::collector::SinkFactory;
use tracehound::config::{CollectorConfig, Provider, TraceLevel};
use tracehound::etw::{ChannelSource, SourceError, SourceFactory, TraceSource};
use tracehound::events::{FilterSpec, ProcessLookup};
use tracehound::output::{DeliveryOutcome, EntryKind, EventLogSink, EventLogWriter, OutputSink, Severity, SinkError};
use tracehound::scanner::{Classifier, ScanError, ScanPolicy, ScanSettings};
use uuid::Uuid;

pub fn user_config(id: Uuid) -> CollectorConfig {
    CollectorConfig {
        id,
        provider: Provider::User {
            name: "Test-Provider".into(),
            level: TraceLevel::Informational,
            keywords: u64::MAX,
        },
        destination: tracehound::output::Destination::EventLog { log: "Tracehound-Log".into() },
        filter: FilterSpec::None,
        scan: None,
    }
}

pub fn kernel_config(id: Uuid) -> CollectorConfig {
    CollectorConfig { provider: Provider::Kernel { keywords: 0x1 }, ..user_config(id) }
}

pub fn scan_settings(policy: ScanPolicy, classifier: impl Classifier + 'static) -> ScanSettings {
    ScanSettings { rules_dir: PathBuf::from("rules"), policy, classifier: Arc::new(classifier) }
}

/// Process lookup that never finds anything.
pub struct NoLookup;

impl ProcessLookup for NoLookup {
    fn process_name(&self, _pid: u32) -> Option<String> {
        None
    }
}

/// Classifier returning the same rule names for every input.
pub struct StaticClassifier(pub Vec<&'static str>);

impl Classifier for StaticClassifier {
    fn classify(&self, _data: &[u8]) -> Result<Vec<String>, ScanError> {
        Ok(self.0.iter().map(|s| (*s).to_owned()).collect())
    }
}

pub struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn classify(&self, _data: &[u8]) -> Result<Vec<String>, ScanError> {
        Err(ScanError::Engine("scan timed out".into()))
    }
}

/// Stands in for a rule engine that crashes mid-scan.
pub struct PanickingClassifier;

impl Classifier for PanickingClassifier {
    fn classify(&self, _data: &[u8]) -> Result<Vec<String>, ScanError> {
        panic!("rule engine crashed")
    }
}

/// Sink that records what it was given and optionally fails.
#[derive(Clone, Default)]
pub struct SinkRecord {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl SinkRecord {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

pub struct RecordingSink {
    record: SinkRecord,
    fail_with: Option<DeliveryOutcome>,
}

impl RecordingSink {
    pub fn new(record: SinkRecord) -> Self {
        Self { record, fail_with: None }
    }

    pub fn failing(record: SinkRecord, outcome: DeliveryOutcome) -> Self {
        Self { record, fail_with: Some(outcome) }
    }
}

impl OutputSink for RecordingSink {
    fn deliver(&mut self, json: &str) -> DeliveryOutcome {
        self.record.events.lock().unwrap().push(json.to_owned());
        self.fail_with.unwrap_or(DeliveryOutcome::Delivered)
    }
}

/// Event log writer that keeps `(event id, severity, message)` entries.
#[derive(Clone, Default)]
pub struct MemoryEventLog {
    pub entries: Arc<Mutex<Vec<(u32, Severity, String)>>>,
}

impl MemoryEventLog {
    pub fn entries(&self) -> Vec<(u32, Severity, String)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.entries().into_iter().map(|(id, _, _)| id).collect()
    }
}

impl EventLogWriter for MemoryEventLog {
    fn write_entry(&mut self, _log: &str, message: &str, severity: Severity, event_id: u32) -> io::Result<()> {
        self.entries.lock().unwrap().push((event_id, severity, message.to_owned()));
        Ok(())
    }
}

pub fn event_log_sink(log: &MemoryEventLog) -> EventLogSink {
    EventLogSink::new("Tracehound-Log".into(), Box::new(log.clone()))
}

/// Hands out pre-built channel sources by collector id.
#[derive(Default)]
pub struct PreparedSources {
    sources: Mutex<HashMap<Uuid, ChannelSource>>,
}

impl PreparedSources {
    pub fn add(&self, id: Uuid, source: ChannelSource) {
        self.sources.lock().unwrap().insert(id, source);
    }

    /// Whether the source for `id` was never requested.
    pub fn untouched(&self, id: &Uuid) -> bool {
        self.sources.lock().unwrap().contains_key(id)
    }
}

impl SourceFactory for PreparedSources {
    fn create(&self, collector: &CollectorConfig) -> Result<Box<dyn TraceSource>, SourceError> {
        self.sources
            .lock()
            .unwrap()
            .remove(&collector.id)
            .map(|s| Box::new(s) as Box<dyn TraceSource>)
            .ok_or_else(|| SourceError::Other(format!("no source prepared for {}", collector.id)))
    }
}

pub enum SinkPlan {
    Record(SinkRecord),
    Fail(SinkRecord, DeliveryOutcome),
    EventLog(MemoryEventLog),
}

/// Sink factory keyed by collector id.
#[derive(Default)]
pub struct PlannedSinks {
    plans: Mutex<HashMap<Uuid, SinkPlan>>,
}

impl PlannedSinks {
    pub fn add(&self, id: Uuid, plan: SinkPlan) {
        self.plans.lock().unwrap().insert(id, plan);
    }
}

impl SinkFactory for PlannedSinks {
    fn open(&self, config: &CollectorConfig) -> Result<Box<dyn OutputSink>, SinkError> {
        let plan = self.plans.lock().unwrap().remove(&config.id);
        Ok(match plan {
            Some(SinkPlan::Record(r)) => Box::new(RecordingSink::new(r)),
            Some(SinkPlan::Fail(r, outcome)) => Box::new(RecordingSink::failing(r, outcome)),
            Some(SinkPlan::EventLog(log)) => Box::new(event_log_sink(&log)),
            None => Box::new(RecordingSink::new(SinkRecord::default())),
        })
    }
}

/// Polls `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Minimal HTTP server answering `requests` requests with `status_line`.
/// The join handle yields each request's body as received.
pub fn http_stub(status_line: &'static str, requests: usize) -> (Url, JoinHandle<Vec<(String, String)>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = Url::parse(&format!("http://{}/events", listener.local_addr().unwrap())).unwrap();
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for _ in 0..requests {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                head.push_str(&line);
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = reader.into_inner();
            write!(stream, "{status_line}\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}").unwrap();
            stream.flush().unwrap();
            seen.push((head, String::from_utf8(body).unwrap()));
        }
        seen
    });
    (url, handle)
}
