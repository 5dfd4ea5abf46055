//! Integration tests for a single collector pipeline.
//!
//! Each test drives a `Pipeline` from a channel-backed trace source and
//! observes what reaches the sink, the pipeline status and the session.
//!
//! Key responsibilities:
//! - File output keeps arrival order, one JSON line per event.
//! - A failed POST terminates the pipeline after that event.
//! - Scan policy drops unmatched events without touching the sink.
//! - Lifecycle messages reach an event log sink with the right ids.

mod common;

use std::{fs, thread, time::Duration};

use crossbeam::channel;
use tracehound::collector::{HandleRegistry, Pipeline, PipelineState, StopReason, FAULT_ERROR_CODE};
use tracehound::etw::{ChannelSource, RecordedEvent};
use tracehound::events::{EventRecord, FilterSpec};
use tracehound::output::{DeliveryOutcome, Destination, FileSink, HttpSink, Severity};
use tracehound::scanner::ScanPolicy;
use uuid::Uuid;

use common::*;

/// Feeds `events`, closes the feed and runs the pipeline to completion.
fn run_to_end(pipeline: Pipeline, feeder: tracehound::etw::ChannelFeeder, events: Vec<RecordedEvent>) -> StopReason {
    for e in events {
        assert!(feeder.send(e));
    }
    drop(feeder);
    let (tx, rx) = channel::bounded(1);
    let registry = HandleRegistry::default();
    let reason = pipeline.run(&registry, tx).expect("pipeline started");
    assert!(rx.recv().unwrap().is_ok());
    assert!(registry.is_empty(), "handle must be removed on termination");
    reason
}

#[test]
fn file_output_keeps_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json");
    let mut config = user_config(Uuid::new_v4());
    config.destination = Destination::File(path.clone());

    let (feeder, source) = ChannelSource::bounded(8);
    let probe = source.probe();
    let pipeline = Pipeline::new(config, Box::new(source), Box::new(FileSink::new(path.clone())), Box::new(NoLookup));
    let status = pipeline.status();

    let reason = run_to_end(
        pipeline,
        feeder,
        vec![RecordedEvent::new("First", 10, "cmd"), RecordedEvent::new("Second", 11, "cmd")],
    );

    assert_eq!(reason, StopReason::SourceExhausted);
    let text = fs::read_to_string(&path).unwrap();
    let records: Vec<EventRecord> = text.lines().map(|l| EventRecord::from_json(l).unwrap()).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].event_name, "First");
    assert_eq!(records[1].event_name, "Second");
    assert_eq!(status.events_delivered(), 2);
    assert_eq!(status.state(), PipelineState::Terminated);
    assert_eq!(probe.session_stops(), 1);
}

#[test]
fn failed_post_terminates_after_that_event() {
    let (url, server) = http_stub("HTTP/1.1 500 Internal Server Error", 1);
    let mut config = user_config(Uuid::new_v4());
    config.destination = Destination::Url(url.clone());

    let (feeder, source) = ChannelSource::bounded(8);
    let probe = source.probe();
    let sink = HttpSink::new(url).unwrap();
    let pipeline = Pipeline::new(config, Box::new(source), Box::new(sink), Box::new(NoLookup));
    let status = pipeline.status();

    let reason = run_to_end(
        pipeline,
        feeder,
        vec![RecordedEvent::new("First", 10, "cmd"), RecordedEvent::new("Second", 11, "cmd")],
    );

    assert_eq!(reason, StopReason::DeliveryFailed(DeliveryOutcome::NetworkPostFailed));
    assert_eq!(reason.error_code(), Some(2));
    assert_eq!(status.events_seen(), 1, "the failing event is the last one processed");
    assert_eq!(status.events_delivered(), 0);
    assert_eq!(status.state(), PipelineState::Terminated);
    assert!(probe.is_stopped());

    let requests = server.join().unwrap();
    let (head, body) = &requests[0];
    assert!(head.to_ascii_lowercase().contains("content-type: application/json"), "{head}");
    assert!(head.to_ascii_lowercase().contains("accept: application/json"), "{head}");
    assert_eq!(EventRecord::from_json(body).unwrap().event_name, "First");
}

#[test]
fn successful_post_is_delivered() {
    let (url, server) = http_stub("HTTP/1.1 202 Accepted", 1);
    let mut sink = HttpSink::new(url).unwrap();
    use tracehound::output::OutputSink;
    assert_eq!(sink.deliver(r#"{"EventName":"x"}"#), DeliveryOutcome::Delivered);
    assert_eq!(server.join().unwrap()[0].1, r#"{"EventName":"x"}"#);
}

#[test]
fn unreachable_server_is_a_post_failure() {
    // Bind then drop to get a port nobody listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let url = reqwest::Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
    let mut sink = HttpSink::new(url).unwrap();
    use tracehound::output::OutputSink;
    assert_eq!(sink.deliver("{}"), DeliveryOutcome::NetworkPostFailed);
}

#[test]
fn unmatched_events_are_dropped_while_running() {
    let mut config = user_config(Uuid::new_v4());
    config.scan = Some(scan_settings(ScanPolicy::MatchesOnly, StaticClassifier(vec![])));
    let id = config.id;

    let record = SinkRecord::default();
    let (feeder, source) = ChannelSource::bounded(8);
    let pipeline = Pipeline::new(config, Box::new(source), Box::new(RecordingSink::new(record.clone())), Box::new(NoLookup));
    let status = pipeline.status();

    let registry = HandleRegistry::default();
    let (tx, rx) = channel::bounded(1);
    let worker = {
        let registry = registry.clone();
        thread::spawn(move || pipeline.run(&registry, tx))
    };
    assert!(rx.recv().unwrap().is_ok());

    assert!(feeder.send(RecordedEvent::new("Quiet", 1, "svchost")));
    assert!(wait_for(Duration::from_secs(5), || status.events_dropped() == 1));
    assert!(record.events().is_empty(), "sink must not be called for dropped events");
    assert_eq!(status.state(), PipelineState::Running);

    registry.remove(&id).expect("running pipeline is registered").stop().unwrap();
    assert_eq!(worker.join().unwrap(), Some(StopReason::Cancelled));
    assert_eq!(status.state(), PipelineState::Terminated);
}

#[test]
fn matches_are_injected_into_the_record() {
    let mut config = user_config(Uuid::new_v4());
    config.scan = Some(scan_settings(ScanPolicy::All, StaticClassifier(vec!["mimikatz_strings", "lsass_access"])));

    let record = SinkRecord::default();
    let (feeder, source) = ChannelSource::bounded(8);
    let pipeline = Pipeline::new(config, Box::new(source), Box::new(RecordingSink::new(record.clone())), Box::new(NoLookup));

    run_to_end(pipeline, feeder, vec![RecordedEvent::new("Access", 1, "lsass")]);

    let delivered = EventRecord::from_json(&record.events()[0]).unwrap();
    assert_eq!(delivered.yara_match, ["mimikatz_strings", "lsass_access"]);
}

#[test]
fn all_policy_delivers_unmatched_events() {
    let mut config = user_config(Uuid::new_v4());
    config.scan = Some(scan_settings(ScanPolicy::All, StaticClassifier(vec![])));

    let record = SinkRecord::default();
    let (feeder, source) = ChannelSource::bounded(8);
    let pipeline = Pipeline::new(config, Box::new(source), Box::new(RecordingSink::new(record.clone())), Box::new(NoLookup));

    run_to_end(pipeline, feeder, vec![RecordedEvent::new("Access", 1, "lsass")]);
    assert!(EventRecord::from_json(&record.events()[0]).unwrap().yara_match.is_empty());
}

#[test]
fn scan_engine_error_is_a_fault() {
    let mut config = user_config(Uuid::new_v4());
    config.scan = Some(scan_settings(ScanPolicy::All, FailingClassifier));

    let record = SinkRecord::default();
    let (feeder, source) = ChannelSource::bounded(8);
    let pipeline = Pipeline::new(config, Box::new(source), Box::new(RecordingSink::new(record.clone())), Box::new(NoLookup));

    let reason = run_to_end(pipeline, feeder, vec![RecordedEvent::new("A", 1, "p"), RecordedEvent::new("B", 1, "p")]);
    assert!(matches!(reason, StopReason::Fault(_)), "{reason:?}");
    assert_eq!(reason.error_code(), Some(FAULT_ERROR_CODE));
    assert!(record.events().is_empty());
}

#[test]
fn panic_during_scan_still_tears_down_and_reports() {
    let mut config = user_config(Uuid::new_v4());
    config.scan = Some(scan_settings(ScanPolicy::All, PanickingClassifier));

    let log = MemoryEventLog::default();
    let (feeder, source) = ChannelSource::bounded(8);
    let probe = source.probe();
    let pipeline = Pipeline::new(config, Box::new(source), Box::new(event_log_sink(&log)), Box::new(NoLookup));
    let status = pipeline.status();

    let reason = run_to_end(pipeline, feeder, vec![RecordedEvent::new("A", 1, "p"), RecordedEvent::new("B", 1, "p")]);
    assert_eq!(reason, StopReason::Fault("rule engine crashed".into()));

    assert_eq!(log.ids(), [0, 2]);
    assert_eq!(log.entries()[1].2, r#"{"Collector":"Stop","Error":true,"ErrorCode":255}"#);
    assert_eq!(status.events_seen(), 1, "the panicking event is the last one processed");
    assert_eq!(status.state(), PipelineState::Terminated);
    assert_eq!(probe.session_stops(), 1);
}

#[test]
fn filter_rejects_before_delivery() {
    let mut config = user_config(Uuid::new_v4());
    config.filter = FilterSpec::ProcessName("svchost".into());

    let record = SinkRecord::default();
    let (feeder, source) = ChannelSource::bounded(8);
    let pipeline = Pipeline::new(config, Box::new(source), Box::new(RecordingSink::new(record.clone())), Box::new(NoLookup));
    let status = pipeline.status();

    run_to_end(
        pipeline,
        feeder,
        vec![RecordedEvent::new("E", 1, "svchost"), RecordedEvent::new("E", 2, "explorer")],
    );

    let delivered = record.events();
    assert_eq!(delivered.len(), 1);
    assert_eq!(EventRecord::from_json(&delivered[0]).unwrap().process_name, "svchost");
    assert_eq!(status.events_filtered(), 1);
}

#[test]
fn unresolvable_process_is_reported_as_na() {
    let record = SinkRecord::default();
    let (feeder, source) = ChannelSource::bounded(8);
    let pipeline = Pipeline::new(
        user_config(Uuid::new_v4()),
        Box::new(source),
        Box::new(RecordingSink::new(record.clone())),
        Box::new(NoLookup),
    );

    run_to_end(pipeline, feeder, vec![RecordedEvent::new("E", 4_000_000, "")]);
    assert_eq!(EventRecord::from_json(&record.events()[0]).unwrap().process_name, "N/A");
}

#[test]
fn lifecycle_messages_reach_the_event_log() {
    let log = MemoryEventLog::default();
    let (feeder, source) = ChannelSource::bounded(8);
    let pipeline = Pipeline::new(
        kernel_config(Uuid::new_v4()),
        Box::new(source),
        Box::new(event_log_sink(&log)),
        Box::new(NoLookup),
    );

    run_to_end(pipeline, feeder, vec![RecordedEvent::new("Process/Start", 4, "System")]);

    let entries = log.entries();
    assert_eq!(log.ids(), [0, 3, 1]);
    assert_eq!(entries[0].1, Severity::SuccessAudit);
    assert!(entries[0].2.starts_with(r#"{"Collector":"Start","Data":{"Type":"Kernel""#), "{}", entries[0].2);
    assert_eq!(entries[2].2, r#"{"Collector":"Stop","Error":false}"#);
}

#[test]
fn failed_event_log_write_stops_with_error_entry() {
    struct FlakyLog {
        inner: MemoryEventLog,
        writes: usize,
    }
    impl tracehound::output::EventLogWriter for FlakyLog {
        fn write_entry(&mut self, log: &str, message: &str, severity: Severity, event_id: u32) -> std::io::Result<()> {
            self.writes += 1;
            // Start goes through, the first event fails, the Stop entry goes through.
            if self.writes == 2 {
                return Err(std::io::Error::other("event log full"));
            }
            self.inner.write_entry(log, message, severity, event_id)
        }
    }

    let log = MemoryEventLog::default();
    let sink = tracehound::output::EventLogSink::new(
        "Tracehound-Log".into(),
        Box::new(FlakyLog { inner: log.clone(), writes: 0 }),
    );
    let (feeder, source) = ChannelSource::bounded(8);
    let pipeline = Pipeline::new(user_config(Uuid::new_v4()), Box::new(source), Box::new(sink), Box::new(NoLookup));

    let reason = run_to_end(pipeline, feeder, vec![RecordedEvent::new("E", 1, "p")]);
    assert_eq!(reason, StopReason::DeliveryFailed(DeliveryOutcome::LogWriteFailed));

    let entries = log.entries();
    assert_eq!(log.ids(), [0, 2]);
    assert_eq!(entries[1].1, Severity::Error);
    assert_eq!(entries[1].2, r#"{"Collector":"Stop","Error":true,"ErrorCode":3}"#);
}

#[test]
fn enable_failure_never_reaches_running() {
    let (_feeder, source) = ChannelSource::bounded(1);
    let source = source.fail_enable("provider not registered");
    let pipeline = Pipeline::new(
        user_config(Uuid::new_v4()),
        Box::new(source),
        Box::new(RecordingSink::new(SinkRecord::default())),
        Box::new(NoLookup),
    );
    let status = pipeline.status();

    let (tx, rx) = channel::bounded(1);
    let registry = HandleRegistry::default();
    assert_eq!(pipeline.run(&registry, tx), None);
    assert!(rx.recv().unwrap().is_err());
    assert!(registry.is_empty());
    assert_eq!(status.state(), PipelineState::Terminated);
    assert_eq!(status.events_seen(), 0);
}
