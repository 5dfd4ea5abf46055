//! System log sink.
//!
//! Entries carry a message, a severity and a numeric event id so downstream
//! consumers can correlate collector starts, stops and recorded events:
//!
//! | id | kind       | severity      |
//! |----|------------|---------------|
//! | 0  | Start      | success audit |
//! | 1  | Stop (ok)  | information   |
//! | 2  | Stop (err) | error         |
//! | 3  | Event      | information   |
//!
//! On Windows entries go to the Windows Event Log. Elsewhere they are
//! forwarded through `log` under the `eventlog` target.

use std::io;

use log::Level;

use super::{DeliveryOutcome, OutputSink, SinkError, EVENT_LOG_SOURCE};
use crate::hound_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Start = 0,
    StopOk = 1,
    StopError = 2,
    Event = 3,
}

impl EntryKind {
    pub fn event_id(self) -> u32 {
        self as u32
    }

    pub fn severity(self) -> Severity {
        match self {
            EntryKind::Start => Severity::SuccessAudit,
            EntryKind::StopError => Severity::Error,
            EntryKind::StopOk | EntryKind::Event => Severity::Information,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    SuccessAudit,
    Error,
    Information,
}

/// Writes one structured entry to a system log.
pub trait EventLogWriter: Send {
    fn write_entry(&mut self, log: &str, message: &str, severity: Severity, event_id: u32) -> io::Result<()>;
}

pub struct EventLogSink {
    log: String,
    writer: Box<dyn EventLogWriter>,
}

impl EventLogSink {
    pub fn new(log: String, writer: Box<dyn EventLogWriter>) -> Self {
        Self { log, writer }
    }

    fn write(&mut self, kind: EntryKind, json: &str) -> DeliveryOutcome {
        match self.writer.write_entry(&self.log, json, kind.severity(), kind.event_id()) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                hound_log!(Level::Error, "output", "event log '{}' write failed: {}", self.log, e);
                DeliveryOutcome::LogWriteFailed
            }
        }
    }
}

impl OutputSink for EventLogSink {
    fn deliver(&mut self, json: &str) -> DeliveryOutcome {
        self.write(EntryKind::Event, json)
    }

    fn lifecycle(&mut self, kind: EntryKind, json: &str) -> DeliveryOutcome {
        self.write(kind, json)
    }
}

/// Forwards entries through the `log` facade.
pub struct ForwardingEventLog;

impl EventLogWriter for ForwardingEventLog {
    fn write_entry(&mut self, log: &str, message: &str, severity: Severity, event_id: u32) -> io::Result<()> {
        let level = match severity {
            Severity::Error => Level::Error,
            Severity::SuccessAudit | Severity::Information => Level::Info,
        };
        log::log!(target: "eventlog", level, "[{}][{}][id={}] {}", EVENT_LOG_SOURCE, log, event_id, message);
        Ok(())
    }
}

#[cfg(windows)]
mod windows {
    use std::{io, iter, ptr};

    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::System::EventLog::{
        DeregisterEventSource, RegisterEventSourceW, ReportEventW, EVENTLOG_AUDIT_SUCCESS, EVENTLOG_ERROR_TYPE,
        EVENTLOG_INFORMATION_TYPE,
    };

    use super::{EventLogWriter, Severity};

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(iter::once(0)).collect()
    }

    /// Windows Event Log writer for one registered event source.
    pub struct WindowsEventLog {
        handle: HANDLE,
    }

    // Event log handles may be used from any thread.
    unsafe impl Send for WindowsEventLog {}

    impl WindowsEventLog {
        pub fn open(source: &str) -> io::Result<Self> {
            let name = wide(source);
            let handle = unsafe { RegisterEventSourceW(ptr::null(), name.as_ptr()) };
            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { handle })
        }
    }

    impl EventLogWriter for WindowsEventLog {
        fn write_entry(&mut self, _log: &str, message: &str, severity: Severity, event_id: u32) -> io::Result<()> {
            let kind = match severity {
                Severity::SuccessAudit => EVENTLOG_AUDIT_SUCCESS,
                Severity::Error => EVENTLOG_ERROR_TYPE,
                Severity::Information => EVENTLOG_INFORMATION_TYPE,
            };
            let msg = wide(message);
            let strings = [msg.as_ptr()];
            let ok = unsafe {
                ReportEventW(
                    self.handle,
                    kind,
                    0,
                    event_id,
                    ptr::null_mut(),
                    1,
                    0,
                    strings.as_ptr(),
                    ptr::null(),
                )
            };
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    impl Drop for WindowsEventLog {
        fn drop(&mut self) {
            unsafe {
                DeregisterEventSource(self.handle);
            }
        }
    }
}

/// The platform's system log writer.
#[cfg(windows)]
pub fn system_writer() -> Result<Box<dyn EventLogWriter>, SinkError> {
    windows::WindowsEventLog::open(EVENT_LOG_SOURCE)
        .map(|w| Box::new(w) as Box<dyn EventLogWriter>)
        .map_err(|error| SinkError::EventLog { source_name: EVENT_LOG_SOURCE.to_owned(), error })
}

/// The platform's system log writer.
#[cfg(not(windows))]
pub fn system_writer() -> Result<Box<dyn EventLogWriter>, SinkError> {
    Ok(Box::new(ForwardingEventLog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Entries = Arc<Mutex<Vec<(String, Severity, u32)>>>;

    struct Recording {
        entries: Entries,
        fail: bool,
    }

    impl EventLogWriter for Recording {
        fn write_entry(&mut self, _log: &str, message: &str, severity: Severity, event_id: u32) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::other("log full"));
            }
            self.entries.lock().unwrap().push((message.to_owned(), severity, event_id));
            Ok(())
        }
    }

    #[test]
    fn events_and_lifecycle_use_distinct_ids() {
        let entries = Entries::default();
        let mut sink = EventLogSink::new("Test-Log".into(), Box::new(Recording { entries: entries.clone(), fail: false }));

        assert!(sink.lifecycle(EntryKind::Start, "start").is_delivered());
        assert!(sink.deliver("event").is_delivered());
        assert!(sink.lifecycle(EntryKind::StopError, "stop").is_delivered());

        let got = entries.lock().unwrap().clone();
        assert_eq!(
            got,
            [
                ("start".to_owned(), Severity::SuccessAudit, 0),
                ("event".to_owned(), Severity::Information, 3),
                ("stop".to_owned(), Severity::Error, 2),
            ]
        );
    }

    #[test]
    fn writer_failure_maps_to_log_write_failed() {
        let mut sink = EventLogSink::new("Test-Log".into(), Box::new(Recording { entries: Entries::default(), fail: true }));
        assert_eq!(sink.deliver("event"), DeliveryOutcome::LogWriteFailed);
    }
}
