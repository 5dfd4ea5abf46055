//! Raw trace event → `EventRecord`.
//!
//! Normalization never fails: a missing process name falls back to a process
//! table lookup and then to `"N/A"`, and an unreadable attribute stream is
//! replaced by a single diagnostic attribute.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::{Duration, Instant},
};

use log::Level;
use sysinfo::{Pid, ProcessesToUpdate, System};

use super::record::EventRecord;
use crate::config::model::CollectorType;
use crate::etw::RawEvent;
use crate::hound_log;

/// Longest attribute value kept, in characters.
pub const MAX_ATTRIBUTE_LEN: usize = 10_000;

/// Process name used when neither the event nor the process table knows it.
pub const UNKNOWN_PROCESS: &str = "N/A";

/// Attribute that replaces the whole map when the stream cannot be parsed.
pub const PARSE_FAILURE_ATTRIBUTE: &str = "XmlEventParsing";

/// Resolves a pid to a process name.
pub trait ProcessLookup: Send {
    fn process_name(&self, pid: u32) -> Option<String>;
}

/// How long a resolved pid is trusted before the process table is asked again.
const NAME_TTL: Duration = Duration::from_secs(2);

/// Entries kept before expired ones are swept.
const NAME_CACHE_LIMIT: usize = 4096;

/// Recent pid → name answers, including misses. Pids are reused, so entries
/// expire after a short time.
struct NameCache {
    ttl: Duration,
    entries: HashMap<u32, (Instant, Option<String>)>,
}

impl NameCache {
    fn new(ttl: Duration) -> Self {
        Self { ttl, entries: HashMap::new() }
    }

    fn lookup(&mut self, pid: u32, now: Instant, resolve: impl FnOnce() -> Option<String>) -> Option<String> {
        if let Some((at, name)) = self.entries.get(&pid) {
            if now.saturating_duration_since(*at) < self.ttl {
                return name.clone();
            }
        }
        if self.entries.len() >= NAME_CACHE_LIMIT {
            let ttl = self.ttl;
            self.entries.retain(|_, (at, _)| now.saturating_duration_since(*at) < ttl);
        }
        let name = resolve();
        self.entries.insert(pid, (now, name.clone()));
        name
    }
}

struct LookupState {
    system: System,
    names: NameCache,
}

/// Process table lookup backed by `sysinfo`.
pub struct SystemProcessLookup {
    state: Mutex<LookupState>,
}

impl SystemProcessLookup {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LookupState { system: System::new(), names: NameCache::new(NAME_TTL) }),
        }
    }
}

impl Default for SystemProcessLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLookup for SystemProcessLookup {
    fn process_name(&self, pid: u32) -> Option<String> {
        let mut state = self.state.lock().ok()?;
        let LookupState { system, names } = &mut *state;
        names.lookup(pid, Instant::now(), || {
            let pid = Pid::from_u32(pid);
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            let name = system.process(pid)?.name().to_string_lossy().into_owned();
            Some(strip_exe_suffix(name))
        })
    }
}

/// Trace sources report process names without the image extension.
fn strip_exe_suffix(mut name: String) -> String {
    let stem = name.len().saturating_sub(4);
    if stem > 0 && name.get(stem..).is_some_and(|ext| ext.eq_ignore_ascii_case(".exe")) {
        name.truncate(name.len() - 4);
    }
    name
}

/// Cuts `value` to at most `MAX_ATTRIBUTE_LEN` characters.
pub fn cap_value(value: &str) -> &str {
    match value.char_indices().nth(MAX_ATTRIBUTE_LEN) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

pub struct Normalizer {
    kind: CollectorType,
    lookup: Box<dyn ProcessLookup>,
}

impl Normalizer {
    pub fn new(kind: CollectorType, lookup: Box<dyn ProcessLookup>) -> Self {
        Self { kind, lookup }
    }

    pub fn normalize(&self, raw: &RawEvent<'_>) -> EventRecord {
        EventRecord {
            provider_guid: raw.provider_guid,
            yara_match: Vec::new(),
            provider_name: raw.provider_name.to_owned(),
            event_name: raw.event_name.to_owned(),
            opcode: raw.opcode,
            opcode_name: raw.opcode_name.to_owned(),
            time_stamp: raw.timestamp,
            thread_id: raw.thread_id,
            process_id: raw.process_id,
            process_name: self.process_name(raw),
            pointer_size: raw.pointer_size,
            event_data_length: raw.data_length,
            xml_event_data: read_attributes(raw),
        }
    }

    fn process_name(&self, raw: &RawEvent<'_>) -> String {
        if !raw.process_name.is_empty() {
            return raw.process_name.to_owned();
        }
        match self.lookup.process_name(raw.process_id) {
            Some(name) if !name.is_empty() => name,
            _ => {
                hound_log!(
                    Level::Trace,
                    "normalize",
                    "{} event {} from pid {} has no resolvable process name",
                    self.kind,
                    raw.event_name,
                    raw.process_id
                );
                UNKNOWN_PROCESS.to_owned()
            }
        }
    }
}

fn read_attributes(raw: &RawEvent<'_>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let mut duplicate = None;
    let parsed = raw.attributes.read_attributes(&mut |name, value| {
        if map.contains_key(name) {
            duplicate.get_or_insert_with(|| name.to_owned());
            return;
        }
        map.insert(name.to_owned(), cap_value(value).to_owned());
    });

    let failure = match (parsed, duplicate) {
        (Err(e), _) => Some(e.to_string()),
        (Ok(()), Some(name)) => Some(format!("duplicate attribute '{name}'")),
        (Ok(()), None) => None,
    };
    if let Some(reason) = failure {
        hound_log!(Level::Debug, "normalize", "event {}: {}", raw.event_name, reason);
        map.clear();
        map.insert(PARSE_FAILURE_ATTRIBUTE.to_owned(), "false".to_owned());
    }
    map
}
