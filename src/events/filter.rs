//! Per-collector event filter.

use std::fmt;

use super::record::EventRecord;

/// What a collector lets through. Exactly one predicate per collector.
///
/// Evaluation is strict: once a predicate is set, any record that does not
/// satisfy it is rejected. There is no fall-through to "accept".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FilterSpec {
    #[default]
    None,
    /// Exact match on the event name.
    EventName(String),
    ProcessId(u32),
    /// Exact, case-sensitive match on the normalized process name.
    ProcessName(String),
    Opcode(u8),
}

impl FilterSpec {
    pub fn accepts(&self, record: &EventRecord) -> bool {
        match self {
            FilterSpec::None => true,
            FilterSpec::EventName(name) => record.event_name == *name,
            FilterSpec::ProcessId(pid) => record.process_id == *pid,
            FilterSpec::ProcessName(name) => record.process_name == *name,
            FilterSpec::Opcode(opcode) => record.opcode == *opcode,
        }
    }

    /// Configuration name of the filter kind.
    pub fn option_name(&self) -> &'static str {
        match self {
            FilterSpec::None => "None",
            FilterSpec::EventName(_) => "EventName",
            FilterSpec::ProcessId(_) => "ProcessID",
            FilterSpec::ProcessName(_) => "ProcessName",
            FilterSpec::Opcode(_) => "Opcode",
        }
    }
}

/// Renders the filter value only (empty for `None`).
impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::None => Ok(()),
            FilterSpec::EventName(s) | FilterSpec::ProcessName(s) => f.write_str(s),
            FilterSpec::ProcessId(pid) => write!(f, "{pid}"),
            FilterSpec::Opcode(op) => write!(f, "{op}"),
        }
    }
}
