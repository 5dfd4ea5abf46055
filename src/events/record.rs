//! Canonical event record and its JSON form.
//!
//! Field order is fixed by the struct declaration and the attribute map is a
//! `BTreeMap`, so the same record always serializes to the same bytes. That
//! matters because content scanning runs on the serialized form.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRecord {
    pub provider_guid: Uuid,
    /// Identifiers of the scan rules that matched; empty unless scanning is on.
    pub yara_match: Vec<String>,
    pub provider_name: String,
    pub event_name: String,
    pub opcode: u8,
    pub opcode_name: String,
    pub time_stamp: DateTime<Utc>,
    #[serde(rename = "ThreadID")]
    pub thread_id: u32,
    #[serde(rename = "ProcessID")]
    pub process_id: u32,
    pub process_name: String,
    pub pointer_size: u32,
    pub event_data_length: u32,
    pub xml_event_data: BTreeMap<String, String>,
}

impl EventRecord {
    /// Single-line JSON, as written to every sink.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
