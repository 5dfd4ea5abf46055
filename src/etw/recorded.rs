//! Owned form of a raw trace event.
//!
//! Channel-fed and replay sources carry events in this shape and lend them to
//! the pipeline as a borrowed `RawEvent` for the duration of one callback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::source::{AttributeError, AttributeStream, RawEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordedEvent {
    pub provider_guid: Uuid,
    #[serde(default)]
    pub provider_name: String,
    pub event_name: String,
    #[serde(default)]
    pub opcode: u8,
    #[serde(default)]
    pub opcode_name: String,
    pub time_stamp: DateTime<Utc>,
    #[serde(rename = "ThreadID", default)]
    pub thread_id: u32,
    #[serde(rename = "ProcessID", default)]
    pub process_id: u32,
    #[serde(default)]
    pub process_name: String,
    #[serde(default = "default_pointer_size")]
    pub pointer_size: u32,
    #[serde(default)]
    pub event_data_length: u32,
    /// Attribute stream in source order; names may repeat.
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
    /// Marks a stream that cannot be read to the end.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub malformed: bool,
}

fn default_pointer_size() -> u32 {
    8
}

impl RecordedEvent {
    /// Minimal event, handy for tests and synthetic feeds.
    pub fn new(event_name: &str, process_id: u32, process_name: &str) -> Self {
        Self {
            provider_guid: Uuid::nil(),
            provider_name: String::new(),
            event_name: event_name.to_owned(),
            opcode: 0,
            opcode_name: String::new(),
            time_stamp: Utc::now(),
            thread_id: 0,
            process_id,
            process_name: process_name.to_owned(),
            pointer_size: default_pointer_size(),
            event_data_length: 0,
            attributes: Vec::new(),
            malformed: false,
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn as_raw(&self) -> RawEvent<'_> {
        RawEvent {
            provider_guid: self.provider_guid,
            provider_name: &self.provider_name,
            event_name: &self.event_name,
            opcode: self.opcode,
            opcode_name: &self.opcode_name,
            timestamp: self.time_stamp,
            thread_id: self.thread_id,
            process_id: self.process_id,
            process_name: &self.process_name,
            pointer_size: self.pointer_size,
            data_length: self.event_data_length,
            attributes: self,
        }
    }
}

impl AttributeStream for RecordedEvent {
    fn read_attributes(&self, visit: &mut dyn FnMut(&str, &str)) -> Result<(), AttributeError> {
        if self.malformed {
            return Err(AttributeError("recorded stream marked malformed".into()));
        }
        for (name, value) in &self.attributes {
            visit(name, value);
        }
        Ok(())
    }
}
