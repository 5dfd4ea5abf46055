//! Collector Start / Stop messages.
//!
//! Field order here is the order operators see in the event log, so the
//! messages are plain structs rather than `json!` maps (those sort keys).

use serde::Serialize;

use crate::config::keywords::describe_kernel_keywords;
use crate::config::{CollectorConfig, Provider};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartMessage<'a> {
    collector: &'static str,
    data: StartData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartData<'a> {
    #[serde(rename = "Type")]
    kind: String,
    provider: &'a str,
    keywords: String,
    filter_option: &'static str,
    filter_value: String,
    yara_path: String,
    yara_option: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StopMessage {
    collector: &'static str,
    error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<u8>,
}

/// `{"Collector":"Start","Data":{...}}` describing `config`.
pub fn start_message(config: &CollectorConfig) -> String {
    let (provider, keywords) = match &config.provider {
        Provider::Kernel { keywords } => ("", describe_kernel_keywords(*keywords)),
        Provider::User { name, keywords, .. } => (name.as_str(), format!("0x{keywords:X}")),
    };
    let (yara_path, yara_option) = match &config.scan {
        Some(scan) => (scan.rules_dir.display().to_string(), scan.policy.to_string()),
        None => (String::new(), "None".to_owned()),
    };
    let msg = StartMessage {
        collector: "Start",
        data: StartData {
            kind: config.collector_type().to_string(),
            provider,
            keywords,
            filter_option: config.filter.option_name(),
            filter_value: config.filter.to_string(),
            yara_path,
            yara_option,
        },
    };
    to_json(&msg)
}

/// `{"Collector":"Stop","Error":false}`, or with `"ErrorCode"` when `error_code` is set.
pub fn stop_message(error_code: Option<u8>) -> String {
    to_json(&StopMessage { collector: "Stop", error: error_code.is_some(), error_code })
}

fn to_json<T: Serialize>(msg: &T) -> String {
    // Only strings, bools and integers: serialization cannot fail.
    serde_json::to_string(msg).unwrap_or_default()
}
