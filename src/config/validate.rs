// src/config/validate.rs

//! # Collector validation
//!
//! Turns `RawCollector` entries into `CollectorConfig`s. Nothing is patched in
//! place: a field is either converted to its typed form or the whole
//! collector is rejected with a `ValidationError` naming the field.
//!
//! Defaults exist only where an operator may reasonably omit a field:
//! filter (`None`), scan policy (`None`), user trace level (`Informational`)
//! and user keyword mask (all bits).

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::Level;
use reqwest::Url;
use uuid::Uuid;

use super::keywords::{parse_kernel_keywords, parse_mask};
use super::model::{CollectorConfig, CollectorType, Provider, RawCollector, TraceLevel, ValidationError};
use crate::events::FilterSpec;
use crate::hound_log;
use crate::output::{Destination, EVENT_LOG_NAME};
use crate::scanner::{load_rules_dir, RuleLoadError, ScanPolicy, ScanSettings};

pub const DEFAULT_TRACE_LEVEL: TraceLevel = TraceLevel::Informational;
pub const DEFAULT_USER_KEYWORDS: u64 = 0xffff_ffff_ffff_ffff;

/// Field value with surrounding whitespace removed; blank counts as absent.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Validate every collector in order, then the cross-collector invariants.
pub fn validate_all(raws: &[RawCollector]) -> Result<Vec<CollectorConfig>, ValidationError> {
    if raws.is_empty() {
        return Err(ValidationError::NoCollectors);
    }
    let configs = raws.iter().map(validate_collector).collect::<Result<Vec<_>, _>>()?;
    check_invariants(&configs)?;
    hound_log!(Level::Info, "config", "{} collector(s) validated", configs.len());
    Ok(configs)
}

/// Convert one raw entry into a confirmed-valid configuration.
pub fn validate_collector(raw: &RawCollector) -> Result<CollectorConfig, ValidationError> {
    let id = parse_id(raw)?;
    let provider = parse_provider(id, raw)?;
    let destination = parse_destination(id, raw)?;
    let filter = parse_filter(id, raw)?;
    let scan = parse_scan(id, raw)?;

    hound_log!(
        Level::Debug,
        "config",
        "collector {} → {:?}, {}, filter={}",
        id,
        provider,
        destination,
        filter.option_name()
    );
    Ok(CollectorConfig { id, provider, destination, filter, scan })
}

/// Invariants that span collectors: unique ids, at most one kernel
/// collector, and no two file outputs sharing a path.
pub fn check_invariants(configs: &[CollectorConfig]) -> Result<(), ValidationError> {
    let mut ids = HashSet::new();
    for c in configs {
        if !ids.insert(c.id) {
            return Err(ValidationError::DuplicateId { id: c.id });
        }
    }

    let kernels = configs.iter().filter(|c| c.collector_type() == CollectorType::Kernel).count();
    if kernels > 1 {
        return Err(ValidationError::MultipleKernelCollectors { count: kernels });
    }

    let mut paths = HashSet::new();
    for c in configs {
        if let Destination::File(path) = &c.destination {
            if !paths.insert(path_key(path)) {
                return Err(ValidationError::DuplicateOutputPath { path: path.clone() });
            }
        }
    }
    Ok(())
}

/// Comparable form of an output path: resolved parent plus file name.
fn path_key(path: &Path) -> PathBuf {
    let resolved = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            fs::canonicalize(parent).map(|p| p.join(name)).unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    };
    // NTFS paths compare case-insensitively.
    if cfg!(windows) {
        PathBuf::from(resolved.to_string_lossy().to_lowercase())
    } else {
        resolved
    }
}

fn parse_id(raw: &RawCollector) -> Result<Uuid, ValidationError> {
    let value = present(&raw.id).unwrap_or_default();
    Uuid::parse_str(value).map_err(|_| ValidationError::InvalidId { value: value.to_owned() })
}

fn parse_provider(id: Uuid, raw: &RawCollector) -> Result<Provider, ValidationError> {
    let kind_value = present(&raw.collector_type).unwrap_or_default();
    let kind: CollectorType = kind_value
        .parse()
        .map_err(|_| ValidationError::InvalidCollectorType { id, value: kind_value.to_owned() })?;

    match kind {
        CollectorType::Kernel => {
            let value = present(&raw.kernel_keywords).unwrap_or_default();
            match parse_kernel_keywords(value) {
                Some(keywords) if keywords != 0 => Ok(Provider::Kernel { keywords }),
                _ => Err(ValidationError::InvalidKernelKeywords { id, value: value.to_owned() }),
            }
        }
        CollectorType::User => {
            let name = present(&raw.provider_name).ok_or(ValidationError::InvalidProviderName { id })?;
            let level = match present(&raw.user_trace_event_level) {
                None => DEFAULT_TRACE_LEVEL,
                Some(v) => v
                    .parse()
                    .map_err(|_| ValidationError::InvalidTraceLevel { id, value: v.to_owned() })?,
            };
            let keywords = match present(&raw.user_keywords) {
                None => DEFAULT_USER_KEYWORDS,
                Some(v) => parse_mask(v).ok_or_else(|| ValidationError::InvalidUserKeywords { id, value: v.to_owned() })?,
            };
            Ok(Provider::User { name: name.to_owned(), level, keywords })
        }
    }
}

fn parse_destination(id: Uuid, raw: &RawCollector) -> Result<Destination, ValidationError> {
    let kind = present(&raw.output_type).unwrap_or_default();
    match kind.to_lowercase().as_str() {
        "file" => {
            let path = raw.path.as_deref().unwrap_or_default();
            check_output_file(path).map_err(|reason| ValidationError::InvalidOutputPath {
                id,
                path: path.to_owned(),
                reason,
            })?;
            Ok(Destination::File(PathBuf::from(path)))
        }
        "url" => {
            let value = present(&raw.path).unwrap_or_default();
            match Url::parse(value) {
                Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(Destination::Url(url)),
                _ => Err(ValidationError::InvalidUrl { id, value: value.to_owned() }),
            }
        }
        "eventlog" => Ok(Destination::EventLog { log: EVENT_LOG_NAME.to_owned() }),
        _ => Err(ValidationError::InvalidOutputType { id, value: kind.to_owned() }),
    }
}

fn check_output_file(path: &str) -> Result<(), &'static str> {
    if path.trim().is_empty() {
        return Err("is empty");
    }
    let path = Path::new(path);
    if path.is_dir() {
        return Err("is a directory");
    }
    let parent_ok = match path.parent() {
        Some(parent) => parent.as_os_str().is_empty() || parent.is_dir(),
        None => false,
    };
    if !parent_ok {
        return Err("has no existing parent directory");
    }
    if let Ok(meta) = fs::metadata(path) {
        if meta.permissions().readonly() {
            return Err("is read-only");
        }
    }
    Ok(())
}

fn parse_filter(id: Uuid, raw: &RawCollector) -> Result<FilterSpec, ValidationError> {
    let Some(option) = present(&raw.filter_option) else {
        return Ok(FilterSpec::None);
    };
    if option.eq_ignore_ascii_case("none") {
        return Ok(FilterSpec::None);
    }
    let value = || present(&raw.filter_value).ok_or(ValidationError::MissingFilterValue { id });

    match option.to_lowercase().as_str() {
        "eventname" => Ok(FilterSpec::EventName(value()?.to_owned())),
        "processname" => Ok(FilterSpec::ProcessName(value()?.to_owned())),
        "processid" => {
            let v = value()?;
            v.parse()
                .map(FilterSpec::ProcessId)
                .map_err(|_| ValidationError::InvalidProcessId { id, value: v.to_owned() })
        }
        "opcode" => {
            let v = value()?;
            v.parse()
                .map(FilterSpec::Opcode)
                .map_err(|_| ValidationError::InvalidOpcode { id, value: v.to_owned() })
        }
        _ => Err(ValidationError::InvalidFilterOption { id, value: option.to_owned() }),
    }
}

fn parse_scan(id: Uuid, raw: &RawCollector) -> Result<Option<ScanSettings>, ValidationError> {
    let options = present(&raw.yara_options);
    let policy = match options {
        None => ScanPolicy::None,
        Some(v) => v
            .parse::<ScanPolicy>()
            .map_err(|_| ValidationError::InvalidScanPolicy { id, value: v.to_owned() })?,
    };

    let Some(dir) = present(&raw.yara_scan) else {
        if policy == ScanPolicy::MatchesOnly {
            return Err(ValidationError::ScanPolicyWithoutRules { id });
        }
        return Ok(None);
    };

    // A rule directory needs an explicit All or Matches.
    if policy == ScanPolicy::None {
        return Err(ValidationError::InvalidScanPolicy { id, value: options.unwrap_or_default().to_owned() });
    }

    let rules_dir = PathBuf::from(dir);
    let classifier = load_rules_dir(&rules_dir).map_err(|e| match e {
        RuleLoadError::NotADirectory => ValidationError::InvalidScanPath {
            id,
            path: dir.to_owned(),
            reason: "is not a directory",
        },
        RuleLoadError::Unreadable(err) => {
            hound_log!(Level::Error, "config", "collector {}: reading {:?}: {}", id, rules_dir, err);
            ValidationError::InvalidScanPath { id, path: dir.to_owned(), reason: "cannot be read" }
        }
        RuleLoadError::NoRuleFiles => ValidationError::NoRuleFiles { id, path: rules_dir.clone() },
        RuleLoadError::Compile(errors) => ValidationError::RuleCompilation { id, errors },
    })?;

    Ok(Some(ScanSettings { rules_dir, policy, classifier: Arc::new(classifier) }))
}
