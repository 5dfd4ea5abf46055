// src/config/model.rs

use serde::{Deserialize, Deserializer};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use uuid::Uuid;

use crate::events::filter::FilterSpec;
use crate::output::Destination;
use crate::scanner::ScanSettings;

/// Top-level config as deserialized from TOML.
#[derive(Debug, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default, rename = "collector")]
    pub collectors: Vec<RawCollector>,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_enable")] pub enable: bool,
    #[serde(default)]                    pub file:   Option<String>,
    #[serde(default = "default_level")]  pub level:  String,
}
fn default_enable() -> bool { true }
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: default_enable(), file: None, level: default_level() }
    }
}

/// Mirror of the `[service]` table
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    /// humantime string, e.g. `"5s"`
    #[serde(default = "default_grace")]
    pub shutdown_grace: String,
}
fn default_grace() -> String { "5s".into() }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { shutdown_grace: default_grace() }
    }
}

impl ServiceConfig {
    pub fn shutdown_grace(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.shutdown_grace)
            .map_err(|e| ConfigError::InvalidDuration(self.shutdown_grace.clone(), e))
    }
}

/// Trace source backends the service can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Replay,
}

/// Mirror of the `[source]` table
#[derive(Debug, Default, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub replay_dir: Option<String>,
}

/// One `[[collector]]` entry exactly as written; every field is still a string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCollector {
    #[serde(default, deserialize_with = "scalar")] pub id:                     Option<String>,
    #[serde(default)]                              pub collector_type:         Option<String>,
    #[serde(default, deserialize_with = "scalar")] pub kernel_keywords:        Option<String>,
    #[serde(default)]                              pub provider_name:          Option<String>,
    #[serde(default, deserialize_with = "scalar")] pub user_trace_event_level: Option<String>,
    #[serde(default, deserialize_with = "scalar")] pub user_keywords:          Option<String>,
    #[serde(default)]                              pub output_type:            Option<String>,
    #[serde(default)]                              pub path:                   Option<String>,
    #[serde(default)]                              pub filter_option:          Option<String>,
    #[serde(default, deserialize_with = "scalar")] pub filter_value:           Option<String>,
    #[serde(default)]                              pub yara_scan:              Option<String>,
    #[serde(default)]                              pub yara_options:           Option<String>,
}

/// Accept `1234` as well as `"1234"` for fields that are numbers in disguise.
fn scalar<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Bool(bool),
    }
    Ok(Option::<Scalar>::deserialize(de)?.map(|s| match s {
        Scalar::Str(s) => s,
        Scalar::Int(i) => i.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorType {
    Kernel,
    User,
}

/// Allow `"kernel"` → `CollectorType::Kernel`
impl FromStr for CollectorType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kernel" => Ok(CollectorType::Kernel),
            "user"   => Ok(CollectorType::User),
            _        => Err(()),
        }
    }
}

impl fmt::Display for CollectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CollectorType::Kernel => "Kernel",
            CollectorType::User => "User",
        })
    }
}

/// User provider trace level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Always = 0,
    Critical,
    Error,
    Warning,
    Informational,
    Verbose,
}

impl FromStr for TraceLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_lowercase().as_str() {
            "always" | "0"        => TraceLevel::Always,
            "critical" | "1"      => TraceLevel::Critical,
            "error" | "2"         => TraceLevel::Error,
            "warning" | "3"       => TraceLevel::Warning,
            "informational" | "4" => TraceLevel::Informational,
            "verbose" | "5"       => TraceLevel::Verbose,
            _                     => return Err(()),
        };
        Ok(level)
    }
}

/// Provider selection of a validated collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Kernel { keywords: u64 },
    User { name: String, level: TraceLevel, keywords: u64 },
}

/// Confirmed-valid configuration of one collector pipeline.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub id: Uuid,
    pub provider: Provider,
    pub destination: Destination,
    pub filter: FilterSpec,
    pub scan: Option<ScanSettings>,
}

impl CollectorConfig {
    pub fn collector_type(&self) -> CollectorType {
        match self.provider {
            Provider::Kernel { .. } => CollectorType::Kernel,
            Provider::User { .. } => CollectorType::User,
        }
    }
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("[source] kind = \"replay\" requires replay_dir")]
    MissingReplayDir,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A collector definition that must never reach a pipeline.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("configuration contains no collectors")]
    NoCollectors,

    #[error("invalid collector id '{value}'")]
    InvalidId { value: String },

    #[error("collector id {id} is used more than once")]
    DuplicateId { id: Uuid },

    #[error("collector {id}: invalid CollectorType '{value}'")]
    InvalidCollectorType { id: Uuid, value: String },

    #[error("collector {id}: invalid KernelKeywords '{value}'")]
    InvalidKernelKeywords { id: Uuid, value: String },

    #[error("collector {id}: invalid ProviderName")]
    InvalidProviderName { id: Uuid },

    #[error("collector {id}: invalid UserTraceEventLevel '{value}'")]
    InvalidTraceLevel { id: Uuid, value: String },

    #[error("collector {id}: invalid UserKeywords mask '{value}'")]
    InvalidUserKeywords { id: Uuid, value: String },

    #[error("collector {id}: invalid OutputType '{value}'")]
    InvalidOutputType { id: Uuid, value: String },

    #[error("collector {id}: output path '{path}' {reason}")]
    InvalidOutputPath { id: Uuid, path: String, reason: &'static str },

    #[error("collector {id}: invalid URL '{value}'")]
    InvalidUrl { id: Uuid, value: String },

    #[error("collector {id}: invalid FilterOption '{value}'")]
    InvalidFilterOption { id: Uuid, value: String },

    #[error("collector {id}: FilterOption set without a FilterValue")]
    MissingFilterValue { id: Uuid },

    #[error("collector {id}: invalid ProcessID '{value}'")]
    InvalidProcessId { id: Uuid, value: String },

    #[error("collector {id}: invalid Opcode '{value}' (expected 0-255)")]
    InvalidOpcode { id: Uuid, value: String },

    #[error("collector {id}: YaraScan path '{path}' {reason}")]
    InvalidScanPath { id: Uuid, path: String, reason: &'static str },

    #[error("collector {id}: YaraScan directory '{path}' does not contain any *.yar files")]
    NoRuleFiles { id: Uuid, path: PathBuf },

    #[error("collector {id}: yara rule compilation failed: {}", errors.join("; "))]
    RuleCompilation { id: Uuid, errors: Vec<String> },

    #[error("collector {id}: invalid YaraOptions '{value}'")]
    InvalidScanPolicy { id: Uuid, value: String },

    #[error("collector {id}: YaraOptions = Matches requires a YaraScan directory")]
    ScanPolicyWithoutRules { id: Uuid },

    #[error("only one Kernel collector is supported, found {count}")]
    MultipleKernelCollectors { count: usize },

    #[error("file based output paths must be unique, '{path}' is used twice")]
    DuplicateOutputPath { path: PathBuf },
}

impl ValidationError {
    /// Stable symbolic code for operators and log searches.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::NoCollectors => "no-collectors",
            ValidationError::InvalidId { .. } => "invalid-id",
            ValidationError::DuplicateId { .. } => "duplicate-id",
            ValidationError::InvalidCollectorType { .. } => "invalid-collector-type",
            ValidationError::InvalidKernelKeywords { .. } => "invalid-kernel-keywords",
            ValidationError::InvalidProviderName { .. } => "invalid-provider-name",
            ValidationError::InvalidTraceLevel { .. } => "invalid-trace-level",
            ValidationError::InvalidUserKeywords { .. } => "invalid-user-keywords",
            ValidationError::InvalidOutputType { .. } => "invalid-output-type",
            ValidationError::InvalidOutputPath { .. } => "invalid-output-path",
            ValidationError::InvalidUrl { .. } => "invalid-url",
            ValidationError::InvalidFilterOption { .. } => "invalid-filter-option",
            ValidationError::MissingFilterValue { .. } => "missing-filter-value",
            ValidationError::InvalidProcessId { .. } => "invalid-process-id",
            ValidationError::InvalidOpcode { .. } => "invalid-opcode",
            ValidationError::InvalidScanPath { .. } => "invalid-scan-path",
            ValidationError::NoRuleFiles { .. } => "no-rule-files",
            ValidationError::RuleCompilation { .. } => "rule-compilation",
            ValidationError::InvalidScanPolicy { .. } => "invalid-scan-policy",
            ValidationError::ScanPolicyWithoutRules { .. } => "scan-policy-without-rules",
            ValidationError::MultipleKernelCollectors { .. } => "multiple-kernel-collectors",
            ValidationError::DuplicateOutputPath { .. } => "duplicate-output-path",
        }
    }
}
