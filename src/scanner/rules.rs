// src/scanner/rules.rs

//! # Rule loading
//!
//! Collects every `*.yar` / `*.yara` file under a directory and compiles them
//! once into a `yara_x::Rules` set. Rules are never reloaded at runtime.

use crate::hound_log;
use super::{Classifier, ScanError};
use log::Level;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("is not a directory")]
    NotADirectory,

    #[error("cannot be read: {0}")]
    Unreadable(#[from] io::Error),

    #[error("contains no rule files")]
    NoRuleFiles,

    #[error("rule compilation failed")]
    Compile(Vec<String>),
}

fn is_rule_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| ext == "yar" || ext == "yara")
}

/// Recursively list rule files under `dir`, sorted for a stable compile order.
pub fn rule_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let p = entry?.path();
        if p.is_dir() {
            // Recurse into subdirectories
            out.extend(rule_files(&p)?);
        } else if is_rule_file(&p) {
            out.push(p);
        }
    }
    out.sort();
    hound_log!(Level::Debug, "rules", "rule_files: {:?} → {} entries", dir, out.len());
    Ok(out)
}

/// Compile `files` into one rule set, collecting every file's errors.
pub fn compile_rules(files: &[PathBuf]) -> Result<yara_x::Rules, RuleLoadError> {
    let mut compiler = yara_x::Compiler::new();
    let mut errors = Vec::new();
    for file in files {
        let src = fs::read_to_string(file)?;
        if let Err(e) = compiler.add_source(src.as_str()) {
            errors.push(format!("{}: {}", file.display(), e));
        }
    }
    if !errors.is_empty() {
        return Err(RuleLoadError::Compile(errors));
    }
    Ok(compiler.build())
}

/// Compiled rule set behind the `Classifier` seam.
pub struct YaraClassifier {
    rules: yara_x::Rules,
}

impl YaraClassifier {
    pub fn new(rules: yara_x::Rules) -> Self {
        Self { rules }
    }
}

impl Classifier for YaraClassifier {
    fn classify(&self, data: &[u8]) -> Result<Vec<String>, ScanError> {
        let mut scanner = yara_x::Scanner::new(&self.rules);
        let results = scanner.scan(data).map_err(|e| ScanError::Engine(e.to_string()))?;
        Ok(results
            .matching_rules()
            .map(|rule| rule.identifier().to_owned())
            .collect())
    }
}

/// Validate `dir`, then compile all rule files found under it.
pub fn load_rules_dir(dir: &Path) -> Result<YaraClassifier, RuleLoadError> {
    if !dir.is_dir() {
        return Err(RuleLoadError::NotADirectory);
    }
    let files = rule_files(dir)?;
    if files.is_empty() {
        return Err(RuleLoadError::NoRuleFiles);
    }
    let rules = compile_rules(&files)?;
    hound_log!(Level::Info, "rules", "compiled {} rule file(s) from {:?}", files.len(), dir);
    Ok(YaraClassifier::new(rules))
}
