use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::format::percent_of;

/// Bucket for files without an extension.
pub const NO_EXTENSION: &str = "<no-ext>";

/// Extensions of files that run directly when opened.
pub const CRITICAL_EXTENSIONS: &[&str] = &[".exe", ".dll", ".scr", ".com", ".vbs"];

/// Extensions of scripts that run through an interpreter.
pub const WARNING_EXTENSIONS: &[&str] = &[".bat", ".cmd", ".ps1", ".js"];

/// Bucket key for a file name: the lowercase extension with its leading dot,
/// or [`NO_EXTENSION`]. Dotfiles such as `.bashrc` have no extension.
pub fn extension_key(name: &str) -> String {
    match Path::new(name).extension().map(|ext| ext.to_string_lossy()) {
        Some(ext) if !ext.is_empty() => format!(".{}", ext.to_lowercase()),
        _ => NO_EXTENSION.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionStat {
    pub count: u64,
    pub total_size: u64,
}

/// Per-subtree mapping from extension key to file count and bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionIndex {
    buckets: HashMap<String, ExtensionStat>,
}

/// One ranked row of an [`ExtensionIndex`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionShare {
    pub extension: String,
    pub count: u64,
    pub total_size: u64,
    /// Percent of all bytes in the index.
    pub percent_by_size: f64,
    /// Percent of all files in the index.
    pub percent_by_count: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Critical,
    Warning,
}

/// Files of one flagged extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskFinding {
    pub level: RiskLevel,
    pub extension: String,
    pub count: u64,
}

impl fmt::Display for RiskFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            RiskLevel::Critical => write!(f, "CRITICAL: {} {} executable files", self.count, self.extension),
            RiskLevel::Warning => write!(f, "WARNING: {} {} script files", self.count, self.extension),
        }
    }
}

/// Executables and scripts found in a subtree, flagged by extension only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RiskSummary {
    pub critical_files: u64,
    pub warning_files: u64,
    pub total_files: u64,
    /// Critical findings first, each level ordered by extension.
    pub findings: Vec<RiskFinding>,
}

impl RiskSummary {
    /// Scripts alone do not make a subtree unclean.
    pub fn is_clean(&self) -> bool {
        self.critical_files == 0
    }

    pub fn recommendations(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.critical_files > 0 {
            out.push("Review all executable files for legitimacy");
            out.push("Consider running antivirus scan");
        }
        if self.warning_files > 0 {
            out.push("Script files should come from trusted sources only");
        }
        out
    }
}

impl ExtensionIndex {
    pub fn record(&mut self, name: &str, size: u64) {
        let stat = self.buckets.entry(extension_key(name)).or_default();
        stat.count += 1;
        stat.total_size = stat.total_size.saturating_add(size);
    }

    pub fn merge(&mut self, other: &ExtensionIndex) {
        for (key, stat) in &other.buckets {
            let entry = self.buckets.entry(key.clone()).or_default();
            entry.count += stat.count;
            entry.total_size = entry.total_size.saturating_add(stat.total_size);
        }
    }

    pub fn get(&self, key: &str) -> Option<&ExtensionStat> {
        self.buckets.get(key)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExtensionStat)> {
        self.buckets.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn total_count(&self) -> u64 {
        self.buckets.values().map(|s| s.count).sum()
    }

    pub fn total_size(&self) -> u64 {
        self.buckets.values().fold(0u64, |acc, s| acc.saturating_add(s.total_size))
    }

    /// Buckets ordered by bytes descending (key ascending on ties), truncated
    /// to `top_n`.
    pub fn ranked(&self, top_n: usize) -> Vec<ExtensionShare> {
        let total_size = self.total_size();
        let total_count = self.total_count();

        let mut rows: Vec<ExtensionShare> = self
            .buckets
            .iter()
            .map(|(key, stat)| ExtensionShare {
                extension: key.clone(),
                count: stat.count,
                total_size: stat.total_size,
                percent_by_size: percent_of(stat.total_size, total_size),
                percent_by_count: percent_of(stat.count, total_count),
            })
            .collect();

        rows.sort_by(|a, b| {
            b.total_size
                .cmp(&a.total_size)
                .then_with(|| a.extension.cmp(&b.extension))
        });
        rows.truncate(top_n);
        rows
    }

    pub fn risk_summary(&self) -> RiskSummary {
        let mut summary = RiskSummary {
            total_files: self.total_count(),
            ..RiskSummary::default()
        };

        for (key, stat) in &self.buckets {
            let level = if CRITICAL_EXTENSIONS.contains(&key.as_str()) {
                summary.critical_files += stat.count;
                RiskLevel::Critical
            } else if WARNING_EXTENSIONS.contains(&key.as_str()) {
                summary.warning_files += stat.count;
                RiskLevel::Warning
            } else {
                continue;
            };
            summary.findings.push(RiskFinding {
                level,
                extension: key.clone(),
                count: stat.count,
            });
        }

        summary
            .findings
            .sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.extension.cmp(&b.extension)));
        summary
    }
}
