//! Item filters applied by restore.
//!
//! A snapshot passes when, for every filter, at least one value of the
//! named item matches the filter's regex. The pseudo item `type` matches
//! against the origin type (without the snapshot marker).

use regex::Regex;

use crate::errors::{ArchiveError, Result};
use crate::models::{FilterOption, Snapshot};

#[derive(Debug, Clone)]
pub struct SnapshotFilter {
    item_name: String,
    regex: Regex,
}

impl SnapshotFilter {
    pub fn new(option: &FilterOption) -> Result<Self> {
        let regex = Regex::new(&option.regex).map_err(|e| {
            ArchiveError::configuration(format!(
                "invalid regex for filter '{}': {}",
                option.item_name, e
            ))
        })?;
        Ok(Self {
            item_name: option.item_name.clone(),
            regex,
        })
    }

    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        snapshot
            .item_texts(&self.item_name)
            .iter()
            .any(|value| self.regex.is_match(value))
    }
}

/// Compile a filter list. An empty list accepts every snapshot.
pub fn compile(options: &[FilterOption]) -> Result<Vec<SnapshotFilter>> {
    options.iter().map(SnapshotFilter::new).collect()
}

pub fn accepts(filters: &[SnapshotFilter], snapshot: &Snapshot) -> bool {
    filters.iter().all(|f| f.matches(snapshot))
}

/// Parse a command-line filter of the form `item=regex`.
pub fn parse_option(arg: &str) -> Result<FilterOption> {
    match arg.split_once('=') {
        Some((item, regex)) if !item.trim().is_empty() => Ok(FilterOption {
            item_name: item.trim().to_string(),
            regex: regex.to_string(),
        }),
        _ => Err(ArchiveError::configuration(format!(
            "filter '{}' must have the form item=regex",
            arg
        ))),
    }
}
