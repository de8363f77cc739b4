// SPDX-License-Identifier: Apache-2.0

//! The file a tailer follows and the log source that configured it.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// A configured log source. Several tailers may belong to one source; each
/// registers its path as an active input while it runs.
#[derive(Debug)]
pub struct LogSource {
    name: String,
    path: String,
    inputs: Mutex<BTreeSet<String>>,
}

impl LogSource {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            path: path.into(),
            inputs: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured path or pattern.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn add_input(&self, input: &str) {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(input.to_string());
    }

    pub fn remove_input(&self, input: &str) {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(input);
    }

    /// Paths currently being tailed for this source.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// Immutable description of the file being tailed.
///
/// The handle does not keep its source alive; the driver owns sources.
#[derive(Debug, Clone)]
pub struct FileHandle {
    path: String,
    source: Weak<LogSource>,
    tag_directory: bool,
}

impl FileHandle {
    pub fn new(path: impl Into<String>, source: &Arc<LogSource>, tag_directory: bool) -> Self {
        Self {
            path: path.into(),
            source: Arc::downgrade(source),
            tag_directory,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> Option<Arc<LogSource>> {
        self.source.upgrade()
    }

    /// Whether messages from this file carry a `dirname:` tag.
    pub fn tag_directory(&self) -> bool {
        self.tag_directory
    }

    pub fn file_name(&self) -> Option<&str> {
        Path::new(&self.path).file_name().and_then(|n| n.to_str())
    }

    pub fn dir_name(&self) -> Option<&str> {
        Path::new(&self.path).parent().and_then(|p| p.to_str())
    }
}
