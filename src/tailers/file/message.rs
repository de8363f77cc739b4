// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::tailers::file::handle::LogSource;

/// Where a message came from, as far as offset persistence is concerned.
#[derive(Debug, Clone, Default)]
pub struct Origin {
    /// Registry key of the tailer that produced the message. Empty for
    /// messages drained from a rotated file.
    pub identifier: String,
    /// Bytes of the file consumed through the end of this message.
    pub offset: i64,
    pub source: Option<Arc<LogSource>>,
}

/// A decoded log line handed to the output destination.
#[derive(Debug, Clone)]
pub struct Message {
    content: Vec<u8>,
    origin: Origin,
    tags: Vec<String>,
    truncated: bool,
}

impl Message {
    pub fn new(content: Vec<u8>, origin: Origin, tags: Vec<String>, truncated: bool) -> Self {
        Self {
            content,
            origin,
            tags,
            truncated,
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_lossy(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn offset(&self) -> i64 {
        self.origin.offset
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}
