// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::Registry;

/// Registry that keeps offsets in memory only. Useful for tests and for
/// running without resume support.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    offsets: RwLock<HashMap<String, String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(self, identifier: &str, offset: i64) -> Self {
        self.set_offset(identifier, offset.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.offsets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry for MemoryRegistry {
    fn get_offset(&self, identifier: &str) -> Option<String> {
        self.offsets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    fn set_offset(&self, identifier: &str, offset: String) {
        self.offsets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.to_string(), offset);
    }
}
