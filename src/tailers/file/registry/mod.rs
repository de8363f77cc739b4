// SPDX-License-Identifier: Apache-2.0

//! Offset persistence for resume-after-restart.
//!
//! Tailers read their starting point from a [`Registry`] and report their
//! decoded offset back to it; the caller decides when that happens and when
//! the registry is flushed to durable storage.

mod json_file;
mod memory;

pub use json_file::JsonFileRegistry;
pub use memory::MemoryRegistry;

use crate::tailers::file::error::Result;

pub trait Registry: Send + Sync {
    /// Last committed offset for `identifier`, if any.
    fn get_offset(&self, identifier: &str) -> Option<String>;

    fn set_offset(&self, identifier: &str, offset: String);

    /// Persist committed offsets. In-memory registries have nothing to do.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
