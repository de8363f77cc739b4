// SPDX-License-Identifier: Apache-2.0

//! Rotation and truncation detection.

use std::fs::File;
use std::io;

use tracing::debug;

use crate::tailers::file::error::Result;
use crate::tailers::file::file_id::FileId;

/// Reports whether the file at `path` is no longer the one held open.
///
/// Rotation is signalled when the path no longer resolves, when it resolves
/// to a different file identity, or when the file at the path is shorter
/// than `last_read_offset` (truncated in place). A tailer that has no path
/// or never opened its file has nothing to compare and reports `false`.
pub fn did_rotate(path: &str, open_file: Option<&File>, last_read_offset: i64) -> Result<bool> {
    let open_file = match open_file {
        Some(f) if !path.is_empty() => f,
        _ => return Ok(false),
    };

    let current = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path, "Tailed path no longer exists");
            return Ok(true);
        }
        Err(e) => return Err(e.into()),
    };

    let open_id = FileId::from_file(open_file)?;
    let current_id = FileId::from_file(&current)?;
    let recreated = current_id != open_id;
    let size = current.metadata()?.len();
    let truncated = (size as i64) < last_read_offset;

    if recreated || truncated {
        debug!(
            path,
            %open_id,
            %current_id,
            truncated,
            size,
            last_read_offset,
            "File rotation detected"
        );
    }

    Ok(recreated || truncated)
}
