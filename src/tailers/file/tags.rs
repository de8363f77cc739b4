// SPDX-License-Identifier: Apache-2.0

//! Static per-message tags derived from the tailed file.

use crate::tailers::file::handle::FileHandle;

pub const FILENAME_TAG_PREFIX: &str = "filename:";
pub const DIRNAME_TAG_PREFIX: &str = "dirname:";

/// Reason recorded for a line split because it exceeded the max message size.
pub const SINGLE_LINE_TRUNCATION: &str = "single_line";

pub fn truncated_reason_tag(reason: &str) -> String {
    format!("truncated:{reason}")
}

/// Tags attached to every message read from `file`. Order is not significant.
pub fn build_tailer_tags(file: &FileHandle) -> Vec<String> {
    let mut tags = Vec::with_capacity(2);

    if let Some(name) = file.file_name() {
        tags.push(format!("{FILENAME_TAG_PREFIX}{name}"));
    }

    if file.tag_directory() {
        if let Some(dir) = file.dir_name() {
            tags.push(format!("{DIRNAME_TAG_PREFIX}{dir}"));
        }
    }

    tags
}

/// Tags for one message: the static tailer tags plus the truncation marker
/// when this particular message was split.
pub fn message_tags(tailer_tags: &[String], truncated: bool, tag_truncated: bool) -> Vec<String> {
    let mut tags = tailer_tags.to_vec();
    if truncated && tag_truncated {
        tags.push(truncated_reason_tag(SINGLE_LINE_TRUNCATION));
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tailers::file::handle::LogSource;
    use std::collections::HashSet;

    fn as_set(tags: Vec<String>) -> HashSet<String> {
        tags.into_iter().collect()
    }

    #[test]
    fn test_file_only() {
        let source = LogSource::new("", "/var/log/app.log");
        let file = FileHandle::new("/var/log/app.log", &source, false);
        assert_eq!(build_tailer_tags(&file), vec!["filename:app.log".to_string()]);
    }

    #[test]
    fn test_file_and_dir() {
        let source = LogSource::new("", "/var/log/app.log");
        let file = FileHandle::new("/var/log/app.log", &source, true);
        assert_eq!(
            as_set(build_tailer_tags(&file)),
            as_set(vec![
                "dirname:/var/log".to_string(),
                "filename:app.log".to_string()
            ])
        );
    }

    #[test]
    fn test_truncated_tag_only_on_truncated_message() {
        let tailer_tags = vec!["filename:app.log".to_string()];

        let tags = message_tags(&tailer_tags, true, true);
        assert!(tags.contains(&"truncated:single_line".to_string()));

        assert_eq!(message_tags(&tailer_tags, false, true), tailer_tags);
        assert_eq!(message_tags(&tailer_tags, true, false), tailer_tags);
    }
}
