// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::tailers::file::config::{
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_READ_BUFFER_SIZE, RotationTailPolicy, TailerConfig,
};
use crate::tailers::file::decoder::AutoMultilineConfig;
use crate::tailers::file::launcher::{LauncherConfig, StartAt};

/// Where to start reading a file with no committed offset
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartAtArg {
    /// Start at the beginning of the file
    Beginning,
    /// Start at the end of the file (tail mode)
    #[default]
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

/// What to do with an unterminated last line of a rotated file
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotationTailPolicyArg {
    /// Emit it as a final message
    #[default]
    Flush,
    /// Drop it
    Discard,
}

impl From<RotationTailPolicyArg> for RotationTailPolicy {
    fn from(p: RotationTailPolicyArg) -> Self {
        match p {
            RotationTailPolicyArg::Flush => RotationTailPolicy::Flush,
            RotationTailPolicyArg::Discard => RotationTailPolicy::Discard,
        }
    }
}

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct TailArgs {
    /// File to tail
    #[arg(long, env = "LOGTAILER_PATH")]
    pub path: String,

    /// Name of the log source reported with each message
    #[arg(long, env = "LOGTAILER_SOURCE_NAME", default_value = "logtailer")]
    pub source_name: String,

    /// Path to store file offsets for resume across restarts
    #[arg(
        long,
        env = "LOGTAILER_OFFSETS_PATH",
        default_value = "/var/lib/logtailer/offsets.json"
    )]
    pub offsets_path: PathBuf,

    /// Where to start reading: beginning or end of file
    #[arg(value_enum, long, env = "LOGTAILER_START_AT", default_value = "end")]
    pub start_at: StartAtArg,

    /// Time in milliseconds to wait before polling a file that had no new data
    #[arg(long, env = "LOGTAILER_SLEEP_MS", default_value = "10")]
    pub sleep_ms: u64,

    /// Seconds a stopping tailer waits for its output to drain, and a rotated
    /// file keeps being read
    #[arg(long, env = "LOGTAILER_CLOSE_TIMEOUT_SECS")]
    pub close_timeout_secs: Option<u64>,

    /// Maximum message size in bytes (longer lines are split)
    #[arg(long, env = "LOGTAILER_MAX_MESSAGE_SIZE", default_value = "262144")]
    pub max_message_size: usize,

    /// Tag messages split because of the maximum message size
    #[arg(long, env = "LOGTAILER_TAG_TRUNCATED_LOGS", default_value = "false")]
    pub tag_truncated_logs: bool,

    /// Add a dirname tag to every message
    #[arg(long, env = "LOGTAILER_TAG_DIRECTORY", default_value = "false")]
    pub tag_directory: bool,

    /// Bytes requested from the file per read
    #[arg(long, env = "LOGTAILER_READ_BUFFER_SIZE", default_value = "4096")]
    pub read_buffer_size: usize,

    /// Interval in milliseconds between rotation checks
    #[arg(
        long,
        env = "LOGTAILER_ROTATION_CHECK_INTERVAL_MS",
        default_value = "1000"
    )]
    pub rotation_check_interval_ms: u64,

    /// Interval in milliseconds between offset commits
    #[arg(
        long,
        env = "LOGTAILER_REGISTRY_FLUSH_INTERVAL_MS",
        default_value = "1000"
    )]
    pub registry_flush_interval_ms: u64,

    /// Capacity of the output queue
    #[arg(long, env = "LOGTAILER_OUTPUT_QUEUE_SIZE", default_value = "100")]
    pub output_queue_size: usize,

    /// Unterminated last line of a rotated file: flush or discard
    #[arg(
        value_enum,
        long,
        env = "LOGTAILER_ROTATION_TAIL_POLICY",
        default_value = "flush"
    )]
    pub rotation_tail_policy: RotationTailPolicyArg,

    /// Milliseconds a rotated file's output may keep draining after the close
    /// timeout before undelivered messages are dropped
    #[arg(
        long,
        env = "LOGTAILER_ROTATION_DRAIN_GRACE_MS",
        default_value = "100"
    )]
    pub rotation_drain_grace_ms: u64,

    /// Detect a multi-line start pattern and aggregate continuation lines
    #[arg(long, env = "LOGTAILER_AUTO_MULTILINE", default_value = "false")]
    pub auto_multiline: bool,

    /// Lines sampled before deciding on a multi-line pattern
    #[arg(
        long,
        env = "LOGTAILER_AUTO_MULTILINE_SAMPLE_SIZE",
        default_value = "500"
    )]
    pub auto_multiline_sample_size: usize,

    /// Share of sampled lines a pattern must match
    #[arg(
        long,
        env = "LOGTAILER_AUTO_MULTILINE_MATCH_THRESHOLD",
        default_value = "0.48"
    )]
    pub auto_multiline_match_threshold: f64,

    /// Time in milliseconds an aggregated message waits for more lines
    #[arg(
        long,
        env = "LOGTAILER_AUTO_MULTILINE_FLUSH_TIMEOUT_MS",
        default_value = "1000"
    )]
    pub auto_multiline_flush_timeout_ms: u64,
}

impl Default for TailArgs {
    fn default() -> Self {
        Self {
            path: String::new(),
            source_name: "logtailer".to_string(),
            offsets_path: PathBuf::from("/var/lib/logtailer/offsets.json"),
            start_at: StartAtArg::End,
            sleep_ms: 10,
            close_timeout_secs: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tag_truncated_logs: false,
            tag_directory: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            rotation_check_interval_ms: 1000,
            registry_flush_interval_ms: 1000,
            output_queue_size: 100,
            rotation_tail_policy: RotationTailPolicyArg::Flush,
            rotation_drain_grace_ms: 100,
            auto_multiline: false,
            auto_multiline_sample_size: 500,
            auto_multiline_match_threshold: 0.48,
            auto_multiline_flush_timeout_ms: 1000,
        }
    }
}

impl From<&TailArgs> for TailerConfig {
    fn from(args: &TailArgs) -> Self {
        TailerConfig {
            sleep_duration: Duration::from_millis(args.sleep_ms),
            max_message_size: args.max_message_size,
            tag_truncated_logs: args.tag_truncated_logs,
            read_buffer_size: args.read_buffer_size,
            rotation_tail_policy: args.rotation_tail_policy.into(),
            rotation_drain_grace: Duration::from_millis(args.rotation_drain_grace_ms),
            ..Default::default()
        }
        .with_close_timeout_override(args.close_timeout_secs)
    }
}

impl From<&TailArgs> for LauncherConfig {
    fn from(args: &TailArgs) -> Self {
        let auto_multiline = args.auto_multiline.then(|| AutoMultilineConfig {
            sample_size: args.auto_multiline_sample_size,
            match_threshold: args.auto_multiline_match_threshold,
            flush_timeout: Duration::from_millis(args.auto_multiline_flush_timeout_ms),
        });

        LauncherConfig {
            start_at: args.start_at.into(),
            rotation_check_interval: Duration::from_millis(args.rotation_check_interval_ms),
            registry_flush_interval: Duration::from_millis(args.registry_flush_interval_ms),
            tag_directory: args.tag_directory,
            tailer: args.into(),
            auto_multiline,
        }
    }
}
