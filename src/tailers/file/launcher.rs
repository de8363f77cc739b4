// SPDX-License-Identifier: Apache-2.0

//! Drives tailers for one path across restarts and rotations.
//!
//! The launcher restores the start position from the registry, polls for
//! rotation, hands over to a fresh tailer when the file is replaced and
//! commits the current tailer's decoded offset on a fixed cadence.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::tailers::file::config::TailerConfig;
use crate::tailers::file::decoder::{AutoMultilineConfig, Decoder, LineDecoder};
use crate::tailers::file::error::Result;
use crate::tailers::file::handle::{FileHandle, LogSource};
use crate::tailers::file::message::Message;
use crate::tailers::file::registry::Registry;
use crate::tailers::file::tailer::{Tailer, TailerOptions, Whence};

/// Where to begin reading a file that has no committed offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartAt {
    Beginning,
    #[default]
    End,
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub start_at: StartAt,
    pub rotation_check_interval: Duration,
    pub registry_flush_interval: Duration,
    pub tag_directory: bool,
    pub tailer: TailerConfig,
    pub auto_multiline: Option<AutoMultilineConfig>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            start_at: StartAt::default(),
            rotation_check_interval: Duration::from_secs(1),
            registry_flush_interval: Duration::from_secs(1),
            tag_directory: false,
            tailer: TailerConfig::default(),
            auto_multiline: None,
        }
    }
}

impl LauncherConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.rotation_check_interval.is_zero() {
            return Err("rotation_check_interval must be positive".to_string());
        }

        if self.registry_flush_interval.is_zero() {
            return Err("registry_flush_interval must be positive".to_string());
        }

        self.tailer.validate()
    }
}

/// Position for the next tailer started by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    /// First start: committed offset, else the configured start point.
    Initial,
    /// Restart after a failed tailer or a rotation.
    At(i64),
}

#[derive(Default)]
struct Tailers {
    current: Option<Tailer>,
    /// Rotated tailers still reading their old file.
    draining: Vec<Tailer>,
}

pub struct Launcher {
    path: String,
    source: Arc<LogSource>,
    output: BoundedSender<Message>,
    registry: Arc<dyn Registry>,
    config: LauncherConfig,
}

impl Launcher {
    pub fn new(
        path: impl Into<String>,
        source: Arc<LogSource>,
        output: BoundedSender<Message>,
        registry: Arc<dyn Registry>,
        config: LauncherConfig,
    ) -> Self {
        Self {
            path: path.into(),
            source,
            output,
            registry,
            config,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> std::result::Result<(), BoxError> {
        self.config.validate()?;

        let mut tailers = Tailers::default();
        let mut resume = Resume::Initial;

        let mut rotation_check = tokio::time::interval(self.config.rotation_check_interval);
        rotation_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut registry_flush = tokio::time::interval(self.config.registry_flush_interval);
        registry_flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(path = self.path, "Launcher cancelled, stopping tailers");
                    break;
                }

                _ = rotation_check.tick() => {
                    if self.output.is_disconnected() {
                        warn!(path = self.path, "Output channel closed, stopping launcher");
                        break;
                    }
                    resume = self.check(&mut tailers, resume);
                }

                _ = registry_flush.tick() => {
                    self.commit(&tailers);
                }
            }
        }

        join_all(tailers.draining.iter().map(|t| t.stop())).await;
        tailers.draining.clear();
        if let Some(tailer) = tailers.current.take() {
            tailer.stop().await;
            tailer.commit_offset();
        }

        self.registry.flush()?;
        Ok(())
    }

    fn check(&self, tailers: &mut Tailers, resume: Resume) -> Resume {
        tailers.draining.retain(|t| !t.is_finished());

        let Some(current) = tailers.current.take() else {
            return self.start_tailer(tailers, resume);
        };

        if current.is_finished() {
            let offset = current.decoded_offset();
            warn!(
                path = self.path,
                offset, "Tailer stopped on its own, restarting from its last offset"
            );
            current.commit_offset();
            return self.start_tailer(tailers, Resume::At(offset));
        }

        match current.did_rotate() {
            Ok(false) => {
                tailers.current = Some(current);
                resume
            }
            Ok(true) => {
                info!(path = self.path, "Log rotation detected");
                current.stop_after_file_rotation();

                let next = match self.decoder() {
                    Ok(decoder) => current.new_rotated_tailer(self.file_handle(), decoder),
                    Err(e) => {
                        warn!(path = self.path, error = %e, "Failed to build decoder");
                        tailers.draining.push(current);
                        return Resume::At(0);
                    }
                };
                tailers.draining.push(current);

                match next.start_from_beginning() {
                    Ok(()) => {
                        tailers.current = Some(next);
                        Resume::At(0)
                    }
                    Err(e) => {
                        debug!(path = self.path, error = %e, "Rotated file not readable yet");
                        Resume::At(0)
                    }
                }
            }
            Err(e) => {
                warn!(path = self.path, error = %e, "Failed to check for rotation");
                tailers.current = Some(current);
                resume
            }
        }
    }

    /// Starts a tailer at `resume`, leaving `tailers.current` empty on failure
    /// so the next check retries.
    fn start_tailer(&self, tailers: &mut Tailers, resume: Resume) -> Resume {
        let tailer = match self.new_tailer() {
            Ok(tailer) => tailer,
            Err(e) => {
                warn!(path = self.path, error = %e, "Failed to build tailer");
                return resume;
            }
        };

        let (offset, whence) = match resume {
            Resume::At(offset) => (offset, Whence::Start),
            Resume::Initial => match tailer.committed_offset() {
                Some(offset) => (offset, Whence::Start),
                None => match self.config.start_at {
                    StartAt::Beginning => (0, Whence::Start),
                    StartAt::End => (0, Whence::End),
                },
            },
        };

        match tailer.start(offset, whence) {
            Ok(()) => {
                tailers.current = Some(tailer);
                Resume::At(0)
            }
            Err(e) => {
                debug!(path = self.path, error = %e, "Unable to start tailer, will retry");
                resume
            }
        }
    }

    fn commit(&self, tailers: &Tailers) {
        if let Some(tailer) = &tailers.current {
            tailer.commit_offset();
        }
        if let Err(e) = self.registry.flush() {
            warn!(error = %e, "Failed to flush registry");
        }
    }

    fn file_handle(&self) -> FileHandle {
        FileHandle::new(self.path.clone(), &self.source, self.config.tag_directory)
    }

    fn decoder(&self) -> Result<Box<dyn Decoder>> {
        let decoder = LineDecoder::new(self.config.tailer.max_message_size);
        match &self.config.auto_multiline {
            Some(config) => Ok(Box::new(decoder.with_auto_multiline(config.clone())?)),
            None => Ok(Box::new(decoder)),
        }
    }

    fn new_tailer(&self) -> Result<Tailer> {
        Ok(Tailer::new(TailerOptions {
            output: self.output.clone(),
            file: self.file_handle(),
            decoder: self.decoder()?,
            registry: self.registry.clone(),
            config: self.config.tailer.clone(),
        }))
    }
}
