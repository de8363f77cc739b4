// SPDX-License-Identifier: Apache-2.0

//! File tailer for growing log files.
//!
//! A [`Tailer`] follows a single file: it polls for appended bytes, decodes
//! them into messages tagged with their file offset and delivers them to a
//! bounded output channel. The [`Launcher`] keeps a path tailed across
//! restarts and rotations.
//!
//! Features:
//! - Inode-based rotation and truncation detection
//! - Offset persistence for resume after restarts
//! - Bounded shutdown even when the output channel is not drained
//! - Newline framing with optional multi-line pattern detection

pub mod config;
pub mod decoder;
pub mod error;
pub mod file_id;
pub mod handle;
pub mod launcher;
pub mod message;
pub mod registry;
pub mod rotation;
pub mod state;
pub mod tags;
pub mod tailer;

pub use config::{RotationTailPolicy, TailerConfig};
pub use decoder::{AutoMultilineConfig, DecodedMessage, Decoder, LineDecoder};
pub use error::{Error, Result};
pub use file_id::FileId;
pub use handle::{FileHandle, LogSource};
pub use launcher::{Launcher, LauncherConfig, StartAt};
pub use message::{Message, Origin};
pub use registry::{JsonFileRegistry, MemoryRegistry, Registry};
pub use state::{TailerEvent, TailerState};
pub use tailer::{DoneSignal, Tailer, TailerOptions, Whence};
