// SPDX-License-Identifier: Apache-2.0

//! Tails a single file.
//!
//! Each started tailer runs three tasks: the read task polls the file and
//! pushes raw chunks to the decoder task, and the forward task drains decoded
//! messages into the output channel. Stopping is bounded by the configured
//! close timeout even when nobody reads the output channel.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use crate::tailers::file::config::{RotationTailPolicy, TailerConfig};
use crate::tailers::file::decoder::{DecodedMessage, Decoder, DecoderHandle};
use crate::tailers::file::error::{Error, Result};
use crate::tailers::file::handle::{FileHandle, LogSource};
use crate::tailers::file::message::{Message, Origin};
use crate::tailers::file::registry::Registry;
use crate::tailers::file::rotation;
use crate::tailers::file::state::{TailerEvent, TailerState};
use crate::tailers::file::tags;

/// Time allowed for tasks to exit once the tailer reported done.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Reference point for the offset passed to [`Tailer::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

pub struct TailerOptions {
    pub output: BoundedSender<Message>,
    pub file: FileHandle,
    pub decoder: Box<dyn Decoder>,
    pub registry: Arc<dyn Registry>,
    pub config: TailerConfig,
}

/// Completion signal of a tailer. Fires once, when the forward task exits.
#[derive(Debug, Clone, Default)]
pub struct DoneSignal {
    token: CancellationToken,
}

impl DoneSignal {
    fn fire(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

/// State touched by the tasks and read by callers.
#[derive(Default)]
struct Shared {
    decoded_offset: AtomicI64,
    last_read_offset: AtomicI64,
    bytes_read: AtomicU64,
    did_file_rotate: AtomicBool,
    state: Mutex<TailerState>,
}

impl Shared {
    fn state(&self) -> TailerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: TailerEvent) -> Result<TailerState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = state.transition(event)?;
        *state = next;
        Ok(next)
    }
}

pub struct Tailer {
    file: FileHandle,
    output: BoundedSender<Message>,
    registry: Arc<dyn Registry>,
    config: TailerConfig,
    tags: Vec<String>,
    decoder: Mutex<Option<Box<dyn Decoder>>>,
    decoder_handle: OnceLock<DecoderHandle>,
    /// Handle kept open for identity checks while the read task owns its own.
    os_file: Mutex<Option<File>>,
    shared: Arc<Shared>,
    read_cancel: CancellationToken,
    forward_cancel: CancellationToken,
    done: DoneSignal,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Tailer {
    pub fn new(options: TailerOptions) -> Self {
        let tags = tags::build_tailer_tags(&options.file);

        Self {
            file: options.file,
            output: options.output,
            registry: options.registry,
            config: options.config,
            tags,
            decoder: Mutex::new(Some(options.decoder)),
            decoder_handle: OnceLock::new(),
            os_file: Mutex::new(None),
            shared: Arc::new(Shared::default()),
            read_cancel: CancellationToken::new(),
            forward_cancel: CancellationToken::new(),
            done: DoneSignal::default(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Successor for the same path after rotation, sharing output, registry
    /// and configuration.
    pub fn new_rotated_tailer(&self, file: FileHandle, decoder: Box<dyn Decoder>) -> Tailer {
        Tailer::new(TailerOptions {
            output: self.output.clone(),
            file,
            decoder,
            registry: self.registry.clone(),
            config: self.config.clone(),
        })
    }

    pub fn start_from_beginning(&self) -> Result<()> {
        self.start(0, Whence::Start)
    }

    /// Opens the file, seeks to `offset` relative to `whence` and spawns the
    /// tailer tasks. Must be called from within a tokio runtime. A tailer can
    /// be started once.
    pub fn start(&self, offset: i64, whence: Whence) -> Result<()> {
        let state = self.shared.state();
        if state != TailerState::NotStarted {
            return Err(Error::InvalidState {
                operation: "start",
                state,
            });
        }
        self.config.validate().map_err(Error::Config)?;

        let path = self.file.path();
        let mut file = File::open(path)?;
        let seek = match whence {
            Whence::Start => {
                let offset = u64::try_from(offset)
                    .map_err(|_| Error::Config(format!("invalid start offset {}", offset)))?;
                SeekFrom::Start(offset)
            }
            Whence::Current => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        let position = file.seek(seek)? as i64;
        let identity = file.try_clone()?;

        let decoder = self
            .decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::InvalidState {
                operation: "start",
                state,
            })?;

        self.shared.apply(TailerEvent::Start)?;
        self.shared.decoded_offset.store(position, Ordering::SeqCst);
        self.shared.last_read_offset.store(position, Ordering::SeqCst);
        *self.os_file.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity);

        let span = info_span!("tailer", path = %path);
        let decoder_tasks = DecoderHandle::spawn(
            decoder,
            self.config.decoded_queue_size,
            self.config.decoded_queue_size,
        );
        let _ = self.decoder_handle.set(decoder_tasks.handle);

        let reader = Reader {
            file: tokio::fs::File::from_std(file),
            input: decoder_tasks.input,
            shared: self.shared.clone(),
            read_buffer_size: self.config.read_buffer_size,
            sleep_duration: self.config.sleep_duration,
            cancel: self.read_cancel.clone(),
        };

        let forwarder = Forwarder {
            decoded: decoder_tasks.output,
            output: self.output.clone(),
            shared: self.shared.clone(),
            identifier: self.identifier(),
            source: self.file.source(),
            tags: self.tags.clone(),
            tag_truncated: self.config.tag_truncated_logs,
            cancel: self.forward_cancel.clone(),
        };

        let source = self.file.source();
        if let Some(source) = &source {
            source.add_input(path);
        }

        let completion = Completion {
            shared: self.shared.clone(),
            source,
            path: path.to_string(),
            read_cancel: self.read_cancel.clone(),
            done: self.done.clone(),
        };

        let read_task = tokio::spawn(reader.run().instrument(span.clone()));
        let forward_task = tokio::spawn(
            async move {
                forwarder.run().await;
                completion.finish();
            }
            .instrument(span),
        );

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(read_task);
        tasks.push(decoder_tasks.task);
        tasks.push(forward_task);

        info!(path, offset = position, "Started tailing file");
        Ok(())
    }

    /// Stops reading and waits for decoded messages to be delivered. Gives up
    /// on delivery after the close timeout.
    pub async fn stop(&self) {
        if self.shared.state() == TailerState::NotStarted {
            let _ = self.shared.apply(TailerEvent::StopRequested);
            self.done.fire();
            return;
        }

        debug!(path = self.file.path(), "Stopping tailer");
        self.read_cancel.cancel();

        if tokio::time::timeout(self.config.close_timeout, self.done.wait())
            .await
            .is_err()
        {
            warn!(
                path = self.file.path(),
                close_timeout = ?self.config.close_timeout,
                "Output did not drain before the close timeout, dropping undelivered messages"
            );
            self.forward_cancel.cancel();
            self.done.wait().await;
        }

        self.join_tasks().await;
        let _ = self.shared.apply(TailerEvent::StopRequested);
    }

    /// The file was replaced at its path. Keeps reading the old file for the
    /// close timeout, then winds down. Must be called from within a tokio
    /// runtime.
    pub fn stop_after_file_rotation(&self) {
        if self.shared.did_file_rotate.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.shared.apply(TailerEvent::RotationDetected) {
            Ok(state) if state.is_terminal() => {
                self.done.fire();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = self.file.path(), error = %e, "Ignoring rotation");
                return;
            }
        }

        if self.config.rotation_tail_policy == RotationTailPolicy::Discard {
            if let Some(handle) = self.decoder_handle.get() {
                handle.discard_tail();
            }
        }

        debug!(
            path = self.file.path(),
            close_timeout = ?self.config.close_timeout,
            "File rotated, draining the old file"
        );

        let shared = self.shared.clone();
        let done = self.done.clone();
        let read_cancel = self.read_cancel.clone();
        let forward_cancel = self.forward_cancel.clone();
        let close_timeout = self.config.close_timeout;
        let drain_grace = self.config.rotation_drain_grace;
        let bytes_at_rotation = shared.bytes_read.load(Ordering::SeqCst);
        let path = self.file.path().to_string();

        let timer = tokio::spawn(
            async move {
                select! {
                    _ = done.wait() => return,
                    _ = tokio::time::sleep(close_timeout) => {}
                }

                let read_since = shared
                    .bytes_read
                    .load(Ordering::SeqCst)
                    .saturating_sub(bytes_at_rotation);
                if read_since > 0 {
                    info!(
                        path,
                        bytes = read_since,
                        "Close timeout reached while the rotated file was still being read"
                    );
                }

                read_cancel.cancel();
                if tokio::time::timeout(drain_grace, done.wait())
                    .await
                    .is_err()
                {
                    warn!(path, "Output stalled after rotation, dropping undelivered messages");
                    forward_cancel.cancel();
                }
            }
            .instrument(info_span!("tailer", path = %self.file.path())),
        );

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(timer);
    }

    /// Whether the file at this tailer's path is no longer the one being read.
    pub fn did_rotate(&self) -> Result<bool> {
        let os_file = self.os_file.lock().unwrap_or_else(PoisonError::into_inner);
        rotation::did_rotate(
            self.file.path(),
            os_file.as_ref(),
            self.shared.last_read_offset.load(Ordering::SeqCst),
        )
    }

    /// Registry key for this file.
    pub fn identifier(&self) -> String {
        format!("file:{}", self.file.path())
    }

    /// Offset committed for this file by an earlier run, if it is usable.
    pub fn committed_offset(&self) -> Option<i64> {
        let identifier = self.identifier();
        let raw = self.registry.get_offset(&identifier)?;
        match raw.parse::<i64>() {
            Ok(offset) if offset >= 0 => Some(offset),
            _ => {
                warn!(identifier, offset = raw, "Ignoring invalid committed offset");
                None
            }
        }
    }

    /// Records the decoded offset in the registry. A tailer that was never
    /// started or whose file rotated leaves the registry alone.
    pub fn commit_offset(&self) -> bool {
        if self.shared.did_file_rotate.load(Ordering::SeqCst)
            || self.shared.state() == TailerState::NotStarted
        {
            return false;
        }
        self.registry
            .set_offset(&self.identifier(), self.decoded_offset().to_string());
        true
    }

    pub fn decoded_offset(&self) -> i64 {
        self.shared.decoded_offset.load(Ordering::SeqCst)
    }

    pub fn last_read_offset(&self) -> i64 {
        self.shared.last_read_offset.load(Ordering::SeqCst)
    }

    pub fn bytes_read(&self) -> u64 {
        self.shared.bytes_read.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TailerState {
        self.shared.state()
    }

    pub fn close_timeout(&self) -> Duration {
        self.config.close_timeout
    }

    pub fn detected_pattern(&self) -> Option<Regex> {
        self.decoder_handle.get().and_then(|h| h.detected_pattern())
    }

    pub fn done(&self) -> DoneSignal {
        self.done.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_done()
    }

    pub fn did_file_rotate(&self) -> bool {
        self.shared.did_file_rotate.load(Ordering::SeqCst)
    }

    pub fn file(&self) -> &FileHandle {
        &self.file
    }

    async fn join_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for mut task in tasks {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(path = self.file.path(), error = %e, "Tailer task failed"),
                Err(_) => {
                    warn!(path = self.file.path(), "Tailer task did not exit, aborting");
                    task.abort();
                }
            }
        }
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.read_cancel.cancel();
        self.forward_cancel.cancel();
    }
}

struct Reader {
    file: tokio::fs::File,
    input: BoundedSender<Vec<u8>>,
    shared: Arc<Shared>,
    read_buffer_size: usize,
    sleep_duration: Duration,
    cancel: CancellationToken,
}

impl Reader {
    /// Returning drops the decoder input, which flushes the decoder.
    async fn run(mut self) {
        let mut buf = vec![0u8; self.read_buffer_size];

        loop {
            let result = select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.file.read(&mut buf) => result,
            };

            match result {
                Ok(0) => {
                    select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.sleep_duration) => {}
                    }
                }
                Ok(n) => {
                    self.shared
                        .last_read_offset
                        .fetch_add(n as i64, Ordering::SeqCst);
                    self.shared.bytes_read.fetch_add(n as u64, Ordering::SeqCst);

                    let chunk = buf[..n].to_vec();
                    select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        result = self.input.send(chunk) => {
                            if result.is_err() {
                                debug!("Decoder input closed, stopping reads");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to read file, stopping tailer");
                    break;
                }
            }
        }
    }
}

enum DeliveryError {
    Cancelled,
    ChannelClosed,
}

struct Forwarder {
    decoded: BoundedReceiver<DecodedMessage>,
    output: BoundedSender<Message>,
    shared: Arc<Shared>,
    identifier: String,
    source: Option<Arc<LogSource>>,
    tags: Vec<String>,
    tag_truncated: bool,
    cancel: CancellationToken,
}

impl Forwarder {
    async fn run(mut self) {
        loop {
            let decoded = select! {
                biased;
                _ = self.cancel.cancelled() => break,
                decoded = self.decoded.next() => match decoded {
                    Some(decoded) => decoded,
                    None => break,
                },
            };

            let raw_len = decoded.raw_data_len as i64;
            let offset = self
                .shared
                .decoded_offset
                .fetch_add(raw_len, Ordering::SeqCst)
                + raw_len;

            if decoded.content.is_empty() {
                continue;
            }

            let origin = if self.shared.did_file_rotate.load(Ordering::SeqCst) {
                Origin {
                    identifier: String::new(),
                    offset: 0,
                    source: self.source.clone(),
                }
            } else {
                Origin {
                    identifier: self.identifier.clone(),
                    offset,
                    source: self.source.clone(),
                }
            };
            let tags = tags::message_tags(&self.tags, decoded.truncated, self.tag_truncated);
            let message = Message::new(decoded.content, origin, tags, decoded.truncated);

            match send_with_cancellation(&self.output, message, &self.cancel).await {
                Ok(()) => {}
                Err(DeliveryError::Cancelled) => {
                    debug!(offset, "Delivery cancelled, dropping message");
                    break;
                }
                Err(DeliveryError::ChannelClosed) => {
                    warn!("Output channel closed, stopping tailer");
                    break;
                }
            }
        }
    }
}

async fn send_with_cancellation(
    output: &BoundedSender<Message>,
    message: Message,
    cancel: &CancellationToken,
) -> std::result::Result<(), DeliveryError> {
    let send_fut = output.send_async(message);
    tokio::pin!(send_fut);

    select! {
        result = send_fut => result.map_err(|_| DeliveryError::ChannelClosed),
        _ = cancel.cancelled() => Err(DeliveryError::Cancelled),
    }
}

/// Runs once the forward task exits, whatever the reason.
struct Completion {
    shared: Arc<Shared>,
    source: Option<Arc<LogSource>>,
    path: String,
    read_cancel: CancellationToken,
    done: DoneSignal,
}

impl Completion {
    fn finish(self) {
        self.read_cancel.cancel();
        let _ = self.shared.apply(TailerEvent::Finished);

        // The successor tailer owns the input entry after a rotation.
        if !self.shared.did_file_rotate.load(Ordering::SeqCst) {
            if let Some(source) = &self.source {
                source.remove_input(&self.path);
            }
        }

        debug!(
            path = self.path,
            offset = self.shared.decoded_offset.load(Ordering::SeqCst),
            "Tailer finished"
        );
        self.done.fire();
    }
}
