// SPDX-License-Identifier: Apache-2.0

//! Runs a [`Decoder`] on its own task between two bounded queues.
//!
//! Closing the input queue ends decoding: the decoder is flushed (or its
//! partial content discarded) and the output queue closes once the last
//! message is handed off. Dropping the output receiver stops the task at its
//! next send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bounded_channel::{self, BoundedReceiver, BoundedSender};
use crate::tailers::file::decoder::{DecodedMessage, Decoder};

/// Shared view of a running decoder.
#[derive(Clone, Default)]
pub struct DecoderHandle {
    detected_pattern: Arc<OnceLock<Regex>>,
    discard_tail: Arc<AtomicBool>,
}

/// Queues and task of a spawned decoder.
pub struct DecoderTasks {
    pub input: BoundedSender<Vec<u8>>,
    pub output: BoundedReceiver<DecodedMessage>,
    pub handle: DecoderHandle,
    pub task: JoinHandle<()>,
}

impl DecoderHandle {
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        decoder: Box<dyn Decoder>,
        input_queue_size: usize,
        output_queue_size: usize,
    ) -> DecoderTasks {
        let (input, input_rx) = bounded_channel::bounded::<Vec<u8>>(input_queue_size);
        let (output_tx, output) = bounded_channel::bounded::<DecodedMessage>(output_queue_size);
        let handle = DecoderHandle::default();

        let task = tokio::spawn(run_decoder(decoder, input_rx, output_tx, handle.clone()));

        DecoderTasks {
            input,
            output,
            handle,
            task,
        }
    }

    /// Multi-line start pattern, once the decoder detected one. Set at most once.
    pub fn detected_pattern(&self) -> Option<Regex> {
        self.detected_pattern.get().cloned()
    }

    /// Drop partially decoded content instead of flushing it when input ends.
    pub fn discard_tail(&self) {
        self.discard_tail.store(true, Ordering::SeqCst);
    }

    fn publish_pattern(&self, decoder: &dyn Decoder) {
        if self.detected_pattern.get().is_none() {
            if let Some(pattern) = decoder.detected_pattern() {
                let _ = self.detected_pattern.set(pattern.clone());
            }
        }
    }
}

async fn run_decoder(
    mut decoder: Box<dyn Decoder>,
    mut input: BoundedReceiver<Vec<u8>>,
    output: BoundedSender<DecodedMessage>,
    handle: DecoderHandle,
) {
    loop {
        let next = match decoder.idle_flush_timeout() {
            Some(idle) => match tokio::time::timeout(idle, input.next()).await {
                Ok(next) => next,
                Err(_) => {
                    decoder.flush_idle();
                    if !send_outputs(decoder.as_mut(), &output).await {
                        return;
                    }
                    continue;
                }
            },
            None => input.next().await,
        };

        let Some(chunk) = next else {
            break;
        };

        if let Err(e) = decoder.push(&chunk) {
            warn!(error = %e, bytes = chunk.len(), "Skipping input the decoder rejected");
            if !skip_rejected(decoder.as_mut(), chunk.len(), &output).await {
                return;
            }
        }
        handle.publish_pattern(decoder.as_ref());

        if !send_outputs(decoder.as_mut(), &output).await {
            debug!("Decoded message queue closed, stopping decoder");
            return;
        }
    }

    if handle.discard_tail.load(Ordering::SeqCst) {
        decoder.discard();
    } else {
        decoder.flush();
    }
    handle.publish_pattern(decoder.as_ref());
    send_outputs(decoder.as_mut(), &output).await;
}

/// Accounts for a rejected chunk with an empty message carrying its length,
/// so the decoded offset still lands on the end of the input. A partial line
/// buffered before the chunk is dropped with it and counted too. Returns false
/// once the receiving side is gone.
async fn skip_rejected(
    decoder: &mut dyn Decoder,
    rejected: usize,
    output: &BoundedSender<DecodedMessage>,
) -> bool {
    decoder.flush_idle();
    if !send_outputs(decoder, output).await {
        return false;
    }

    let skipped = rejected + decoder.discard();
    output
        .send(DecodedMessage::new(Vec::new(), skipped, false))
        .await
        .is_ok()
}

/// Returns false once the receiving side is gone.
async fn send_outputs(decoder: &mut dyn Decoder, output: &BoundedSender<DecodedMessage>) -> bool {
    while let Some(message) = decoder.next_output() {
        if output.send(message).await.is_err() {
            return false;
        }
    }
    true
}
