// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity MPMC channel used for every hand-off inside a tailer and for
//! the output destination shared with the downstream pipeline.

use flume::r#async::{RecvStream, SendFut};
use flume::{Receiver, Sender};
use std::fmt;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

impl<T> BoundedSender<T> {
    /// Waits for capacity. Returns an error only once every receiver is gone.
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Raw send future, for callers that race delivery against cancellation.
    pub fn send_async(&self, item: T) -> SendFut<'_, T> {
        self.tx.send_async(item)
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_disconnected()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Next item, or `None` once all senders are dropped and the queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Returns `None` when nothing is queued or the channel is disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn stream(&self) -> RecvStream<'_, T> {
        self.rx.stream()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, bounded};
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn send_wakes_pending_receiver() {
        let (tx, mut rx) = bounded(3);

        let mut recv = spawn(async { rx.next().await });
        assert_pending!(recv.poll());

        let mut send = spawn(async { tx.send("line").await });
        assert_ok!(assert_ready!(send.poll()));

        assert!(recv.is_woken());
        assert_eq!(Some("line"), assert_ready!(recv.poll()));
    }

    #[tokio::test]
    async fn full_queue_blocks_until_drained() {
        let (tx, mut rx) = bounded(1);

        assert_ok!(tx.send(1).await);

        let mut blocked = spawn(async { tx.send(3).await });
        assert_pending!(blocked.poll());

        assert_eq!(Some(1), rx.next().await);
        assert!(blocked.is_woken());
        assert_ok!(assert_ready!(blocked.poll()));
        assert_eq!(Some(3), rx.try_recv());
        assert_eq!(None, rx.try_recv());
    }

    #[tokio::test]
    async fn dropped_receiver_fails_blocked_sender() {
        let (tx, rx) = bounded(1);
        assert_ok!(tx.send(1).await);

        let mut blocked = spawn(async { tx.send(2).await });
        assert_pending!(blocked.poll());

        drop(rx);
        assert_eq!(Err(SendError::Disconnected), assert_ready!(blocked.poll()));
        assert!(tx.is_disconnected());
    }

    #[tokio::test]
    async fn receiver_sees_end_of_stream() {
        let (tx, mut rx) = bounded::<u8>(2);
        drop(tx);
        assert_eq!(None, rx.next().await);
        assert_eq!(None, rx.try_recv());
    }
}
