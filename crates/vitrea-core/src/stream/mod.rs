// ── Reactive device streams ──
//
// Subscription types for consuming store updates: `ChangeStream` carries
// every individual state change, `DeviceStream` the full sorted snapshot.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use crate::model::Device;
use crate::store::StateChange;

// ── ChangeStream ────────────────────────────────────────────────────

/// A subscription to per-device state changes.
///
/// A consumer that falls behind skips the changes it missed (logged) and
/// should re-read the snapshot if it needs a consistent view.
pub struct ChangeStream {
    receiver: broadcast::Receiver<StateChange>,
}

impl ChangeStream {
    pub(crate) fn new(receiver: broadcast::Receiver<StateChange>) -> Self {
        Self { receiver }
    }

    /// Wait for the next change. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StateChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued change, without waiting.
    pub fn try_recv(&mut self) -> Option<StateChange> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) => return Some(change),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> ChangeBroadcastStream {
        ChangeBroadcastStream {
            inner: BroadcastStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter over a [`ChangeStream`]. Lag gaps are skipped.
pub struct ChangeBroadcastStream {
    inner: BroadcastStream<StateChange>,
}

impl Stream for ChangeBroadcastStream {
    type Item = StateChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(change))) => return Poll::Ready(Some(change)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    tracing::warn!(skipped, "Change subscriber lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ── DeviceStream ────────────────────────────────────────────────────

type Snapshot = Arc<Vec<Arc<Device>>>;

/// A subscription to the whole device collection.
///
/// Provides both point-in-time snapshot access and reactive change
/// notification via `changed()` or by converting to a `Stream`.
pub struct DeviceStream {
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl DeviceStream {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Get the snapshot captured at creation time (or the last `changed()`).
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Get the latest snapshot (may have changed since creation).
    pub fn latest(&self) -> Snapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` if the store has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Convert into a `Stream` that yields the current snapshot first,
    /// then one per mutation.
    pub fn into_stream(self) -> DeviceWatchStream {
        DeviceWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct DeviceWatchStream {
    inner: WatchStream<Snapshot>,
}

impl Stream for DeviceWatchStream {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;
    use vitrea_api::{KeyStatus, Push};

    use crate::store::DeviceStore;

    fn off(node: u16) -> Push {
        Push::Key {
            node,
            key: 1,
            status: KeyStatus::Off,
        }
    }

    #[tokio::test]
    async fn change_stream_yields_changes_in_order() {
        let store = DeviceStore::new();
        let mut stream = store.changes().into_stream();

        store.apply_push(&off(1));
        store.apply_push(&off(2));

        assert_eq!(stream.next().await.unwrap().id.to_string(), "N001-1");
        assert_eq!(stream.next().await.unwrap().id.to_string(), "N002-1");
    }

    #[tokio::test]
    async fn device_stream_tracks_snapshots() {
        let store = DeviceStore::new();
        let mut devices = store.subscribe_devices();
        assert!(devices.current().is_empty());

        store.apply_push(&off(1));
        let snap = devices.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(devices.current().len(), 1);

        let mut stream = devices.into_stream();
        assert_eq!(stream.next().await.unwrap().len(), 1);
    }
}
