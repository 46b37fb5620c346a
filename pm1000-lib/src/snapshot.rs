//! Latest-value cache shared between the poller, the sender and any reader.
//!
//! Each slot holds one fully formed sample behind an [`ArcSwap`], so a reader
//! either sees the previous value or the new one and never waits on the
//! writer. There is no queue: publishing twice before anyone reads loses the
//! first value.

use crate::sample::{AudioSample, StokeSample};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

struct Slot<T> {
    value: ArcSwap<T>,
    version: AtomicU64,
    changed: Notify,
}

impl<T: Copy + Default> Slot<T> {
    fn new() -> Self {
        Self {
            value: ArcSwap::from_pointee(T::default()),
            version: AtomicU64::new(0),
            changed: Notify::new(),
        }
    }

    fn publish(&self, value: T) -> u64 {
        self.value.store(Arc::new(value));
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.changed.notify_waiters();
        version
    }

    fn latest(&self) -> T {
        **self.value.load()
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    async fn wait_change(&self, seen: u64) -> u64 {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed
            notified.as_mut().enable();
            let current = self.version();
            if current != seen {
                return current;
            }
            notified.await;
        }
    }
}

/// Process-wide snapshot of the most recent Stokes and audio samples.
///
/// Built once and shared as `Arc<SnapshotPublisher>`. Both slots start out
/// zeroed with version 0.
pub struct SnapshotPublisher {
    stokes: Slot<StokeSample>,
    audio: Slot<AudioSample>,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self {
            stokes: Slot::new(),
            audio: Slot::new(),
        }
    }

    /// Replace the current Stokes sample. Returns the new version.
    pub fn publish_stokes(&self, sample: StokeSample) -> u64 {
        self.stokes.publish(sample)
    }

    /// Replace the current audio sample. Returns the new version.
    pub fn publish_audio(&self, sample: AudioSample) -> u64 {
        self.audio.publish(sample)
    }

    pub fn latest_stokes(&self) -> StokeSample {
        self.stokes.latest()
    }

    pub fn latest_audio(&self) -> AudioSample {
        self.audio.latest()
    }

    /// Number of Stokes publishes so far
    pub fn stokes_version(&self) -> u64 {
        self.stokes.version()
    }

    pub fn audio_version(&self) -> u64 {
        self.audio.version()
    }

    /// Waits until the Stokes version differs from `seen` and returns it.
    /// Returns immediately if it already does.
    pub async fn wait_stokes_change(&self, seen: u64) -> u64 {
        self.stokes.wait_change(seen).await
    }

    pub async fn wait_audio_change(&self, seen: u64) -> u64 {
        self.audio.wait_change(seen).await
    }
}
