use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bytes moved by one instance since its counters were last flushed.
///
/// Cloning yields another handle onto the same counters, so relay tasks can
/// record traffic while the control loop snapshots and deducts it.
#[derive(Clone, Default)]
pub struct BandwidthCounter {
    inner: Arc<Mutex<BandwidthCounterInner>>,
}

#[derive(Default)]
struct BandwidthCounterInner {
    upload: u64,
    download: u64,
    last_activity: Option<Instant>,
}

/// Point-in-time copy of a [`BandwidthCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandwidthSnapshot {
    pub upload: u64,
    pub download: u64,
    pub last_activity: Option<Instant>,
}

impl BandwidthSnapshot {
    /// Combined byte count, `None` if it does not fit in 64 bits.
    pub fn total(&self) -> Option<u64> {
        self.upload.checked_add(self.download)
    }

    pub fn is_empty(&self) -> bool {
        self.upload == 0 && self.download == 0
    }
}

impl BandwidthCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes sent from the client towards the target
    pub fn record_upload(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.upload = inner.upload.saturating_add(bytes);
        inner.last_activity = Some(Instant::now());
    }

    /// Record bytes sent from the target back to the client
    pub fn record_download(&self, bytes: u64) {
        let mut inner = self.inner.lock();
        inner.download = inner.download.saturating_add(bytes);
        inner.last_activity = Some(Instant::now());
    }

    pub fn snapshot(&self) -> BandwidthSnapshot {
        let inner = self.inner.lock();
        BandwidthSnapshot {
            upload: inner.upload,
            download: inner.download,
            last_activity: inner.last_activity,
        }
    }

    /// Remove the bytes covered by `flushed` from the counters.
    ///
    /// Traffic recorded after the snapshot was taken stays pending.
    pub fn deduct(&self, flushed: &BandwidthSnapshot) {
        let mut inner = self.inner.lock();
        inner.upload = inner.upload.saturating_sub(flushed.upload);
        inner.download = inner.download.saturating_sub(flushed.download);
    }

    /// Whether traffic was seen less than `window` before `now`.
    pub fn is_active_within(&self, window: Duration, now: Instant) -> bool {
        match self.inner.lock().last_activity {
            Some(last) => now.saturating_duration_since(last) < window,
            None => false,
        }
    }

    #[doc(hidden)]
    pub fn set_last_activity(&self, at: Instant) {
        self.inner.lock().last_activity = Some(at);
    }
}
