//! Application-wide exclusive ownership of the microphone
//!
//! At most one stream handle is live at any time. Acquiring the device for a
//! new recording first stops and releases the current holder; the audio that
//! holder captured is kept aside so its owner can still finalize it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::{AudioStreamHandle, CapturedAudio, DeviceError, DeviceMedia};

/// Shared arbiter; clone it into every component that records
#[derive(Clone, Default)]
pub struct DeviceArbiter {
    inner: Arc<Mutex<ArbiterInner>>,
}

#[derive(Default)]
struct ArbiterInner {
    next_id: u64,
    active: Option<Holder>,
    evicted: HashMap<u64, Result<CapturedAudio, DeviceError>>,
}

struct Holder {
    lease_id: u64,
    owner: String,
    handle: Box<dyn AudioStreamHandle>,
}

impl ArbiterInner {
    fn evict_active(&mut self) {
        if let Some(mut holder) = self.active.take() {
            info!("Releasing microphone held by {}", holder.owner);
            let audio = holder.handle.finish();
            holder.handle.release();
            self.evicted.insert(holder.lease_id, audio);
        }
    }
}

impl DeviceArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ArbiterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Owner label of the current holder, if any
    pub fn holder(&self) -> Option<String> {
        self.lock().active.as_ref().map(|h| h.owner.clone())
    }

    /// Acquire the microphone for `owner`, evicting any current holder first.
    pub async fn acquire(
        &self,
        owner: &str,
        media: &dyn DeviceMedia,
    ) -> Result<DeviceLease, DeviceError> {
        self.lock().evict_active();

        let handle = media.request_microphone().await?;

        let mut inner = self.lock();
        // Someone else may have been granted the device while we waited.
        inner.evict_active();
        inner.next_id += 1;
        let lease_id = inner.next_id;
        inner.active = Some(Holder {
            lease_id,
            owner: owner.to_string(),
            handle,
        });
        debug!(
            "Microphone granted to {} via {} (lease {})",
            owner,
            media.backend_name(),
            lease_id
        );

        Ok(DeviceLease {
            id: lease_id,
            arbiter: self.clone(),
        })
    }
}

/// Exclusive right to the microphone, valid until finished, dropped, or evicted
pub struct DeviceLease {
    id: u64,
    arbiter: DeviceArbiter,
}

impl DeviceLease {
    /// Whether another recording took the device away
    pub fn is_evicted(&self) -> bool {
        self.arbiter.lock().evicted.contains_key(&self.id)
    }

    fn with_handle<T>(
        &self,
        f: impl FnOnce(&mut dyn AudioStreamHandle) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut inner = self.arbiter.lock();
        match inner.active.as_mut() {
            Some(holder) if holder.lease_id == self.id => f(holder.handle.as_mut()),
            _ => Err(DeviceError::Stream(
                "microphone is held by another recording".to_string(),
            )),
        }
    }

    pub fn pause(&self) -> Result<(), DeviceError> {
        self.with_handle(|h| h.pause())
    }

    pub fn resume(&self) -> Result<(), DeviceError> {
        self.with_handle(|h| h.resume())
    }

    /// Stop capturing, release the device, and return the captured audio.
    ///
    /// An evicted lease returns the audio captured up to the eviction.
    pub fn finish(self) -> Result<CapturedAudio, DeviceError> {
        let result = {
            let mut inner = self.arbiter.lock();
            match inner.active.take() {
                Some(mut holder) if holder.lease_id == self.id => {
                    let audio = holder.handle.finish();
                    holder.handle.release();
                    audio
                }
                other => {
                    inner.active = other;
                    inner.evicted.remove(&self.id).unwrap_or_else(|| {
                        Err(DeviceError::Stream("lease is no longer valid".to_string()))
                    })
                }
            }
        };
        result
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        let mut inner = self.arbiter.lock();
        inner.evicted.remove(&self.id);
        if inner
            .active
            .as_ref()
            .is_some_and(|holder| holder.lease_id == self.id)
        {
            if let Some(mut holder) = inner.active.take() {
                holder.handle.release();
                debug!("Microphone released by {}", holder.owner);
            }
        }
    }
}
