//! Audio module for neurocare
//!
//! Microphone access for the voice step of a booking:
//! - `DeviceMedia` / `AudioStreamHandle` - the device seam the workflow talks to
//! - `DeviceArbiter` - application-wide exclusive ownership of the microphone
//! - `CpalMicrophone` - cross-platform capture backend
//! - WAV encoding of finalized recordings

mod arbiter;
mod cpal_capture;
mod wav;

pub use arbiter::{DeviceArbiter, DeviceLease};
#[cfg(test)]
pub(crate) use arbiter::testing;
pub use cpal_capture::{list_input_devices, CpalMicrophone};
pub use wav::{encode_wav, wav_duration_secs};

use async_trait::async_trait;
use thiserror::Error;

/// Failures reported by the device layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The user or the OS refused microphone access
    #[error("{0}")]
    PermissionDenied(String),

    /// No usable input device
    #[error("{0}")]
    Unavailable(String),

    /// The stream broke, or the lease no longer owns the device
    #[error("{0}")]
    Stream(String),
}

/// PCM samples accumulated by a stream handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl CapturedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// A live microphone stream
pub trait AudioStreamHandle: Send {
    /// Stop delivering samples without closing the stream
    fn pause(&mut self) -> Result<(), DeviceError>;

    /// Resume delivering samples
    fn resume(&mut self) -> Result<(), DeviceError>;

    /// Stop capturing and hand over every sample captured since the stream opened
    fn finish(&mut self) -> Result<CapturedAudio, DeviceError>;

    /// Free the underlying device
    fn release(&mut self);
}

/// Grants microphone streams
#[async_trait]
pub trait DeviceMedia: Send + Sync {
    /// Ask for the microphone. Suspends until access is granted or refused.
    async fn request_microphone(&self) -> Result<Box<dyn AudioStreamHandle>, DeviceError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
