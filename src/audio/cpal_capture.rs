//! Microphone capture using cpal
//!
//! cpal streams are not `Send` on every platform, so each stream lives on its
//! own thread. The handle handed to the workflow only talks to that thread
//! through a stop channel and a shared sample buffer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::oneshot;

use crate::config::Settings;

use super::{AudioStreamHandle, CapturedAudio, DeviceError, DeviceMedia};

type SampleBuffer = Arc<Mutex<Vec<i16>>>;

/// Microphone source backed by the default cpal host
pub struct CpalMicrophone {
    /// Preferred input device name (empty = default)
    device: String,

    /// Requested sample rate
    sample_rate: u32,

    /// Requested number of channels
    channels: u16,
}

impl CpalMicrophone {
    pub fn new(settings: &Settings) -> Self {
        Self {
            device: settings.audio.device.clone(),
            sample_rate: settings.audio.sample_rate,
            channels: settings.audio.channels,
        }
    }
}

#[async_trait]
impl DeviceMedia for CpalMicrophone {
    async fn request_microphone(&self) -> Result<Box<dyn AudioStreamHandle>, DeviceError> {
        let samples: SampleBuffer = Arc::new(Mutex::new(Vec::new()));
        let capturing = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let device_name = self.device.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let thread_samples = samples.clone();
        let thread_capturing = capturing.clone();

        let thread = std::thread::Builder::new()
            .name("neurocare-mic".to_string())
            .spawn(move || {
                match open_stream(
                    &device_name,
                    sample_rate,
                    channels,
                    thread_samples,
                    thread_capturing,
                ) {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        // Hold the stream until stopped or the handle goes away
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| DeviceError::Unavailable(format!("Failed to spawn audio thread: {}", e)))?;

        let (sample_rate, channels) = match ready_rx.await {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(DeviceError::Unavailable(
                    "Audio thread exited before the stream opened".to_string(),
                ))
            }
        };

        tracing::info!(
            "cpal: microphone open ({} Hz, {} channels)",
            sample_rate,
            channels
        );

        Ok(Box::new(CpalStreamHandle {
            samples,
            capturing,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            sample_rate,
            channels,
        }))
    }

    fn backend_name(&self) -> &'static str {
        "cpal"
    }
}

/// Live cpal stream owned by a background thread
struct CpalStreamHandle {
    samples: SampleBuffer,
    capturing: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    channels: u16,
}

impl AudioStreamHandle for CpalStreamHandle {
    fn pause(&mut self) -> Result<(), DeviceError> {
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        if self.thread.is_none() {
            return Err(DeviceError::Stream("stream already released".to_string()));
        }
        self.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&mut self) -> Result<CapturedAudio, DeviceError> {
        self.capturing.store(false, Ordering::SeqCst);
        let samples = std::mem::take(
            &mut *self
                .samples
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        Ok(CapturedAudio {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples,
        })
    }

    fn release(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("cpal: audio thread panicked");
            }
            tracing::info!("cpal: microphone released");
        }
    }
}

impl Drop for CpalStreamHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Names of the available input devices
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .context("Failed to enumerate input devices")?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn select_device(host: &cpal::Host, name: &str) -> Result<cpal::Device, DeviceError> {
    if name.trim().is_empty() {
        return host
            .default_input_device()
            .ok_or_else(|| DeviceError::Unavailable("No input device available".to_string()));
    }

    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::Unavailable(format!("Failed to enumerate devices: {}", e)))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(DeviceError::Unavailable(format!(
        "Input device '{}' not found",
        name
    )))
}

fn open_stream(
    device_name: &str,
    sample_rate: u32,
    channels: u16,
    samples: SampleBuffer,
    capturing: Arc<AtomicBool>,
) -> Result<(Stream, (u32, u16)), DeviceError> {
    let host = cpal::default_host();
    let device = select_device(&host, device_name)?;

    tracing::info!(
        "cpal: Using audio device: {}",
        device.name().unwrap_or_default()
    );

    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| DeviceError::Unavailable(format!("Failed to get supported configs: {}", e)))?;

    let config = find_suitable_config(supported_configs, sample_rate, channels)
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

    let stream_config = StreamConfig {
        channels: config.channels(),
        sample_rate: config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match config.sample_format() {
        SampleFormat::I8 => build_stream::<i8>(&device, &stream_config, samples, capturing),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, samples, capturing),
        SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, samples, capturing),
        SampleFormat::I64 => build_stream::<i64>(&device, &stream_config, samples, capturing),
        SampleFormat::U8 => build_stream::<u8>(&device, &stream_config, samples, capturing),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, samples, capturing),
        SampleFormat::U32 => build_stream::<u32>(&device, &stream_config, samples, capturing),
        SampleFormat::U64 => build_stream::<u64>(&device, &stream_config, samples, capturing),
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, samples, capturing),
        SampleFormat::F64 => build_stream::<f64>(&device, &stream_config, samples, capturing),
        format => {
            return Err(DeviceError::Unavailable(format!(
                "Unsupported sample format: {:?}",
                format
            )))
        }
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DeviceError::Unavailable("Input device is not available".to_string())
        }
        other => DeviceError::PermissionDenied(format!(
            "Unable to access microphone. Please check your permissions. ({})",
            other
        )),
    })?;

    stream.play().map_err(|e| {
        DeviceError::PermissionDenied(format!("Failed to start audio stream: {}", e))
    })?;

    Ok((stream, (stream_config.sample_rate.0, stream_config.channels)))
}

/// Find a suitable audio configuration
fn find_suitable_config(
    configs: cpal::SupportedInputConfigs,
    target_sample_rate: u32,
    target_channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let configs: Vec<_> = configs.collect();

    // Exact channel count first
    for config in &configs {
        if config.channels() == target_channels
            && config.min_sample_rate().0 <= target_sample_rate
            && config.max_sample_rate().0 >= target_sample_rate
        {
            return Ok(config
                .clone()
                .with_sample_rate(cpal::SampleRate(target_sample_rate)));
        }
    }

    for config in &configs {
        if config.min_sample_rate().0 <= target_sample_rate
            && config.max_sample_rate().0 >= target_sample_rate
        {
            return Ok(config
                .clone()
                .with_sample_rate(cpal::SampleRate(target_sample_rate)));
        }
    }

    configs
        .into_iter()
        .next()
        .map(|c| c.with_max_sample_rate())
        .context("No supported audio configuration found")
}

/// Build an input stream that appends converted samples to the buffer
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    samples: SampleBuffer,
    capturing: Arc<AtomicBool>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: cpal::Sample + cpal::SizedSample + 'static,
    i16: cpal::FromSample<T>,
{
    let err_fn = |err| tracing::error!("Audio stream error: {}", err);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if !capturing.load(Ordering::SeqCst) {
                return;
            }

            if let Ok(mut buffer) = samples.lock() {
                buffer.extend(
                    data.iter()
                        .map(|&sample| -> i16 { cpal::Sample::from_sample(sample) }),
                );
            }
        },
        err_fn,
        None,
    )
}
