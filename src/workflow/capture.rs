//! Audio capture stage
//!
//! `Idle -> Recording -> Paused <-> Recording -> Stopped`, and back to `Idle`
//! on re-record. Every transition goes through [`AudioCaptureStage::dispatch`].
//! The microphone is borrowed from the shared [`DeviceArbiter`] for the span
//! of one recording.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::{encode_wav, DeviceArbiter, DeviceError, DeviceLease, DeviceMedia};
use crate::config::Settings;
use crate::workflow::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEvent {
    Start,
    Pause,
    Resume,
    Stop,
    ReRecord,
    /// One second of wall-clock time has passed
    Tick,
}

/// Audio of a stopped recording
#[derive(Debug, Clone)]
pub struct FinalizedAudio {
    /// WAV encoded buffer
    pub wav: Arc<Vec<u8>>,
    /// Playable reference to the clip
    pub result_url: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

/// One bounded recording
#[derive(Debug, Clone)]
pub struct RecordingSession {
    id: String,
    state: CaptureState,
    elapsed_secs: u64,
    audio: Option<FinalizedAudio>,
}

impl RecordingSession {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: CaptureState::Recording,
            elapsed_secs: 0,
            audio: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    /// Finalized audio; present only once stopped
    pub fn audio(&self) -> Option<&FinalizedAudio> {
        self.audio.as_ref()
    }

    pub fn result_url(&self) -> Option<&str> {
        self.audio.as_ref().map(|a| a.result_url.as_str())
    }
}

/// Where finalized clips are kept so `result_url` can be played back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClipStore {
    /// Audio stays in memory only
    #[default]
    Memory,
    /// Clips are written as `<id>.wav` into a directory
    Directory(PathBuf),
}

impl ClipStore {
    fn store(&self, id: &str, wav: &[u8]) -> Result<String> {
        match self {
            Self::Memory => Ok(format!("memory://recordings/{}.wav", id)),
            Self::Directory(dir) => {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create recordings directory: {}", dir.display())
                })?;
                let path = dir.join(format!("{}.wav", id));
                std::fs::write(&path, wav)
                    .with_context(|| format!("Failed to write recording: {}", path.display()))?;
                Ok(format!("file://{}", path.display()))
            }
        }
    }

    fn discard(&self, url: &str) {
        if let Self::Directory(_) = self {
            if let Some(path) = url.strip_prefix("file://") {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Failed to remove recording {}: {}", path, e);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Recording stops on its own at this many seconds (0 = unlimited)
    pub max_duration_secs: u64,
    pub clip_store: ClipStore,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_duration_secs: 300,
            clip_store: ClipStore::Memory,
        }
    }
}

impl CaptureOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_duration_secs: settings.audio.max_recording_secs,
            clip_store: ClipStore::Directory(settings.audio_dir()),
        }
    }
}

pub struct AudioCaptureStage {
    owner: String,
    media: Arc<dyn DeviceMedia>,
    arbiter: DeviceArbiter,
    options: CaptureOptions,
    session: Option<RecordingSession>,
    lease: Option<DeviceLease>,
}

impl AudioCaptureStage {
    pub fn new(
        owner: impl Into<String>,
        media: Arc<dyn DeviceMedia>,
        arbiter: DeviceArbiter,
        options: CaptureOptions,
    ) -> Self {
        Self {
            owner: owner.into(),
            media,
            arbiter,
            options,
            session: None,
            lease: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(CaptureState::Idle)
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.session.as_ref().map(|s| s.elapsed_secs).unwrap_or(0)
    }

    pub fn max_duration_secs(&self) -> u64 {
        self.options.max_duration_secs
    }

    /// Whether this stage currently owns the microphone
    pub fn holds_device(&self) -> bool {
        self.lease.as_ref().is_some_and(|l| !l.is_evicted())
    }

    /// Apply one capture event.
    ///
    /// Illegal transitions return `InvalidState` and change nothing.
    pub async fn dispatch(&mut self, event: CaptureEvent) -> Result<CaptureState, WorkflowError> {
        self.absorb_eviction();

        let state = self.state();
        match (event, state) {
            (CaptureEvent::Start, CaptureState::Idle) => self.start().await?,
            (CaptureEvent::Pause, CaptureState::Recording) => {
                self.lease_mut()?.pause().map_err(capture_error)?;
                self.set_state(CaptureState::Paused);
                debug!("Recording paused");
            }
            (CaptureEvent::Resume, CaptureState::Paused) => {
                self.lease_mut()?.resume().map_err(capture_error)?;
                self.set_state(CaptureState::Recording);
                debug!("Recording resumed");
            }
            (CaptureEvent::Stop, CaptureState::Recording | CaptureState::Paused) => {
                self.finalize()?;
            }
            (CaptureEvent::ReRecord, CaptureState::Stopped | CaptureState::Idle) => {
                self.discard_session();
            }
            (CaptureEvent::Tick, CaptureState::Recording) => self.tick()?,
            (CaptureEvent::Tick, _) => {}
            (event, state) => {
                return Err(WorkflowError::InvalidState {
                    action: event_action(event),
                    state: state.as_str(),
                })
            }
        }

        Ok(self.state())
    }

    /// Pick up a recording another owner took the microphone from.
    ///
    /// The evicted session ends in `Stopped` with the audio captured up to
    /// the eviction.
    pub fn absorb_eviction(&mut self) {
        if self.lease.as_ref().is_some_and(|l| l.is_evicted()) {
            info!("Microphone was taken by another recording; stopping {}", self.owner);
            if let Err(e) = self.finalize() {
                warn!("Could not keep evicted recording: {}", e);
            }
        }
    }

    /// Free the device and drop the recording. `keep_clip` leaves a stored
    /// clip in place (after a successful submission references it).
    pub fn release(&mut self, keep_clip: bool) {
        if let Some(lease) = self.lease.take() {
            drop(lease);
            info!("Microphone released by {}", self.owner);
        }
        if keep_clip {
            self.session = None;
        } else {
            self.discard_session();
        }
    }

    async fn start(&mut self) -> Result<(), WorkflowError> {
        let lease = self
            .arbiter
            .acquire(&self.owner, self.media.as_ref())
            .await
            .map_err(|e| match e {
                DeviceError::PermissionDenied(msg) => WorkflowError::PermissionDenied(msg),
                other => capture_error(other),
            })?;

        let session = RecordingSession::new();
        info!("Recording {} started for {}", session.id, self.owner);
        self.session = Some(session);
        self.lease = Some(lease);
        Ok(())
    }

    fn tick(&mut self) -> Result<(), WorkflowError> {
        let max = self.options.max_duration_secs;
        let elapsed = match self.session.as_mut() {
            Some(session) => {
                session.elapsed_secs += 1;
                session.elapsed_secs
            }
            None => return Ok(()),
        };

        if max > 0 && elapsed >= max {
            info!("Recording reached the {}s limit, stopping", max);
            self.finalize()?;
        }
        Ok(())
    }

    /// Stop the stream, release the device, and keep the encoded clip.
    ///
    /// All or nothing: on failure the session is dropped and the stage is
    /// back to `Idle`.
    fn finalize(&mut self) -> Result<(), WorkflowError> {
        let Some(lease) = self.lease.take() else {
            return Err(WorkflowError::Capture(
                "recording has no microphone stream".to_string(),
            ));
        };

        match self.finish_clip(lease) {
            Ok(audio) => {
                if let Some(session) = self.session.as_mut() {
                    info!(
                        "Recording {} stopped after {}s ({:.1}s of audio)",
                        session.id, session.elapsed_secs, audio.duration_secs
                    );
                    session.state = CaptureState::Stopped;
                    session.audio = Some(audio);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Recording could not be finalized: {:#}", e);
                self.session = None;
                Err(WorkflowError::Capture(format!("{:#}", e)))
            }
        }
    }

    fn finish_clip(&self, lease: DeviceLease) -> Result<FinalizedAudio> {
        let captured = lease.finish().context("Microphone stream failed")?;
        let wav = encode_wav(&captured)?;
        let id = self
            .session
            .as_ref()
            .map(|s| s.id.clone())
            .context("No recording in progress")?;
        let result_url = self.options.clip_store.store(&id, &wav)?;

        Ok(FinalizedAudio {
            wav: Arc::new(wav),
            result_url,
            sample_rate: captured.sample_rate,
            channels: captured.channels,
            duration_secs: captured.duration_secs(),
        })
    }

    fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Some(url) = session.result_url() {
                self.options.clip_store.discard(url);
            }
            debug!("Recording {} discarded", session.id);
        }
    }

    fn lease_mut(&mut self) -> Result<&mut DeviceLease, WorkflowError> {
        self.lease
            .as_mut()
            .ok_or_else(|| WorkflowError::Capture("recording has no microphone stream".to_string()))
    }

    fn set_state(&mut self, state: CaptureState) {
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
    }
}

fn capture_error(e: DeviceError) -> WorkflowError {
    WorkflowError::Capture(e.to_string())
}

fn event_action(event: CaptureEvent) -> &'static str {
    match event {
        CaptureEvent::Start => "start recording",
        CaptureEvent::Pause => "pause",
        CaptureEvent::Resume => "resume",
        CaptureEvent::Stop => "stop recording",
        CaptureEvent::ReRecord => "re-record",
        CaptureEvent::Tick => "tick",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeMedia;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn stage(media: &FakeMedia, arbiter: &DeviceArbiter) -> AudioCaptureStage {
        AudioCaptureStage::new(
            "test",
            Arc::new(media.clone()),
            arbiter.clone(),
            CaptureOptions::default(),
        )
    }

    #[tokio::test]
    async fn full_cycle_produces_playable_clip() {
        let media = FakeMedia::default();
        let mut capture = stage(&media, &DeviceArbiter::new());

        assert_eq!(capture.dispatch(CaptureEvent::Start).await, Ok(CaptureState::Recording));
        assert_eq!(capture.dispatch(CaptureEvent::Pause).await, Ok(CaptureState::Paused));
        assert_eq!(capture.dispatch(CaptureEvent::Resume).await, Ok(CaptureState::Recording));
        assert_eq!(capture.dispatch(CaptureEvent::Stop).await, Ok(CaptureState::Stopped));

        let session = capture.session().unwrap();
        let url = session.result_url().unwrap();
        assert!(url.starts_with("memory://recordings/"));
        assert_eq!(&session.audio().unwrap().wav[..4], b"RIFF");
        assert_eq!(media.releases(), 1);
        assert!(!capture.holds_device());
    }

    #[tokio::test]
    async fn illegal_transitions_change_nothing() {
        let media = FakeMedia::default();
        let mut capture = stage(&media, &DeviceArbiter::new());

        for event in [CaptureEvent::Pause, CaptureEvent::Resume, CaptureEvent::Stop] {
            assert!(matches!(
                capture.dispatch(event).await,
                Err(WorkflowError::InvalidState { state: "idle", .. })
            ));
        }
        assert_eq!(media.requests(), 0);

        capture.dispatch(CaptureEvent::Start).await.unwrap();
        for event in [CaptureEvent::Start, CaptureEvent::Resume, CaptureEvent::ReRecord] {
            assert!(matches!(
                capture.dispatch(event).await,
                Err(WorkflowError::InvalidState { state: "recording", .. })
            ));
        }
        assert_eq!(media.requests(), 1);
        assert_eq!(media.releases(), 0);

        capture.dispatch(CaptureEvent::Stop).await.unwrap();
        for event in [CaptureEvent::Start, CaptureEvent::Pause, CaptureEvent::Stop] {
            assert!(matches!(
                capture.dispatch(event).await,
                Err(WorkflowError::InvalidState { state: "stopped", .. })
            ));
        }
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert!(capture.session().unwrap().audio().is_some());
    }

    #[tokio::test]
    async fn elapsed_advances_only_while_recording() {
        let media = FakeMedia::default();
        let mut capture = stage(&media, &DeviceArbiter::new());

        capture.dispatch(CaptureEvent::Tick).await.unwrap();
        assert_eq!(capture.elapsed_secs(), 0);

        capture.dispatch(CaptureEvent::Start).await.unwrap();
        for _ in 0..3 {
            capture.dispatch(CaptureEvent::Tick).await.unwrap();
        }
        assert_eq!(capture.elapsed_secs(), 3);

        capture.dispatch(CaptureEvent::Pause).await.unwrap();
        capture.dispatch(CaptureEvent::Tick).await.unwrap();
        assert_eq!(capture.elapsed_secs(), 3);

        capture.dispatch(CaptureEvent::Resume).await.unwrap();
        capture.dispatch(CaptureEvent::Tick).await.unwrap();
        capture.dispatch(CaptureEvent::Stop).await.unwrap();
        capture.dispatch(CaptureEvent::Tick).await.unwrap();
        assert_eq!(capture.elapsed_secs(), 4);
    }

    #[tokio::test]
    async fn permission_denied_stays_idle_and_is_retryable() {
        let media = FakeMedia::default();
        media.deny(true);
        let mut capture = stage(&media, &DeviceArbiter::new());

        assert!(matches!(
            capture.dispatch(CaptureEvent::Start).await,
            Err(WorkflowError::PermissionDenied(_))
        ));
        assert_eq!(capture.state(), CaptureState::Idle);

        media.deny(false);
        assert_eq!(capture.dispatch(CaptureEvent::Start).await, Ok(CaptureState::Recording));
    }

    #[tokio::test]
    async fn release_while_recording_frees_device_once() {
        let media = FakeMedia::default();
        let mut capture = stage(&media, &DeviceArbiter::new());

        capture.dispatch(CaptureEvent::Start).await.unwrap();
        capture.release(false);
        assert_eq!(media.releases(), 1);
        assert_eq!(capture.state(), CaptureState::Idle);

        drop(capture);
        assert_eq!(media.releases(), 1);
    }

    #[tokio::test]
    async fn second_recording_evicts_first() {
        let media = FakeMedia::default();
        let arbiter = DeviceArbiter::new();
        let mut first = stage(&media, &arbiter);
        let mut second = stage(&media, &arbiter);

        first.dispatch(CaptureEvent::Start).await.unwrap();
        first.dispatch(CaptureEvent::Tick).await.unwrap();
        second.dispatch(CaptureEvent::Start).await.unwrap();
        assert_eq!(media.releases(), 1);

        // The evicted owner sees its recording stopped with its audio.
        assert_eq!(first.dispatch(CaptureEvent::Tick).await, Ok(CaptureState::Stopped));
        assert!(first.session().unwrap().result_url().is_some());
        assert_eq!(first.elapsed_secs(), 1);
        assert_eq!(media.releases(), 1);
        assert!(second.holds_device());
    }

    #[tokio::test]
    async fn recording_auto_stops_at_limit() {
        let media = FakeMedia::default();
        let mut capture = AudioCaptureStage::new(
            "test",
            Arc::new(media.clone()),
            DeviceArbiter::new(),
            CaptureOptions {
                max_duration_secs: 3,
                clip_store: ClipStore::Memory,
            },
        );

        capture.dispatch(CaptureEvent::Start).await.unwrap();
        capture.dispatch(CaptureEvent::Tick).await.unwrap();
        capture.dispatch(CaptureEvent::Tick).await.unwrap();
        assert_eq!(capture.dispatch(CaptureEvent::Tick).await, Ok(CaptureState::Stopped));
        assert_eq!(capture.elapsed_secs(), 3);
        assert_eq!(media.releases(), 1);
    }

    #[tokio::test]
    async fn failed_finalization_exposes_no_audio() {
        let media = FakeMedia::default();
        let mut capture = stage(&media, &DeviceArbiter::new());

        capture.dispatch(CaptureEvent::Start).await.unwrap();
        media.counters.fail_finish.store(true, Ordering::SeqCst);

        assert!(matches!(
            capture.dispatch(CaptureEvent::Stop).await,
            Err(WorkflowError::Capture(_))
        ));
        assert_eq!(capture.state(), CaptureState::Idle);
        assert!(capture.session().is_none());
        assert_eq!(media.releases(), 1);
    }

    #[tokio::test]
    async fn re_record_removes_stored_clip() {
        let tmp = tempdir().unwrap();
        let media = FakeMedia::default();
        let mut capture = AudioCaptureStage::new(
            "test",
            Arc::new(media.clone()),
            DeviceArbiter::new(),
            CaptureOptions {
                max_duration_secs: 0,
                clip_store: ClipStore::Directory(tmp.path().to_path_buf()),
            },
        );

        capture.dispatch(CaptureEvent::Start).await.unwrap();
        capture.dispatch(CaptureEvent::Stop).await.unwrap();
        let url = capture.session().unwrap().result_url().unwrap().to_string();
        let path = PathBuf::from(url.strip_prefix("file://").unwrap());
        assert!(path.exists());

        assert_eq!(capture.dispatch(CaptureEvent::ReRecord).await, Ok(CaptureState::Idle));
        assert!(!path.exists());
        assert!(capture.session().is_none());
    }
}
