//! Mock analysis stage
//!
//! Sends a stopped recording to the analysis service and keeps the single
//! report produced for it. The service call is split into `begin` and
//! `finish` so callers can run it on another task; a finish whose ticket no
//! longer matches (re-record, cancel, newer request) is discarded.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisError, AnalysisRequest};
use crate::workflow::capture::{CaptureState, RecordingSession};
use crate::workflow::WorkflowError;

pub use crate::analysis::{CognitiveLoad, VoiceAnalysisReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    NotStarted,
    Analyzing,
    Ready,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Analyzing => "analyzing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

/// Identifies one in-flight analysis request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisTicket(u64);

/// Work handed to the caller to run against the analysis service
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub ticket: AnalysisTicket,
    pub request: AnalysisRequest,
}

pub enum AnalysisStart {
    /// The recording already has a report
    Cached(VoiceAnalysisReport),
    /// Run the request, then hand the result to `finish`
    Pending(AnalysisJob),
}

struct StoredReport {
    recording_id: String,
    report: VoiceAnalysisReport,
}

#[derive(Default)]
pub struct AnalysisStage {
    next_ticket: u64,
    pending: Option<(AnalysisTicket, String)>,
    stored: Option<StoredReport>,
    last_error: Option<String>,
}

impl AnalysisStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> AnalysisStatus {
        if self.pending.is_some() {
            AnalysisStatus::Analyzing
        } else if self.stored.is_some() {
            AnalysisStatus::Ready
        } else if self.last_error.is_some() {
            AnalysisStatus::Failed
        } else {
            AnalysisStatus::NotStarted
        }
    }

    pub fn report(&self) -> Option<&VoiceAnalysisReport> {
        self.stored.as_ref().map(|s| &s.report)
    }

    /// Report produced for a specific recording
    pub fn report_for(&self, recording_id: &str) -> Option<&VoiceAnalysisReport> {
        self.stored
            .as_ref()
            .filter(|s| s.recording_id == recording_id)
            .map(|s| &s.report)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Prepare an analysis of the stopped recording.
    ///
    /// A newer `begin` supersedes a request still in flight.
    pub fn begin(
        &mut self,
        recording: Option<&RecordingSession>,
    ) -> Result<AnalysisStart, WorkflowError> {
        let state = recording
            .map(|r| r.state())
            .unwrap_or(CaptureState::Idle);

        let (recording, audio) = match recording.and_then(|r| r.audio().map(|a| (r, a))) {
            Some(found) if state == CaptureState::Stopped => found,
            _ => {
                return Err(WorkflowError::InvalidState {
                    action: "analyze",
                    state: state.as_str(),
                })
            }
        };

        if let Some(report) = self.report_for(recording.id()) {
            debug!("Reusing analysis of recording {}", recording.id());
            return Ok(AnalysisStart::Cached(report.clone()));
        }

        if let Some((ticket, _)) = self.pending.take() {
            debug!("Superseding analysis request {:?}", ticket);
        }

        self.next_ticket += 1;
        let ticket = AnalysisTicket(self.next_ticket);
        self.pending = Some((ticket, recording.id().to_string()));
        self.last_error = None;

        info!("Analyzing recording {}", recording.id());

        Ok(AnalysisStart::Pending(AnalysisJob {
            ticket,
            request: AnalysisRequest {
                recording_id: recording.id().to_string(),
                audio: audio.wav.clone(),
                duration_secs: recording.elapsed_secs(),
                sample_rate: audio.sample_rate,
            },
        }))
    }

    /// Store the outcome of a request started with `begin`.
    pub fn finish(
        &mut self,
        ticket: AnalysisTicket,
        result: Result<VoiceAnalysisReport, AnalysisError>,
    ) -> Result<VoiceAnalysisReport, WorkflowError> {
        let recording_id = match self.pending.take() {
            Some((pending, recording_id)) if pending == ticket => recording_id,
            other => {
                self.pending = other;
                debug!("Discarding stale analysis result {:?}", ticket);
                return Err(WorkflowError::InvalidState {
                    action: "store analysis",
                    state: "superseded",
                });
            }
        };

        let report = result
            .and_then(|report| report.check_contract().map(|_| report))
            .map_err(|e| {
                warn!("Analysis of {} failed: {}", recording_id, e);
                self.last_error = Some(e.to_string());
                WorkflowError::AnalysisFailed(e.to_string())
            })?;

        info!(
            "Analysis of {} ready (clarity {}%, load {})",
            recording_id, report.clarity_score_pct, report.cognitive_load_level
        );
        self.stored = Some(StoredReport {
            recording_id,
            report: report.clone(),
        });
        Ok(report)
    }

    /// Forget the report and any request in flight
    pub fn invalidate(&mut self) {
        if self.stored.take().is_some() {
            debug!("Voice analysis discarded");
        }
        self.pending = None;
        self.last_error = None;
    }
}
