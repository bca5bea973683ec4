//! Appointment booking workflow
//!
//! One state machine drives a booking through three wizard steps:
//!
//! 1. **Details** - the appointment form
//! 2. **Voice** - record the reading passage, then analyze it
//! 3. **Review** - submit the request together with the analysis
//!
//! A workflow is opened for a resolved session, owns every entity it
//! creates, and closes after a successful submission or a cancel. The CLI
//! wizard, the daemon and the TUI all drive the same [`BookingWorkflow`].

pub mod analysis;
pub mod capture;
pub mod directory;
mod error;
pub mod form;
pub mod review;
pub mod session;

pub use error::WorkflowError;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::analysis::{build_service, AnalysisError, AnalysisService};
use crate::audio::{CpalMicrophone, DeviceArbiter, DeviceMedia};
use crate::config::Settings;
use crate::storage::SqliteScheduler;

use analysis::{AnalysisStage, AnalysisStart, AnalysisStatus, AnalysisTicket, VoiceAnalysisReport};
use capture::{AudioCaptureStage, CaptureEvent, CaptureOptions, CaptureState, RecordingSession};
use directory::{ProviderDirectory, StaticDirectory};
use form::{AppointmentForm, AppointmentRequest, FormField};
use review::{
    BookingConfirmation, ReviewStage, SchedulingService, SubmissionError, SubmitJob, SubmitStatus,
    SubmitTicket,
};
use session::{resolve_session, IdentityProvider, SessionContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardStep {
    Details,
    Voice,
    Review,
}

impl WizardStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Details => "details",
            Self::Voice => "voice",
            Self::Review => "review",
        }
    }

    /// 1-based position shown as "Step n of 3"
    pub fn number(&self) -> usize {
        match self {
            Self::Details => 1,
            Self::Voice => 2,
            Self::Review => 3,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Details => "Appointment Details",
            Self::Voice => "Voice Analysis",
            Self::Review => "Review & Submit",
        }
    }
}

/// User intent fed to [`BookingWorkflow::dispatch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    UpdateField { field: FormField, value: String },
    Advance,
    Back,
    Capture { event: CaptureEvent },
    Analyze,
    Submit,
    Cancel,
}

/// Outcome of a dispatched event
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowUpdate {
    FieldUpdated(FormField),
    Step(WizardStep),
    Capture(CaptureState),
    Analyzed(VoiceAnalysisReport),
    Submitted(BookingConfirmation),
    Cancelled,
}

/// Collaborators a workflow runs against
#[derive(Clone)]
pub struct WorkflowDeps {
    pub directory: Arc<dyn ProviderDirectory>,
    pub media: Arc<dyn DeviceMedia>,
    pub arbiter: DeviceArbiter,
    pub analysis: Arc<dyn AnalysisService>,
    pub scheduler: Arc<dyn SchedulingService>,
    pub capture: CaptureOptions,
}

impl WorkflowDeps {
    /// Production collaborators: the configured microphone, analysis
    /// backend and the local appointment database.
    pub fn from_settings(settings: &Settings, arbiter: DeviceArbiter) -> anyhow::Result<Self> {
        Ok(Self {
            directory: Arc::new(StaticDirectory::default()),
            media: Arc::new(CpalMicrophone::new(settings)),
            arbiter,
            analysis: build_service(settings)?,
            scheduler: Arc::new(SqliteScheduler::from_settings(settings)),
            capture: CaptureOptions::from_settings(settings),
        })
    }
}

/// Serializable view of a workflow, for status displays and IPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub user_id: String,
    pub display_name: String,
    pub step: WizardStep,
    pub request: AppointmentRequest,
    pub capture_state: CaptureState,
    pub elapsed_secs: u64,
    pub max_recording_secs: u64,
    pub result_url: Option<String>,
    pub analysis_status: AnalysisStatus,
    pub analysis: Option<VoiceAnalysisReport>,
    pub analysis_error: Option<String>,
    pub submit_status: SubmitStatus,
    pub submit_error: Option<String>,
    pub confirmation: Option<BookingConfirmation>,
    pub closed: bool,
}

pub struct BookingWorkflow {
    session: SessionContext,
    directory: Arc<dyn ProviderDirectory>,
    analysis_service: Arc<dyn AnalysisService>,
    scheduler: Arc<dyn SchedulingService>,
    step: WizardStep,
    form: AppointmentForm,
    recorder: AudioCaptureStage,
    analysis: AnalysisStage,
    review: ReviewStage,
    closed: bool,
}

impl BookingWorkflow {
    /// Resolve the session and open a workflow for it.
    ///
    /// Fails with `Unauthenticated` before anything is constructed.
    pub fn open(
        identity: &dyn IdentityProvider,
        deps: WorkflowDeps,
    ) -> Result<Self, WorkflowError> {
        let session = resolve_session(identity)?;
        Ok(Self::with_session(session, deps))
    }

    pub fn with_session(session: SessionContext, deps: WorkflowDeps) -> Self {
        let owner = format!(
            "booking:{}:{}",
            session.user_id,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        info!("Booking workflow opened for {} ({})", session.user_id, session.role.as_str());

        Self {
            recorder: AudioCaptureStage::new(owner, deps.media, deps.arbiter, deps.capture),
            session,
            directory: deps.directory,
            analysis_service: deps.analysis,
            scheduler: deps.scheduler,
            step: WizardStep::Details,
            form: AppointmentForm::new(),
            analysis: AnalysisStage::new(),
            review: ReviewStage::new(),
            closed: false,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn request(&self) -> &AppointmentRequest {
        self.form.request()
    }

    pub fn directory(&self) -> &dyn ProviderDirectory {
        self.directory.as_ref()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.recorder.state()
    }

    pub fn recording(&self) -> Option<&RecordingSession> {
        self.recorder.session()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.recorder.elapsed_secs()
    }

    pub fn analysis_status(&self) -> AnalysisStatus {
        self.analysis.status()
    }

    pub fn report(&self) -> Option<&VoiceAnalysisReport> {
        self.analysis.report()
    }

    pub fn submit_status(&self) -> SubmitStatus {
        self.review.status()
    }

    pub fn confirmation(&self) -> Option<&BookingConfirmation> {
        self.review.confirmation()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), WorkflowError> {
        if self.closed {
            Err(WorkflowError::Closed)
        } else {
            Ok(())
        }
    }

    /// Apply one user event
    pub async fn dispatch(&mut self, event: WorkflowEvent) -> Result<WorkflowUpdate, WorkflowError> {
        debug!("Workflow event: {:?}", event);
        match event {
            WorkflowEvent::UpdateField { field, value } => {
                self.update_field(field, &value)?;
                Ok(WorkflowUpdate::FieldUpdated(field))
            }
            WorkflowEvent::Advance => self.advance().map(WorkflowUpdate::Step),
            WorkflowEvent::Back => self.back().map(WorkflowUpdate::Step),
            WorkflowEvent::Capture { event } => self.capture(event).await.map(WorkflowUpdate::Capture),
            WorkflowEvent::Analyze => self.analyze().await.map(WorkflowUpdate::Analyzed),
            WorkflowEvent::Submit => self.submit().await.map(WorkflowUpdate::Submitted),
            WorkflowEvent::Cancel => self.cancel().map(|_| WorkflowUpdate::Cancelled),
        }
    }

    pub fn update_field(&mut self, field: FormField, value: &str) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        self.form
            .update_field(self.directory.as_ref(), field, value)
    }

    /// Validate the details and move on to the voice step.
    ///
    /// Nothing is frozen; the user may come back and edit.
    pub fn validate_and_advance(&mut self) -> Result<WizardStep, WorkflowError> {
        self.ensure_open()?;
        self.form.request().validate()?;
        if self.step == WizardStep::Details {
            self.step = WizardStep::Voice;
        }
        Ok(self.step)
    }

    pub fn advance(&mut self) -> Result<WizardStep, WorkflowError> {
        self.ensure_open()?;
        match self.step {
            WizardStep::Details => self.validate_and_advance(),
            WizardStep::Voice => {
                if self.analysis.report().is_none() {
                    return Err(WorkflowError::MissingAnalysis);
                }
                self.step = WizardStep::Review;
                Ok(self.step)
            }
            WizardStep::Review => Err(WorkflowError::InvalidState {
                action: "advance",
                state: "on the last step",
            }),
        }
    }

    pub fn back(&mut self) -> Result<WizardStep, WorkflowError> {
        self.ensure_open()?;
        self.step = match self.step {
            WizardStep::Details => {
                return Err(WorkflowError::InvalidState {
                    action: "go back",
                    state: "on the first step",
                })
            }
            WizardStep::Voice => WizardStep::Details,
            WizardStep::Review => WizardStep::Voice,
        };
        Ok(self.step)
    }

    /// Drive the recording. A successful re-record discards the report.
    pub async fn capture(&mut self, event: CaptureEvent) -> Result<CaptureState, WorkflowError> {
        self.ensure_open()?;
        let state = self.recorder.dispatch(event).await?;

        if event == CaptureEvent::ReRecord {
            self.analysis.invalidate();
            self.review.invalidate();
            if self.step == WizardStep::Review {
                self.step = WizardStep::Voice;
            }
        }
        Ok(state)
    }

    /// First half of an analysis: either the cached report or a job to run.
    pub fn begin_analysis(&mut self) -> Result<AnalysisStart, WorkflowError> {
        self.ensure_open()?;
        self.recorder.absorb_eviction();
        self.analysis.begin(self.recorder.session())
    }

    pub fn finish_analysis(
        &mut self,
        ticket: AnalysisTicket,
        result: Result<VoiceAnalysisReport, AnalysisError>,
    ) -> Result<VoiceAnalysisReport, WorkflowError> {
        self.ensure_open()?;
        self.analysis.finish(ticket, result)
    }

    /// Analyze the stopped recording and keep the report
    pub async fn analyze(&mut self) -> Result<VoiceAnalysisReport, WorkflowError> {
        match self.begin_analysis()? {
            AnalysisStart::Cached(report) => Ok(report),
            AnalysisStart::Pending(job) => {
                let result = self.analysis_service.analyze(job.request).await;
                self.finish_analysis(job.ticket, result)
            }
        }
    }

    /// First half of a submission
    pub fn begin_submission(&mut self) -> Result<SubmitJob, WorkflowError> {
        self.ensure_open()?;
        let recording_url = self.recorder.session().and_then(|s| s.result_url());
        self.review.begin(
            &self.session,
            self.form.request(),
            self.analysis.report(),
            recording_url,
        )
    }

    /// Second half of a submission. Success closes the workflow.
    pub fn finish_submission(
        &mut self,
        ticket: SubmitTicket,
        result: Result<BookingConfirmation, SubmissionError>,
    ) -> Result<BookingConfirmation, WorkflowError> {
        self.ensure_open()?;
        let confirmation = self.review.finish(ticket, result)?;
        self.close(true);
        Ok(confirmation)
    }

    /// Submit the booking with its analysis
    pub async fn submit(&mut self) -> Result<BookingConfirmation, WorkflowError> {
        let job = self.begin_submission()?;
        let result = self.scheduler.create_booking(&job.submission).await;
        self.finish_submission(job.ticket, result)
    }

    /// Abandon the booking and release everything it holds
    pub fn cancel(&mut self) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        self.close(false);
        info!("Booking workflow cancelled for {}", self.session.user_id);
        Ok(())
    }

    /// Pick up an eviction of the microphone without waiting for the next event
    pub fn refresh(&mut self) {
        if !self.closed {
            self.recorder.absorb_eviction();
        }
    }

    fn close(&mut self, submitted: bool) {
        self.recorder.release(submitted);
        self.analysis.invalidate();
        self.review.invalidate();
        self.closed = true;
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            user_id: self.session.user_id.clone(),
            display_name: self.session.display_name.clone(),
            step: self.step,
            request: self.form.request().clone(),
            capture_state: self.recorder.state(),
            elapsed_secs: self.recorder.elapsed_secs(),
            max_recording_secs: self.recorder.max_duration_secs(),
            result_url: self
                .recorder
                .session()
                .and_then(|s| s.result_url())
                .map(str::to_string),
            analysis_status: self.analysis.status(),
            analysis: self.analysis.report().cloned(),
            analysis_error: self.analysis.last_error().map(str::to_string),
            submit_status: self.review.status(),
            submit_error: self.review.last_error().map(str::to_string),
            confirmation: self.review.confirmation().cloned(),
            closed: self.closed,
        }
    }
}

impl Drop for BookingWorkflow {
    fn drop(&mut self) {
        if !self.closed {
            debug!("Booking workflow dropped while open; releasing resources");
            self.close(false);
        }
    }
}

/// `mm:ss` display of a recording time
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::workflow::analysis::CognitiveLoad;
    use crate::workflow::session::StaticIdentityProvider;
    use std::sync::atomic::Ordering;

    #[test]
    fn open_without_session_is_unauthenticated() {
        let harness = Harness::new();
        let result = BookingWorkflow::open(&StaticIdentityProvider(None), harness.deps());
        assert!(matches!(result, Err(WorkflowError::Unauthenticated)));
    }

    #[tokio::test]
    async fn end_to_end_booking() {
        let harness = Harness::new();
        let mut workflow =
            BookingWorkflow::open(&StaticIdentityProvider(Some(patient())), harness.deps())
                .unwrap();

        fill_details(&mut workflow);
        assert_eq!(workflow.validate_and_advance(), Ok(WizardStep::Voice));

        workflow.capture(CaptureEvent::Start).await.unwrap();
        for _ in 0..5 {
            workflow.capture(CaptureEvent::Tick).await.unwrap();
        }
        assert_eq!(workflow.elapsed_secs(), 5);
        workflow.capture(CaptureEvent::Stop).await.unwrap();

        let url = workflow.recording().and_then(|r| r.result_url()).unwrap();
        assert!(!url.is_empty());

        let report = workflow.analyze().await.unwrap();
        assert!(report.clarity_score_pct <= 100);
        assert!(matches!(
            report.cognitive_load_level,
            CognitiveLoad::Low | CognitiveLoad::Medium | CognitiveLoad::High
        ));
        assert_eq!(report.duration_secs, 5);
        assert_eq!(workflow.advance(), Ok(WizardStep::Review));

        let confirmation = workflow.submit().await.unwrap();
        assert_eq!(confirmation.doctor_id, "dr-chen");
        assert_eq!(confirmation.date, "2025-03-01");
        assert!(workflow.is_closed());
        assert_eq!(harness.media.releases(), 1);

        let sent = harness.scheduler.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.patient.user_id, "p-100");
        assert_eq!(sent.analysis, report);
    }

    #[tokio::test]
    async fn validation_failure_keeps_details_step() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        workflow.update_field(FormField::Date, "2025-03-01").unwrap();

        let err = workflow.advance().unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Validation {
                fields: vec![FormField::Time, FormField::DoctorId, FormField::Reason]
            }
        );
        assert_eq!(workflow.step(), WizardStep::Details);
    }

    #[tokio::test]
    async fn unknown_doctor_is_rejected() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        assert_eq!(
            workflow.update_field(FormField::DoctorId, "dr-who"),
            Err(WorkflowError::UnknownDoctor("dr-who".to_string()))
        );
        assert!(workflow.request().doctor_id.is_empty());
    }

    #[tokio::test]
    async fn analyze_requires_stopped_recording() {
        let harness = Harness::new();
        let mut workflow = harness.open();

        assert!(matches!(
            workflow.analyze().await,
            Err(WorkflowError::InvalidState { action: "analyze", state: "idle" })
        ));

        workflow.capture(CaptureEvent::Start).await.unwrap();
        assert!(matches!(
            workflow.analyze().await,
            Err(WorkflowError::InvalidState { state: "recording", .. })
        ));

        workflow.capture(CaptureEvent::Pause).await.unwrap();
        assert!(matches!(
            workflow.analyze().await,
            Err(WorkflowError::InvalidState { state: "paused", .. })
        ));
        assert_eq!(harness.analysis.calls(), 0);
    }

    #[tokio::test]
    async fn submit_without_report_never_calls_scheduler() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        fill_details(&mut workflow);

        assert_eq!(workflow.submit().await, Err(WorkflowError::MissingAnalysis));

        record(&mut workflow, 2).await;
        assert_eq!(workflow.submit().await, Err(WorkflowError::MissingAnalysis));
        assert_eq!(harness.scheduler.calls(), 0);
        assert!(!workflow.is_closed());
    }

    #[tokio::test]
    async fn re_record_discards_report() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        fill_details(&mut workflow);
        workflow.advance().unwrap();

        record(&mut workflow, 3).await;
        workflow.analyze().await.unwrap();
        workflow.advance().unwrap();

        assert_eq!(workflow.capture(CaptureEvent::ReRecord).await, Ok(CaptureState::Idle));
        assert!(workflow.report().is_none());
        assert_eq!(workflow.step(), WizardStep::Voice);

        assert_eq!(workflow.submit().await, Err(WorkflowError::MissingAnalysis));
        assert_eq!(harness.scheduler.calls(), 0);
    }

    #[tokio::test]
    async fn report_is_reused_for_same_recording() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        record(&mut workflow, 1).await;

        let first = workflow.analyze().await.unwrap();
        let second = workflow.analyze().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(harness.analysis.calls(), 1);
    }

    #[tokio::test]
    async fn cancel_while_recording_releases_once() {
        let harness = Harness::new();
        let mut workflow = harness.open();

        workflow.capture(CaptureEvent::Start).await.unwrap();
        workflow.capture(CaptureEvent::Tick).await.unwrap();
        workflow.cancel().unwrap();
        assert_eq!(harness.media.releases(), 1);

        drop(workflow);
        assert_eq!(harness.media.releases(), 1);
        assert!(harness.arbiter.holder().is_none());
    }

    #[tokio::test]
    async fn dropping_open_workflow_releases_device() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        workflow.capture(CaptureEvent::Start).await.unwrap();

        drop(workflow);
        assert_eq!(harness.media.releases(), 1);
    }

    #[tokio::test]
    async fn second_workflow_evicts_first_recording() {
        let harness = Harness::new();
        let mut first = harness.open();
        let mut second = harness.open();

        first.capture(CaptureEvent::Start).await.unwrap();
        first.capture(CaptureEvent::Tick).await.unwrap();
        second.capture(CaptureEvent::Start).await.unwrap();
        assert_eq!(harness.media.releases(), 1);

        first.refresh();
        assert_eq!(first.capture_state(), CaptureState::Stopped);
        assert!(first.recording().and_then(|r| r.result_url()).is_some());

        // The evicted recording is still analyzable.
        first.analyze().await.unwrap();
        assert_eq!(second.capture_state(), CaptureState::Recording);
    }

    #[tokio::test]
    async fn analysis_failure_keeps_recording_and_retries() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        record(&mut workflow, 2).await;

        harness.analysis.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            workflow.analyze().await,
            Err(WorkflowError::AnalysisFailed(_))
        ));
        assert_eq!(workflow.capture_state(), CaptureState::Stopped);
        assert_eq!(workflow.analysis_status(), AnalysisStatus::Failed);

        harness.analysis.fail.store(false, Ordering::SeqCst);
        workflow.analyze().await.unwrap();
        assert_eq!(harness.analysis.calls(), 2);
    }

    #[tokio::test]
    async fn submission_failure_keeps_report_for_retry() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        fill_details(&mut workflow);
        record(&mut workflow, 2).await;
        workflow.analyze().await.unwrap();

        harness.scheduler.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            workflow.submit().await,
            Err(WorkflowError::SubmissionFailed(_))
        ));
        assert!(workflow.report().is_some());
        assert!(!workflow.is_closed());
        assert_eq!(workflow.submit_status(), SubmitStatus::Failed);

        harness.scheduler.fail.store(false, Ordering::SeqCst);
        workflow.submit().await.unwrap();
        assert_eq!(harness.scheduler.calls(), 2);
    }

    #[tokio::test]
    async fn closed_workflow_rejects_events() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        fill_details(&mut workflow);
        record(&mut workflow, 1).await;
        workflow.analyze().await.unwrap();
        workflow.submit().await.unwrap();

        assert_eq!(workflow.submit().await, Err(WorkflowError::Closed));
        assert_eq!(
            workflow
                .dispatch(WorkflowEvent::Capture {
                    event: CaptureEvent::Start
                })
                .await,
            Err(WorkflowError::Closed)
        );
        assert_eq!(workflow.cancel(), Err(WorkflowError::Closed));
        assert_eq!(harness.scheduler.calls(), 1);
    }

    #[tokio::test]
    async fn stale_analysis_after_re_record_is_discarded() {
        let harness = Harness::new();
        let mut workflow = harness.open();
        record(&mut workflow, 1).await;

        let job = match workflow.begin_analysis().unwrap() {
            AnalysisStart::Pending(job) => job,
            AnalysisStart::Cached(_) => panic!("nothing cached yet"),
        };
        let result = harness.analysis.analyze(job.request.clone()).await;

        workflow.capture(CaptureEvent::ReRecord).await.unwrap();
        assert!(workflow.finish_analysis(job.ticket, result).is_err());
        assert!(workflow.report().is_none());
    }

    #[tokio::test]
    async fn dispatch_routes_events() {
        let harness = Harness::new();
        let mut workflow = harness.open();

        let update = workflow
            .dispatch(WorkflowEvent::UpdateField {
                field: FormField::Reason,
                value: "memory lapses".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(update, WorkflowUpdate::FieldUpdated(FormField::Reason));
        assert_eq!(workflow.request().reason, "memory lapses");

        assert!(matches!(
            workflow.dispatch(WorkflowEvent::Back).await,
            Err(WorkflowError::InvalidState { .. })
        ));
        assert_eq!(
            workflow.dispatch(WorkflowEvent::Cancel).await,
            Ok(WorkflowUpdate::Cancelled)
        );
    }

    #[test]
    fn elapsed_formats_as_minutes_and_seconds() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(125), "02:05");
    }
}
