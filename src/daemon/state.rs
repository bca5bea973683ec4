//! Booking hosted by the daemon
//!
//! The daemon keeps at most one booking workflow alive between CLI
//! invocations. Everything here runs on the command-handler task, so the
//! state is owned outright rather than shared.

use anyhow::Result;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisError, AnalysisService};
use crate::daemon::ipc::DaemonStatus;
use crate::workflow::analysis::{AnalysisJob, AnalysisStart, AnalysisTicket, VoiceAnalysisReport};
use crate::workflow::capture::{CaptureEvent, CaptureState};
use crate::workflow::session::{resolve_session, IdentityProvider};
use crate::workflow::{
    BookingWorkflow, WorkflowDeps, WorkflowError, WorkflowEvent, WorkflowSnapshot,
};

/// Result of applying one event
pub struct Applied {
    pub snapshot: WorkflowSnapshot,
    /// Analysis the caller must run and report back through
    /// [`DaemonState::finish_analysis`]
    pub job: Option<AnalysisJob>,
}

pub struct DaemonState {
    started_at: Instant,
    deps: WorkflowDeps,
    booking: Option<BookingWorkflow>,
}

impl DaemonState {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self {
            started_at: Instant::now(),
            deps,
            booking: None,
        }
    }

    pub fn analysis_service(&self) -> std::sync::Arc<dyn AnalysisService> {
        self.deps.analysis.clone()
    }

    /// Open a booking for the signed-in user.
    ///
    /// An open booking of the same user is kept; anything else is replaced,
    /// which releases whatever the old booking held.
    pub fn open_booking(
        &mut self,
        identity: &dyn IdentityProvider,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        let session = resolve_session(identity)?;

        if let Some(existing) = &self.booking {
            if !existing.is_closed() && existing.session() == &session {
                debug!("Reusing open booking for {}", session.user_id);
                return Ok(existing.snapshot());
            }
        }

        let workflow = BookingWorkflow::with_session(session, self.deps.clone());
        let snapshot = workflow.snapshot();
        self.booking = Some(workflow);
        Ok(snapshot)
    }

    fn booking_mut(&mut self) -> Result<&mut BookingWorkflow> {
        match self.booking.as_mut() {
            Some(booking) => Ok(booking),
            None => anyhow::bail!("No booking open. Run `neurocare booking open` first"),
        }
    }

    pub fn snapshot(&self) -> Option<WorkflowSnapshot> {
        self.booking.as_ref().map(|b| b.snapshot())
    }

    /// Apply an event to the hosted booking.
    ///
    /// `Analyze` only begins the analysis; the service call is left to the
    /// caller so the daemon keeps answering while it runs.
    pub async fn apply(&mut self, event: WorkflowEvent) -> Result<Applied> {
        let booking = self.booking_mut()?;
        booking.refresh();

        let job = match event {
            WorkflowEvent::Analyze => match booking.begin_analysis()? {
                AnalysisStart::Cached(_) => None,
                AnalysisStart::Pending(job) => {
                    info!("Analyzing recording {}", job.request.recording_id);
                    Some(job)
                }
            },
            event => {
                booking.dispatch(event).await?;
                None
            }
        };

        Ok(Applied {
            snapshot: booking.snapshot(),
            job,
        })
    }

    /// Store the outcome of an analysis started by [`DaemonState::apply`]
    pub fn finish_analysis(
        &mut self,
        ticket: AnalysisTicket,
        result: Result<VoiceAnalysisReport, AnalysisError>,
    ) {
        let Some(booking) = self.booking.as_mut() else {
            debug!("Analysis finished with no booking open");
            return;
        };

        match booking.finish_analysis(ticket, result) {
            Ok(report) => info!(
                "Voice analysis ready: {} wpm, clarity {}%",
                report.speech_rate_wpm, report.clarity_score_pct
            ),
            Err(WorkflowError::InvalidState { .. }) | Err(WorkflowError::Closed) => {
                debug!("Discarded stale analysis result")
            }
            Err(e) => warn!("{}", e),
        }
    }

    /// One second of wall-clock time for the hosted recording
    pub async fn tick(&mut self) {
        let Some(booking) = self.booking.as_mut() else {
            return;
        };
        if booking.is_closed() {
            return;
        }

        booking.refresh();
        if booking.capture_state() != CaptureState::Recording {
            return;
        }

        match booking.capture(CaptureEvent::Tick).await {
            Ok(CaptureState::Stopped) => {
                info!("Recording reached its limit after {}s", booking.elapsed_secs())
            }
            Ok(_) => {}
            Err(e) => warn!("Recording tick failed: {}", e),
        }
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            pid: std::process::id(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            mic_holder: self.deps.arbiter.holder(),
            analysis_backend: self.deps.analysis.name().to_string(),
            booking: self.snapshot(),
        }
    }

    /// Abandon the hosted booking, if it is still open
    pub fn shutdown(&mut self) {
        if let Some(mut booking) = self.booking.take() {
            if !booking.is_closed() {
                let _ = booking.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::analysis::AnalysisStatus;
    use crate::workflow::form::FormField;
    use crate::workflow::session::StaticIdentityProvider;
    use crate::workflow::test_support::{patient, Harness};
    use crate::workflow::WizardStep;

    fn signed_in() -> StaticIdentityProvider {
        StaticIdentityProvider(Some(patient()))
    }

    #[tokio::test]
    async fn events_need_an_open_booking() {
        let harness = Harness::new();
        let mut state = DaemonState::new(harness.deps());

        let err = state.apply(WorkflowEvent::Advance).await.err().unwrap();
        assert!(err.to_string().contains("booking open"));
    }

    #[test]
    fn open_requires_session() {
        let harness = Harness::new();
        let mut state = DaemonState::new(harness.deps());

        assert_eq!(
            state.open_booking(&StaticIdentityProvider(None)).err(),
            Some(WorkflowError::Unauthenticated)
        );
        assert!(state.snapshot().is_none());
    }

    #[tokio::test]
    async fn reopening_keeps_the_open_booking() {
        let harness = Harness::new();
        let mut state = DaemonState::new(harness.deps());

        state.open_booking(&signed_in()).unwrap();
        state
            .apply(WorkflowEvent::UpdateField {
                field: FormField::Reason,
                value: "checkup".to_string(),
            })
            .await
            .unwrap();

        let snapshot = state.open_booking(&signed_in()).unwrap();
        assert_eq!(snapshot.request.reason, "checkup");
    }

    #[tokio::test]
    async fn ticks_drive_the_recording() {
        let harness = Harness::new();
        let mut state = DaemonState::new(harness.deps());
        state.open_booking(&signed_in()).unwrap();

        state
            .apply(WorkflowEvent::Capture {
                event: CaptureEvent::Start,
            })
            .await
            .unwrap();
        state.tick().await;
        state.tick().await;

        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.capture_state, CaptureState::Recording);
        assert_eq!(snapshot.elapsed_secs, 2);
        assert!(state.status().mic_holder.is_some());
    }

    #[tokio::test]
    async fn analysis_runs_outside_the_state() {
        let harness = Harness::new();
        let mut state = DaemonState::new(harness.deps());
        state.open_booking(&signed_in()).unwrap();

        for event in [CaptureEvent::Start, CaptureEvent::Tick, CaptureEvent::Stop] {
            state
                .apply(WorkflowEvent::Capture { event })
                .await
                .unwrap();
        }

        let applied = state.apply(WorkflowEvent::Analyze).await.unwrap();
        assert_eq!(applied.snapshot.analysis_status, AnalysisStatus::Analyzing);
        let job = applied.job.unwrap();

        let result = state.analysis_service().analyze(job.request).await;
        state.finish_analysis(job.ticket, result);

        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.analysis_status, AnalysisStatus::Ready);
        assert!(snapshot.analysis.is_some());

        // A second analyze reuses the report.
        let again = state.apply(WorkflowEvent::Analyze).await.unwrap();
        assert!(again.job.is_none());
        assert_eq!(harness.analysis.calls(), 1);
    }

    #[tokio::test]
    async fn shutdown_releases_microphone() {
        let harness = Harness::new();
        let mut state = DaemonState::new(harness.deps());
        state.open_booking(&signed_in()).unwrap();
        state
            .apply(WorkflowEvent::Capture {
                event: CaptureEvent::Start,
            })
            .await
            .unwrap();

        state.shutdown();
        assert_eq!(harness.media.releases(), 1);
        assert!(harness.arbiter.holder().is_none());
        assert!(state.snapshot().is_none());
    }

    #[tokio::test]
    async fn workflow_errors_pass_through() {
        let harness = Harness::new();
        let mut state = DaemonState::new(harness.deps());
        state.open_booking(&signed_in()).unwrap();

        let err = state.apply(WorkflowEvent::Advance).await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::Validation { .. })
        ));
        assert_eq!(state.snapshot().unwrap().step, WizardStep::Details);
    }
}
