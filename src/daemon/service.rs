//! Main daemon service implementation

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::analysis::AnalysisError;
use crate::audio::DeviceArbiter;
use crate::config::Settings;
use crate::daemon::ipc::{DaemonRequest, DaemonResponse};
use crate::daemon::server::{CommandReceiver, IpcServer};
use crate::daemon::state::DaemonState;
use crate::workflow::analysis::{AnalysisTicket, VoiceAnalysisReport};
use crate::workflow::capture::CaptureEvent;
use crate::workflow::session::{FileIdentityProvider, IdentityProvider};
use crate::workflow::{WorkflowDeps, WorkflowError, WorkflowEvent};

type AnalysisOutcome = (AnalysisTicket, Result<VoiceAnalysisReport, AnalysisError>);

/// Run the daemon service
pub async fn run(settings: &Settings) -> Result<()> {
    info!("Starting neurocare daemon");

    settings.ensure_dirs()?;

    let deps = WorkflowDeps::from_settings(settings, DeviceArbiter::new())?;
    info!("Analysis backend: {}", deps.analysis.name());

    let pid = std::process::id();
    std::fs::write(settings.pid_path(), pid.to_string())?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<(DaemonRequest, mpsc::Sender<DaemonResponse>)>(32);

    let mut server = IpcServer::new(settings.socket_path());
    if let Err(e) = server.start().await {
        let _ = std::fs::remove_file(settings.pid_path());
        return Err(e);
    }

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(cmd_tx).await {
            error!("IPC server error: {}", e);
        }
    });

    let identity = FileIdentityProvider::from_settings(settings);
    let handler_result = command_handler(&identity, DaemonState::new(deps), cmd_rx).await;

    info!("Shutting down daemon");

    let _ = std::fs::remove_file(settings.pid_path());
    server_handle.abort();

    handler_result
}

/// Handle incoming commands, the recording clock and finished analyses
async fn command_handler(
    identity: &dyn IdentityProvider,
    mut state: DaemonState,
    mut cmd_rx: CommandReceiver,
) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let (analysis_tx, mut analysis_rx) = mpsc::channel::<AnalysisOutcome>(8);

    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                let Some((request, resp_tx)) = command else {
                    break;
                };

                if matches!(request, DaemonRequest::Shutdown) {
                    state.shutdown();
                    let _ = resp_tx.send(DaemonResponse::Ok).await;
                    break;
                }

                let restarts_clock = starts_recording(&request);
                let response = handle_request(identity, &mut state, request, &analysis_tx).await;
                if restarts_clock && matches!(response, DaemonResponse::Booking(_)) {
                    // Count whole seconds from the moment recording (re)started
                    ticker.reset();
                }
                let _ = resp_tx.send(response).await;
            }
            _ = ticker.tick() => state.tick().await,
            Some((ticket, result)) = analysis_rx.recv() => state.finish_analysis(ticket, result),
        }
    }

    Ok(())
}

fn starts_recording(request: &DaemonRequest) -> bool {
    matches!(
        request,
        DaemonRequest::Booking {
            event: WorkflowEvent::Capture {
                event: CaptureEvent::Start | CaptureEvent::Resume
            }
        }
    )
}

async fn handle_request(
    identity: &dyn IdentityProvider,
    state: &mut DaemonState,
    request: DaemonRequest,
    analysis_tx: &mpsc::Sender<AnalysisOutcome>,
) -> DaemonResponse {
    match request {
        DaemonRequest::OpenBooking => match state.open_booking(identity) {
            Ok(snapshot) => DaemonResponse::Booking(snapshot),
            Err(WorkflowError::Unauthenticated) => DaemonResponse::Error {
                message: "Not signed in. Run `neurocare login` first".to_string(),
            },
            Err(e) => DaemonResponse::Error {
                message: e.to_string(),
            },
        },
        DaemonRequest::Booking { event } => match state.apply(event).await {
            Ok(applied) => {
                if let Some(job) = applied.job {
                    let service = state.analysis_service();
                    let tx = analysis_tx.clone();
                    tokio::spawn(async move {
                        let result = service.analyze(job.request).await;
                        let _ = tx.send((job.ticket, result)).await;
                    });
                }
                DaemonResponse::Booking(applied.snapshot)
            }
            Err(e) => DaemonResponse::Error {
                message: format!("{:#}", e),
            },
        },
        DaemonRequest::GetBooking => match state.snapshot() {
            Some(snapshot) => DaemonResponse::Booking(snapshot),
            None => DaemonResponse::Error {
                message: "No booking open. Run `neurocare booking open` first".to_string(),
            },
        },
        DaemonRequest::GetStatus => DaemonResponse::Status(state.status()),
        DaemonRequest::Ping => DaemonResponse::Pong,
        DaemonRequest::Shutdown => DaemonResponse::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::analysis::AnalysisStatus;
    use crate::workflow::session::StaticIdentityProvider;
    use crate::workflow::test_support::{patient, Harness};

    async fn request(
        handler: &mpsc::Sender<(DaemonRequest, mpsc::Sender<DaemonResponse>)>,
        req: DaemonRequest,
    ) -> DaemonResponse {
        let (tx, mut rx) = mpsc::channel(1);
        handler.send((req, tx)).await.unwrap();
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn handler_hosts_a_booking_until_shutdown() {
        let harness = Harness::new();
        let state = DaemonState::new(harness.deps());
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let handler = tokio::spawn(async move {
            let identity = StaticIdentityProvider(Some(patient()));
            command_handler(&identity, state, cmd_rx).await
        });

        assert!(matches!(
            request(&cmd_tx, DaemonRequest::Ping).await,
            DaemonResponse::Pong
        ));
        assert!(matches!(
            request(&cmd_tx, DaemonRequest::GetBooking).await,
            DaemonResponse::Error { .. }
        ));
        assert!(matches!(
            request(&cmd_tx, DaemonRequest::OpenBooking).await,
            DaemonResponse::Booking(_)
        ));

        for event in [CaptureEvent::Start, CaptureEvent::Stop] {
            let event = WorkflowEvent::Capture { event };
            request(&cmd_tx, DaemonRequest::Booking { event }).await;
        }
        let event = WorkflowEvent::Analyze;
        request(&cmd_tx, DaemonRequest::Booking { event }).await;

        let mut ready = false;
        for _ in 0..50 {
            let response = request(&cmd_tx, DaemonRequest::GetBooking).await;
            if let DaemonResponse::Booking(snapshot) = response {
                if snapshot.analysis_status == AnalysisStatus::Ready {
                    ready = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ready);

        assert!(matches!(
            request(&cmd_tx, DaemonRequest::Shutdown).await,
            DaemonResponse::Ok
        ));
        handler.await.unwrap().unwrap();
        assert!(harness.arbiter.holder().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn recording_clock_starts_with_the_recording() {
        let harness = Harness::new();
        let state = DaemonState::new(harness.deps());
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let handler = tokio::spawn(async move {
            let identity = StaticIdentityProvider(Some(patient()));
            command_handler(&identity, state, cmd_rx).await
        });

        request(&cmd_tx, DaemonRequest::OpenBooking).await;
        tokio::time::advance(Duration::from_millis(700)).await;

        let event = WorkflowEvent::Capture {
            event: CaptureEvent::Start,
        };
        request(&cmd_tx, DaemonRequest::Booking { event }).await;

        let elapsed = |response: DaemonResponse| match response {
            DaemonResponse::Booking(snapshot) => snapshot.elapsed_secs,
            other => panic!("unexpected response: {:?}", other),
        };

        // The ticker's original deadline passes here; it must not count
        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert_eq!(elapsed(request(&cmd_tx, DaemonRequest::GetBooking).await), 0);

        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(elapsed(request(&cmd_tx, DaemonRequest::GetBooking).await), 1);

        request(&cmd_tx, DaemonRequest::Shutdown).await;
        handler.await.unwrap().unwrap();
    }

    #[test]
    fn only_start_and_resume_restart_the_clock() {
        let capture = |event| DaemonRequest::Booking {
            event: WorkflowEvent::Capture { event },
        };
        assert!(starts_recording(&capture(CaptureEvent::Start)));
        assert!(starts_recording(&capture(CaptureEvent::Resume)));
        assert!(!starts_recording(&capture(CaptureEvent::Pause)));
        assert!(!starts_recording(&DaemonRequest::Ping));
    }

    #[tokio::test]
    async fn signed_out_open_points_at_login() {
        let harness = Harness::new();
        let mut state = DaemonState::new(harness.deps());
        let (tx, _rx) = mpsc::channel(1);

        let response = handle_request(
            &StaticIdentityProvider(None),
            &mut state,
            DaemonRequest::OpenBooking,
            &tx,
        )
        .await;
        match response {
            DaemonResponse::Error { message } => assert!(message.contains("neurocare login")),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
