//! Booking workflow driven through the public library API, with a scripted
//! microphone and the real mock analysis and SQLite scheduler.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use neurocare::analysis::MockAnalysisService;
use neurocare::audio::{AudioStreamHandle, CapturedAudio, DeviceArbiter, DeviceError, DeviceMedia};
use neurocare::storage::{AppointmentStatus, Database, Repository, SqliteScheduler};
use neurocare::workflow::capture::{CaptureEvent, CaptureOptions, CaptureState};
use neurocare::workflow::directory::StaticDirectory;
use neurocare::workflow::form::FormField;
use neurocare::workflow::session::{Role, SessionContext, StaticIdentityProvider};
use neurocare::workflow::{BookingWorkflow, WizardStep, WorkflowDeps};
use neurocare::WorkflowError;

struct ScriptedStream;

impl AudioStreamHandle for ScriptedStream {
    fn pause(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn finish(&mut self) -> Result<CapturedAudio, DeviceError> {
        Ok(CapturedAudio {
            sample_rate: 16000,
            channels: 1,
            samples: vec![0; 16000],
        })
    }

    fn release(&mut self) {}
}

#[derive(Default)]
struct ScriptedMicrophone {
    deny: AtomicBool,
}

#[async_trait]
impl DeviceMedia for ScriptedMicrophone {
    async fn request_microphone(&self) -> Result<Box<dyn AudioStreamHandle>, DeviceError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied("blocked by user".to_string()));
        }
        Ok(Box::new(ScriptedStream))
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

struct Fixture {
    dir: TempDir,
    media: Arc<ScriptedMicrophone>,
    arbiter: DeviceArbiter,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temporary data dir"),
            media: Arc::new(ScriptedMicrophone::default()),
            arbiter: DeviceArbiter::new(),
        }
    }

    fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("neurocare.db")
    }

    fn deps(&self) -> WorkflowDeps {
        WorkflowDeps {
            directory: Arc::new(StaticDirectory::default()),
            media: self.media.clone(),
            arbiter: self.arbiter.clone(),
            analysis: Arc::new(MockAnalysisService::new(Duration::ZERO, Some(11))),
            scheduler: Arc::new(SqliteScheduler::new(self.db_path())),
            capture: CaptureOptions::default(),
        }
    }

    fn open(&self, user_id: &str) -> BookingWorkflow {
        let session = SessionContext {
            user_id: user_id.to_string(),
            display_name: format!("Patient {}", user_id),
            role: Role::Patient,
        };
        BookingWorkflow::open(&StaticIdentityProvider(Some(session)), self.deps())
            .expect("signed-in user can open a booking")
    }
}

fn fill_details(workflow: &mut BookingWorkflow) {
    for (field, value) in [
        (FormField::Date, "2025-03-01"),
        (FormField::Time, "14:00"),
        (FormField::DoctorId, "dr-roberts"),
        (FormField::Reason, "Word-finding difficulties"),
        (FormField::Symptoms, "pauses mid-sentence"),
    ] {
        workflow.update_field(field, value).unwrap();
    }
}

async fn record(workflow: &mut BookingWorkflow, seconds: usize) {
    workflow.capture(CaptureEvent::Start).await.unwrap();
    for _ in 0..seconds {
        workflow.capture(CaptureEvent::Tick).await.unwrap();
    }
    workflow.capture(CaptureEvent::Stop).await.unwrap();
}

#[tokio::test]
async fn submitted_booking_is_stored_with_its_analysis() {
    let fixture = Fixture::new();
    let mut workflow = fixture.open("p-9");

    fill_details(&mut workflow);
    assert_eq!(workflow.validate_and_advance().unwrap(), WizardStep::Voice);

    record(&mut workflow, 20).await;
    let report = workflow.analyze().await.unwrap();
    assert!((1..=100).contains(&report.clarity_score_pct));

    assert_eq!(workflow.advance().unwrap(), WizardStep::Review);
    let confirmation = workflow.submit().await.unwrap();
    assert_eq!(confirmation.status, AppointmentStatus::Pending);
    assert!(workflow.is_closed());
    assert!(fixture.arbiter.holder().is_none());

    let repo = Repository::from_database(Database::open_path(&fixture.db_path()).unwrap());
    let (appointment, analysis) = repo
        .find(&confirmation.appointment_id)
        .unwrap()
        .expect("appointment stored");
    assert_eq!(appointment.patient_id, "p-9");
    assert_eq!(appointment.doctor_id, "dr-roberts");
    assert_eq!(appointment.symptoms.as_deref(), Some("pauses mid-sentence"));
    assert_eq!(analysis.expect("analysis stored").report, report);
}

#[tokio::test]
async fn repeated_analysis_reuses_the_report() {
    let fixture = Fixture::new();
    let mut workflow = fixture.open("p-9");
    fill_details(&mut workflow);
    workflow.validate_and_advance().unwrap();
    record(&mut workflow, 5).await;

    let first = workflow.analyze().await.unwrap();
    let second = workflow.analyze().await.unwrap();
    assert_eq!(first, second);

    // A new recording needs a new analysis
    workflow.capture(CaptureEvent::ReRecord).await.unwrap();
    assert!(matches!(
        workflow.advance(),
        Err(WorkflowError::MissingAnalysis)
    ));
}

#[tokio::test]
async fn a_second_recording_takes_the_microphone() {
    let fixture = Fixture::new();
    let mut first = fixture.open("p-1");
    let mut second = fixture.open("p-2");

    first.capture(CaptureEvent::Start).await.unwrap();
    first.capture(CaptureEvent::Tick).await.unwrap();
    second.capture(CaptureEvent::Start).await.unwrap();

    first.refresh();
    assert_eq!(first.capture_state(), CaptureState::Stopped);
    assert_eq!(second.capture_state(), CaptureState::Recording);
    assert!(fixture.arbiter.holder().is_some());

    second.cancel().unwrap();
    assert!(fixture.arbiter.holder().is_none());
}

#[tokio::test]
async fn denied_microphone_leaves_capture_idle() {
    let fixture = Fixture::new();
    fixture.media.deny.store(true, Ordering::SeqCst);
    let mut workflow = fixture.open("p-5");

    let err = workflow.capture(CaptureEvent::Start).await.unwrap_err();
    assert!(matches!(err, WorkflowError::PermissionDenied(_)));
    assert_eq!(workflow.capture_state(), CaptureState::Idle);

    fixture.media.deny.store(false, Ordering::SeqCst);
    assert_eq!(
        workflow.capture(CaptureEvent::Start).await.unwrap(),
        CaptureState::Recording
    );
}

#[test]
fn signed_out_users_cannot_open_a_booking() {
    let fixture = Fixture::new();
    let result = BookingWorkflow::open(&StaticIdentityProvider(None), fixture.deps());
    assert!(matches!(result, Err(WorkflowError::Unauthenticated)));
}
