use super::*;
use crate::config::ProctorConfig;
use crate::error::{CaptureError, ProctorError};
use crate::events::{EndReason, ProctorEvent};
use crate::media::synthetic::{SyntheticCamera, SyntheticScreen};
use crate::media::{CaptureKind, MediaCaptureAdapter};
use crate::upload::memory::BackendCall;
use crate::upload::{InMemoryBackend, UploadOutcome, UploadStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

fn create_test_config(duration_seconds: u64) -> ProctorConfig {
    let mut config = ProctorConfig::default();
    config.exam.duration_seconds = duration_seconds;
    config
}

fn create_controller(
    config: ProctorConfig,
    camera: SyntheticCamera,
) -> (Arc<ExamController>, Arc<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new());
    let capture = MediaCaptureAdapter::new(
        Arc::new(camera),
        Arc::new(SyntheticScreen::new(1000, true)),
    );
    let controller =
        ExamController::new(config, capture, backend.clone(), backend.clone()).unwrap();
    (Arc::new(controller), backend)
}

fn drain(events: &mut broadcast::Receiver<ProctorEvent>) -> Vec<ProctorEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test(start_paused = true)]
async fn test_five_second_exam_runs_to_completion() {
    let (controller, backend) =
        create_controller(create_test_config(5), SyntheticCamera::new((320, 240)));
    let mut events = controller.event_bus().subscribe();

    let outcome = controller.run(CancellationToken::new()).await.unwrap();

    assert_eq!(controller.exam_status(), ExamStatus::Ended);
    assert_eq!(controller.remaining_seconds(), 0);
    assert_eq!(controller.recording_stop_count(), 1);
    assert_eq!(controller.capture().release_count(), 2);

    let events = drain(&mut events);
    let ticks: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            ProctorEvent::ExamTick { remaining_seconds } => Some(*remaining_seconds),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, vec![5, 4, 3, 2, 1, 0]);
    assert!(events.iter().any(|event| matches!(
        event,
        ProctorEvent::ExamEnded {
            reason: EndReason::TimeExpired,
            ..
        }
    )));

    let receipt = match outcome {
        Some(UploadOutcome::Completed(receipt)) => receipt,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert!(receipt.size_bytes > 0);
    assert_eq!(receipt.total_parts, 1);
    let object = backend.object(&receipt.file_url).unwrap();
    assert_eq!(object.len() as u64, receipt.size_bytes);

    let status = controller.status().snapshot();
    assert_eq!(status.exam_status, ExamStatus::Ended);
    assert!(!status.recording);
    assert!(!status.camera_active);
    assert_eq!(status.upload_percent, 100);
    assert!(matches!(status.upload_status, UploadStatus::Completed { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_camera_failure_only_degrades_the_exam() {
    let denied = CaptureError::PermissionDenied {
        kind: CaptureKind::Camera,
        details: "user dismissed prompt".to_string(),
    };
    let (controller, _backend) =
        create_controller(create_test_config(3), SyntheticCamera::failing(denied));
    let mut events = controller.event_bus().subscribe();

    let outcome = controller.run(CancellationToken::new()).await.unwrap();

    assert_eq!(controller.exam_status(), ExamStatus::Ended);
    assert_eq!(controller.recording_stop_count(), 1);
    assert!(matches!(outcome, Some(UploadOutcome::Completed(_))));

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        ProctorEvent::DeviceAlert {
            kind: CaptureKind::Camera,
            ..
        }
    )));
    assert!(!controller.status().snapshot().camera_active);
    // Only the screen was live
    assert_eq!(controller.capture().release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_is_idempotent() {
    let (controller, backend) =
        create_controller(create_test_config(60), SyntheticCamera::new((320, 240)));

    controller.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(controller.end(EndReason::Requested).await);
    assert!(!controller.end(EndReason::Requested).await);
    assert!(!controller.end(EndReason::TimeExpired).await);

    assert_eq!(controller.recording_stop_count(), 1);
    assert_eq!(controller.capture().release_count(), 2);
    assert_eq!(controller.tick().await, TickOutcome::Ignored);

    let outcome = controller.wait_for_upload().await.unwrap();
    assert!(matches!(outcome, Some(UploadOutcome::Completed(_))));
    assert_eq!(backend.count_calls(|c| *c == BackendCall::CreateSession), 1);
    assert!(controller.wait_for_upload().await.unwrap().is_none());
}

#[tokio::test]
async fn test_end_before_start_does_nothing() {
    let (controller, backend) =
        create_controller(create_test_config(60), SyntheticCamera::new((320, 240)));

    assert!(!controller.end(EndReason::Requested).await);
    assert_eq!(controller.exam_status(), ExamStatus::NotStarted);
    assert_eq!(controller.recording_stop_count(), 0);
    assert!(controller.wait_for_upload().await.unwrap().is_none());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_start_only_from_not_started() {
    let (controller, _backend) =
        create_controller(create_test_config(60), SyntheticCamera::new((320, 240)));

    controller.start().await.unwrap();
    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, ProctorError::Exam(_)));

    controller.end(EndReason::Requested).await;
    assert!(controller.start().await.is_err());
    assert_eq!(controller.exam_status(), ExamStatus::Ended);
}

#[tokio::test(start_paused = true)]
async fn test_end_requested_event_stops_the_runtime() {
    let (controller, _backend) =
        create_controller(create_test_config(600), SyntheticCamera::new((320, 240)));

    let runner = Arc::clone(&controller);
    let task = tokio::spawn(async move { runner.run(CancellationToken::new()).await });

    tokio::time::sleep(Duration::from_millis(3500)).await;
    controller.request_end().await;

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, Some(UploadOutcome::Completed(_))));
    assert_eq!(controller.exam_status(), ExamStatus::Ended);
    assert_eq!(controller.remaining_seconds(), 597);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_with_empty_recording_reports_nothing_to_upload() {
    let unavailable = CaptureError::DeviceUnavailable {
        kind: CaptureKind::Screen,
        details: "no display".to_string(),
    };
    let backend = Arc::new(InMemoryBackend::new());
    let capture = MediaCaptureAdapter::new(
        Arc::new(SyntheticCamera::new((320, 240))),
        Arc::new(SyntheticScreen::failing(unavailable)),
    );
    let controller = Arc::new(
        ExamController::new(
            create_test_config(600),
            capture,
            backend.clone(),
            backend.clone(),
        )
        .unwrap(),
    );

    let shutdown = CancellationToken::new();
    let runner = Arc::clone(&controller);
    let token = shutdown.clone();
    let task = tokio::spawn(async move { runner.run(token).await });

    tokio::time::sleep(Duration::from_secs(2)).await;
    shutdown.cancel();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, Some(UploadOutcome::NothingToUpload));
    assert_eq!(controller.recording_stop_count(), 0);
    assert!(backend.calls().is_empty());
    assert_eq!(
        controller.status().snapshot().upload_status,
        UploadStatus::NothingToUpload
    );
}

#[tokio::test]
async fn test_base_url_edit_is_forwarded() {
    let (controller, _backend) =
        create_controller(create_test_config(60), SyntheticCamera::new((320, 240)));
    // The in-memory backend has no address; the edit is accepted as a no-op
    controller.set_api_base_url("http://10.1.1.1:8000").unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_camera_does_not_hold_up_exam_end() {
    let (controller, backend) =
        create_controller(create_test_config(3), SyntheticCamera::unanswered());

    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        controller.run(CancellationToken::new()),
    )
    .await
    .expect("exam end waited on the camera")
    .unwrap();

    assert_eq!(controller.exam_status(), ExamStatus::Ended);
    assert_eq!(controller.recording_stop_count(), 1);
    assert!(matches!(outcome, Some(UploadOutcome::Completed(_))));
    assert_eq!(backend.count_calls(|c| *c == BackendCall::Complete), 1);

    // Only the screen was ever live; the camera slot is free again
    assert_eq!(controller.capture().release_count(), 1);
    assert!(!controller.capture().is_active(CaptureKind::Camera));
    assert!(!controller.status().snapshot().camera_active);
}

#[tokio::test]
async fn test_end_right_after_start_leaves_nothing_running() {
    let (controller, backend) =
        create_controller(create_test_config(60), SyntheticCamera::new((320, 240)));

    // Startup tasks have not been polled yet on this runtime
    controller.start().await.unwrap();
    assert!(controller.end(EndReason::Requested).await);

    let outcome = controller.wait_for_upload().await.unwrap();
    assert_eq!(outcome, Some(UploadOutcome::NothingToUpload));
    assert_eq!(controller.recording_stop_count(), 0);
    assert!(!controller.capture().is_active(CaptureKind::Camera));
    assert!(!controller.capture().is_active(CaptureKind::Screen));
    assert!(!controller.status().snapshot().recording);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_startup_tasks_arriving_after_end_release_their_devices() {
    let (controller, _backend) =
        create_controller(create_test_config(60), SyntheticCamera::new((320, 240)));
    controller.start().await.unwrap();
    controller.end(EndReason::Requested).await;

    // Late tasks give up before touching the devices
    controller.start_camera().await;
    controller.start_recording().await;
    assert!(!controller.capture().is_active(CaptureKind::Camera));
    assert!(!controller.capture().is_active(CaptureKind::Screen));
    assert_eq!(controller.capture().release_count(), 0);
}

#[tokio::test]
async fn test_devices_opened_outside_an_active_exam_are_released() {
    let (controller, _backend) =
        create_controller(create_test_config(60), SyntheticCamera::new((320, 240)));
    let mut events = controller.event_bus().subscribe();

    controller.start_camera().await;
    controller.start_recording().await;

    // Both devices opened, neither was kept
    assert_eq!(controller.capture().release_count(), 2);
    assert!(!controller.capture().is_active(CaptureKind::Camera));
    assert!(!controller.capture().is_active(CaptureKind::Screen));

    let status = controller.status().snapshot();
    assert!(!status.camera_active);
    assert!(!status.recording);
    assert!(!drain(&mut events).iter().any(|event| matches!(
        event,
        ProctorEvent::RecordingStarted { .. } | ProctorEvent::CameraStatusChanged { .. }
    )));
    assert!(!controller.end(EndReason::Requested).await);
}
