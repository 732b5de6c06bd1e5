// tests/job_test.rs
use mediaq::error::AppError;
use mediaq::{Descriptor, Job, JobStatus, OutputMode};
use std::path::PathBuf;

fn queued_job() -> Job {
    Job::new(
        Descriptor::builder("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .format("137", "1080p")
            .title("Test video")
            .build(),
    )
}

#[test]
fn test_transition_table() {
    use JobStatus::*;
    let all = [Queued, Downloading, Processing, Completed, Failed, Cancelled];
    let allowed = [
        (Queued, Downloading),
        (Queued, Cancelled),
        (Downloading, Processing),
        (Downloading, Completed),
        (Downloading, Failed),
        (Downloading, Cancelled),
        (Processing, Completed),
        (Processing, Failed),
        (Processing, Cancelled),
        (Failed, Queued),
        (Cancelled, Queued),
    ];

    // Test that exactly the listed edges are permitted
    for from in all {
        for to in all {
            assert_eq!(
                from.can_transition_to(to),
                allowed.contains(&(from, to)),
                "{} -> {}",
                from,
                to
            );
        }
    }
}

#[test]
fn test_status_classification() {
    assert!(JobStatus::Downloading.is_active());
    assert!(JobStatus::Processing.is_active());
    assert!(!JobStatus::Queued.is_active());
    assert!(JobStatus::Completed.is_terminal());
    assert!(JobStatus::Failed.is_terminal());
    assert!(JobStatus::Cancelled.is_terminal());
    assert!(!JobStatus::Processing.is_terminal());
}

#[test]
fn test_new_job_is_queued() {
    let job = queued_job();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.progress, 0.0);
    assert_eq!(job.attempts, 0);
    assert!(job.error_message.is_none());
    assert!(!job.cancel_requested);
    assert_eq!(job.metadata.title, "Test video");
    assert_eq!(job.source.format_label, "1080p");
}

#[test]
fn test_job_ids_are_unique() {
    let a = queued_job();
    let b = queued_job();
    assert_ne!(a.id, b.id);
}

#[test]
fn test_progress_never_decreases() {
    let mut job = queued_job();
    job.mark_started().unwrap();

    job.update_progress(42.5, Some("2.00MiB/s".into()), Some("00:12".into()))
        .unwrap();
    job.update_progress(30.0, None, None).unwrap();
    assert_eq!(job.progress, 42.5);
    assert!(job.speed.is_none());

    // Test that out-of-range reports are clamped
    job.update_progress(250.0, None, None).unwrap();
    assert_eq!(job.progress, 100.0);
}

#[test]
fn test_progress_rejected_when_not_active() {
    let mut job = queued_job();
    let error = job.update_progress(10.0, None, None).unwrap_err();
    assert!(matches!(
        error,
        AppError::InvalidState {
            status: JobStatus::Queued,
            ..
        }
    ));
    assert_eq!(job.progress, 0.0);
}

#[test]
fn test_completion_sets_output() {
    let mut job = queued_job();
    job.mark_started().unwrap();
    job.mark_processing().unwrap();
    assert_eq!(job.progress, 100.0);

    job.mark_completed(PathBuf::from("/tmp/video.mp4")).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.output_path, Some(PathBuf::from("/tmp/video.mp4")));
}

#[test]
fn test_invalid_transitions_leave_job_unchanged() {
    let mut job = queued_job();
    job.mark_started().unwrap();
    job.mark_completed(PathBuf::from("/tmp/a.mp4")).unwrap();
    let before = job.clone();

    // Test that terminal jobs cannot be restarted or failed
    assert!(job.mark_started().is_err());
    assert!(job.mark_failed("late".to_string()).is_err());
    assert!(job.mark_cancelled().is_err());
    assert!(job.reset_for_retry().is_err());
    assert_eq!(job, before);
}

#[test]
fn test_retry_resets_attempt_state() {
    let mut job = queued_job();
    job.mark_started().unwrap();
    job.update_progress(64.0, None, None).unwrap();
    job.mark_failed("network unreachable".to_string()).unwrap();
    assert_eq!(job.error_message.as_deref(), Some("network unreachable"));

    job.reset_for_retry().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.progress, 0.0);
    assert!(job.error_message.is_none());

    job.mark_started().unwrap();
    assert_eq!(job.attempts, 2);
}

#[test]
fn test_descriptor_validation() {
    // Test a valid video descriptor
    let descriptor = Descriptor::builder("https://example.com/watch?v=1").build();
    assert!(descriptor.validate().is_ok());

    // Test that an empty url is rejected
    let descriptor = Descriptor::builder("  ").build();
    assert!(matches!(
        descriptor.validate(),
        Err(AppError::InvalidDescriptor(_))
    ));

    // Test that non-http sources are rejected
    let descriptor = Descriptor::builder("ftp://example.com/file").build();
    assert!(descriptor.validate().is_err());
    let descriptor = Descriptor::builder("https://example.com/a b").build();
    assert!(descriptor.validate().is_err());

    // Test that video mode needs a format id
    let descriptor = Descriptor::builder("https://example.com").format("", "").build();
    let error = descriptor.validate().unwrap_err();
    assert_eq!(
        error.to_string(),
        "Invalid descriptor: video download requires a format id"
    );

    // Test that audio mode needs a codec
    let descriptor = Descriptor::builder("https://example.com")
        .audio(Some(""), None)
        .build();
    assert!(descriptor.validate().is_err());
}

#[test]
fn test_audio_defaults() {
    let descriptor = Descriptor::builder("https://example.com")
        .audio(None, None)
        .build();
    assert_eq!(
        descriptor.source.output,
        OutputMode::Audio {
            codec: "mp3".to_string(),
            quality: "192".to_string()
        }
    );
    assert!(descriptor.source.output.is_audio_only());
}

#[test]
fn test_descriptor_from_json() {
    // Test that omitted optional fields fall back to defaults
    let descriptor: Descriptor = serde_json::from_str(
        r#"{
            "source": {"url": "https://example.com/v", "format_id": "22"},
            "metadata": {"title": "Clip", "duration": 95}
        }"#,
    )
    .unwrap();
    assert_eq!(descriptor.source.output, OutputMode::Video);
    assert_eq!(descriptor.metadata.duration, Some(95));
    assert!(descriptor.metadata.thumbnail.is_none());

    let descriptor: Descriptor = serde_json::from_str(
        r#"{"source": {"url": "https://example.com/v", "format_id": "bestaudio",
            "output": {"mode": "audio", "codec": "flac", "quality": "best"}}}"#,
    )
    .unwrap();
    assert!(descriptor.source.output.is_audio_only());
}

#[test]
fn test_job_serialization() {
    let job = queued_job();
    let value = serde_json::to_value(&job).unwrap();
    assert_eq!(value["status"], "queued");
    assert_eq!(value["id"], job.id.to_string());
    assert_eq!(value["source"]["output"]["mode"], "video");
    assert!(value["error_message"].is_null());
}
