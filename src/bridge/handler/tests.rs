use super::*;
use crate::task::{LocalTaskContext, MemoryRecordWriter};

struct Fixture {
    handler: Arc<OutputHandler>,
    sink: MemoryRecordWriter,
    context: Arc<LocalTaskContext>,
}

fn fixture_with(progress_cell: Option<ProgressCell>) -> Fixture {
    let sink = MemoryRecordWriter::new();
    let context = Arc::new(LocalTaskContext::with_secret("attempt_0", "/tmp", b"k".to_vec()));
    let handler = Arc::new(OutputHandler::new(
        Box::new(sink.clone()),
        context.clone(),
        PartitionSlot::new(),
        progress_cell,
    ));
    Fixture {
        handler,
        sink,
        context,
    }
}

fn authenticated() -> Fixture {
    let f = fixture_with(None);
    f.handler.expect_digest("expected");
    f.handler.authenticate("expected").unwrap();
    f
}

#[tokio::test]
async fn test_single_output_then_done() {
    let f = authenticated();

    f.handler.output(b"3", b"txt").unwrap();
    f.handler.done().unwrap();

    assert!(f.handler.wait_for_finish().await.unwrap());
    assert_eq!(f.sink.records(), vec![(b"3".to_vec(), b"txt".to_vec())]);
}

#[tokio::test]
async fn test_progress_sequence_keeps_last_value() {
    let f = authenticated();

    for i in 0..10 {
        f.handler.progress(i as f32 / 10.0).unwrap();
    }
    f.handler.done().unwrap();

    assert!(f.handler.wait_for_finish().await.unwrap());
    assert!((f.handler.get_progress() - 0.9).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_progress_feeds_attached_cell() {
    let cell = ProgressCell::new();
    let f = fixture_with(Some(cell.clone()));

    f.handler.progress(0.4).unwrap();
    assert_eq!(cell.get(), 0.4);
    assert_eq!(f.handler.get_progress(), 0.4);
}

#[tokio::test]
async fn test_waiter_is_woken_by_done_from_another_task() {
    let f = authenticated();
    let waiter = {
        let handler = f.handler.clone();
        tokio::spawn(async move { handler.wait_for_finish().await })
    };

    tokio::task::yield_now().await;
    f.handler.done().unwrap();

    assert!(waiter.await.unwrap().unwrap());
}

#[tokio::test]
async fn test_unregistered_counter_fails_the_attempt() {
    let f = authenticated();

    let err = f.handler.increment_counter(4, 1).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PROTOCOL_UNREGISTERED_COUNTER);

    let err = f.handler.wait_for_finish().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PROTOCOL_UNREGISTERED_COUNTER);
}

#[tokio::test]
async fn test_registered_counter_updates_host_counter() {
    let f = authenticated();

    f.handler.register_counter(0, "wordcount", "INPUT_WORDS").unwrap();
    f.handler.increment_counter(0, 12).unwrap();
    f.handler.increment_counter(0, 3).unwrap();

    assert_eq!(
        f.context.counters().value("wordcount", "INPUT_WORDS"),
        Some(15)
    );
}

#[tokio::test]
async fn test_status_reaches_task_context() {
    let f = authenticated();
    f.handler.status("halfway").unwrap();
    assert_eq!(f.context.status(), "halfway");
}

#[tokio::test]
async fn test_digest_mismatch_fails_authentication() {
    let f = fixture_with(None);
    f.handler.expect_digest("expected");

    let err = f.handler.authenticate("forged").unwrap_err();
    assert_eq!(err.code(), ErrorCode::AUTH_DIGEST_MISMATCH);
    assert!(f.handler.digest_received());

    let err = f.handler.wait_for_authentication().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AUTH_DIGEST_MISMATCH);
}

#[tokio::test]
async fn test_done_without_authentication_is_not_success() {
    let f = fixture_with(None);
    f.handler.expect_digest("expected");
    f.handler.done().unwrap();

    let err = f.handler.wait_for_finish().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AUTH_NOT_PERFORMED);
}

#[tokio::test]
async fn test_first_failure_wins() {
    let f = authenticated();

    f.handler.failed(PipesError::worker("first"));
    f.handler.failed(PipesError::protocol("second"));

    let err = f.handler.wait_for_finish().await.unwrap_err();
    assert!(err.to_string().contains("first"));
}

#[tokio::test]
async fn test_failure_after_done_is_ignored() {
    let f = authenticated();
    f.handler.done().unwrap();
    f.handler.failed(PipesError::worker("late"));

    assert!(f.handler.wait_for_finish().await.unwrap());
}

#[tokio::test]
async fn test_status_still_accepted_after_failure() {
    let f = authenticated();
    f.handler.failed(PipesError::worker("boom"));
    f.handler.status("still talking").unwrap();
    assert_eq!(f.context.status(), "still talking");
}

#[tokio::test]
async fn test_partitioned_output_sets_slot() {
    let f = authenticated();
    f.handler.partitioned_output(2, b"k", b"v").unwrap();

    assert_eq!(f.handler.partition_slot().take(), Some(2));
    assert_eq!(f.sink.len(), 1);
}

#[tokio::test]
async fn test_authentication_wait_times_out() {
    let f = fixture_with(None);
    f.handler.expect_digest("expected");

    let err = f
        .handler
        .wait_for_authentication_within(Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::WORKER_TIMEOUT);
    assert!(f.handler.failure().is_some());
}
