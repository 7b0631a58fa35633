//! Task lifecycle through the scheduler: stop requests, restarts, failures,
//! shutdown and store faults.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FailingDriver, FlakyStore, RecordingDriver, StallDriver};
use datafetch_core::config::AutoRetryConfig;
use datafetch_core::error::SchedulerError;
use datafetch_core::task_db::{TaskDb, TaskStatus};
use tempfile::tempdir;

#[tokio::test]
async fn pause_then_resume_restarts_from_scratch() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let driver = Arc::new(StallDriver::new(&[0u8; 50], 100));
    let scheduler =
        common::scheduler_with(Arc::new(db.clone()), driver.clone(), common::test_config(1));
    scheduler.start_scheduler().await.unwrap();

    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let id = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();
    common::wait_for(&db, id, |t| t.downloaded_bytes == 50).await;

    scheduler.pause(id).await.unwrap();
    let paused = common::wait_for_status(&db, id, TaskStatus::Paused).await;
    assert_eq!(paused.error_message.as_deref(), Some("paused by user"));
    assert_eq!(paused.progress_percent, 50.0);
    assert!(matches!(
        scheduler.pause(id).await,
        Err(SchedulerError::InvalidState { .. })
    ));

    scheduler.resume(id).await.unwrap();
    common::wait_until("second start", || driver.started() == 2).await;
    let running = db.get_task(id).await.unwrap().unwrap();
    assert!(running.status.is_active());
    assert!(running.error_message.is_none());

    assert!(scheduler.cancel(id).await.unwrap());
    common::wait_for_status(&db, id, TaskStatus::Cancelled).await;
    scheduler.stop_scheduler().await;
}

#[tokio::test]
async fn queued_task_can_be_paused_and_cancelled_without_running() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let driver = Arc::new(RecordingDriver::new(b"x", Duration::ZERO));
    let scheduler =
        common::scheduler_with(Arc::new(db.clone()), driver.clone(), common::test_config(1));

    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let paused = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();
    let cancelled = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();

    scheduler.pause(paused).await.unwrap();
    assert!(scheduler.cancel(cancelled).await.unwrap());
    assert_eq!(scheduler.queue_status().pending_tasks, 0);

    let p = db.get_task(paused).await.unwrap().unwrap();
    assert_eq!(p.status, TaskStatus::Paused);
    let c = db.get_task(cancelled).await.unwrap().unwrap();
    assert_eq!(c.status, TaskStatus::Cancelled);
    assert!(c.completed_at.is_some());

    // Already terminal: nothing to cancel.
    assert!(!scheduler.cancel(cancelled).await.unwrap());

    scheduler.start_scheduler().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.stop_scheduler().await;
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn batch_calls_report_each_task() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let driver = Arc::new(RecordingDriver::new(b"x", Duration::ZERO));
    let scheduler =
        common::scheduler_with(Arc::new(db.clone()), driver.clone(), common::test_config(1));
    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let a = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();
    let b = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();

    let paused = scheduler.pause_many(&[a, b, a, 999]).await;
    assert_eq!(paused.len(), 3);
    assert!(paused[0].1.is_ok() && paused[1].1.is_ok());
    assert!(matches!(paused[2], (999, Err(SchedulerError::TaskNotFound(999)))));
    assert_eq!(scheduler.queue_status().pending_tasks, 0);

    let resumed = scheduler.resume_many(&[a, b]).await;
    assert!(resumed.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(scheduler.queue_status().pending_tasks, 2);

    let cancelled = scheduler.cancel_many(&[a]).await;
    assert!(matches!(cancelled[..], [(id, Ok(true))] if id == a));
    assert_eq!(
        db.get_task(a).await.unwrap().unwrap().status,
        TaskStatus::Cancelled
    );

    // b is still queued; a restarts from Cancelled.
    let started = scheduler.start_many(&[b, a]).await;
    assert!(started.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(scheduler.queue_status().pending_tasks, 2);

    scheduler.start_scheduler().await.unwrap();
    common::wait_for_status(&db, a, TaskStatus::Completed).await;
    common::wait_for_status(&db, b, TaskStatus::Completed).await;

    let again = scheduler.start_many(&[a]).await;
    assert!(matches!(
        again[..],
        [(_, Err(SchedulerError::InvalidState { op: "start", .. }))]
    ));
    scheduler.stop_scheduler().await;
    assert_eq!(driver.calls().len(), 2);
}

#[tokio::test]
async fn failed_task_restart_consumes_the_retry_budget() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let scheduler = common::scheduler_with(
        Arc::new(db.clone()),
        Arc::new(FailingDriver),
        common::test_config(1),
    );
    scheduler.start_scheduler().await.unwrap();

    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let id = scheduler
        .enqueue(common::new_task(source, dir.path()).with_max_retries(1))
        .await
        .unwrap();

    let failed = common::wait_for_status(&db, id, TaskStatus::Failed).await;
    assert!(failed.error_message.unwrap_or_default().contains("HTTP 503"));
    assert_eq!(failed.retries_used, 0);

    scheduler.start(id).await.unwrap();
    let failed_again = common::wait_for(&db, id, |t| {
        t.status == TaskStatus::Failed && t.retries_used == 1
    })
    .await;
    assert!(failed_again.completed_at.is_some());

    match scheduler.start(id).await {
        Err(SchedulerError::RetryBudgetExhausted { used, max, .. }) => {
            assert_eq!((used, max), (1, 1));
        }
        other => panic!("expected exhausted budget, got {:?}", other),
    }
    scheduler.stop_scheduler().await;
}

#[tokio::test]
async fn restart_resets_progress_fields() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let driver = Arc::new(StallDriver::new(&[1u8; 40], 80));
    let scheduler =
        common::scheduler_with(Arc::new(db.clone()), driver.clone(), common::test_config(1));
    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let id = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();

    scheduler.start_scheduler().await.unwrap();
    common::wait_for(&db, id, |t| t.downloaded_bytes == 40).await;
    scheduler.cancel(id).await.unwrap();
    let cancelled = common::wait_for_status(&db, id, TaskStatus::Cancelled).await;
    assert_eq!(cancelled.downloaded_bytes, 40);

    // Stop first so the restarted task stays in the queue for inspection.
    scheduler.stop_scheduler().await;
    scheduler.start(id).await.unwrap();
    let reset = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(reset.status, TaskStatus::Pending);
    assert_eq!(reset.progress_percent, 0.0);
    assert_eq!(reset.downloaded_bytes, 0);
    assert!(reset.error_message.is_none());
    assert!(reset.completed_at.is_none());
    assert_eq!(reset.retries_used, 0);
    assert_eq!(scheduler.queue_status().pending_task_ids, vec![id]);
}

#[tokio::test]
async fn start_rejects_completed_tasks() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let driver = Arc::new(RecordingDriver::new(b"x", Duration::ZERO));
    let scheduler = common::scheduler_with(Arc::new(db.clone()), driver, common::test_config(1));
    scheduler.start_scheduler().await.unwrap();
    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let id = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();
    common::wait_for_status(&db, id, TaskStatus::Completed).await;

    assert!(matches!(
        scheduler.start(id).await,
        Err(SchedulerError::InvalidState { op: "start", .. })
    ));
    assert!(matches!(
        scheduler.resume(id).await,
        Err(SchedulerError::InvalidState { op: "resume", .. })
    ));
    scheduler.stop_scheduler().await;
}

#[tokio::test]
async fn inactive_source_fails_at_dispatch() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let driver = Arc::new(RecordingDriver::new(b"x", Duration::ZERO));
    let scheduler =
        common::scheduler_with(Arc::new(db.clone()), driver.clone(), common::test_config(1));
    let source = common::add_source(&db, "old", "http://fake.test/a.nc").await;
    let id = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();
    assert!(db.set_source_active(source, false).await.unwrap());

    scheduler.start_scheduler().await.unwrap();
    let task = common::wait_for_status(&db, id, TaskStatus::Failed).await;
    scheduler.stop_scheduler().await;

    assert!(task.error_message.unwrap_or_default().contains("inactive"));
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn stop_waits_for_running_units_and_keeps_queue() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let driver = Arc::new(StallDriver::new(&[9u8; 10], 100));
    let scheduler =
        common::scheduler_with(Arc::new(db.clone()), driver.clone(), common::test_config(2));
    scheduler.start_scheduler().await.unwrap();

    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let mut running = Vec::new();
    for i in 0..2 {
        running.push(
            scheduler
                .enqueue(common::new_task(source, &dir.path().join(i.to_string())))
                .await
                .unwrap(),
        );
    }
    common::wait_until("both running", || driver.started() == 2).await;
    let waiting = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();

    scheduler.stop_scheduler().await;

    // Every unit has written its terminal state by the time stop returns.
    for id in running {
        let task = db.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.error_message.as_deref(), Some("scheduler stopped"));
    }
    let status = scheduler.queue_status();
    assert!(!status.scheduler_running);
    assert_eq!(status.running_tasks, 0);
    assert_eq!(status.pending_task_ids, vec![waiting]);
    assert_eq!(db.get_task(waiting).await.unwrap().unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn stop_during_dispatch_ends_like_a_running_unit() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let store = Arc::new(FlakyStore::new(db.clone(), 0).with_source_delay(Duration::from_millis(300)));
    let driver = Arc::new(RecordingDriver::new(b"x", Duration::ZERO));
    let scheduler = common::scheduler_with(store.clone(), driver.clone(), common::test_config(1));

    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let id = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();
    scheduler.start_scheduler().await.unwrap();
    // Enqueue looked the source up once; the second lookup is the admission loop.
    common::wait_until("dispatch in progress", || store.source_lookups() == 2).await;

    scheduler.stop_scheduler().await;

    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.error_message.as_deref(), Some("scheduler stopped"));
    assert!(driver.calls().is_empty());
    assert_eq!(scheduler.queue_status().pending_tasks, 0);

    // Restartable like any cancelled task.
    scheduler.start(id).await.unwrap();
    assert_eq!(db.get_task(id).await.unwrap().unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn terminal_write_is_retried_once() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let store = Arc::new(FlakyStore::new(db.clone(), 1));
    let driver = Arc::new(RecordingDriver::new(b"abc", Duration::ZERO));
    let scheduler = common::scheduler_with(store.clone(), driver, common::test_config(1));
    scheduler.start_scheduler().await.unwrap();

    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let id = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();
    let task = common::wait_for_status(&db, id, TaskStatus::Completed).await;
    scheduler.stop_scheduler().await;

    assert_eq!(store.terminal_attempts(), 2);
    assert_eq!(task.downloaded_bytes, 3);
}

#[tokio::test]
async fn failed_terminal_writes_still_free_the_slot() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let store = Arc::new(FlakyStore::new(db.clone(), 2));
    let driver = Arc::new(RecordingDriver::new(b"abc", Duration::ZERO));
    let scheduler = common::scheduler_with(store.clone(), driver.clone(), common::test_config(1));
    scheduler.start_scheduler().await.unwrap();

    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let first = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();
    let second = scheduler.enqueue(common::new_task(source, dir.path())).await.unwrap();
    common::wait_for_status(&db, second, TaskStatus::Completed).await;
    scheduler.stop_scheduler().await;

    // Both attempts for the first task were rejected; it is left Running.
    assert_eq!(store.terminal_attempts(), 3);
    assert_eq!(db.get_task(first).await.unwrap().unwrap().status, TaskStatus::Running);
    assert_eq!(driver.calls().len(), 2);
}

#[tokio::test]
async fn auto_retry_readmits_interrupted_tasks() {
    let db = TaskDb::open_memory().await.unwrap();
    let dir = tempdir().unwrap();
    let mut cfg = common::test_config(1);
    cfg.auto_retry = Some(AutoRetryConfig {
        enabled: true,
        base_delay_secs: 0.05,
        max_delay_secs: 1,
    });
    let driver = Arc::new(StallDriver::new(&[2u8; 5], 10));
    let scheduler = common::scheduler_with(Arc::new(db.clone()), driver.clone(), cfg);
    scheduler.start_scheduler().await.unwrap();

    let source = common::add_source(&db, "s", "http://fake.test/a.nc").await;
    let id = scheduler
        .enqueue(common::new_task(source, dir.path()).with_timeout(1).with_max_retries(1))
        .await
        .unwrap();

    // Timeout is retryable: one automatic re-admission, then the budget is spent.
    let task = common::wait_for(&db, id, |t| {
        t.status == TaskStatus::Failed && t.retries_used == 1
    })
    .await;
    scheduler.stop_scheduler().await;
    assert_eq!(driver.started(), 2);
    assert_eq!(task.error_message.as_deref(), Some("timed out after 1s"));
}
