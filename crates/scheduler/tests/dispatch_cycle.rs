//! End-to-end dispatch ticks over in-memory stores and a fixed clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{at, running_job, world, Gate, ScriptedDetector};
use lookout_core::time::to_minutes;
use lookout_core::{Frequency, Granularity, Job, JobStatus, ReportStatus};
use lookout_queue::{JobQueue, QueueEntry};
use lookout_storage::{JobAccessor, ReportAccessor};

fn m(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
    to_minutes(at(y, mo, d, h, mi))
}

fn hourly(id: i64) -> Job {
    Job::new(id, 1, serde_json::json!({"metric": "requests"}), Granularity::Hour, Frequency::Hour)
}

fn monthly(id: i64) -> Job {
    Job::new(id, 1, serde_json::json!({"metric": "signups"}), Granularity::Day, Frequency::Month)
}

#[tokio::test]
async fn launched_job_runs_on_time_and_reschedules() {
    let w = world(vec![hourly(5)], at(2024, 1, 10, 15, 0), ScriptedDetector::clean());
    let launched = w.service.launch_job(5).await.unwrap();
    assert_eq!(launched.effective_run_time, Some(m(2024, 1, 10, 15, 5)));

    // Not due yet.
    let summary = w.service.tick_now().await.unwrap();
    assert_eq!(summary.popped, 0);

    w.clock.set(at(2024, 1, 10, 15, 5));
    let summary = w.service.tick_now().await.unwrap();
    assert_eq!((summary.popped, summary.executed, summary.backfilled), (1, 1, 0));

    let reports = w.store.reports_for_job(5).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, ReportStatus::Success);
    assert_eq!(reports[0].query_end_time, m(2024, 1, 10, 15, 0));

    let job = w.store.get_job(5).await.unwrap();
    assert_eq!(job.effective_query_time, Some(m(2024, 1, 10, 16, 0)));
    assert_eq!(job.effective_run_time, Some(m(2024, 1, 10, 16, 5)));
    assert_eq!(w.queue.list_all().await.unwrap(), vec![QueueEntry::new(5, m(2024, 1, 10, 16, 5))]);
    assert!(w.queue.pending().await.unwrap().is_empty());
    assert_eq!(w.service.metrics().jobs_executed, 1);
}

#[tokio::test]
async fn exactly_one_period_late_is_on_time() {
    let job = running_job(hourly(5), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 5));
    let w = world(vec![job], at(2024, 1, 10, 16, 5), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(5, m(2024, 1, 10, 15, 5))).await.unwrap();

    let summary = w.service.tick_now().await.unwrap();
    // The fixed-step reschedule is itself due, so the job runs twice.
    assert_eq!((summary.popped, summary.executed, summary.backfilled), (2, 2, 0));
    assert_eq!(w.source.calls(), 2);
    assert_eq!(w.queue.list_all().await.unwrap(), vec![QueueEntry::new(5, m(2024, 1, 10, 17, 5))]);
}

#[tokio::test]
async fn one_minute_past_a_period_backfills_and_catches_up() {
    let job = running_job(hourly(5), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 5));
    let w = world(vec![job], at(2024, 1, 10, 16, 6), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(5, m(2024, 1, 10, 15, 5))).await.unwrap();

    let summary = w.service.tick_now().await.unwrap();
    assert_eq!((summary.popped, summary.executed, summary.backfilled), (1, 0, 1));
    assert_eq!(w.source.calls(), 1);
    assert_eq!(w.reports.batches(), 1);

    let mut ends: Vec<i64> =
        w.store.reports_for_job(5).await.unwrap().iter().map(|r| r.query_end_time).collect();
    ends.sort_unstable();
    assert_eq!(ends, vec![m(2024, 1, 10, 15, 0), m(2024, 1, 10, 16, 0)]);

    let job = w.store.get_job(5).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.effective_run_time, Some(m(2024, 1, 10, 17, 5)));
    assert_eq!(w.queue.list_all().await.unwrap(), vec![QueueEntry::new(5, m(2024, 1, 10, 17, 5))]);
    assert!(w.queue.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn lagging_job_that_cannot_catch_up_becomes_zombie() {
    let start = m(2023, 12, 1, 0, 0);
    let job = running_job(monthly(60), start, start);
    let w = world(vec![job], at(2024, 1, 31, 12, 0), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(60, start)).await.unwrap();

    let summary = w.service.tick_now().await.unwrap();
    assert_eq!(summary.zombies, 1);
    assert_eq!(w.store.get_job(60).await.unwrap().status, JobStatus::Zombie);
    assert!(w.queue.list_all().await.unwrap().is_empty());
    assert!(w.queue.pending().await.unwrap().is_empty());
    // The missed span was still backfilled, in one batch.
    assert_eq!(w.reports.batches(), 1);
    assert!(!w.store.reports_for_job(60).await.unwrap().is_empty());

    let summary = w.service.tick_now().await.unwrap();
    assert_eq!(summary.popped, 0);
    assert_eq!(w.service.metrics().zombies, 1);
}

#[tokio::test]
async fn lagging_job_within_one_advance_is_requeued() {
    let start = m(2023, 12, 1, 0, 0);
    let job = running_job(monthly(60), start, start);
    let w = world(vec![job], at(2024, 1, 15, 12, 0), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(60, start)).await.unwrap();

    let summary = w.service.tick_now().await.unwrap();
    assert_eq!((summary.backfilled, summary.zombies), (1, 0));
    let next_run = m(2024, 1, 1, 0, 0) + Frequency::Month.minutes();
    assert_eq!(w.queue.list_all().await.unwrap(), vec![QueueEntry::new(60, next_run)]);
    assert_eq!(w.store.get_job(60).await.unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn failing_job_is_errored_unscheduled_and_reported() {
    let job = running_job(hourly(8), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 8));
    let w = world(vec![job], at(2024, 1, 10, 15, 8), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(8, m(2024, 1, 10, 15, 8))).await.unwrap();
    w.source.failing.lock().unwrap().insert(8);

    let summary = w.service.tick_now().await.unwrap();
    assert_eq!((summary.popped, summary.failures), (1, 0));

    assert_eq!(w.store.get_job(8).await.unwrap().status, JobStatus::Error);
    assert!(w.queue.list_all().await.unwrap().is_empty());
    assert!(w.queue.pending().await.unwrap().is_empty());
    let statuses: Vec<ReportStatus> =
        w.store.reports_for_job(8).await.unwrap().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![ReportStatus::Error]);
    let sent = w.mailer.sent.lock().unwrap().clone();
    assert_eq!(sent, vec![("oncall@example.com".to_string(), vec![ReportStatus::Error])]);

    // Not retried.
    w.clock.set(at(2024, 1, 10, 18, 0));
    assert_eq!(w.service.tick_now().await.unwrap().popped, 0);
    assert_eq!(w.source.calls(), 1);
}

#[tokio::test]
async fn job_stopped_mid_execution_is_not_requeued() {
    let job = running_job(hourly(9), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 9));
    let w = world(vec![job], at(2024, 1, 10, 15, 9), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(9, m(2024, 1, 10, 15, 9))).await.unwrap();
    w.source.stop_on_fetch.lock().unwrap().insert(9);

    let summary = w.service.tick_now().await.unwrap();
    assert_eq!(summary.executed, 1);
    // The run completed and its report stands.
    assert_eq!(w.store.reports_for_job(9).await.unwrap().len(), 1);
    assert!(w.queue.list_all().await.unwrap().is_empty());
    assert!(w.queue.pending().await.unwrap().is_empty());
}

/// Run one tick with the source held at its first fetch, calling `during`
/// while the job is in flight.
async fn tick_around<F, Fut>(w: &common::World, during: F) -> lookout_scheduler::TickSummary
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let gate = Gate::default();
    *w.source.gate.lock().unwrap() = Some(gate.clone());
    let service = Arc::clone(&w.service);
    let tick = tokio::spawn(async move { service.tick_now().await });
    gate.entered.notified().await;
    during().await;
    gate.release.notify_one();
    tick.await.unwrap().unwrap()
}

#[tokio::test]
async fn job_halted_during_backfill_stays_stopped() {
    let job = running_job(hourly(5), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 5));
    let w = world(vec![job], at(2024, 1, 10, 18, 0), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(5, m(2024, 1, 10, 15, 5))).await.unwrap();

    let service = Arc::clone(&w.service);
    let summary = tick_around(&w, || async move {
        assert_eq!(service.halt_job(5).await.unwrap().status, JobStatus::Stopped);
    })
    .await;

    assert_eq!(summary.backfilled, 1);
    let stored = w.store.get_job(5).await.unwrap();
    assert_eq!(stored.status, JobStatus::Stopped);
    assert_eq!(stored.effective_run_time, Some(m(2024, 1, 10, 15, 5)));
    assert!(w.queue.list_all().await.unwrap().is_empty());
    assert!(w.queue.pending().await.unwrap().is_empty());
    // Relaunching picks the job up from now.
    w.service.launch_job(5).await.unwrap();
    assert_eq!(w.queue.list_all().await.unwrap(), vec![QueueEntry::new(5, m(2024, 1, 10, 18, 5))]);
}

#[tokio::test]
async fn job_deleted_during_backfill_is_not_recreated() {
    let job = running_job(hourly(5), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 5));
    let w = world(vec![job], at(2024, 1, 10, 18, 0), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(5, m(2024, 1, 10, 15, 5))).await.unwrap();

    let service = Arc::clone(&w.service);
    tick_around(&w, || async move { service.delete_job(5).await.unwrap() }).await;

    assert!(w.store.get_job(5).await.unwrap_err().is_not_found());
    assert!(w.queue.list_all().await.unwrap().is_empty());
    assert!(w.queue.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn job_halted_before_zombie_verdict_stays_stopped() {
    let start = m(2023, 12, 1, 0, 0);
    let job = running_job(monthly(60), start, start);
    let w = world(vec![job], at(2024, 1, 31, 12, 0), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(60, start)).await.unwrap();

    let service = Arc::clone(&w.service);
    let summary = tick_around(&w, || async move {
        service.halt_job(60).await.unwrap();
    })
    .await;

    assert_eq!(summary.zombies, 0);
    assert_eq!(w.store.get_job(60).await.unwrap().status, JobStatus::Stopped);
    assert!(w.queue.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_job_halted_mid_fetch_is_not_marked_error() {
    let job = running_job(hourly(8), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 8));
    let w = world(vec![job], at(2024, 1, 10, 15, 8), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(8, m(2024, 1, 10, 15, 8))).await.unwrap();
    w.source.failing.lock().unwrap().insert(8);

    let service = Arc::clone(&w.service);
    tick_around(&w, || async move {
        service.halt_job(8).await.unwrap();
    })
    .await;

    assert_eq!(w.store.get_job(8).await.unwrap().status, JobStatus::Stopped);
    assert!(w.queue.list_all().await.unwrap().is_empty());
    assert!(w.queue.pending().await.unwrap().is_empty());
    let statuses: Vec<ReportStatus> =
        w.store.reports_for_job(8).await.unwrap().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![ReportStatus::Error]);

    // Relaunch is allowed straight from STOPPED.
    assert_eq!(w.service.launch_job(8).await.unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn halted_job_popped_later_is_dropped() {
    let mut job = running_job(hourly(3), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 3));
    job.status = JobStatus::Stopped;
    let w = world(vec![job], at(2024, 1, 10, 15, 30), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(3, m(2024, 1, 10, 15, 3))).await.unwrap();
    w.queue.push(QueueEntry::new(404, m(2024, 1, 10, 15, 4))).await.unwrap();

    let summary = w.service.tick_now().await.unwrap();
    assert_eq!((summary.popped, summary.executed, summary.failures), (2, 0, 0));
    assert_eq!(w.source.calls(), 0);
    assert!(w.queue.list_all().await.unwrap().is_empty());
    assert!(w.queue.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_pending_job_is_reconciled_after_grace() {
    let job = running_job(hourly(5), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 5));
    let w = world(vec![job], at(2024, 1, 10, 15, 8), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(5, m(2024, 1, 10, 15, 5))).await.unwrap();
    // Popped by a tick that never confirmed it.
    w.queue.pop_due(m(2024, 1, 10, 15, 5)).await.unwrap();

    let summary = w.service.tick_now().await.unwrap();
    assert_eq!((summary.requeued, summary.popped), (0, 0));
    assert_eq!(w.queue.pending().await.unwrap().len(), 1);

    w.clock.set(at(2024, 1, 10, 15, 10));
    let summary = w.service.tick_now().await.unwrap();
    assert_eq!((summary.requeued, summary.popped, summary.executed), (1, 1, 1));
    assert!(w.queue.pending().await.unwrap().is_empty());
    assert_eq!(w.queue.list_all().await.unwrap(), vec![QueueEntry::new(5, m(2024, 1, 10, 16, 5))]);
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let job = running_job(hourly(5), m(2024, 1, 10, 15, 0), m(2024, 1, 10, 15, 5));
    let w = world(vec![job], at(2024, 1, 10, 15, 5), ScriptedDetector::clean());
    w.queue.push(QueueEntry::new(5, m(2024, 1, 10, 15, 5))).await.unwrap();
    let gate = Gate::default();
    *w.source.gate.lock().unwrap() = Some(gate.clone());

    let service = Arc::clone(&w.service);
    let first = tokio::spawn(async move { service.tick_now().await });
    gate.entered.notified().await;

    let second = w.service.tick_now().await.unwrap();
    assert!(second.skipped);
    assert_eq!(second.popped, 0);

    gate.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.executed, 1);

    let metrics = w.service.metrics();
    assert_eq!((metrics.ticks_run, metrics.ticks_skipped), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn started_service_ticks_at_fixed_rate() {
    let w = world(Vec::new(), at(2024, 1, 10, 15, 0), ScriptedDetector::clean());
    w.service.start().await.unwrap();
    assert!(w.service.is_running());

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(w.service.metrics().ticks_run >= 2);

    w.service.shutdown().await;
    assert!(!w.service.is_running());
}
