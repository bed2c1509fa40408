use super::*;
use crate::connection::SourceDriver;
use crate::context::NotifyContext;
use crate::memory::{MemoryCatalog, MemoryDriver};
use std::time::Instant;

const WAIT: Duration = Duration::from_secs(3);

async fn monitor_over(catalog: &MemoryCatalog, interval: Duration) -> (TableMonitor, Arc<NotifyContext>) {
    let driver = MemoryDriver::new();
    driver.register("db", catalog.clone());
    let conn = driver.connect("memory://db").await.unwrap();
    let ctx = Arc::new(NotifyContext::new());
    let m = TableMonitor::new("test", conn, CatalogReader::default(), ctx.clone(), interval);
    (m, ctx)
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn names(snapshot: &[String]) -> Vec<&str> { snapshot.iter().map(|s| s.as_str()).collect() }

#[tokio::test]
async fn tables_empty_before_first_poll() {
    let catalog = MemoryCatalog::with_tables(["a", "b"]);
    let (m, _ctx) = monitor_over(&catalog, Duration::from_millis(20)).await;
    assert_eq!(m.state(), MonitorState::NotStarted);
    assert!(m.tables().is_empty());
    assert_eq!(m.stats(), MonitorStats::default());
}

#[tokio::test]
async fn first_poll_publishes_snapshot_and_requests_reconfiguration() {
    let catalog = MemoryCatalog::with_tables(["a", "b"]);
    let (m, ctx) = monitor_over(&catalog, Duration::from_millis(20)).await;
    m.start().unwrap();
    assert_eq!(m.state(), MonitorState::Running);
    tokio::time::timeout(WAIT, ctx.reconfigured()).await.expect("baseline published");
    assert_eq!(names(&m.tables()), vec!["a", "b"]);
    let stats = m.stats();
    assert!(stats.polls >= 1);
    assert_eq!(stats.changes, 1);
    assert!(stats.last_success.is_some());
    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[tokio::test]
async fn empty_baseline_does_not_request_reconfiguration() {
    let catalog = MemoryCatalog::new();
    let (m, ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    m.start().unwrap();
    wait_until(|| m.stats().polls >= 3).await;
    assert_eq!(ctx.reconfiguration_requests(), 0);
    assert!(m.tables().is_empty());
    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[tokio::test]
async fn discovery_failure_retains_previous_snapshot() {
    let catalog = MemoryCatalog::with_tables(["a", "b", "c"]);
    let (m, ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    m.start().unwrap();
    tokio::time::timeout(WAIT, ctx.reconfigured()).await.expect("baseline published");

    catalog.fail_next_polls(3);
    wait_until(|| m.stats().failures >= 3).await;
    assert_eq!(names(&m.tables()), vec!["a", "b", "c"]);
    assert_eq!(ctx.reconfiguration_requests(), 1);
    assert_eq!(m.state(), MonitorState::Running);

    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[tokio::test]
async fn added_and_removed_tables_trigger_reconfiguration() {
    let catalog = MemoryCatalog::with_tables(["a", "b"]);
    let (m, ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    m.start().unwrap();
    tokio::time::timeout(WAIT, ctx.reconfigured()).await.expect("baseline published");

    catalog.add_table("public", "c");
    tokio::time::timeout(WAIT, ctx.reconfigured()).await.expect("addition detected");
    assert_eq!(names(&m.tables()), vec!["a", "b", "c"]);

    catalog.remove_table("a");
    tokio::time::timeout(WAIT, ctx.reconfigured()).await.expect("removal detected");
    assert_eq!(names(&m.tables()), vec!["b", "c"]);
    assert_eq!(m.stats().changes, 3);

    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[tokio::test]
async fn reordering_alone_is_not_a_change() {
    let catalog = MemoryCatalog::with_tables(["a", "b"]);
    let (m, ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    m.start().unwrap();
    tokio::time::timeout(WAIT, ctx.reconfigured()).await.expect("baseline published");

    catalog.set_tables(["b", "a"]);
    wait_until(|| names(&m.tables()) == vec!["b", "a"]).await;
    assert_eq!(ctx.reconfiguration_requests(), 1);
    assert_eq!(m.stats().changes, 1);

    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[tokio::test]
async fn subscribers_see_published_snapshots() {
    let catalog = MemoryCatalog::with_tables(["x"]);
    let (m, _ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    let mut rx = m.subscribe();
    m.start().unwrap();
    tokio::time::timeout(WAIT, rx.changed()).await.expect("published").unwrap();
    assert_eq!(names(&rx.borrow_and_update()), vec!["x"]);
    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[tokio::test]
async fn shutdown_interrupts_long_sleep() {
    let catalog = MemoryCatalog::with_tables(["a"]);
    let (m, ctx) = monitor_over(&catalog, Duration::from_secs(3600)).await;
    m.start().unwrap();
    tokio::time::timeout(WAIT, ctx.reconfigured()).await.expect("baseline published");

    let t0 = Instant::now();
    m.shutdown();
    assert!(m.join(Duration::from_secs(1)).await);
    assert!(t0.elapsed() < Duration::from_secs(1));
    assert_eq!(m.state(), MonitorState::Stopped);
    // snapshot stays readable once frozen
    assert_eq!(names(&m.tables()), vec!["a"]);
}

#[tokio::test]
async fn shutdown_abandons_in_flight_query() {
    let catalog = MemoryCatalog::with_tables(["a"]);
    catalog.set_query_delay(Duration::from_secs(3600));
    let (m, _ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    m.start().unwrap();
    wait_until(|| catalog.query_count() >= 1).await;

    let t0 = Instant::now();
    m.shutdown();
    assert!(m.join(Duration::from_secs(1)).await);
    assert!(t0.elapsed() < Duration::from_secs(1));
    assert!(m.tables().is_empty());
    assert_eq!(m.stats().polls, 0);
}

#[tokio::test]
async fn join_times_out_while_running() {
    let catalog = MemoryCatalog::with_tables(["a"]);
    let (m, _ctx) = monitor_over(&catalog, Duration::from_secs(3600)).await;
    m.start().unwrap();

    let t0 = Instant::now();
    assert!(!m.join(Duration::from_millis(50)).await);
    assert!(t0.elapsed() < Duration::from_secs(1));
    assert_eq!(m.state(), MonitorState::Running);

    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[tokio::test]
async fn join_after_stop_returns_immediately() {
    let catalog = MemoryCatalog::with_tables(["a"]);
    let (m, _ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    m.start().unwrap();
    m.shutdown();
    assert!(m.join(WAIT).await);
    let t0 = Instant::now();
    assert!(m.join(Duration::from_millis(200)).await);
    assert!(t0.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let catalog = MemoryCatalog::with_tables(["a"]);
    let (m, _ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    m.start().unwrap();
    m.shutdown();
    m.shutdown();
    assert!(m.join(WAIT).await);
    m.shutdown();
    assert_eq!(m.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn never_started_monitor_joins_immediately() {
    let catalog = MemoryCatalog::with_tables(["a"]);
    let (m, _ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    assert!(m.join(Duration::from_millis(100)).await);
    m.shutdown();
    assert_eq!(m.state(), MonitorState::Stopped);
    assert_eq!(catalog.query_count(), 0);
}

#[tokio::test]
async fn double_start_is_lifecycle_error() {
    let catalog = MemoryCatalog::with_tables(["a"]);
    let (m, _ctx) = monitor_over(&catalog, Duration::from_millis(10)).await;
    m.start().unwrap();
    let err = m.start().unwrap_err();
    assert_eq!(err.code_str(), "already_started");
    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[test]
fn start_outside_runtime_fails() {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let catalog = MemoryCatalog::with_tables(["a"]);
    let (m, _ctx) = rt.block_on(monitor_over(&catalog, Duration::from_millis(10)));
    let err = m.start().unwrap_err();
    assert_eq!(err.code_str(), "no_runtime");
    assert_eq!(m.state(), MonitorState::NotStarted);
}

#[test]
fn diff_sets_ignores_order() {
    let prev = vec!["a".to_string(), "b".to_string()];
    let next = vec!["c".to_string(), "b".to_string()];
    let (added, removed) = diff_sets(&prev, &next);
    assert_eq!(added, vec!["c"]);
    assert_eq!(removed, vec!["a"]);
    let (added, removed) = diff_sets(&prev, &["b".to_string(), "a".to_string()]);
    assert!(added.is_empty() && removed.is_empty());
}

#[tokio::test]
async fn failing_first_polls_leave_snapshot_empty_until_success() {
    let catalog = MemoryCatalog::with_tables(["a", "b"]);
    catalog.fail_next_polls(2);
    let (m, ctx) = monitor_over(&catalog, Duration::from_millis(300)).await;
    m.start().unwrap();

    // second failure lands at ~300ms, the first success at ~600ms
    wait_until(|| m.stats().failures >= 2).await;
    assert_eq!(m.state(), MonitorState::Running);
    assert!(m.tables().is_empty());
    assert_eq!(ctx.reconfiguration_requests(), 0);

    tokio::time::timeout(WAIT, ctx.reconfigured()).await.expect("published after recovery");
    assert_eq!(names(&m.tables()), vec!["a", "b"]);
    assert_eq!(ctx.reconfiguration_requests(), 1);
    assert_eq!(m.stats().failures, 2);
    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[tokio::test]
async fn failing_first_polls_never_publish() {
    let catalog = MemoryCatalog::with_tables(["a"]);
    catalog.fail_next_polls(usize::MAX);
    let (m, ctx) = monitor_over(&catalog, Duration::from_millis(5)).await;
    m.start().unwrap();
    wait_until(|| m.stats().failures >= 3).await;
    assert!(m.tables().is_empty());
    assert_eq!(m.state(), MonitorState::Running);
    assert_eq!(ctx.reconfiguration_requests(), 0);
    assert!(m.stats().last_success.is_none());
    m.shutdown();
    assert!(m.join(WAIT).await);
}

struct PanickingConnection;

#[async_trait::async_trait]
impl SourceConnection for PanickingConnection {
    async fn catalog_entries(&self, _schema_pattern: Option<&str>) -> ConnectorResult<Vec<crate::connection::CatalogEntry>> {
        panic!("catalog exploded");
    }

    async fn close(&self) -> ConnectorResult<()> { Ok(()) }

    fn describe(&self) -> String { "panicking".to_string() }
}

#[tokio::test]
async fn reader_panic_is_raised_to_context_and_polling_continues() {
    let ctx = Arc::new(NotifyContext::new());
    let m = TableMonitor::new("test", Arc::new(PanickingConnection), CatalogReader::default(), ctx.clone(), Duration::from_millis(5));
    m.start().unwrap();
    wait_until(|| m.stats().failures >= 2).await;
    assert_eq!(m.state(), MonitorState::Running);
    assert!(m.tables().is_empty());

    let errors = ctx.errors();
    assert!(errors.len() >= 2);
    assert_eq!(errors[0].code_str(), "poll_panicked");
    assert!(errors[0].message().contains("catalog exploded"));
    m.shutdown();
    assert!(m.join(WAIT).await);
}

#[tokio::test]
async fn discovery_failures_are_not_raised_to_context() {
    let catalog = MemoryCatalog::with_tables(["a"]);
    catalog.fail_next_polls(2);
    let (m, ctx) = monitor_over(&catalog, Duration::from_millis(5)).await;
    m.start().unwrap();
    tokio::time::timeout(WAIT, ctx.reconfigured()).await.expect("published after recovery");
    assert!(ctx.errors().is_empty());
    m.shutdown();
    assert!(m.join(WAIT).await);
}
