//! End-to-end tests: in-memory store → session → dashboard task → shared view
//!
//! Each test seeds a `MemoryStore` with the document layout the ingestion
//! functions write, starts a session against it and waits for the projected
//! `GridView` to reach the expected state.

#[cfg(test)]
mod live_grid_tests {
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use testgrid::config::DashboardConfig;
    use testgrid::dashboard::{dashboard_task, Dashboard, DashboardMessage};
    use testgrid::filter::FilterSpec;
    use testgrid::session::{start_session, Session, SessionMode};
    use testgrid::sink::{GridView, SharedView};
    use testgrid::store::feed::feed_task;
    use testgrid::store::{DocumentStore, MemoryStore, StorePath};
    use testgrid::subscription::{Level, SubscriptionTree};
    use testgrid::Recency;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, Duration, Instant};

    const START: i64 = 1_700_000_000;

    struct Harness {
        view: SharedView,
        clock: Arc<AtomicI64>,
        session: Option<Session>,
    }

    fn config() -> DashboardConfig {
        DashboardConfig {
            stagger_ms: 2,
            tick_interval_ms: 10,
            ..Default::default()
        }
    }

    async fn start(store: &Arc<MemoryStore>, filter: FilterSpec) -> Harness {
        let (tx, rx) = mpsc::channel(256);
        let view = SharedView::new();
        let clock = Arc::new(AtomicI64::new(START));
        let clock_for_dashboard = clock.clone();
        let dashboard = Dashboard::new(view.clone(), 500)
            .with_clock(move || clock_for_dashboard.load(Ordering::SeqCst));
        tokio::spawn(dashboard_task(rx, dashboard));

        let store: Arc<dyn DocumentStore> = store.clone();
        let session = start_session(store, &config(), &filter, tx).await.ok();
        Harness {
            view,
            clock,
            session,
        }
    }

    async fn wait_for(view: &SharedView, what: &str, done: impl Fn(&GridView) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if done(&view.read()) {
                return;
            }
            if Instant::now() > deadline {
                panic!("timed out waiting for {}: {:?}", what, *view.read());
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    fn cell_is(view: &GridView, row: &str, column: &str, value: &str, recency: Recency) -> bool {
        view.cell(row, column)
            .map(|cell| cell.value.as_deref() == Some(value) && cell.recency == recency)
            .unwrap_or(false)
    }

    fn set(store: &MemoryStore, path: &str, data: Value) {
        store.set(&StorePath::parse(path), data);
    }

    /// origin/lab-1 with one port and its column source document
    fn seed_origin(store: &MemoryStore) {
        set(store, "origin/lab-1", json!({}));
        set(store, "origin/lab-1/port/port3", json!({}));
        set(
            store,
            "origin/lab-1/port/port-undefined",
            json!({"message": {"tests": ["ping", "dns"]}}),
        );
    }

    #[tokio::test]
    async fn test_cascade_builds_grid_from_hierarchy() {
        let store = Arc::new(MemoryStore::new());
        seed_origin(&store);
        set(&store, "origin/lab-1/port/port3/runid/100", json!({"timestamp": 1}));
        set(&store, "origin/lab-1/port/port3/runid/100/test/ping", json!({"code": 0}));

        let harness = start(&store, FilterSpec::from_params([("origin", "lab-1")])).await;
        assert!(matches!(
            harness.session.as_ref().map(Session::mode),
            Some(SessionMode::Cascade { .. })
        ));

        wait_for(&harness.view, "first result", |view| {
            cell_is(view, "port3", "ping", "pass", Recency::Current) && view.columns.len() == 2
        })
        .await;
        assert_eq!(harness.view.read().cell("port3", "dns").unwrap().value, None);

        // A newer run arrives while the session is live.
        set(&store, "origin/lab-1/port/port3/runid/101", json!({"timestamp": 2}));
        set(&store, "origin/lab-1/port/port3/runid/101/test/dns", json!({"exception": "timeout"}));

        wait_for(&harness.view, "second run", |view| {
            cell_is(view, "port3", "dns", "fail", Recency::Current)
                && cell_is(view, "port3", "ping", "pass", Recency::Previous)
        })
        .await;
    }

    #[tokio::test]
    async fn test_out_of_order_runs_keep_newest_value() {
        let store = Arc::new(MemoryStore::new());
        seed_origin(&store);
        set(&store, "origin/lab-1/port/port-3", json!({}));
        set(&store, "origin/lab-1/port/port-3/runid/100", json!({"timestamp": 2}));
        set(&store, "origin/lab-1/port/port-3/runid/100/test/A", json!({"code": 1}));

        let harness = start(&store, FilterSpec::from_params([("origin", "lab-1")])).await;
        wait_for(&harness.view, "run 100", |view| {
            cell_is(view, "port-3", "A", "fail", Recency::Current)
        })
        .await;

        set(&store, "origin/lab-1/port/port-3/runid/99", json!({"timestamp": 1}));
        set(&store, "origin/lab-1/port/port-3/runid/99/test/A", json!({"code": 0}));
        set(&store, "origin/lab-1/port/port-3/runid/99/test/B", json!({"code": 0}));

        wait_for(&harness.view, "run 99 results", |view| {
            cell_is(view, "port-3", "B", "pass", Recency::Previous)
        })
        .await;
        assert!(cell_is(&harness.view.read(), "port-3", "A", "fail", Recency::Current));
    }

    #[tokio::test]
    async fn test_filtered_runs_skip_failing_predicates() {
        let store = Arc::new(MemoryStore::new());
        set(&store, "origin/lab-1/runid/42", json!({"port": 5, "updated": "2020-01-01T00:00:00.000Z"}));
        set(&store, "origin/lab-1/runid/42/test/ping", json!({"code": 0}));
        set(&store, "origin/lab-1/runid/43", json!({"port": 3, "updated": "2020-01-01T00:00:00.000Z"}));
        set(&store, "origin/lab-1/runid/43/test/ping", json!({"code": 1}));

        let filter = FilterSpec::from_params([("origin", "lab-1"), ("runids", "42,43"), ("port", "3")]);
        let harness = start(&store, filter).await;
        assert!(matches!(
            harness.session.as_ref().map(Session::mode),
            Some(SessionMode::Filtered { runs: 1, .. })
        ));

        wait_for(&harness.view, "run 43", |view| {
            cell_is(view, "port3", "ping", "fail", Recency::Current)
        })
        .await;
        assert!(harness.view.read().row("port5").is_none());
        assert_eq!(harness.view.read().rows.len(), 1);
    }

    #[tokio::test]
    async fn test_rows_time_out_and_terminate() {
        let store = Arc::new(MemoryStore::new());
        seed_origin(&store);
        set(&store, "origin/lab-1/port/port4", json!({}));
        for port in ["port3", "port4"] {
            set(&store, &format!("origin/lab-1/port/{}/runid/100", port), json!({"timestamp": 1}));
            set(&store, &format!("origin/lab-1/port/{}/runid/100/test/ping", port), json!({}));
        }
        set(&store, "origin/lab-1/port/port4/runid/100/test/terminate", json!({}));

        let harness = start(&store, FilterSpec::from_params([("origin", "lab-1")])).await;
        wait_for(&harness.view, "both rows", |view| {
            cell_is(view, "port3", "ping", "pass", Recency::Current)
                && cell_is(view, "port4", "ping", "pass", Recency::Current)
        })
        .await;
        wait_for(&harness.view, "port4 done", |view| {
            view.row("port4").map_or(false, |row| row.timer == "Done")
        })
        .await;

        harness.clock.store(START + 600, Ordering::SeqCst);
        wait_for(&harness.view, "port3 timed out", |view| {
            view.row("port3")
                .map_or(false, |row| row.timed_out && row.timer == "Timed Out")
        })
        .await;
        assert_eq!(harness.view.read().row("port4").unwrap().timer, "Done");
    }

    #[tokio::test]
    async fn test_terminate_of_older_run_keeps_row_live() {
        let store = Arc::new(MemoryStore::new());
        seed_origin(&store);
        set(&store, "origin/lab-1/port/port3/runid/100", json!({"timestamp": 1}));
        set(&store, "origin/lab-1/port/port3/runid/100/test/dns", json!({}));
        set(&store, "origin/lab-1/port/port3/runid/101", json!({"timestamp": 2}));
        set(&store, "origin/lab-1/port/port3/runid/101/test/ping", json!({}));

        let harness = start(&store, FilterSpec::from_params([("origin", "lab-1")])).await;
        wait_for(&harness.view, "both runs", |view| {
            cell_is(view, "port3", "ping", "pass", Recency::Current)
                && cell_is(view, "port3", "dns", "pass", Recency::Previous)
        })
        .await;

        // Only the older run finishes
        set(&store, "origin/lab-1/port/port3/runid/100/test/terminate", json!({}));
        wait_for(&harness.view, "older terminate", |view| {
            view.status == "updating port3 terminate = 100 with pass"
        })
        .await;
        wait_for(&harness.view, "live timer", |view| {
            view.row("port3").map_or(false, |row| row.timer == "0s")
        })
        .await;

        harness.clock.store(START + 600, Ordering::SeqCst);
        wait_for(&harness.view, "port3 timed out", |view| {
            view.row("port3")
                .map_or(false, |row| row.timed_out && row.timer == "Timed Out")
        })
        .await;
    }

    #[tokio::test]
    async fn test_origin_listing_without_origin() {
        let store = Arc::new(MemoryStore::new());
        set(&store, "origin/lab-1", json!({}));
        set(&store, "origin/lab-2", json!({}));

        let harness = start(&store, FilterSpec::default()).await;
        assert!(matches!(
            harness.session.as_ref().map(Session::mode),
            Some(SessionMode::Listing)
        ));

        wait_for(&harness.view, "origins", |view| {
            view.origins == vec!["lab-1".to_string(), "lab-2".to_string()]
        })
        .await;
        assert_eq!(store.total_subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_failure_reaches_status_line() {
        let store = Arc::new(MemoryStore::new());
        seed_origin(&store);
        store.reject_subscriptions(&StorePath::parse("origin/lab-1/port"));

        let harness = start(&store, FilterSpec::from_params([("origin", "lab-1")])).await;
        wait_for(&harness.view, "failure status", |view| {
            view.status.starts_with("Subscription error on origin/lab-1/port")
        })
        .await;

        // Fail-stop: nothing re-subscribes.
        sleep(Duration::from_millis(50)).await;
        assert_eq!(store.subscribe_count(&StorePath::parse("origin/lab-1/port")), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_shown_in_view() {
        let store = Arc::new(MemoryStore::new());
        seed_origin(&store);
        set(
            &store,
            "origin/lab-1/runner/heartbeat",
            json!({"updated": "2020-01-01T00:00:00.000Z", "message": "idle"}),
        );

        let harness = start(&store, FilterSpec::from_params([("origin", "lab-1")])).await;
        wait_for(&harness.view, "heartbeat", |view| {
            view.heartbeat == "2020-01-01T00:00:00.000Z idle"
        })
        .await;
    }

    #[tokio::test]
    async fn test_each_collection_subscribed_once() {
        let store = Arc::new(MemoryStore::new());
        seed_origin(&store);
        for run in ["100", "101", "102"] {
            set(&store, &format!("origin/lab-1/port/port3/runid/{}", run), json!({"timestamp": run}));
            set(&store, &format!("origin/lab-1/port/port3/runid/{}/test/ping", run), json!({}));
        }

        let harness = start(&store, FilterSpec::from_params([("origin", "lab-1")])).await;
        wait_for(&harness.view, "latest run", |view| {
            view.cell("port3", "ping").map_or(false, |c| c.recency == Recency::Current)
        })
        .await;

        // Re-deliver every document.
        for run in ["100", "101", "102"] {
            set(&store, &format!("origin/lab-1/port/port3/runid/{}", run), json!({"timestamp": run, "seen": true}));
        }
        set(&store, "origin/lab-1/port/port3", json!({"seen": true}));
        sleep(Duration::from_millis(50)).await;

        for path in [
            "origin/lab-1/port",
            "origin/lab-1/port/port3/runid",
            "origin/lab-1/port/port3/runid/100/test",
            "origin/lab-1/port/port3/runid/102/test",
        ] {
            assert_eq!(store.subscribe_count(&StorePath::parse(path)), 1, "{}", path);
        }
    }

    #[tokio::test]
    async fn test_child_registrations_are_staggered() {
        let store = Arc::new(MemoryStore::new());
        for port in ["p1", "p2", "p3"] {
            set(&store, &format!("origin/lab-1/port/{}", port), json!({}));
        }

        let stagger = Duration::from_millis(40);
        let tree = SubscriptionTree::new(store.clone(), stagger);
        let (tx, _rx) = mpsc::channel(16);
        let started = Instant::now();
        tree.register_cascade(
            StorePath::parse("origin/lab-1"),
            vec![Level::new("port"), Level::new("runid")],
            tx,
        );

        let mut opened_at = Vec::new();
        for port in ["p1", "p2", "p3"] {
            let collection = StorePath::parse(&format!("origin/lab-1/port/{}/runid", port));
            let deadline = Instant::now() + Duration::from_secs(3);
            while store.subscribe_count(&collection) == 0 {
                assert!(Instant::now() < deadline, "{} never opened", collection);
                sleep(Duration::from_millis(2)).await;
            }
            opened_at.push(started.elapsed());
        }

        for (n, elapsed) in opened_at.iter().enumerate() {
            assert!(*elapsed >= stagger * (n as u32 + 1), "child {} opened after {:?}", n, elapsed);
        }
    }

    #[tokio::test]
    async fn test_feed_drives_the_grid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let feed_path = temp_dir.path().join("feed.jsonl");
        let lines = [
            r#"{"op":"set","path":"origin/lab-1/port/port7","data":{}}"#,
            r#"{"op":"set","path":"origin/lab-1/port/port7/runid/5f5e1000","data":{"timestamp":1}}"#,
            r#"{"op":"set","path":"origin/lab-1/port/port7/runid/5f5e1000/test/dhcp","data":{"state":"skip"}}"#,
        ];
        std::fs::write(&feed_path, lines.join("\n") + "\n").unwrap();

        let store = Arc::new(MemoryStore::new());
        tokio::spawn(feed_task(feed_path, store.clone(), Duration::from_millis(10)));

        let harness = start(&store, FilterSpec::from_params([("origin", "lab-1")])).await;
        wait_for(&harness.view, "fed result", |view| {
            cell_is(view, "port7", "dhcp", "skip", Recency::Current)
        })
        .await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_dashboard() {
        let (tx, rx) = mpsc::channel(8);
        let dashboard = Dashboard::new(GridView::new(), 500);
        let handle = tokio::spawn(dashboard_task(rx, dashboard));

        tx.send(DashboardMessage::Columns(vec!["ping".to_string()]))
            .await
            .unwrap();
        tx.send(DashboardMessage::Shutdown).await.unwrap();

        let dashboard = handle.await.unwrap();
        assert_eq!(dashboard.model().columns().len(), 1);
    }
}
