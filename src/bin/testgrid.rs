use {
    std::sync::Arc,
    testgrid::{
        config::{filter_from_args, DashboardConfig},
        dashboard::{dashboard_task, Dashboard, DashboardMessage},
        session::{start_session, SessionMode},
        sink::SharedView,
        store::{feed::feed_task, DocumentStore, MemoryStore},
        ui,
    },
    tokio::{sync::mpsc, time::Duration},
};

/// Poll interval while following the document feed
const FEED_POLL_MS: u64 = 200;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr; the UI draws on the alternate screen
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = DashboardConfig::from_env()?;
    let filter = filter_from_args(std::env::args().skip(1));

    log::info!("🚀 Starting testgrid...");
    log::info!("📊 Configuration:");
    log::info!("   Timeout: {}s", config.timeout_secs);
    log::info!("   Run window: {}", config.run_window);
    log::info!("   Subscription stagger: {}ms", config.stagger_ms);
    match &filter.origin {
        Some(origin) => log::info!("   Origin: {}", origin),
        None => log::info!("   Origin: none (listing origins)"),
    }

    let store = Arc::new(MemoryStore::new());
    match &config.feed_path {
        Some(path) => {
            log::info!("📂 Following document feed: {}", path.display());
            tokio::spawn(feed_task(
                path.clone(),
                Arc::clone(&store),
                Duration::from_millis(FEED_POLL_MS),
            ));
        }
        None => log::warn!("⚠️  GRID_FEED_PATH not set, the grid will stay empty"),
    }

    let (tx, rx) = mpsc::channel::<DashboardMessage>(config.channel_buffer);
    let view = SharedView::new();
    let dashboard = Dashboard::new(view.clone(), config.timeout_secs);
    let dashboard_handle = tokio::spawn(dashboard_task(rx, dashboard));

    let store: Arc<dyn DocumentStore> = store;
    let session = match start_session(store, &config, &filter, tx.clone()).await {
        Ok(session) => {
            if let SessionMode::Filtered { runs, .. } = session.mode() {
                log::info!("✅ Watching {} filtered runs", runs);
            }
            Some(session)
        }
        // Already shown on the status line; keep the UI up so it can be read
        Err(e) => {
            log::error!("❌ {}", e);
            None
        }
    };

    let ui_handle = tokio::spawn(async move {
        if let Err(e) = ui::run_ui(view).await {
            log::error!("UI error: {}", e);
        }
    });

    tokio::select! {
        _ = ui_handle => {
            log::info!("UI exited");
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received Ctrl-C");
        }
    }

    if let Some(session) = session {
        session.shutdown();
    }
    let _ = tx.send(DashboardMessage::Shutdown).await;
    let _ = dashboard_handle.await;

    Ok(())
}
