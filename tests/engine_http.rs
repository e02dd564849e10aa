//! End-to-end tests: a spawned engine talking HTTP to a mock service.
//!
//! Each test runs its own `MockServer` and in-memory preference store.

use std::sync::Arc;
use std::time::Duration;

use marketfeed::engine::{
    self, Command, EngineHandle, EngineSettings, EngineSnapshot, FeedEngine, Notice,
};
use marketfeed::feed::{FeedMode, FilterState};
use marketfeed::preferences::Preferences;
use marketfeed::remote::{ClientSettings, HttpFeedService, WatchlistEntry};
use marketfeed::storage::MemoryPreferences;
use marketfeed::util::validate_api_base;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

fn article(link: &str) -> serde_json::Value {
    json!({
        "link": link,
        "headline": format!("Headline {}", link),
        "timestamp": "05 Mar 2025, 02:30 PM",
        "sentiment": "neutral",
        "views": 3
    })
}

async fn mount_market(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/market"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "indices": {"NIFTY 50": {"price": 22000.5, "change": 10.0, "percent_change": 0.05}},
            "commodities": {}
        })))
        .mount(server)
        .await;
}

fn start(
    server: &MockServer,
    identity: Option<&str>,
    initial: FilterState,
) -> (EngineHandle, Preferences) {
    let base = validate_api_base(&server.uri()).unwrap();
    let service = HttpFeedService::new(
        base,
        ClientSettings {
            request_timeout: Duration::from_secs(2),
            max_retries: 0,
            retry_base_delay: Duration::from_millis(10),
        },
    )
    .unwrap();
    let prefs = Preferences::new(Arc::new(MemoryPreferences::new()));
    let (engine, events) = FeedEngine::new(
        Arc::new(service),
        prefs.clone(),
        EngineSettings {
            page_size: 2,
            ..EngineSettings::default()
        },
    );
    let handle = engine::spawn(engine, events, identity.map(str::to_string), initial);
    (handle, prefs)
}

/// Wait until the published snapshot satisfies `predicate`.
async fn wait_for<F>(handle: &EngineHandle, predicate: F) -> EngineSnapshot
where
    F: Fn(&EngineSnapshot) -> bool,
{
    let mut rx = handle.snapshots();
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("engine stopped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

fn links(snapshot: &EngineSnapshot) -> Vec<&str> {
    snapshot.feed.items.iter().map(|a| a.link.as_str()).collect()
}

#[tokio::test]
async fn test_first_page_and_market_load_on_start() {
    let server = MockServer::start().await;
    mount_market(&server).await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .and(query_param("page", "1"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [article("a1"), article("a2")],
            "pages": 3
        })))
        .mount(&server)
        .await;

    let (handle, _) = start(&server, None, FilterState::default());
    let snapshot = wait_for(&handle, |s| !s.feed.items.is_empty() && s.market.is_some()).await;

    assert_eq!(links(&snapshot), vec!["a1", "a2"]);
    assert_eq!(snapshot.feed.page, 1);
    assert_eq!(snapshot.feed.total_pages, 3);
    assert!(!snapshot.loading);
    assert!(snapshot.market.unwrap().indices.contains_key("NIFTY 50"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_next_page_replaces_items() {
    let server = MockServer::start().await;
    mount_market(&server).await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [article("a1"), article("a2")],
            "pages": 2
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [article("b1")],
            "pages": 2
        })))
        .mount(&server)
        .await;

    let (handle, _) = start(&server, None, FilterState::default());
    wait_for(&handle, |s| s.feed.page == 1 && !s.feed.items.is_empty()).await;

    handle.send(Command::NextPage).await.unwrap();
    let snapshot = wait_for(&handle, |s| s.feed.page == 2 && !s.loading).await;
    assert_eq!(links(&snapshot), vec!["b1"]);

    // Past the last page nothing is requested
    handle.send(Command::NextPage).await.unwrap();
    handle.send(Command::GoToPage(9)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.snapshot().feed.page, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_personalized_feed_uses_remote_watchlist() {
    let server = MockServer::start().await;
    mount_market(&server).await;
    Mock::given(method("GET"))
        .and(path("/watchlist/a@x.io"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"symbol": "TCS", "name": "Tata"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .and(query_param("stocks", "TCS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [article("tcs-1")],
            "pages": 1
        })))
        .mount(&server)
        .await;

    let initial = FilterState::default().with_mode(FeedMode::Personalized);
    let (handle, prefs) = start(&server, Some("a@x.io"), initial);
    let snapshot = wait_for(&handle, |s| !s.feed.items.is_empty()).await;

    assert_eq!(links(&snapshot), vec!["tcs-1"]);
    assert_eq!(snapshot.watchlist, vec![WatchlistEntry::new("TCS", "Tata")]);
    assert_eq!(snapshot.filter.watchlist_symbols, vec!["TCS".to_string()]);

    // The confirmed replica is cached for the identity
    assert_eq!(
        prefs.watchlist("a@x.io").await.unwrap(),
        vec![WatchlistEntry::new("TCS", "Tata")]
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn test_failed_add_rolls_back_and_notifies() {
    let server = MockServer::start().await;
    mount_market(&server).await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "pages": 1})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/watchlist/a@x.io"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"symbol": "TCS", "name": "Tata"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/watchlist"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"detail": "Database unavailable"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (mut handle, _) = start(&server, Some("a@x.io"), FilterState::default());
    // The remote refresh replaces the replica, so let it land first
    wait_for(&handle, |s| !s.watchlist.is_empty() && !s.loading).await;

    handle
        .send(Command::AddWatchlist(WatchlistEntry::new("infy", "Infosys")))
        .await
        .unwrap();

    let notice = tokio::time::timeout(WAIT, async {
        loop {
            match handle.next_notice().await {
                Some(notice @ Notice::WatchlistRolledBack { .. }) => return notice,
                Some(_) => continue,
                None => panic!("notice channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for rollback");

    assert_eq!(
        notice,
        Notice::WatchlistRolledBack {
            symbol: "INFY".to_string(),
            detail: "Database unavailable".to_string(),
        }
    );
    let snapshot = wait_for(&handle, |s| s.watchlist.len() == 1).await;
    assert_eq!(snapshot.watchlist, vec![WatchlistEntry::new("TCS", "Tata")]);
    assert_eq!(snapshot.filter.watchlist_symbols, vec!["TCS".to_string()]);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_feed_failure_keeps_previous_page() {
    let server = MockServer::start().await;
    mount_market(&server).await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [article("a1")],
            "pages": 2
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (handle, _) = start(&server, None, FilterState::default());
    wait_for(&handle, |s| !s.feed.items.is_empty()).await;

    handle.send(Command::GoToPage(2)).await.unwrap();
    let snapshot = wait_for(&handle, |s| s.feed_error.is_some()).await;

    assert_eq!(links(&snapshot), vec!["a1"]);
    assert_eq!(snapshot.feed.page, 1);
    assert!(!snapshot.loading);

    handle.shutdown().await;
}
