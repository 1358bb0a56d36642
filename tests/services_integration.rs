//! End-to-end: config file → services → ranked search → shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use ragchat::corpus::parse_corpus;
use ragchat::{AppConfig, SearchServices, SourceConfig};
use ragchat_search::{EnhancedSearchRequest, FallbackMode};

const CORPUS: &str = r#"{
    "api": [
        {"id": "a1", "content": "How to deploy the config service", "url": "https://docs.test/deploy"},
        {"id": "a2", "content": "Deploy rollback checklist"}
    ],
    "memory": [
        {"id": "m1", "content": "Deploy config cached copy", "url": "https://docs.test/deploy/"},
        {"id": "m2", "content": "Team lunch schedule"}
    ]
}"#;

#[tokio::test]
async fn configured_services_answer_ranked_queries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");

    let mut config = AppConfig::default();
    config.resilience.retry.max_retries = 0;
    config.resilience.fallback.mode = FallbackMode::Graceful;
    config.sources = vec![
        SourceConfig {
            name: "api".into(),
            fallbacks: vec!["memory".into()],
        },
        SourceConfig {
            name: "memory".into(),
            fallbacks: vec![],
        },
    ];
    config.save_to_file(&path).expect("save");
    let config = AppConfig::from_file(&path).expect("load");

    let services = SearchServices::start(&config, parse_corpus(CORPUS).expect("corpus")).expect("start");
    let response = services
        .search(&EnhancedSearchRequest::new("deploy config"))
        .await;

    assert!(!response.cached);
    assert!(response.source_errors.is_empty());
    assert_eq!(response.degradation.level, 0);

    // a1 and m1 share a canonical URL and collapse to one result
    let ids: Vec<&str> = response.results.iter().map(|r| r.document.id.as_str()).collect();
    assert_eq!(ids.len(), 2, "{ids:?}");
    assert!(ids.contains(&"a2"));
    assert!(ids.iter().all(|id| *id != "m2"));
    assert_eq!(response.results[0].rank, Some(1));

    let health = services.health().await;
    assert_eq!(health.len(), 2);
    assert!(health.iter().all(|h| h.available));

    services.shutdown().await;
}
