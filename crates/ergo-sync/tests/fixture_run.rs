use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ergo_core::Domain;
use ergo_storage::MemoryStore;
use ergo_sync::SyncConfig;
use serde_json::json;

fn fixture_config() -> SyncConfig {
    let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures");
    let vars: HashMap<&str, String> = HashMap::from([
        ("SOURCE_MODE", "fixtures".to_string()),
        ("TENANTS", "STANDARD,JOHN_DEERE".to_string()),
        ("FIXTURES_DIR", fixtures.display().to_string()),
    ]);
    SyncConfig::from_lookup(move |key| vars.get(key).cloned()).expect("fixture config")
}

#[tokio::test]
async fn bundled_fixtures_sync_every_domain() {
    let config = fixture_config();
    let store = Arc::new(MemoryStore::new());
    let driver = config
        .build_driver(store.clone(), store.clone())
        .expect("driver");

    let pass = driver.run_incremental_pass().await;
    assert!(pass.is_clean(), "{:?}", pass.failed);
    assert_eq!(pass.completed, Domain::ALL.to_vec());

    let reports = store.documents(Domain::Reports).await;
    assert_eq!(reports.len(), 7);
    let risk_of = |id: &str| {
        reports
            .iter()
            .find(|doc| doc["report_id"] == json!(id))
            .map(|doc| doc["risk"].clone())
    };
    assert_eq!(risk_of("101"), Some(json!("LOW")));
    assert_eq!(risk_of("102"), Some(json!("HIGH")));
    assert_eq!(risk_of("JD-17"), Some(json!("VERY_HIGH_RISK")));
    assert_eq!(risk_of("301"), Some(json!("MODERATE")));
    assert_eq!(risk_of("401"), Some(json!("MODERATE")));

    assert_eq!(store.documents(Domain::Files).await.len(), 3);
    assert_eq!(store.documents(Domain::ActionPlans).await.len(), 1);

    for domain in Domain::ALL {
        let history = store.checkpoints(domain).await;
        assert_eq!(history.len(), 1, "{domain}");
        assert_eq!(history[0].window(), domain.bootstrap_window());
    }
}

#[tokio::test]
async fn bundled_fixtures_fill_realtime_mirrors() {
    let config = fixture_config();
    let store = Arc::new(MemoryStore::new());
    let driver = config
        .build_driver(store.clone(), store.clone())
        .expect("driver");

    let pass = driver.run_realtime_pass().await;
    assert!(pass.is_clean(), "{:?}", pass.failed);

    // STANDARD serves its aggregate snapshot; JOHN_DEERE falls back to plain rows.
    let files = store.realtime_documents(Domain::Files).await;
    assert_eq!(files.len(), 2);
    assert!(files
        .iter()
        .any(|doc| doc["client"] == json!("STANDARD") && doc["total_files"] == json!(2)));

    let plans = store.realtime_documents(Domain::ActionPlans).await;
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0]["action_plan"]["title"], json!("Raise packing table"));

    assert!(store.checkpoints(Domain::Reports).await.is_empty());
}
