use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use shiftcache::application::filters::ApplicationFilter;
use shiftcache::cache::{CacheConfig, CachePayload, QueryClient, QueryKey};
use shiftcache::domain::entities::DashboardSummary;
use shiftcache::domain::types::{ApplicationId, HospitalId, JobId};
use shiftcache::infra::simulated::{Injected, SimulatedBackend};

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Store hit/miss/evict
    let small = CacheConfig {
        max_entries: 1,
        ..Default::default()
    };
    let small_client = QueryClient::from_backend(&small, Arc::new(SimulatedBackend::new()));
    let hospital = QueryKey::hospital_detail(HospitalId(3));
    assert!(small_client.read(&hospital).is_none());
    small_client.fetch(&hospital).await.expect("hospital fetch");
    assert!(small_client.read(&hospital).is_some());
    small_client
        .fetch(&QueryKey::job_detail(JobId(7)))
        .await
        .expect("job fetch");
    assert!(small_client.read(&hospital).is_none());

    // Discarded fetch result
    let store = small_client.store();
    let dashboard = QueryKey::dashboard();
    let ticket = store.begin_fetch(&dashboard);
    store.set(
        dashboard.clone(),
        CachePayload::Dashboard(DashboardSummary::default()),
    );
    assert!(
        !store
            .complete_fetch(ticket, CachePayload::Dashboard(DashboardSummary::default()))
            .is_applied()
    );

    // Mutation commit + rollback, background refetch latency and queue gauge
    let config = CacheConfig {
        developer_diagnostics: false,
        ..Default::default()
    };
    let backend = Arc::new(SimulatedBackend::new());
    let client = QueryClient::from_backend(&config, Arc::clone(&backend));
    client
        .fetch(&QueryKey::application_list(&ApplicationFilter::default()))
        .await
        .expect("list fetch");
    client.fetch(&dashboard).await.expect("dashboard fetch");

    assert!(
        client
            .withdraw_application(ApplicationId(42))
            .await
            .is_committed()
    );
    client.settle().await;

    backend.inject(Injected::Network);
    assert!(
        !client
            .withdraw_application(ApplicationId(41))
            .await
            .is_committed()
    );

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "shiftcache_store_hit_total",
        "shiftcache_store_miss_total",
        "shiftcache_store_evict_total",
        "shiftcache_fetch_discarded_total",
        "shiftcache_mutation_committed_total",
        "shiftcache_mutation_rolled_back_total",
        "shiftcache_refetch_pending",
        "shiftcache_mutation_ms",
        "shiftcache_refetch_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
