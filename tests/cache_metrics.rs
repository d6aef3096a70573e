mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::harness;
use metrics_util::debugging::DebuggingRecorder;
use supercache::application::PreloadAction;
use supercache::cache::{
    KeyIndex, METRIC_GC_PASS_MS, METRIC_GC_REMOVED, METRIC_PRELOAD_RENDERED, METRIC_STORE_HIT,
    METRIC_STORE_MISS,
};
use supercache::domain::types::{ContentId, Variant};
use supercache::infra::telemetry;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let h = harness(3);
    let store = &h.context.store;
    let key = KeyIndex::derive_key(ContentId::new(1), &Variant::anonymous_desktop());

    // Store hit and miss
    assert!(store.get(&key).expect("get").is_none());
    store.put(&key, b"page", Duration::from_secs(10)).expect("put");
    assert!(store.get(&key).expect("get").is_some());

    // Collection of the now expired entry
    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.context.gc.on_tick().await.removed, 1);

    // Preload renders
    h.context.controller.enable().expect("enable");
    h.context
        .controller
        .preload(PreloadAction::Start)
        .await
        .expect("start");
    h.context.preloader.on_tick().await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        METRIC_STORE_HIT,
        METRIC_STORE_MISS,
        METRIC_GC_REMOVED,
        METRIC_GC_PASS_MS,
        METRIC_PRELOAD_RENDERED,
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
