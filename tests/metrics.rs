use std::{collections::HashSet, time::Duration};

use metrics_util::debugging::DebuggingRecorder;
use tempfile::NamedTempFile;
use url::Url;
use visitor::{
    application::render::RenderGateway,
    cache::{CacheError, CacheKey, VisitCache},
    config::SsrSettings,
    infra::gateway::GatewayClient,
};
use visitor_types::{RenderRequest, Visit};

#[tokio::test]
async fn cache_and_gateway_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let cache = VisitCache::in_memory();
    let key = CacheKey::from("post:1");
    for _ in 0..2 {
        cache
            .data()
            .get_or_compute(&key, || async { Ok::<_, CacheError>(Visit::default()) })
            .await
            .expect("data fill");
        cache
            .rendered()
            .get_or_compute(&key, || async {
                Ok::<_, CacheError>("<main></main>".to_string())
            })
            .await
            .expect("rendered fill");
    }

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    let bundle = NamedTempFile::new().expect("bundle");
    let client = GatewayClient::new(&SsrSettings {
        enabled: true,
        url: Url::parse(&format!("http://{addr}")).expect("url"),
        bundle: bundle.path().to_path_buf(),
        request_timeout: Some(Duration::from_secs(2)),
    })
    .expect("client");
    assert!(client.render(&RenderRequest::default()).await.is_err());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "visitor_cache_data_hit_total",
        "visitor_cache_data_miss_total",
        "visitor_cache_rendered_hit_total",
        "visitor_cache_rendered_miss_total",
        "visitor_gateway_render_total",
        "visitor_gateway_render_failed_total",
        "visitor_gateway_render_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
