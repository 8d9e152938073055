//! Integration tests for the mbmd exporter.
//!
//! An in-process axum server plays the role of mbmd's `/api/last` endpoint;
//! the collector and HTTP server are exercised against it end to end.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;

use mbmd_exporter::{DeviceNameMap, HttpServer, ScrapeCollector, SharedCollector};

/// Start a mock mbmd answering `/api/last` with `status` and `body`.
async fn mock_mbmd(status: StatusCode, body: &'static str) -> SocketAddr {
    let router = Router::new().route("/api/last", get(move || async move { (status, body) }));
    serve(router).await
}

/// Start a mock mbmd that answers only after `delay`.
async fn slow_mbmd(delay: Duration) -> SocketAddr {
    let router = Router::new().route(
        "/api/last",
        get(move || async move {
            tokio::time::sleep(delay).await;
            "{}"
        }),
    );
    serve(router).await
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn collector(addr: SocketAddr, names: DeviceNameMap) -> SharedCollector {
    Arc::new(
        ScrapeCollector::new(&format!("http://{}/", addr), Duration::from_secs(2), names).unwrap(),
    )
}

/// Extract `(metric, device, name, value)` from exposition text.
fn parse_samples(text: &str) -> Vec<(String, String, String, f64)> {
    text.lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .map(|line| {
            let (series, value) = line.rsplit_once(' ').unwrap();
            let (metric, labels) = series.split_once('{').unwrap();
            let labels = labels.trim_end_matches('}');
            let (device, name) = labels.split_once(',').unwrap();
            let unquote = |kv: &str| {
                kv.split_once('=')
                    .unwrap()
                    .1
                    .trim_matches('"')
                    .to_string()
            };
            (
                metric.to_string(),
                unquote(device),
                unquote(name),
                value.parse().unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_scrape_snapshot() {
    let addr = mock_mbmd(
        StatusCode::OK,
        r#"{"this.1": {"Power": 100.5, "Sum": 42, "Timestamp": "2024-05-01T10:00:00Z"}}"#,
    )
    .await;
    let collector = collector(addr, DeviceNameMap::default());

    let samples = parse_samples(&collector.render().await);
    assert_eq!(
        samples,
        vec![
            (
                "mbmd_power_watts".to_string(),
                "this.1".to_string(),
                String::new(),
                100.5
            ),
            (
                "mbmd_total_kwh".to_string(),
                "this.1".to_string(),
                String::new(),
                42.0
            ),
        ]
    );
}

#[tokio::test]
async fn test_scrape_includes_type_lines() {
    let addr = mock_mbmd(
        StatusCode::OK,
        r#"{"this.1": {"Power": 1, "Import": 2}}"#,
    )
    .await;
    let collector = collector(addr, DeviceNameMap::default());

    let output = collector.render().await;
    assert!(output.contains("# TYPE mbmd_power_watts gauge\n"));
    assert!(output.contains("# TYPE mbmd_import_kwh counter\n"));
}

#[tokio::test]
async fn test_scrape_multiple_devices_and_names() {
    let addr = mock_mbmd(
        StatusCode::OK,
        r#"{
            "this.2": {"Voltage": 230.1},
            "this.3": {"Voltage": "229.8"}
        }"#,
    )
    .await;
    let names: DeviceNameMap = [("2", "Kitchen")].into_iter().collect();
    let collector = collector(addr, names);

    let samples = parse_samples(&collector.render().await);
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].1, "this.2");
    assert_eq!(samples[0].2, "Kitchen");
    assert_eq!(samples[0].3, 230.1);
    assert_eq!(samples[1].1, "this.3");
    assert_eq!(samples[1].2, "");
    assert_eq!(samples[1].3, 229.8);
}

#[tokio::test]
async fn test_names_from_mbmd_yaml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"devices:\n  - name: Garage\n    type: SDM\n    id: 7\n    adapter: /dev/ttyUSB0\n")
        .unwrap();

    let addr = mock_mbmd(StatusCode::OK, r#"{"SDM1.7": {"Frequency": 50}}"#).await;
    let collector = collector(addr, DeviceNameMap::load(file.path()));

    let samples = parse_samples(&collector.render().await);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].0, "mbmd_frequency_hz");
    assert_eq!(samples[0].2, "Garage");
}

#[tokio::test]
async fn test_bad_field_does_not_hide_others() {
    let addr = mock_mbmd(
        StatusCode::OK,
        r#"{"this.1": {"Power": "n/a", "Current": 5.25, "Export": null}}"#,
    )
    .await;
    let collector = collector(addr, DeviceNameMap::default());

    let samples = parse_samples(&collector.render().await);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].0, "mbmd_current_amps");
    assert_eq!(samples[0].3, 5.25);
}

#[tokio::test]
async fn test_null_device_does_not_hide_others() {
    let addr = mock_mbmd(
        StatusCode::OK,
        r#"{"this.1": null, "this.2": {"Power": 12.5}}"#,
    )
    .await;
    let collector = collector(addr, DeviceNameMap::default());

    let samples = parse_samples(&collector.render().await);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].0, "mbmd_power_watts");
    assert_eq!(samples[0].1, "this.2");
    assert_eq!(samples[0].3, 12.5);
}

#[tokio::test]
async fn test_upstream_error_status_yields_nothing() {
    let addr = mock_mbmd(StatusCode::INTERNAL_SERVER_ERROR, "meter bus down").await;
    let collector = collector(addr, DeviceNameMap::default());

    assert!(collector.scrape().await.is_empty());
    assert!(matches!(
        collector.fetch().await,
        Err(mbmd_exporter::ScrapeError::Status { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_malformed_json_yields_nothing() {
    let addr = mock_mbmd(StatusCode::OK, "{not json").await;
    let collector = collector(addr, DeviceNameMap::default());

    assert!(collector.scrape().await.is_empty());
    assert_eq!(collector.render().await, "");
}

#[tokio::test]
async fn test_unreachable_upstream_yields_nothing() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let collector = collector(addr, DeviceNameMap::default());

    assert!(collector.scrape().await.is_empty());
}

#[tokio::test]
async fn test_timeout_yields_nothing() {
    let addr = slow_mbmd(Duration::from_secs(5)).await;
    let collector = Arc::new(
        ScrapeCollector::new(
            &format!("http://{}", addr),
            Duration::from_millis(200),
            DeviceNameMap::default(),
        )
        .unwrap(),
    );

    let started = std::time::Instant::now();
    assert!(collector.scrape().await.is_empty());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_each_scrape_fetches_fresh() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let router = Router::new().route(
        "/api/last",
        get(move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!(r#"{{"this.1": {{"Sum": {}}}}}"#, n)
            }
        }),
    );
    let addr = serve(router).await;
    let collector = collector(addr, DeviceNameMap::default());

    let first = parse_samples(&collector.render().await);
    let second = parse_samples(&collector.render().await);

    assert_eq!(first[0].3, 1.0);
    assert_eq!(second[0].3, 2.0);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_http_server_end_to_end() {
    let upstream = mock_mbmd(
        StatusCode::OK,
        r#"{"this.1": {"Power": 100.5, "Sum": 42}}"#,
    )
    .await;
    let collector = collector(upstream, DeviceNameMap::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = HttpServer::new(collector, addr, "/metrics".to_string());
    let server_task = tokio::spawn(server.serve(listener, shutdown_rx));

    let response = reqwest::get(format!("http://{}/metrics", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain; version=0.0.4")
    );

    let body = response.text().await.unwrap();
    assert!(body.contains("mbmd_power_watts{device=\"this.1\",name=\"\"} 100.5\n"));
    assert!(body.contains("mbmd_total_kwh{device=\"this.1\",name=\"\"} 42\n"));

    let health = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
