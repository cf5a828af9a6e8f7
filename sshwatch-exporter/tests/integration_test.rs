//! Integration tests for the SSH exporter.
//!
//! These tests drive the full flow from configuration through a scripted
//! fleet scrape to the text served on the metrics endpoint.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use sshwatch_collector::executor::{MockFactory, MockHost};
use sshwatch_collector::sampler::{
    CPU_STAT_COMMAND, DISK_COMMAND, MEMINFO_COMMAND, file_listing_command, process_command,
};
use sshwatch_collector::{FleetCollector, FleetSettings, HostTarget, MetricRegistry};
use sshwatch_exporter::{ExporterConfig, HttpServer, render};
use tokio::sync::watch;

const CONFIG: &str = r#"{
    exporter: { listen: "127.0.0.1:0", path: "/metrics" },
    ssh: { connect_timeout_secs: 5 },
    hosts: [
        {
            host: "app01",
            user: "monitor",
            private_key: "/keys/monitor",
            monitors: {
                processes: [{ patterns: ["nginx", "redis"] }],
                files: [{ path: "/srv/drop" }],
                stat: true,
            },
        },
        { host: "db01", user: "monitor", password: "pw", monitors: { stat: true } },
    ],
}"#;

fn app01() -> MockHost {
    MockHost::new()
        .respond(
            process_command("/proc/[0-9]*/cmdline"),
            "nginx: master\0\nnginx: worker\0\n/usr/bin/redis-server\0*:6379\0\n",
        )
        .respond(
            file_listing_command("/srv/drop"),
            "\t \t\n512\t2024-05-01 10:00:00.000000000\tin\"coming.csv\n",
        )
        .respond(CPU_STAT_COMMAND, "cpu  100 0 100 800 0 0 0 0 0 0\nctxt 10\n")
        .respond(CPU_STAT_COMMAND, "cpu  150 0 150 900 0 0 0 0 0 0\nctxt 20\n")
        .respond(MEMINFO_COMMAND, "MemTotal: 4000 kB\nMemAvailable: 1000 kB\n")
        .respond(
            DISK_COMMAND,
            "Filesystem 1B-blocks Used Available Use% Mounted on\n\
             /dev/sda1 1000 600 400 60% /\n\
             /dev/sdb1 2000 200 1800 10% /data\n",
        )
}

/// Helper to build a fleet from the test configuration.
fn fleet(factory: MockFactory) -> Arc<FleetCollector<MockFactory>> {
    let config = ExporterConfig::parse(CONFIG).unwrap();
    let targets: Vec<HostTarget> = config.targets().unwrap();
    Arc::new(FleetCollector::new(
        targets,
        Arc::new(MetricRegistry::standard()),
        factory,
        FleetSettings {
            cpu_sample_interval: Duration::from_millis(10),
            ..FleetSettings::from(&config.ssh)
        },
    ))
}

/// Helper to extract the value of one exposition line.
fn sample_value(body: &str, series: &str) -> Option<f64> {
    body.lines()
        .find(|line| line.starts_with(series) && line[series.len()..].starts_with(' '))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
}

#[tokio::test]
async fn test_full_flow_render() {
    let fleet = fleet(MockFactory::new().host("app01", app01()));
    let snapshot = fleet.scrape().await;
    let body = render(&snapshot, fleet.registry());

    assert_eq!(sample_value(&body, r#"host_ssh_status{host="app01"}"#), Some(1.0));
    assert_eq!(sample_value(&body, r#"host_ssh_status{host="db01"}"#), Some(0.0));

    assert_eq!(
        sample_value(&body, r#"process_pattern_count{host="app01",pattern="nginx"}"#),
        Some(2.0)
    );
    assert_eq!(
        sample_value(&body, r#"process_pattern_count{host="app01",pattern="redis"}"#),
        Some(1.0)
    );

    assert_eq!(
        sample_value(
            &body,
            r#"file_size_bytes{host="app01",path="/srv/drop",filename="in\"coming.csv"}"#
        ),
        Some(512.0)
    );

    // Δtotal 2.0s, Δidle 1.0s
    assert_eq!(sample_value(&body, r#"cpu_usage_percent{host="app01"}"#), Some(0.5));
    assert_eq!(
        sample_value(&body, r#"context_switches_total{host="app01"}"#),
        Some(10.0)
    );
    assert_eq!(
        sample_value(&body, r#"memory_usage_percent{host="app01"}"#),
        Some(75.0)
    );
    assert_eq!(
        sample_value(
            &body,
            r#"disk_usage_percent{host="app01",device="/dev/sdb1",mount_point="/data"}"#
        ),
        Some(10.0)
    );

    // nothing but the status for the unreachable host
    assert_eq!(body.matches("host=\"db01\"").count(), 1);
}

#[tokio::test]
async fn test_help_and_type_once_per_metric_in_registry_order() {
    let fleet = fleet(MockFactory::new().host("app01", app01()).host("db01", app01()));
    let snapshot = fleet.scrape().await;
    let body = render(&snapshot, fleet.registry());

    assert_eq!(body.matches("# TYPE host_ssh_status gauge").count(), 1);
    assert_eq!(body.matches("# HELP disk_total_bytes ").count(), 1);
    assert!(body.contains("# TYPE cpu_user_seconds_total counter"));

    let type_lines: Vec<&str> = body
        .lines()
        .filter(|l| l.starts_with("# TYPE "))
        .map(|l| l.split(' ').nth(2).unwrap())
        .collect();
    let registry_order: Vec<&str> = fleet
        .registry()
        .iter()
        .map(|d| d.name)
        .filter(|name| type_lines.contains(name))
        .collect();
    assert_eq!(type_lines[..registry_order.len()], registry_order[..]);

    // every sample sits under its own TYPE line
    let mut current = "";
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("# TYPE ") {
            current = rest.split(' ').next().unwrap();
        } else if !line.starts_with('#') {
            let name = line.split(['{', ' ']).next().unwrap();
            assert_eq!(name, current, "{line}");
        }
    }
}

#[tokio::test]
async fn test_config_file_to_fleet() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let config = ExporterConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.hosts.len(), 2);
    assert_eq!(config.ssh.connect_timeout_secs, 5);

    let result = ExporterConfig::load_from_file("/nonexistent/sshwatch.json5");
    assert!(result.is_err());
}

#[tokio::test]
async fn test_http_server_metrics_endpoint() {
    let fleet = fleet(MockFactory::new().host("app01", app01()));

    // Bind first so the port is known before the server starts
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HttpServer::new(fleet, addr, "/metrics".to_string(), None);
    let server_handle = tokio::spawn(async move { server.serve(listener, shutdown_rx).await });

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; version=0.0.4; charset=utf-8"
    );
    let body = response.text().await.unwrap();
    assert!(body.contains(r#"host_ssh_status{host="app01"} 1"#));

    let health = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(health.text().await.unwrap(), "healthy\n");
    drop(client);

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_http_server_bind_failure_is_reported() {
    let fleet = fleet(MockFactory::new());

    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HttpServer::new(fleet, addr, "/metrics".to_string(), None);
    let result = tokio::time::timeout(Duration::from_secs(5), server.run(shutdown_rx))
        .await
        .unwrap();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("Failed to bind"), "{err}");
    drop(taken);
}

#[tokio::test]
async fn test_concurrent_requests_each_get_a_scrape() {
    let fleet = fleet(MockFactory::new().host("app01", app01()));
    let server = HttpServer::new(
        Arc::clone(&fleet),
        "127.0.0.1:0".parse().unwrap(),
        "/metrics".to_string(),
        None,
    );
    let router = server.router();

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let (a, b) = tokio::join!(
        router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap()),
        router.oneshot(Request::get("/metrics").body(Body::empty()).unwrap()),
    );
    assert!(a.unwrap().status().is_success());
    assert!(b.unwrap().status().is_success());

    // scrapes are serialized, never overlapping on the same host
    assert_eq!(fleet.factory().journal("app01").connects, 2);
    assert_eq!(fleet.factory().peak_connections(), 1);
}
