//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a manifest tree and test the full
//! crawl cycle end-to-end, from the root listing to the files on disk.

use manifest_mirror::config::{
    Config, CrawlerConfig, FetcherConfig, OutputConfig, RemoteConfig, UserAgentConfig,
};
use manifest_mirror::crawler::crawl;
use manifest_mirror::state::RunStatus;
use manifest_mirror::MirrorError;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG_HASH: &str = "integration-test";

/// Creates a test configuration pointed at the mock server
fn create_test_config(api_base: &str, snapshot_dir: &Path) -> Config {
    Config {
        remote: RemoteConfig {
            api_base: api_base.to_string(),
            root_path: "manifests".to_string(),
            token: None,
            token_env: None,
            page_size: 100,
        },
        fetcher: FetcherConfig {
            min_request_delay: 0,
            backoff_base: 1,
            max_retries: 2,
            quota_cooldown: 10,
            ..FetcherConfig::default()
        },
        crawler: CrawlerConfig {
            concurrency: 4,
            package_delay: 0, // No pacing needed against the mock
            checkpoint_interval: 5,
            max_run_time: None,
            max_publishers: None,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        output: OutputConfig {
            snapshot_dir: snapshot_dir.to_string_lossy().into_owned(),
            top_n: 10,
        },
    }
}

fn dir_entry(base: &str, route: &str, name: &str) -> Value {
    json!({ "name": name, "type": "dir", "url": format!("{}{}", base, route) })
}

async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_text(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Mounts the root listing with the given publisher names
async fn mount_root(server: &MockServer, publishers: &[&str]) {
    let base = server.uri();
    let entries: Vec<Value> = publishers
        .iter()
        .map(|p| dir_entry(&base, &format!("/manifests/{}", p), p))
        .collect();
    mount_json(server, "/manifests", Value::Array(entries)).await;
}

/// Mounts a publisher listing with the given package names
async fn mount_publisher(server: &MockServer, publisher: &str, packages: &[&str]) {
    let base = server.uri();
    let entries: Vec<Value> = packages
        .iter()
        .map(|name| dir_entry(&base, &format!("/manifests/{}/{}", publisher, name), name))
        .collect();
    mount_json(server, &format!("/manifests/{}", publisher), Value::Array(entries)).await;
}

/// Mounts a package with its versions and the documents of `latest`
async fn mount_package(
    server: &MockServer,
    publisher: &str,
    package: &str,
    versions: &[&str],
    latest: &str,
    documents: &[(&str, &str)],
) {
    let base = server.uri();
    let package_route = format!("/manifests/{}/{}", publisher, package);

    let version_entries: Vec<Value> = versions
        .iter()
        .map(|v| dir_entry(&base, &format!("{}/{}", package_route, v), v))
        .collect();
    mount_json(server, &package_route, Value::Array(version_entries)).await;

    let mut files = Vec::new();
    for (file_name, yaml) in documents {
        let raw_route = format!("/raw/{}/{}/{}/{}", publisher, package, latest, file_name);
        files.push(json!({
            "name": file_name,
            "type": "file",
            "url": format!("{}{}/{}/{}", base, package_route, latest, file_name),
            "download_url": format!("{}{}", base, raw_route),
        }));
        mount_text(server, &raw_route, yaml).await;
    }
    mount_json(
        server,
        &format!("{}/{}", package_route, latest),
        Value::Array(files),
    )
    .await;
}

/// Mounts a two-publisher tree with three packages
async fn mount_standard_tree(server: &MockServer) {
    mount_root(server, &["Contoso", "Fabrikam"]).await;

    mount_publisher(server, "Contoso", &["Widget", "Gadget"]).await;
    mount_package(
        server,
        "Contoso",
        "Widget",
        &["1.0", "1.2.0"],
        "1.2.0",
        &[
            (
                "Contoso.Widget.locale.en-US.yaml",
                "PackageName: Widget\nPublisher: Contoso\nShortDescription: A widget\nTags:\n  - tools\n  - ui\n",
            ),
            (
                "Contoso.Widget.yaml",
                "PackageIdentifier: Contoso.Widget\nPackageVersion: 1.2.0\nLicense: MIT\n",
            ),
            (
                "Contoso.Widget.installer.yaml",
                "Installers:\n  - Architecture: x64\n    InstallerUrl: https://example.com/widget.msi\n",
            ),
        ],
    )
    .await;
    mount_package(
        server,
        "Contoso",
        "Gadget",
        &["2.0"],
        "2.0",
        &[(
            "Contoso.Gadget.locale.en-US.yaml",
            "PackageName: Gadget\nPublisher: Contoso\nTags: tools, cli\n",
        )],
    )
    .await;

    mount_publisher(server, "Fabrikam", &["Tool"]).await;
    mount_package(
        server,
        "Fabrikam",
        "Tool",
        &["0.9"],
        "0.9",
        &[(
            "Fabrikam.Tool.yaml",
            "PackageName: Tool\nPublisher: Fabrikam\nReleaseDate: 2024-03-01\n",
        )],
    )
    .await;
}

/// Mounts a one-package tree whose every route demands the bearer token once
async fn mount_authorized_tree(server: &MockServer, token: &str) {
    let base = server.uri();
    let routes = [
        ("/manifests", json!([dir_entry(&base, "/manifests/Contoso", "Contoso")])),
        (
            "/manifests/Contoso",
            json!([dir_entry(&base, "/manifests/Contoso/Widget", "Widget")]),
        ),
        (
            "/manifests/Contoso/Widget",
            json!([dir_entry(&base, "/manifests/Contoso/Widget/1.0", "1.0")]),
        ),
        ("/manifests/Contoso/Widget/1.0", json!([])),
    ];

    for (route, body) in routes {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }
}

fn read_json(path: impl AsRef<Path>) -> Value {
    let text = std::fs::read_to_string(path.as_ref())
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.as_ref().display(), e));
    serde_json::from_str(&text).expect("Snapshot file is not valid JSON")
}

fn file_names(dir: impl AsRef<Path>) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to list directory")
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn not_cancelled() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

#[tokio::test]
async fn test_full_crawl_writes_consistent_snapshot() {
    let mock_server = MockServer::start().await;
    mount_standard_tree(&mock_server).await;

    let snapshot = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), snapshot.path());

    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.records, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.errors, 0);

    // Full record list
    let packages = read_json(snapshot.path().join("packages.json"));
    assert_eq!(packages["count"], 3);
    let records = packages["packages"].as_array().unwrap();
    let mut ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
    ids.sort();
    assert_eq!(ids, vec!["Contoso.Gadget", "Contoso.Widget", "Fabrikam.Tool"]);

    // Per-record files agree with the full list
    assert_eq!(
        file_names(snapshot.path().join("packages")),
        vec!["Contoso.Gadget.json", "Contoso.Widget.json", "Fabrikam.Tool.json"]
    );
    let widget = read_json(snapshot.path().join("packages/Contoso.Widget.json"));
    assert_eq!(widget["versions"], json!(["1.2.0", "1.0"]));
    assert_eq!(widget["latest"]["version"], "1.2.0");
    assert_eq!(widget["latest"]["description"], "A widget");
    assert_eq!(widget["latest"]["license"], "MIT");
    assert_eq!(widget["latest"]["tags"], json!(["tools", "ui"]));
    assert_eq!(widget["installers"][0]["Architecture"], "x64");

    let tool = read_json(snapshot.path().join("packages/Fabrikam.Tool.json"));
    assert_eq!(tool["updatedAt"], "2024-03-01T00:00:00Z");

    // Shards partition the records by publisher
    assert_eq!(
        file_names(snapshot.path().join("publishers")),
        vec!["Contoso.json", "Fabrikam.json"]
    );
    let contoso = read_json(snapshot.path().join("publishers/Contoso.json"));
    let fabrikam = read_json(snapshot.path().join("publishers/Fabrikam.json"));
    assert_eq!(contoso["count"], 2);
    assert_eq!(fabrikam["count"], 1);
    for package in contoso["packages"].as_array().unwrap() {
        assert_eq!(package["latest"]["publisher"], "Contoso");
    }

    // Statistics agree with the records
    let stats = read_json(snapshot.path().join("stats.json"));
    assert_eq!(stats["total_records"], 3);
    assert_eq!(stats["distinct_publishers"], 2);
    assert_eq!(stats["total_versions"], 4);
    assert_eq!(stats["top_publishers"][0], json!({ "name": "Contoso", "count": 2 }));
    assert_eq!(stats["top_tags"][0], json!({ "name": "tools", "count": 2 }));

    let run = read_json(snapshot.path().join("run.json"));
    assert_eq!(run["completed_publishers"].as_array().unwrap().len(), 2);
    assert_eq!(run["config_hash"], CONFIG_HASH);
}

#[tokio::test]
async fn test_paginated_root_listing_is_followed() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/manifests"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([dir_entry(&base, "/manifests/Contoso", "Contoso")]))
                .insert_header(
                    "Link",
                    format!("<{}/manifests-page-2>; rel=\"next\"", base).as_str(),
                ),
        )
        .mount(&mock_server)
        .await;
    mount_json(
        &mock_server,
        "/manifests-page-2",
        json!([dir_entry(&base, "/manifests/Fabrikam", "Fabrikam")]),
    )
    .await;

    mount_publisher(&mock_server, "Contoso", &["Widget"]).await;
    mount_package(&mock_server, "Contoso", "Widget", &["1.0"], "1.0", &[]).await;
    mount_publisher(&mock_server, "Fabrikam", &["Tool"]).await;
    mount_package(&mock_server, "Fabrikam", "Tool", &["0.9"], "0.9", &[]).await;

    let snapshot = TempDir::new().unwrap();
    let config = create_test_config(&base, snapshot.path());

    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.records, 2);
    // Without documents the node names are used
    let tool = read_json(snapshot.path().join("packages/Fabrikam.Tool.json"));
    assert_eq!(tool["latest"]["name"], "Tool");
    assert_eq!(tool["latest"]["publisher"], "Fabrikam");
}

#[tokio::test]
async fn test_package_without_versions_is_skipped() {
    let mock_server = MockServer::start().await;
    mount_root(&mock_server, &["Contoso"]).await;
    mount_publisher(&mock_server, "Contoso", &["Empty", "Widget"]).await;
    mount_json(&mock_server, "/manifests/Contoso/Empty", json!([])).await;
    mount_package(&mock_server, "Contoso", "Widget", &["1.0"], "1.0", &[]).await;

    let snapshot = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), snapshot.path());

    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.records, 1);
    assert_eq!(file_names(snapshot.path().join("packages")), vec!["Contoso.Widget.json"]);
}

#[tokio::test]
async fn test_failing_package_is_counted_and_crawl_continues() {
    let mock_server = MockServer::start().await;
    mount_root(&mock_server, &["Contoso"]).await;
    mount_publisher(&mock_server, "Contoso", &["Broken", "Widget"]).await;
    // Broken's version listing is not mounted and answers 404
    mount_package(&mock_server, "Contoso", "Widget", &["1.0"], "1.0", &[]).await;

    let snapshot = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), snapshot.path());

    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.records, 1);

    let stats = read_json(snapshot.path().join("stats.json"));
    assert_eq!(stats["run"]["errors"], 1);
}

#[tokio::test]
async fn test_malformed_manifest_is_counted_as_error() {
    let mock_server = MockServer::start().await;
    mount_root(&mock_server, &["Contoso"]).await;
    mount_publisher(&mock_server, "Contoso", &["Widget"]).await;
    mount_package(
        &mock_server,
        "Contoso",
        "Widget",
        &["1.0"],
        "1.0",
        &[("Contoso.Widget.yaml", "PackageName: [unclosed\n")],
    )
    .await;

    let snapshot = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), snapshot.path());

    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.records, 0);
}

#[tokio::test]
async fn test_root_listing_failure_writes_nothing() {
    let mock_server = MockServer::start().await;

    // Transient failures exhaust the attempts
    Mock::given(method("GET"))
        .and(path("/manifests"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&mock_server)
        .await;

    let snapshot = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), snapshot.path());

    let result = crawl(&config, CONFIG_HASH, false, not_cancelled()).await;

    assert!(matches!(result, Err(MirrorError::RootListing { .. })));
    assert!(!snapshot.path().join("packages.json").exists());
    assert!(!snapshot.path().join("run.json").exists());
}

#[tokio::test]
async fn test_checkpoints_are_written_between_batches() {
    let mock_server = MockServer::start().await;
    mount_root(&mock_server, &["Alpha", "Beta", "Gamma"]).await;
    for publisher in ["Alpha", "Beta", "Gamma"] {
        mount_publisher(&mock_server, publisher, &["App"]).await;
        mount_package(&mock_server, publisher, "App", &["1.0"], "1.0", &[]).await;
    }

    let snapshot = TempDir::new().unwrap();
    let mut config = create_test_config(&mock_server.uri(), snapshot.path());
    config.crawler.concurrency = 1;
    config.crawler.checkpoint_interval = 1;

    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.batches, 3);
    // The last batch is covered by the final write
    assert_eq!(summary.checkpoints, 2);
    assert_eq!(summary.records, 3);

    let run = read_json(snapshot.path().join("run.json"));
    assert_eq!(run["batches_completed"], 3);
    assert_eq!(
        run["completed_publishers"],
        json!(["Alpha", "Beta", "Gamma"])
    );
}

#[tokio::test]
async fn test_max_publishers_limits_the_crawl() {
    let mock_server = MockServer::start().await;
    mount_standard_tree(&mock_server).await;

    let snapshot = TempDir::new().unwrap();
    let mut config = create_test_config(&mock_server.uri(), snapshot.path());
    config.crawler.max_publishers = Some(1);

    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.records, 2);
    assert_eq!(file_names(snapshot.path().join("publishers")), vec!["Contoso.json"]);
}

#[tokio::test]
async fn test_new_snapshot_supersedes_previous_and_removes_stale_files() {
    let snapshot = TempDir::new().unwrap();

    // First run sees both publishers
    let first_server = MockServer::start().await;
    mount_standard_tree(&first_server).await;
    let config = create_test_config(&first_server.uri(), snapshot.path());
    crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("First crawl failed");
    assert!(snapshot.path().join("publishers/Fabrikam.json").exists());

    // Second run: Fabrikam is gone from the remote
    let second_server = MockServer::start().await;
    mount_root(&second_server, &["Contoso"]).await;
    mount_publisher(&second_server, "Contoso", &["Widget"]).await;
    mount_package(&second_server, "Contoso", "Widget", &["1.0", "1.3"], "1.3", &[]).await;
    let config = create_test_config(&second_server.uri(), snapshot.path());
    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Second crawl failed");

    assert_eq!(summary.records, 1);
    assert_eq!(file_names(snapshot.path().join("publishers")), vec!["Contoso.json"]);
    assert_eq!(file_names(snapshot.path().join("packages")), vec!["Contoso.Widget.json"]);

    let packages = read_json(snapshot.path().join("packages.json"));
    assert_eq!(packages["count"], 1);
    assert_eq!(packages["packages"][0]["versions"], json!(["1.3", "1.0"]));
}

#[tokio::test]
async fn test_repeated_crawl_produces_same_records() {
    let mock_server = MockServer::start().await;
    mount_standard_tree(&mock_server).await;

    let snapshot = TempDir::new().unwrap();
    let config = create_test_config(&mock_server.uri(), snapshot.path());

    // Everything except the build timestamps must match
    let content = |packages: &Value| -> Vec<(String, Value, Value, Value)> {
        let mut rows: Vec<_> = packages["packages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| {
                (
                    r["id"].as_str().unwrap().to_string(),
                    r["versions"].clone(),
                    r["latest"].clone(),
                    r["installers"].clone(),
                )
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    };

    crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("First crawl failed");
    let first = read_json(snapshot.path().join("packages.json"));

    crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Second crawl failed");
    let second = read_json(snapshot.path().join("packages.json"));

    assert_eq!(content(&first), content(&second));
}

#[tokio::test]
async fn test_resume_skips_completed_publishers() {
    let snapshot = TempDir::new().unwrap();

    // First run completes Contoso only
    let first_server = MockServer::start().await;
    mount_root(&first_server, &["Contoso"]).await;
    mount_publisher(&first_server, "Contoso", &["Widget"]).await;
    mount_package(&first_server, "Contoso", "Widget", &["1.0"], "1.0", &[]).await;
    let config = create_test_config(&first_server.uri(), snapshot.path());
    crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("First crawl failed");

    // Resumed run must not revisit Contoso
    let second_server = MockServer::start().await;
    mount_root(&second_server, &["Contoso", "Fabrikam"]).await;
    Mock::given(method("GET"))
        .and(path("/manifests/Contoso"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&second_server)
        .await;
    mount_publisher(&second_server, "Fabrikam", &["Tool"]).await;
    mount_package(&second_server, "Fabrikam", "Tool", &["0.9"], "0.9", &[]).await;

    let config = create_test_config(&second_server.uri(), snapshot.path());
    let summary = crawl(&config, CONFIG_HASH, true, not_cancelled())
        .await
        .expect("Resumed crawl failed");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.records, 2);
    assert_eq!(summary.processed, 2);
    assert_eq!(
        file_names(snapshot.path().join("packages")),
        vec!["Contoso.Widget.json", "Fabrikam.Tool.json"]
    );

    let run = read_json(snapshot.path().join("run.json"));
    assert_eq!(run["completed_publishers"], json!(["Contoso", "Fabrikam"]));
}

#[tokio::test]
async fn test_bearer_token_is_attached_to_every_request() {
    let mock_server = MockServer::start().await;
    mount_authorized_tree(&mock_server, "t").await;

    let snapshot = TempDir::new().unwrap();
    let mut config = create_test_config(&mock_server.uri(), snapshot.path());
    config.remote.token = Some("t".to_string());

    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.records, 1);
    assert_eq!(summary.errors, 0);
}

#[tokio::test]
async fn test_bearer_token_is_read_from_token_env() {
    const TOKEN_VAR: &str = "MANIFEST_MIRROR_INTEGRATION_TOKEN";
    std::env::set_var(TOKEN_VAR, "from-env");

    let mock_server = MockServer::start().await;
    mount_authorized_tree(&mock_server, "from-env").await;

    let snapshot = TempDir::new().unwrap();
    let mut config = create_test_config(&mock_server.uri(), snapshot.path());
    config.remote.token_env = Some(TOKEN_VAR.to_string());

    let summary = crawl(&config, CONFIG_HASH, false, not_cancelled())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.records, 1);
    assert_eq!(summary.errors, 0);
}
