//! End-to-end bulk unload against a mock platform and mock file hosts.

mod common;

use common::{TASK_RESULT_PATH, UNLOAD_PATH, anonymous_client, dir_entries, requests_to};
use knoema::{Error, FileManifestEntry, PollPolicy, TransferError};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pivot_request() -> Value {
    json!({
        "Dataset": "IMFWEO2017Apr",
        "Stub": [{ "DimensionId": "country", "Members": ["1000000"] }],
        "Frequencies": ["A"]
    })
}

fn fast_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(10), 10)
}

async fn mount_submit(server: &MockServer, reply: Value) {
    Mock::given(method("POST"))
        .and(path(UNLOAD_PATH))
        .and(body_json(pivot_request()))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply))
        .mount(server)
        .await;
}

/// Answers the first `pending` polls of `task-1` with a non-terminal status, then `last`.
async fn mount_polls(server: &MockServer, pending: u64, last: Value) {
    if pending > 0 {
        Mock::given(method("GET"))
            .and(path(TASK_RESULT_PATH))
            .and(query_param("taskKey", "task-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Pending" })))
            .up_to_n_times(pending)
            .with_priority(1)
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(TASK_RESULT_PATH))
        .and(query_param("taskKey", "task-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(last))
        .with_priority(2)
        .mount(server)
        .await;
}

async fn mount_file(server: &MockServer, file_path: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

fn completed(files: Value) -> Value {
    json!({ "status": "Completed", "data": files })
}

#[tokio::test]
async fn downloads_every_file_in_manifest_order() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let a = b"Country,2015,2016\nWorld,3.4,3.2\n".to_vec();
    let b = b"Country,2017\nWorld,3.5\n".to_vec();

    mount_submit(&server, json!({ "key": "task-1" })).await;
    mount_polls(
        &server,
        2,
        completed(json!([
            { "name": "a.csv", "url": format!("{}/files/a", server.uri()) },
            { "name": "b.csv", "url": "/files/b" },
        ])),
    )
    .await;
    mount_file(&server, "/files/a", &a).await;
    mount_file(&server, "/files/b", &b).await;

    let client = anonymous_client(&server);
    let names = client
        .unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy())
        .await
        .unwrap();

    assert_eq!(names, vec!["a.csv".to_string(), "b.csv".to_string()]);
    assert_eq!(std::fs::read(dir.path().join("a.csv")).unwrap(), a);
    assert_eq!(std::fs::read(dir.path().join("b.csv")).unwrap(), b);
    assert_eq!(requests_to(&server, TASK_RESULT_PATH).await.len(), 3);
}

#[tokio::test]
async fn connection_error_removes_every_file() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_submit(&server, json!({ "key": "task-1" })).await;
    mount_polls(
        &server,
        0,
        completed(json!([
            { "name": "a.csv", "url": format!("{}/files/a", server.uri()) },
            { "name": "b.csv", "url": "http://127.0.0.1:1/files/b" },
        ])),
    )
    .await;
    mount_file(&server, "/files/a", b"a,b\n1,2\n").await;

    let client = anonymous_client(&server);
    let err = client
        .unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy())
        .await
        .unwrap_err();

    match err {
        Error::Transfer { name, source } => {
            assert_eq!(name, "b.csv");
            assert!(matches!(source, TransferError::Network(_)));
        }
        other => panic!("expected Transfer error, got {other:?}"),
    }
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn failure_cancels_slow_siblings() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_submit(&server, json!({ "key": "task-1" })).await;
    mount_polls(
        &server,
        0,
        completed(json!({ "files": [
            { "name": "slow.csv", "url": format!("{}/files/slow", server.uri()) },
            { "name": "missing.csv", "url": format!("{}/files/missing", server.uri()) },
        ]})),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/files/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![b'x'; 1024])
                .set_delay(Duration::from_secs(60)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = anonymous_client(&server);
    let err = tokio::time::timeout(
        Duration::from_secs(20),
        client.unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy()),
    )
    .await
    .expect("sibling transfer was not cancelled")
    .unwrap_err();

    match err {
        Error::Transfer { name, source } => {
            assert_eq!(name, "missing.csv");
            assert!(matches!(source, TransferError::Status(404)));
        }
        other => panic!("expected Transfer error, got {other:?}"),
    }
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn existing_files_are_truncated() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.csv"), vec![b'z'; 4096]).unwrap();

    mount_submit(&server, json!({ "key": "task-1" })).await;
    mount_polls(
        &server,
        0,
        completed(json!([{ "name": "a.csv", "url": "/files/a" }])),
    )
    .await;
    mount_file(&server, "/files/a", b"short").await;

    let client = anonymous_client(&server);
    client
        .unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy())
        .await
        .unwrap();

    assert_eq!(std::fs::read(dir.path().join("a.csv")).unwrap(), b"short");
}

#[tokio::test]
async fn large_files_round_trip() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let big: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();

    mount_submit(&server, json!({ "key": "task-1" })).await;
    mount_polls(
        &server,
        1,
        completed(json!([{ "name": "big.bin", "url": "/files/big" }])),
    )
    .await;
    mount_file(&server, "/files/big", &big).await;

    let client = anonymous_client(&server);
    let names = client
        .unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy())
        .await
        .unwrap();

    assert_eq!(names, vec!["big.bin".to_string()]);
    assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap(), big);
}

#[tokio::test]
async fn failed_task_keeps_server_message_and_writes_nothing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_submit(&server, json!({ "key": "task-1" })).await;
    mount_polls(
        &server,
        1,
        json!({ "status": "Failed", "message": "Dataset IMFWEO2017Apr is not accessible" }),
    )
    .await;

    let client = anonymous_client(&server);
    let err = client
        .unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy())
        .await
        .unwrap_err();

    match err {
        Error::TaskFailed { message } => assert_eq!(
            message.as_deref(),
            Some("Dataset IMFWEO2017Apr is not accessible")
        ),
        other => panic!("expected TaskFailed, got {other:?}"),
    }
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn cancelled_task_is_reported() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_submit(&server, json!({ "key": "task-1" })).await;
    mount_polls(&server, 0, json!({ "status": "Cancelled" })).await;

    let client = anonymous_client(&server);
    let err = client
        .unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TaskCancelled));
}

#[tokio::test]
async fn poll_budget_is_enforced() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_submit(&server, json!({ "key": "task-1" })).await;
    mount_polls(&server, 0, json!({ "status": "Executing" })).await;

    let client = anonymous_client(&server);
    let err = client
        .unload_to_folder_with(
            &pivot_request(),
            dir.path(),
            &PollPolicy::new(Duration::from_millis(5), 3),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PollBudgetExceeded { attempts: 3 }));
    assert_eq!(requests_to(&server, TASK_RESULT_PATH).await.len(), 3);
}

#[tokio::test]
async fn inline_result_is_fetched_by_posting_the_handle() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_submit(&server, json!({ "proxyData": "opaque-token" })).await;
    Mock::given(method("POST"))
        .and(path(TASK_RESULT_PATH))
        .and(body_json(json!({ "proxyData": "opaque-token" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completed(json!([
            { "Name": "a.csv", "Url": "/files/a" }
        ]))))
        .mount(&server)
        .await;
    mount_file(&server, "/files/a", b"1,2,3\n").await;

    let client = anonymous_client(&server);
    let names = client
        .unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy())
        .await
        .unwrap();

    assert_eq!(names, vec!["a.csv".to_string()]);
    assert_eq!(std::fs::read(dir.path().join("a.csv")).unwrap(), b"1,2,3\n");
}

#[tokio::test]
async fn submit_rejected_by_server() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("POST"))
        .and(path(UNLOAD_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("<p>Access denied</p>"))
        .mount(&server)
        .await;

    let client = anonymous_client(&server);
    let err = client
        .unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(403));
    assert!(matches!(err, Error::RemoteCall { ref message, .. } if message == "Access denied"));
}

#[tokio::test]
async fn submit_without_handle_is_malformed() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_submit(&server, json!({})).await;

    let client = anonymous_client(&server);
    let err = client
        .unload_to_folder_with(&pivot_request(), dir.path(), &fast_policy())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedResponse(_)));
    assert!(requests_to(&server, TASK_RESULT_PATH).await.is_empty());
}

#[tokio::test]
async fn download_files_without_a_task() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("nested").join("out");
    mount_file(&server, "/files/a", b"alpha").await;
    mount_file(&server, "/files/b", b"beta").await;

    let client = anonymous_client(&server);
    let names = client
        .download_files(
            &[
                FileManifestEntry::new("b.txt", "/files/b"),
                FileManifestEntry::new("a.txt", "/files/a"),
            ],
            &folder,
        )
        .await
        .unwrap();

    assert_eq!(names, vec!["b.txt".to_string(), "a.txt".to_string()]);
    assert_eq!(std::fs::read(folder.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(std::fs::read(folder.join("b.txt")).unwrap(), b"beta");
}

#[tokio::test]
async fn abandoned_download_leaves_no_files() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_file(&server, "/files/a", b"alpha").await;
    Mock::given(method("GET"))
        .and(path("/files/b"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"beta".to_vec())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let client = anonymous_client(&server);
    let entries = [
        FileManifestEntry::new("a.csv", "/files/a"),
        FileManifestEntry::new("b.csv", "/files/b"),
    ];
    let abandoned = tokio::time::timeout(
        Duration::from_millis(500),
        client.download_files(&entries, dir.path()),
    )
    .await;

    assert!(abandoned.is_err(), "download should still have been running");
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn output_file_creation_failure_keeps_foreign_entries() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    // A directory squatting on the second name makes creating that file fail.
    std::fs::create_dir(dir.path().join("b.csv")).unwrap();
    mount_file(&server, "/files/a", b"alpha").await;
    mount_file(&server, "/files/b", b"beta").await;
    mount_file(&server, "/files/c", b"gamma").await;

    let client = anonymous_client(&server);
    let err = client
        .download_files(
            &[
                FileManifestEntry::new("a.csv", "/files/a"),
                FileManifestEntry::new("b.csv", "/files/b"),
                FileManifestEntry::new("c.csv", "/files/c"),
            ],
            dir.path(),
        )
        .await
        .unwrap_err();

    match err {
        Error::Transfer { name, source } => {
            assert_eq!(name, "b.csv");
            assert!(matches!(source, TransferError::Io(_)));
        }
        other => panic!("expected Transfer error, got {other:?}"),
    }
    assert_eq!(dir_entries(dir.path()), vec!["b.csv".to_string()]);
    assert!(dir.path().join("b.csv").is_dir());
    assert!(requests_to(&server, "/files/c").await.is_empty());
}
