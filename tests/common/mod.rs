//! Shared helpers for the integration tests.

#![allow(dead_code)]

use knoema::{Client, ClientConfig};
use wiremock::MockServer;

pub const UNLOAD_PATH: &str = "/api/1.0/data/unload";
pub const TASK_RESULT_PATH: &str = "/api/1.0/meta/taskresult";

/// Anonymous client pointed at the mock server, without progress bars.
pub fn anonymous_client(server: &MockServer) -> Client {
    Client::from_config(ClientConfig::new(server.uri()).with_progress(false)).unwrap()
}

pub fn client_with(
    server: &MockServer,
    configure: impl FnOnce(ClientConfig) -> ClientConfig,
) -> Client {
    let cfg = configure(ClientConfig::new(server.uri()).with_progress(false));
    Client::from_config(cfg).unwrap()
}

/// Requests received so far whose path equals `path`.
pub async fn requests_to(server: &MockServer, path: &str) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == path)
        .collect()
}

/// Names of the entries of `dir`, sorted.
pub fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
