use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::config::{ClientConfig, load_config};
use crate::error::Result;
use crate::task::{self, PollPolicy, TaskHandle, TaskResult, TaskResultSource};
use crate::transport::ApiTransport;
use crate::unload::{self, FileManifestEntry};

#[derive(Debug, Clone)]
pub struct Client {
    transport: ApiTransport,
    progress: bool,
}

impl Client {
    /// Anonymous client for `host`.
    pub fn new(host: impl Into<String>) -> Result<Self> {
        Self::from_config(ClientConfig::new(host))
    }

    /// Client that sends `token` as the `access_token` query parameter.
    pub fn with_token(host: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Self::from_config(ClientConfig::new(host).with_token(token))
    }

    /// Client that signs every request with the shared secret.
    pub fn with_credentials(
        host: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        Self::from_config(ClientConfig::new(host).with_credentials(client_id, client_secret))
    }

    /// Creates a client using (in order of precedence):
    /// - environment variables `KNOEMA_HOST`, `KNOEMA_TOKEN`, `KNOEMA_CLIENT_ID`,
    ///   `KNOEMA_CLIENT_SECRET`, `KNOEMA_VERIFY`, `KNOEMA_TIMEOUT_MS`
    /// - config file from `KNOEMA_RC` or `.knoemarc` (current directory, then home)
    pub fn from_env() -> Result<Self> {
        Self::from_config(load_config(None)?)
    }

    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        Ok(Self {
            transport: ApiTransport::new(&cfg)?,
            progress: cfg.progress,
        })
    }

    pub fn transport(&self) -> &ApiTransport {
        &self.transport
    }

    /// Generic API call; see [`ApiTransport::invoke`].
    pub async fn invoke<B, R>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.transport.invoke(method, path, query, body).await
    }

    /// Fetches the current result of a task once.
    pub async fn task_result<T>(&self, handle: &TaskHandle) -> Result<TaskResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.transport.fetch_result(handle).await
    }

    /// Polls a task until it completes; see [`task::wait`].
    pub async fn wait_for_task<T>(
        &self,
        handle: &TaskHandle,
        policy: &PollPolicy,
    ) -> Result<TaskResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        task::wait(&self.transport, handle, policy).await
    }

    /// Unloads the data selected by `request` into files under `folder`, polling
    /// every 10 seconds for at most an hour.
    ///
    /// On success every file of the unload exists in `folder` and the names are
    /// returned in manifest order. On failure none of the files are left behind.
    pub async fn unload_to_folder<P>(&self, request: &P, folder: &Path) -> Result<Vec<String>>
    where
        P: Serialize + ?Sized,
    {
        self.unload_to_folder_with(request, folder, &PollPolicy::default())
            .await
    }

    /// Like [`Client::unload_to_folder`] with a custom polling budget.
    pub async fn unload_to_folder_with<P>(
        &self,
        request: &P,
        folder: &Path,
        policy: &PollPolicy,
    ) -> Result<Vec<String>>
    where
        P: Serialize + ?Sized,
    {
        unload::unload_to_folder(&self.transport, request, folder, policy, self.progress).await
    }

    /// Downloads already known files into `folder`, all or nothing.
    pub async fn download_files(
        &self,
        entries: &[FileManifestEntry],
        folder: &Path,
    ) -> Result<Vec<String>> {
        unload::download_all(
            self.transport.http(),
            self.transport.base_url(),
            entries,
            folder,
            self.progress,
        )
        .await
    }
}
