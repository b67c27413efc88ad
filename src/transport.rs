use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client as HttpClient, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::config::{ClientConfig, Credentials};
use crate::error::{Error, Result};
use crate::signer::RequestSigner;
use crate::task::{FetchStrategy, TaskHandle, TaskResult, TaskResultSource};
use crate::util::{base_url, build_url, strip_html};

pub(crate) const TASK_RESULT_PATH: &str = "/api/1.0/meta/taskresult";

/// Issues API calls against the platform and decodes their JSON bodies.
#[derive(Debug, Clone)]
pub struct ApiTransport {
    base: Url,
    credentials: Credentials,
    signer: Option<RequestSigner>,
    timeout: Duration,
    http: HttpClient,
}

impl ApiTransport {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let base = base_url(&cfg.host)?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("knoema-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("knoema-rs")),
        );

        // The overall deadline is set per API call in `invoke`; file transfers
        // may stream for longer as long as data keeps arriving.
        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .connect_timeout(cfg.timeout)
            .read_timeout(cfg.timeout)
            .gzip(true)
            .cookie_store(true);

        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        let signer = match &cfg.credentials {
            Credentials::Signed {
                client_id,
                client_secret,
            } => Some(RequestSigner::new(client_id, client_secret)),
            _ => None,
        };

        Ok(Self {
            base,
            credentials: cfg.credentials.clone(),
            signer,
            timeout: cfg.timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Underlying connection pool, shared with file transfers.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Sends `method path?query` with an optional JSON body and decodes the JSON reply.
    ///
    /// Non-success statuses fail with [`Error::RemoteCall`] carrying the response
    /// body stripped of HTML; undecodable bodies fail with
    /// [`Error::MalformedResponse`].
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
        let url = self.url_for(path, query)?;
        tracing::debug!(%method, path, "Calling API");

        let mut req = self.http.request(method, url).timeout(self.timeout);
        if let Some(signer) = &self.signer {
            req = req.header(AUTHORIZATION, signer.header_value()?);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            let message = strip_html(&text);
            tracing::debug!(path, status = status.as_u16(), %message, "API call failed");
            return Err(Error::RemoteCall {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str::<R>(&text).map_err(|e| {
            Error::MalformedResponse(format!(
                "failed to parse API JSON (path={}, status={}): {}",
                path, status, e
            ))
        })
    }

    pub async fn get<R>(&self, path: &str, query: &[(&str, &str)]) -> Result<R>
    where
        R: DeserializeOwned,
    {
        self.invoke::<(), R>(Method::GET, path, query, None).await
    }

    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke(Method::POST, path, &[], Some(body)).await
    }

    fn url_for(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut params: Vec<(&str, &str)> = query.to_vec();
        match &self.credentials {
            Credentials::Token(token) => params.push(("access_token", token.as_str())),
            Credentials::ClientId(id) => params.push(("client_id", id.as_str())),
            Credentials::Anonymous | Credentials::Signed { .. } => {}
        }
        build_url(&self.base, path, &params)
    }
}

#[async_trait]
impl TaskResultSource for ApiTransport {
    async fn fetch_result<T>(&self, handle: &TaskHandle) -> Result<TaskResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match handle.fetch_strategy() {
            FetchStrategy::ByKey(key) => self.get(TASK_RESULT_PATH, &[("taskKey", key)]).await,
            FetchStrategy::Inline(handle) => self.post(TASK_RESULT_PATH, handle).await,
        }
    }
}
