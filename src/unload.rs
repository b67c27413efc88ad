//! Bulk unload: submit an unload job, wait for its manifest, then fetch every
//! listed file in parallel.
//!
//! The local folder ends up either with every manifest file fully written or with
//! none of them. The first failing transfer cancels its siblings; once all of them
//! have stopped, every file created by the call is removed and that first failure
//! is returned.

use indicatif::MultiProgress;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::download::{TransferOutcome, progress_bar, transfer};
use crate::error::{Error, Result, TransferError};
use crate::task::{self, PollPolicy, TaskHandle, TaskResult};
use crate::transport::ApiTransport;
use crate::util::urljoin;

pub(crate) const UNLOAD_PATH: &str = "/api/1.0/data/unload";

/// One file produced by an unload job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifestEntry {
    /// Local file name to write.
    #[serde(alias = "Name")]
    pub name: String,
    /// Where the file can be fetched from.
    #[serde(alias = "Url")]
    pub url: String,
}

impl FileManifestEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Payload of a completed unload task: either a bare list or `{"files": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UnloadManifest {
    Files(Vec<FileManifestEntry>),
    Wrapped {
        #[serde(alias = "Files")]
        files: Vec<FileManifestEntry>,
    },
}

impl UnloadManifest {
    fn into_entries(self) -> Vec<FileManifestEntry> {
        match self {
            Self::Files(files) | Self::Wrapped { files } => files,
        }
    }
}

/// Submits `request` as an unload job, waits for it under `policy` and downloads
/// the resulting files into `folder`. Returns the file names in manifest order.
pub(crate) async fn unload_to_folder<P>(
    transport: &ApiTransport,
    request: &P,
    folder: &Path,
    policy: &PollPolicy,
    progress: bool,
) -> Result<Vec<String>>
where
    P: Serialize + ?Sized,
{
    let handle: TaskHandle = transport.post(UNLOAD_PATH, request).await?;
    if handle.is_empty() {
        return Err(Error::MalformedResponse(
            "unload response carried neither a task key nor proxy data".to_string(),
        ));
    }
    tracing::info!(
        task_key = handle.key.as_deref().unwrap_or("(inline)"),
        "Unload job submitted"
    );

    let result: TaskResult<UnloadManifest> = task::wait(transport, &handle, policy).await?;
    let entries = result.into_data()?.into_entries();
    tracing::info!(files = entries.len(), "Unload job completed");

    download_all(
        transport.http(),
        transport.base_url(),
        &entries,
        folder,
        progress,
    )
    .await
}

/// Downloads every entry into `folder` concurrently, all or nothing.
pub(crate) async fn download_all(
    http: &HttpClient,
    base: &Url,
    entries: &[FileManifestEntry],
    folder: &Path,
    progress: bool,
) -> Result<Vec<String>> {
    validate_names(entries)?;
    let urls = entries
        .iter()
        .map(|e| urljoin(base, &e.url))
        .collect::<Result<Vec<_>>>()?;

    tokio::fs::create_dir_all(folder).await?;

    let cancel = CancellationToken::new();
    let multi = progress.then(MultiProgress::new);
    // Must be declared before `transfers`: on drop the join set aborts first,
    // then the files are removed.
    let mut created = CreatedFiles::with_capacity(entries.len());
    let mut transfers = JoinSet::new();
    let mut first_error: Option<Error> = None;

    for (entry, url) in entries.iter().zip(urls) {
        let path = folder.join(&entry.name);
        let file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(file = %entry.name, error = %e, "Failed to create output file");
                first_error = Some(Error::transfer(&entry.name, TransferError::Io(e)));
                cancel.cancel();
                break;
            }
        };
        created.push(path);

        let http = http.clone();
        let cancel = cancel.clone();
        let name = entry.name.clone();
        let pb = multi.as_ref().map(|m| m.add(progress_bar(&name)));
        let span = tracing::info_span!("transfer", file = %name);
        transfers.spawn(
            async move {
                tracing::debug!(%url, "Starting transfer");
                let outcome = transfer(&http, url, file, &cancel, pb).await;
                (name, outcome)
            }
            .instrument(span),
        );
    }

    // Every transfer has finished and closed its file before anything is decided.
    let mut panic = None;
    while let Some(joined) = transfers.join_next().await {
        match joined {
            Ok((name, TransferOutcome::Completed { bytes })) => {
                tracing::info!(file = %name, bytes, "File downloaded");
            }
            Ok((name, TransferOutcome::Failed(e))) => {
                if first_error.is_none() {
                    first_error = Some(Error::transfer(name, e));
                }
            }
            Ok((name, TransferOutcome::Cancelled)) => {
                tracing::debug!(file = %name, "Transfer cancelled");
            }
            Err(e) => {
                cancel.cancel();
                if e.is_panic() && panic.is_none() {
                    panic = Some(e.into_panic());
                }
            }
        }
    }

    match (first_error, panic) {
        (None, None) => {
            created.keep();
            Ok(entries.iter().map(|e| e.name.clone()).collect())
        }
        (_, Some(payload)) => {
            created.remove_all().await;
            std::panic::resume_unwind(payload)
        }
        (Some(e), None) => {
            created.remove_all().await;
            Err(e)
        }
    }
}

/// Files created by one `download_all` call.
///
/// Unless [`CreatedFiles::keep`] is called, they are removed: by `remove_all` on
/// the error paths, or on drop when the caller abandons the download.
struct CreatedFiles {
    paths: Vec<PathBuf>,
}

impl CreatedFiles {
    fn with_capacity(n: usize) -> Self {
        Self {
            paths: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn keep(mut self) {
        self.paths.clear();
    }

    /// Best-effort removal; the transfer error that got us here is what the caller sees.
    async fn remove_all(mut self) {
        while let Some(path) = self.paths.last() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file");
            }
            self.paths.pop();
        }
    }
}

impl Drop for CreatedFiles {
    fn drop(&mut self) {
        if self.paths.is_empty() {
            return;
        }
        tracing::debug!(files = self.paths.len(), "Download abandoned, removing its files");
        for path in self.paths.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file");
            }
        }
    }
}

fn validate_names(entries: &[FileManifestEntry]) -> Result<()> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        let name = entry.name.as_str();
        if !is_plain_file_name(name) {
            return Err(Error::MalformedResponse(format!(
                "manifest file name {:?} is not a plain file name",
                name
            )));
        }
        if !seen.insert(name) {
            return Err(Error::MalformedResponse(format!(
                "manifest lists {:?} more than once",
                name
            )));
        }
    }
    Ok(())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
