//! Streaming transfer of one remote file into a local file handle.

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client as HttpClient;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::TransferError;

const WRITE_BUFFER: usize = 64 * 1024;

/// Result of one transfer.
#[derive(Debug)]
pub enum TransferOutcome {
    Completed { bytes: u64 },
    Failed(TransferError),
    /// Stopped because a sibling transfer failed.
    Cancelled,
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

enum Interrupt {
    Failed(TransferError),
    Cancelled,
}

impl From<TransferError> for Interrupt {
    fn from(e: TransferError) -> Self {
        Self::Failed(e)
    }
}

/// Copies `url` into `file`.
///
/// `cancel` is checked while waiting for the response and between chunks. A
/// failing transfer cancels it so that sibling transfers stop as well. The file
/// handle is flushed and closed before this returns, whatever the outcome.
pub(crate) async fn transfer(
    http: &HttpClient,
    url: Url,
    file: File,
    cancel: &CancellationToken,
    progress: Option<ProgressBar>,
) -> TransferOutcome {
    let mut out = BufWriter::with_capacity(WRITE_BUFFER, file);

    let copied = copy_body(http, url, &mut out, cancel, progress.as_ref()).await;
    // Waits for any write still in flight so the handle is released on return.
    let flushed = out.flush().await;
    drop(out);

    let outcome = match (copied, flushed) {
        (Ok(bytes), Ok(())) => TransferOutcome::Completed { bytes },
        (Ok(_), Err(e)) => TransferOutcome::Failed(TransferError::Io(e)),
        (Err(Interrupt::Failed(e)), _) => TransferOutcome::Failed(e),
        (Err(Interrupt::Cancelled), _) => TransferOutcome::Cancelled,
    };

    if let TransferOutcome::Failed(e) = &outcome {
        cancel.cancel();
        tracing::warn!(error = %e, "Transfer failed, cancelling sibling transfers");
    }

    if let Some(pb) = progress {
        if outcome.is_completed() {
            pb.finish_and_clear();
        } else {
            pb.abandon();
        }
    }

    outcome
}

async fn copy_body(
    http: &HttpClient,
    url: Url,
    out: &mut BufWriter<File>,
    cancel: &CancellationToken,
    progress: Option<&ProgressBar>,
) -> Result<u64, Interrupt> {
    let mut resp = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
        resp = http.get(url).send() => resp.map_err(TransferError::Network)?,
    };

    // Headers are in; refuse the body of an error response.
    let status = resp.status();
    if !status.is_success() {
        return Err(TransferError::Status(status.as_u16()).into());
    }

    if let (Some(pb), Some(len)) = (progress, resp.content_length()) {
        pb.set_length(len);
    }

    let mut written: u64 = 0;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
            chunk = resp.chunk() => chunk.map_err(TransferError::Network)?,
        };
        let Some(chunk) = chunk else { break };

        out.write_all(&chunk).await.map_err(TransferError::Io)?;
        written += chunk.len() as u64;
        if let Some(pb) = progress {
            pb.inc(chunk.len() as u64);
        }
    }

    Ok(written)
}

pub(crate) fn progress_bar(name: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {msg} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
    )
    .map(|s| s.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(name.to_string());
    pb
}
