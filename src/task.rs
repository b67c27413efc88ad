//! Server-side asynchronous tasks: handles, results and the poll loop.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};

/// Identifies a task submitted to the platform.
///
/// A handle carries a task key, inline proxy data, or both. It is never modified
/// after the server issues it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHandle {
    #[serde(default, alias = "Key", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, alias = "ProxyData", skip_serializing_if = "Option::is_none")]
    pub proxy_data: Option<Value>,
}

/// How the result of a task is fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchStrategy<'a> {
    /// `GET .../taskresult?taskKey=<key>`
    ByKey(&'a str),
    /// `POST .../taskresult` with the handle as body.
    Inline(&'a TaskHandle),
}

impl TaskHandle {
    pub fn from_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            proxy_data: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.proxy_data.is_none()
    }

    pub fn fetch_strategy(&self) -> FetchStrategy<'_> {
        match (&self.key, &self.proxy_data) {
            (Some(key), None) => FetchStrategy::ByKey(key),
            _ => FetchStrategy::Inline(self),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum TaskStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
    /// Anything else the server may send.
    Other(String),
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "executing" => Self::Executing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Other(s),
        }
    }
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Executing)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Executing => "Executing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Other(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

/// Outcome of one poll of a task.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskResult<T> {
    #[serde(alias = "Status")]
    pub status: TaskStatus,
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
    #[serde(alias = "Data")]
    pub data: Option<T>,
}

impl<T> TaskResult<T> {
    /// Payload of a completed task.
    pub fn into_data(self) -> Result<T> {
        self.data.ok_or_else(|| {
            Error::MalformedResponse(format!(
                "task result with status {} carried no data",
                self.status
            ))
        })
    }
}

/// Fixed-interval polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls,
        }
    }
}

impl Default for PollPolicy {
    /// Every 10 seconds, at most 360 times.
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 360)
    }
}

/// Anything that can fetch the current result of a task.
#[async_trait]
pub trait TaskResultSource: Send + Sync {
    async fn fetch_result<T>(&self, handle: &TaskHandle) -> Result<TaskResult<T>>
    where
        T: DeserializeOwned + Send + 'static;
}

/// Polls `handle` until it reaches a terminal status.
///
/// Non-terminal results are re-polled after `policy.interval`; after
/// `policy.max_polls` polls without a terminal status the wait fails with
/// [`Error::PollBudgetExceeded`]. A completed result is returned as is; failed and
/// cancelled tasks become errors.
pub async fn wait<T, S>(
    source: &S,
    handle: &TaskHandle,
    policy: &PollPolicy,
) -> Result<TaskResult<T>>
where
    S: TaskResultSource,
    T: DeserializeOwned + Send + 'static,
{
    let task_key = handle.key.as_deref().unwrap_or("(inline)");
    let mut attempts: u32 = 0;
    let mut last_status: Option<TaskStatus> = None;

    while attempts < policy.max_polls {
        let result: TaskResult<T> = source.fetch_result(handle).await?;
        attempts += 1;
        tracing::debug!(task_key, attempt = attempts, status = %result.status, "Polled task");

        if last_status.as_ref() != Some(&result.status) {
            tracing::info!(task_key, status = %result.status, "Task state changed");
            last_status = Some(result.status.clone());
        }

        match &result.status {
            TaskStatus::Pending | TaskStatus::Executing => {}
            TaskStatus::Completed => return Ok(result),
            TaskStatus::Failed => {
                return Err(Error::TaskFailed {
                    message: result.message,
                });
            }
            TaskStatus::Cancelled => return Err(Error::TaskCancelled),
            TaskStatus::Other(s) => return Err(Error::UnexpectedStatus(s.clone())),
        }

        if attempts < policy.max_polls {
            tokio::time::sleep(policy.interval).await;
        }
    }

    tracing::warn!(task_key, attempts, "Task did not finish within the poll budget");
    Err(Error::PollBudgetExceeded { attempts })
}
