//! A Rust client for the Knoema statistical data platform.
//!
//! Besides generic API calls, this crate implements the bulk unload flow:
//! submit an unload job, poll it until it completes, then download all the
//! resulting files in parallel. Either every file ends up in the destination
//! folder or none does.
//!
//! ## Quick start
//! - Configure the host and credentials via environment variables (`KNOEMA_HOST`,
//!   `KNOEMA_CLIENT_ID`, `KNOEMA_CLIENT_SECRET` or `KNOEMA_TOKEN`) or a `.knoemarc`
//!   file (current directory or home directory).
//! - Call [`Client::unload_to_folder`] with a pivot request.
//!
//! ```no_run
//! use knoema::Client;
//! use serde_json::json;
//!
//! # async fn run() -> knoema::Result<()> {
//! let client = Client::from_env()?;
//! let request = json!({
//!     "Dataset": "IMFWEO2017Apr",
//!     "Header": [{ "DimensionId": "Time", "Members": ["2015-2017"], "UiMode": "range" }],
//!     "Stub": [{ "DimensionId": "country", "Members": ["1000000"] }],
//!     "Filter": [{ "DimensionId": "subject", "Members": ["1000010"] }],
//!     "Frequencies": ["A"]
//! });
//! let files = client
//!     .unload_to_folder(&request, std::path::Path::new("unload"))
//!     .await?;
//! println!("wrote {:?}", files);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod client;
mod config;
mod download;
mod error;
mod signer;
pub mod task;
mod transport;
mod unload;
mod util;

pub use client::Client;
pub use config::{ClientConfig, Credentials, DEFAULT_HOST, DEFAULT_TIMEOUT};
pub use download::TransferOutcome;
pub use error::{Error, Result, TransferError};
pub use reqwest::Method;
pub use signer::{AUTH_SCHEME, PROTOCOL_VERSION, RequestSigner};
pub use task::{FetchStrategy, PollPolicy, TaskHandle, TaskResult, TaskResultSource, TaskStatus};
pub use transport::ApiTransport;
pub use unload::FileManifestEntry;
