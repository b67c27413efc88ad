use anyhow::Result;
use knoema::{Client, PollPolicy};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Configure the host and credentials via env vars or a `.knoemarc` file.
    let client = Client::from_env()?;

    let request = json!({
        "Dataset": "IMFWEO2017Apr",
        "Header": [{ "DimensionId": "Time", "Members": ["2015-2017"], "UiMode": "range" }],
        "Stub": [{ "DimensionId": "country", "Members": ["1000000", "1000010"] }],
        "Filter": [{ "DimensionId": "subject", "Members": ["1000370"] }],
        "Frequencies": ["A"]
    });

    let policy = PollPolicy::new(Duration::from_secs(5), 720);
    let files = client
        .unload_to_folder_with(&request, Path::new("unload"), &policy)
        .await?;

    for name in files {
        println!("unload/{}", name);
    }
    Ok(())
}
