//! Traffic generator and admin client for the relay.

use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

/// Pause after the edge could not be reached at all.
const RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "relay-client")]
#[command(about = "Drive traffic through the relay and inspect its state", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a stream of requests with incrementing X-Request-ID
    Traffic {
        #[arg(long, env = "FRONTEND_HOST", default_value = "localhost")]
        host: String,

        #[arg(long, env = "FRONTEND_PORT", default_value_t = 8080)]
        port: u16,

        /// Stop after this many requests (default: run forever).
        #[arg(long)]
        count: Option<u64>,

        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Print the connection state machine snapshot
    Status {
        #[arg(short, long, default_value = "http://localhost:8081")]
        url: String,

        #[arg(short, long, env = "ADMIN_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    match cli.command {
        Commands::Traffic {
            host,
            port,
            count,
            interval_ms,
        } => traffic(&client, &format!("http://{host}:{port}/"), count, Duration::from_millis(interval_ms)).await,
        Commands::Status { url, key } => {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);
            let res = client
                .get(format!("{}/admin/status", url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await
        }
    }
}

async fn traffic(
    client: &reqwest::Client,
    url: &str,
    count: Option<u64>,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Sending traffic to {url}");
    let mut request_id: u64 = 1;

    while count.map_or(true, |limit| request_id <= limit) {
        match client
            .get(url)
            .header("X-Request-ID", request_id.to_string())
            .send()
            .await
        {
            Ok(res) => {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                println!("[{request_id}] {status}: {body}");
                request_id += 1;
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                eprintln!("[{request_id}] edge unreachable ({e}), retrying in {}s", RETRY_DELAY.as_secs());
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
