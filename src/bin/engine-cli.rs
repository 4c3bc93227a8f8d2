use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "engine-cli")]
#[command(about = "Inspect a running resilience engine through its admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "ENGINE_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall engine status
    Status,
    /// Circuit state and rolling counts of every command
    Commands,
    /// Circuit state and rolling counts of one command
    Command { key: String },
    /// Isolation pool occupancy
    Pools,
    /// Follow the live command stream
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let path = match &cli.command {
        Commands::Status => "/admin/status".to_string(),
        Commands::Commands => "/admin/commands".to_string(),
        Commands::Command { key } => format!("/admin/commands/{key}"),
        Commands::Pools => "/admin/pools".to_string(),
        Commands::Watch => "/admin/stream".to_string(),
    };

    let res = client
        .get(format!("{}{}", cli.url, path))
        .headers(headers)
        .send()
        .await?;

    match cli.command {
        Commands::Watch => follow_stream(res).await,
        _ => print_response(res).await,
    }
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

/// Print each `data:` line of the event stream as pretty JSON.
async fn follow_stream(mut res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    if !res.status().is_success() {
        return print_response(res).await;
    }

    let mut buffer = String::new();
    while let Some(chunk) = res.chunk().await? {
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(end) = buffer.find('\n') {
            let line: String = buffer.drain(..=end).collect();
            if let Some(data) = line.trim_end().strip_prefix("data:") {
                match serde_json::from_str::<Value>(data.trim()) {
                    Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                    Err(_) => println!("{}", data.trim()),
                }
            }
        }
    }
    Ok(())
}
