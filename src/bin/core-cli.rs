use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "core-cli")]
#[command(about = "Management CLI for the retrieval core", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check system status
    Status,
    /// Full stats snapshot
    Stats,
    /// List backends with breaker and health state
    Backends,
    /// Enable a backend
    Enable { name: String },
    /// Disable a backend
    Disable { name: String },
    /// Show pending and in-flight jobs
    Queue {
        /// Also list this many recently finished jobs
        #[arg(long, default_value_t = 0)]
        recent: usize,
    },
    /// Submit a job
    Submit {
        target: String,
        #[arg(long)]
        action: Option<String>,
        /// low, normal, high or urgent
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        caller: Option<String>,
    },
    /// Show one job
    Job { id: String },
    /// Cancel a job
    Cancel { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")).send().await?,
        Commands::Stats => client.get(format!("{base}/admin/stats")).send().await?,
        Commands::Backends => client.get(format!("{base}/admin/backends")).send().await?,
        Commands::Enable { name } => set_enabled(&client, base, &name, true).await?,
        Commands::Disable { name } => set_enabled(&client, base, &name, false).await?,
        Commands::Queue { recent } => {
            client
                .get(format!("{base}/admin/queue"))
                .query(&[("recent", recent)])
                .send()
                .await?
        }
        Commands::Submit {
            target,
            action,
            priority,
            max_attempts,
            timeout_secs,
            caller,
        } => {
            let body = json!({
                "target": target,
                "action": action,
                "priority": priority.map(|p| p.to_ascii_lowercase()),
                "max_attempts": max_attempts,
                "timeout_secs": timeout_secs,
                "caller": caller,
            });
            client
                .post(format!("{base}/admin/jobs"))
                .json(&body)
                .send()
                .await?
        }
        Commands::Job { id } => client.get(format!("{base}/admin/jobs/{id}")).send().await?,
        Commands::Cancel { id } => {
            client
                .delete(format!("{base}/admin/jobs/{id}"))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn set_enabled(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    enabled: bool,
) -> reqwest::Result<reqwest::Response> {
    client
        .post(format!("{base}/admin/backends/{name}/enabled"))
        .json(&json!({ "enabled": enabled }))
        .send()
        .await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
