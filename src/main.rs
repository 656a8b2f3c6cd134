use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use courier::config::{RetentionConfig, ServerConfig, WaitPolicy};
use courier::error::CourierError;
use courier::http::run_server;
use courier::registry::AgentRegistry;
use courier::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(version)]
#[command(about = "Job dispatch server for polling agents")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a courier server
    Server(ServerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Agent management commands
    Agent {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: AgentCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on
    #[arg(long, default_value = "8600")]
    port: u16,

    /// Freshness window in seconds: an agent is online iff it polled
    /// within this window
    #[arg(long, default_value = "60")]
    freshness_secs: u64,

    /// Re-check interval for an empty-queue poll hold, in seconds
    #[arg(long, default_value = "3")]
    hold_interval_secs: u64,

    /// Number of re-checks before an empty poll response
    #[arg(long, default_value = "16")]
    hold_attempts: u32,

    /// Re-check interval while waiting for a job completion, in seconds
    #[arg(long, default_value = "2")]
    wait_interval_secs: u64,

    /// Number of re-checks before a job request times out
    #[arg(long, default_value = "15")]
    wait_attempts: u32,

    /// Drop completed jobs after this many seconds
    #[arg(long, default_value = "3600")]
    completed_ttl_secs: u64,

    /// Drop agent records idle for this many seconds
    #[arg(long, default_value = "86400")]
    agent_idle_ttl_secs: u64,

    /// Retention sweep interval in seconds, 0 to disable
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,
}

// =============================================================================
// Client Arguments (shared by job and agent commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8600")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Create a job for an agent and wait for its result
    Submit {
        /// Target agent id
        #[arg(long)]
        agent: String,

        /// Job method (launch_visualizer, clear_checkpoints, call_sync)
        method: String,

        /// Request payload as a JSON document
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Look up a job by id
    Status {
        /// Owning agent id
        #[arg(long)]
        agent: String,

        /// The job id (UUID)
        job_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum AgentCommands {
    /// Show an agent's online state and queue depths
    Status {
        /// The agent id
        agent_id: String,
    },
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server_command(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;

    let config = ServerConfig {
        listen_addr,
        freshness: Duration::from_secs(args.freshness_secs),
        hold: WaitPolicy::new(
            Duration::from_secs(args.hold_interval_secs),
            args.hold_attempts,
        ),
        wait: WaitPolicy::new(
            Duration::from_secs(args.wait_interval_secs),
            args.wait_attempts,
        ),
        retention: RetentionConfig {
            completed_ttl: Duration::from_secs(args.completed_ttl_secs),
            agent_idle_ttl: Duration::from_secs(args.agent_idle_ttl_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
        },
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        freshness_secs = args.freshness_secs,
        hold_budget_secs = config.hold.budget().as_secs(),
        wait_budget_secs = config.wait.budget().as_secs(),
        "Starting courier"
    );

    let registry = Arc::new(AgentRegistry::new(config.freshness));
    let shutdown = install_shutdown_handler();

    let sweeper_registry = registry.clone();
    let sweeper_shutdown = shutdown.clone();
    let retention = config.retention;
    tokio::spawn(async move {
        sweeper_registry
            .run_sweeper(retention, sweeper_shutdown)
            .await;
    });

    run_server(config, registry, shutdown).await
}

// =============================================================================
// Client Command Handlers
// =============================================================================

fn print_field(label: &str, value: &Value) {
    if !value.is_null() {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("{:<14} {}", label, rendered);
    }
}

fn render_json(body: &Value) -> Result<String, CourierError> {
    serde_json::to_string_pretty(body).map_err(|e| CourierError::Internal(e.to_string()))
}

async fn handle_job_submit(
    client_args: &ClientArgs,
    agent: String,
    method: String,
    payload: String,
) -> Result<(), CourierError> {
    let payload: Value = serde_json::from_str(&payload)
        .map_err(|e| CourierError::Internal(format!("invalid payload: {}", e)))?;

    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/agents/{}/jobs/{}", client_args.addr, agent, method);
    let response = client.post(&url).json(&payload).send().await?;

    if !response.status().is_success() {
        let body: Value = response.json().await.unwrap_or_default();
        eprintln!(
            "Error: {}",
            body["message"].as_str().unwrap_or("request rejected")
        );
        std::process::exit(1);
    }

    let body: Value = response.json().await?;
    match client_args.output {
        OutputFormat::Json => println!("{}", render_json(&body)?),
        OutputFormat::Table => {
            print_field("Status:", &body["status"]);
            print_field("Job ID:", &body["job_id"]);
            print_field("Method:", &body["method"]);
            print_field("Data:", &body["data"]);
            if body["status"] == "timeout" {
                println!();
                println!("The job is still outstanding; re-check with:");
                println!(
                    "  courier job status --agent {} {}",
                    agent,
                    body["job_id"].as_str().unwrap_or("<job-id>")
                );
            }
        }
    }
    Ok(())
}

async fn handle_job_status(
    client_args: &ClientArgs,
    agent: String,
    job_id: String,
) -> Result<(), CourierError> {
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/agents/{}/jobs/{}", client_args.addr, agent, job_id);
    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        let body: Value = response.json().await.unwrap_or_default();
        eprintln!(
            "Error: {}",
            body["message"].as_str().unwrap_or("request rejected")
        );
        std::process::exit(1);
    }

    let body: Value = response.json().await?;
    match client_args.output {
        OutputFormat::Json => println!("{}", render_json(&body)?),
        OutputFormat::Table => {
            print_field("Job ID:", &body["job_id"]);
            print_field("Method:", &body["method"]);
            print_field("Status:", &body["status"]);
            print_field("Payload:", &body["payload"]);
            print_field("Data:", &body["data"]);
            print_field("Created:", &body["created_at"]);
            print_field("Completed:", &body["completed_at"]);
        }
    }
    Ok(())
}

async fn handle_agent_status(
    client_args: &ClientArgs,
    agent_id: String,
) -> Result<(), CourierError> {
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/agents/{}", client_args.addr, agent_id);
    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        let body: Value = response.json().await.unwrap_or_default();
        eprintln!(
            "Error: {}",
            body["message"].as_str().unwrap_or("request rejected")
        );
        std::process::exit(1);
    }

    let body: Value = response.json().await?;
    match client_args.output {
        OutputFormat::Json => println!("{}", render_json(&body)?),
        OutputFormat::Table => {
            let online = body["online"].as_bool().unwrap_or(false);
            println!("Agent:         {}", agent_id);
            println!("Online:        {}", if online { "yes" } else { "no" });
            if let Some(secs) = body["last_seen_secs"].as_u64() {
                println!("Last seen:     {}s ago", secs);
            } else {
                println!("Last seen:     never");
            }
            print_field("Pending:", &body["pending"]);
            print_field("Delivered:", &body["delivered"]);
            print_field("Completed:", &body["completed"]);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server_command(server_args).await?;
        }
        Commands::Job { client, command } => match command {
            JobCommands::Submit {
                agent,
                method,
                payload,
            } => {
                handle_job_submit(&client, agent, method, payload).await?;
            }
            JobCommands::Status { agent, job_id } => {
                handle_job_status(&client, agent, job_id).await?;
            }
        },
        Commands::Agent { client, command } => match command {
            AgentCommands::Status { agent_id } => {
                handle_agent_status(&client, agent_id).await?;
            }
        },
    }

    Ok(())
}
