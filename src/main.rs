use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use job_dispatcher::config::{DispatcherConfig, WorkerConfig, DEFAULT_CACHE_SIZE, DEFAULT_PORT};
use job_dispatcher::dispatcher::{
    load_jobs, CommitHandler, Dispatcher, JsonLinesCommitHandler, LogCommitHandler,
};
use job_dispatcher::server::DispatcherServer;
use job_dispatcher::shutdown::install_shutdown_handler;
use job_dispatcher::worker::{DispatcherClient, ShellExecutor, Worker};

#[derive(Parser, Debug)]
#[command(name = "job-dispatcher")]
#[command(version)]
#[command(about = "Hands out jobs to remote workers over HTTP")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a dispatcher
    Server(ServerArgs),

    /// Start a worker running each job's `command` field in a shell
    Worker(WorkerArgs),

    /// Print the number of waiting, running and committed jobs
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Print a job
    Job {
        #[command(flatten)]
        client: ClientArgs,

        /// The job ID
        job_id: u64,
    },

    /// Stop a dispatcher
    Stop {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory of static resources served to workers
    #[arg(long)]
    resources: Option<PathBuf>,

    /// JSON file holding an array of jobs to enqueue at start-up
    #[arg(long)]
    jobs: Option<PathBuf>,

    /// Append committed jobs to this file, one JSON object per line
    #[arg(long)]
    results: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Dispatcher address
    #[arg(long, short = 'a', default_value_t = default_addr())]
    addr: String,

    /// Number of resources kept in memory
    #[arg(long, default_value_t = DEFAULT_CACHE_SIZE)]
    cache_size: usize,

    /// Milliseconds between two dequeue attempts when there is no work
    #[arg(long, default_value = "500")]
    poll_interval_ms: u64,

    /// Exit as soon as the dispatcher has no waiting job
    #[arg(long)]
    once: bool,

    /// Shell used to run job commands
    #[arg(long, default_value = "sh")]
    shell: String,
}

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Dispatcher address
    #[arg(long, short = 'a', default_value_t = default_addr())]
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

fn default_addr() -> String {
    WorkerConfig::default().dispatcher_url
}

#[derive(Serialize)]
struct StatusOutput {
    waiting: usize,
    running: usize,
    committed: usize,
    total: usize,
}

// =============================================================================
// Server
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let handler: Arc<dyn CommitHandler> = match &args.results {
        Some(path) => Arc::new(JsonLinesCommitHandler::open(path)?),
        None => Arc::new(LogCommitHandler),
    };
    let dispatcher = Arc::new(Dispatcher::with_handler(handler));

    if let Some(path) = &args.jobs {
        let raw = tokio::fs::read_to_string(path).await?;
        let loaded = load_jobs(&dispatcher, &raw).await?;
        tracing::info!(jobs = loaded, file = %path.display(), "Jobs enqueued");
    }

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let mut config = DispatcherConfig::new(listen_addr);
    if let Some(root) = args.resources {
        config = config.with_resource_root(root);
    }

    let shutdown = install_shutdown_handler();
    DispatcherServer::new(config, dispatcher, shutdown).run().await?;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = WorkerConfig {
        dispatcher_url: args.addr,
        cache_size: args.cache_size,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        exit_when_idle: args.once,
    };

    let worker = Worker::new(config, ShellExecutor::new(args.shell));
    let stats = worker.run(install_shutdown_handler()).await?;
    tracing::info!(committed = stats.committed, rejected = stats.rejected, "Done");
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

fn client_for(args: &ClientArgs) -> DispatcherClient {
    DispatcherClient::new(&WorkerConfig::new(args.addr.clone()))
}

async fn handle_status(args: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let counts = client_for(args).status().await?;
    match args.output {
        OutputFormat::Json => {
            let output = StatusOutput {
                waiting: counts.waiting,
                running: counts.running,
                committed: counts.committed,
                total: counts.total(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Waiting:   {}", counts.waiting);
            println!("Running:   {}", counts.running);
            println!("Committed: {}", counts.committed);
            println!("{}", "-".repeat(20));
            println!("Total:     {}", counts.total());
        }
    }
    Ok(())
}

async fn handle_job(args: &ClientArgs, job_id: u64) -> Result<(), Box<dyn std::error::Error>> {
    let Some(job) = client_for(args).job(job_id).await? else {
        eprintln!("Error: job {} not found", job_id);
        std::process::exit(1);
    };
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
        OutputFormat::Table => {
            println!("Job ID: {}", job.id());
            if job.fields().is_empty() {
                println!("(no fields)");
            }
            for (k, v) in job.fields() {
                let mut lines = v.lines();
                println!("{:<16} {}", format!("{}:", k), lines.next().unwrap_or(""));
                for line in lines {
                    println!("{:<16} {}", "", line);
                }
            }
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
            init_tracing();
            run_server(server_args).await?;
        }
        Commands::Worker(worker_args) => {
            init_tracing();
            run_worker(worker_args).await?;
        }
        Commands::Status { client } => handle_status(&client).await?,
        Commands::Job { client, job_id } => handle_job(&client, job_id).await?,
        Commands::Stop { client } => {
            client_for(&client).stop().await?;
            println!("Dispatcher at {} is stopping", client.addr);
        }
    }

    Ok(())
}
