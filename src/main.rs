use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use cluster_lite::config::{
    LoaderConfig, ManagerConfig, SubmitConfig, WorkerConfig, DEFAULT_PORT,
};
use cluster_lite::manager::Manager;
use cluster_lite::payload::{execute_section, RegistryLoader, SectionSpec};
use cluster_lite::query::fetch_status;
use cluster_lite::shutdown::install_shutdown_handler;
use cluster_lite::submit::Submitter;
use cluster_lite::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "cluster-lite")]
#[command(version)]
#[command(about = "An ad-hoc compute cluster: one manager, many nodes, FIFO job scheduling")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the manager
    Server(ServerArgs),

    /// Run a worker node and connect it to a manager
    Node(NodeArgs),

    /// Submit a payload and wait for its results
    Submit(SubmitArgs),

    /// Run one section of a payload and print its result envelope (used by nodes)
    Load(LoadArgs),

    /// Show the manager's nodes and jobs
    Status(StatusArgs),
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Directory relative payload paths are resolved against
    #[arg(long, default_value = ".")]
    directory: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Pause between scheduler passes
    #[arg(long, default_value = "500")]
    dispatch_interval_ms: u64,
}

#[derive(Parser, Debug)]
struct NodeArgs {
    /// Working directory for received payloads
    #[arg(long, default_value = ".")]
    directory: PathBuf,

    /// Manager port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Program used to run sections (defaults to this binary's `load` command)
    #[arg(long)]
    loader: Option<PathBuf>,

    /// Arguments passed to the loader before the payload
    #[arg(long = "loader-arg", requires = "loader")]
    loader_args: Vec<String>,

    /// Manager address
    ip: IpAddr,
}

#[derive(Parser, Debug)]
struct SubmitArgs {
    /// Directory relative payload paths are resolved against
    #[arg(long, default_value = ".")]
    directory: PathBuf,

    /// Manager address
    #[arg(long, default_value = "127.0.0.1")]
    manager: IpAddr,

    /// Manager port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Payload file
    payload: PathBuf,

    /// Arguments handed to the payload
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Parser, Debug)]
struct LoadArgs {
    /// Payload file
    payload: PathBuf,

    /// Section to run, as `jobId,sectionId,totalSections`
    lib_args: String,

    /// Arguments handed to the payload
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    /// Manager address
    #[arg(default_value = "127.0.0.1")]
    ip: IpAddr,

    /// Manager port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ManagerConfig::new(SocketAddr::new(args.bind, args.port))
        .with_directory(args.directory)
        .with_dispatch_interval_ms(args.dispatch_interval_ms);
    let cancel = install_shutdown_handler();

    let manager = Manager::bind(config).await?;
    manager
        .run(cancel)
        .instrument(tracing::info_span!("manager"))
        .await?;
    Ok(())
}

async fn run_node(args: NodeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        WorkerConfig::new(SocketAddr::new(args.ip, args.port)).with_work_dir(args.directory);
    if let Some(program) = args.loader {
        config = config.with_loader(LoaderConfig::new(program, args.loader_args));
    }
    let cancel = install_shutdown_handler();

    let span = tracing::info_span!("node");
    async move {
        let worker = Worker::connect(config).await?;
        worker.run(cancel).await
    }
    .instrument(span)
    .await?;
    Ok(())
}

async fn run_submit(args: SubmitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = SubmitConfig::new(SocketAddr::new(args.manager, args.port))
        .with_directory(args.directory);
    let submitter =
        Submitter::prepare(&RegistryLoader::with_builtin(), config, &args.payload, args.args)?;
    let cancel = install_shutdown_handler();

    let report = submitter
        .run(cancel)
        .instrument(tracing::info_span!("submit"))
        .await?;

    for line in &report.console {
        println!("{}", line);
    }
    if !report.completed {
        return Err(format!(
            "job {} did not complete ({} sections received)",
            report
                .job_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string()),
            report.sections_received
        )
        .into());
    }
    Ok(())
}

fn run_load(args: LoadArgs) -> Result<(), Box<dyn std::error::Error>> {
    let spec: SectionSpec = args.lib_args.parse()?;
    let output = execute_section(
        &RegistryLoader::with_builtin(),
        &args.payload,
        &spec,
        &args.args,
    );
    // stdout carries the envelope and nothing else.
    println!("{}", output.envelope.to_json()?);
    if let Some(e) = output.error {
        tracing::error!(section = %spec, error = %e, "Section failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_status(args: StatusArgs) -> Result<(), Box<dyn std::error::Error>> {
    let status = fetch_status(SocketAddr::new(args.ip, args.port), Duration::from_secs(5)).await?;

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Table => {
            println!("Cluster Status");
            println!("{}", "=".repeat(40));
            println!("Connections:  {}", status.connections);
            println!(
                "Nodes:        {} ({} idle)",
                status.nodes.len(),
                status.idle_nodes()
            );
            println!("Pending jobs: {}", status.pending_jobs);
            println!();
            println!("{:<8} {:<25} STATUS", "NODE", "ADDRESS");
            println!("{}", "-".repeat(45));
            for node in &status.nodes {
                let state = if node.busy { "busy" } else { "idle" };
                println!("{:<8} {:<25} {}", node.id, node.peer, state);
            }
            if !status.jobs.is_empty() {
                println!();
                println!(
                    "{:<8} {:<12} {:<20} {:<10} {:<10} SUBMITTED",
                    "JOB", "USER", "PAYLOAD", "STATUS", "SECTIONS"
                );
                println!("{}", "-".repeat(84));
                for job in &status.jobs {
                    println!(
                        "{:<8} {:<12} {:<20} {:<10} {:<10} {}",
                        job.job_id,
                        job.username,
                        job.file_name,
                        job.status,
                        format!("{}/{}", job.sections_returned, job.granted_nodes),
                        job.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr; `load` reserves stdout for its envelope.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Node(node_args) => run_node(node_args).await?,
        Commands::Submit(submit_args) => run_submit(submit_args).await?,
        Commands::Load(load_args) => run_load(load_args)?,
        Commands::Status(status_args) => run_status(status_args).await?,
    }

    Ok(())
}
