//! Replink CLI
//!
//! One-shot commands against a MicroPython-class board, over a serial port
//! or the device's WebREPL socket.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use replink_core::transport::serial::DEFAULT_BAUD;
use replink_core::transport::socket::DEFAULT_WS_PORT;
use replink_core::{
    Board, DeviceIntrospector, FileTransfer, NoPassword, PasswordResolver, ProgressSink,
    SerialTransport, SessionConfig, StaticPassword, TransferStatus, Transport,
    WebSocketTransport,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Replink - query/upload engine for MicroPython-class boards
#[derive(Parser, Debug)]
#[command(name = "replink")]
#[command(author = "Replink Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Talk to a MicroPython board over serial or WebREPL", long_about = None)]
struct Args {
    /// Serial device path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Use the WebREPL at this host instead of serial
    #[arg(long)]
    host: Option<String>,

    /// WebREPL port
    #[arg(long, default_value_t = DEFAULT_WS_PORT)]
    ws_port: u16,

    /// WebREPL password
    #[arg(long)]
    password: Option<String>,

    /// Abort any single query after this many milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial devices attached to this machine
    Ports,
    /// Check whether the configured endpoint is reachable
    Probe,
    /// Scan the host's /24 subnet for WebREPL listeners
    Scan,
    /// Run a local script on the device and stream its output
    Run {
        /// Script to execute
        file: PathBuf,
    },
    /// Upload a local file, verified by sha256 on the device
    Upload {
        /// Local file to send
        file: PathBuf,
        /// Remote path (defaults to the local file name)
        #[arg(long)]
        dest: Option<String>,
    },
    /// Download a remote file
    Download {
        /// Remote path to fetch
        remote: String,
        /// Local destination (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build the module index and write it as JSON
    Index {
        /// Output file
        #[arg(short, long, default_value = "modules.json")]
        output: PathBuf,
    },
    /// Print the device file tree as JSON
    Tree,
}

/// Progress reporter that keeps one updating line on stderr.
struct StderrSink;

impl ProgressSink for StderrSink {
    fn progress(&self, percent: u8) {
        eprint!("\r{:>3}%", percent);
        let _ = std::io::stderr().flush();
    }

    fn status(&self, text: &str) {
        eprintln!("\r{}", text);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    match &args.command {
        Command::Ports => cmd_ports(),
        Command::Probe => cmd_probe(&args).await,
        Command::Scan => cmd_scan(&args).await,
        Command::Run { file } => cmd_run(&args, file).await,
        Command::Upload { file, dest } => cmd_upload(&args, file, dest.as_deref()).await,
        Command::Download { remote, output } => {
            cmd_download(&args, remote, output.as_deref()).await
        }
        Command::Index { output } => cmd_index(&args, output).await,
        Command::Tree => cmd_tree(&args).await,
    }
}

/// Setup logging with tracing
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::WARN);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn build_transport(args: &Args) -> Box<dyn Transport> {
    match &args.host {
        Some(host) => Box::new(WebSocketTransport::new(host.clone(), args.ws_port)),
        None => Box::new(SerialTransport::new(&args.port, args.baud)),
    }
}

fn build_board(args: &Args) -> Board {
    let config = SessionConfig {
        query_ceiling: args.timeout.map(Duration::from_millis),
        ..SessionConfig::default()
    };
    Board::with_config(build_transport(args), config)
}

fn build_resolver(args: &Args) -> Box<dyn PasswordResolver> {
    match &args.password {
        Some(password) => Box::new(StaticPassword(password.clone())),
        None => Box::new(NoPassword),
    }
}

fn cmd_ports() -> Result<()> {
    let ports = SerialTransport::list_ports();
    if ports.is_empty() {
        println!("No serial devices found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

async fn cmd_probe(args: &Args) -> Result<()> {
    let board = build_board(args);
    let name = board.name().await;
    if board.is_available().await {
        println!("{} is reachable", name);
        Ok(())
    } else {
        bail!("{} is not reachable", name)
    }
}

async fn cmd_scan(args: &Args) -> Result<()> {
    let Some(host) = &args.host else {
        bail!("scan needs --host to pick the subnet")
    };
    let transport = WebSocketTransport::new(host.clone(), args.ws_port);
    info!("scanning {}'s /24 on port {}", host, args.ws_port);
    let up = transport.scan_subnet().await;
    if up.is_empty() {
        println!("No listeners found");
    }
    for addr in up {
        println!("{}", addr);
    }
    Ok(())
}

async fn cmd_run(args: &Args, file: &Path) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Cannot read {}", file.display()))?;

    let board = build_board(args);
    let session = board.connect().await?;
    session.login(build_resolver(args).as_ref()).await?;
    session
        .set_observer(|line: &str| println!("{}", line))
        .await;

    board.run_script(&source).await?;
    info!("script sent, streaming output until Ctrl+C");
    tokio::signal::ctrl_c().await?;
    board.disconnect().await;
    Ok(())
}

async fn cmd_upload(args: &Args, file: &Path, dest: Option<&str>) -> Result<()> {
    let payload =
        std::fs::read(file).with_context(|| format!("Cannot read {}", file.display()))?;
    let remote_path = match dest {
        Some(dest) => dest.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", file.display()))?,
    };

    let board = build_board(args);
    let transfer = FileTransfer::new(&board);
    let job = transfer
        .upload(
            build_resolver(args).as_ref(),
            Arc::new(StderrSink),
            &remote_path,
            &payload,
        )
        .await?;
    board.disconnect().await;

    match job.status {
        TransferStatus::Success => {
            println!("Uploaded {} ({} bytes)", job.remote_path, job.total);
            Ok(())
        }
        TransferStatus::HashMismatch => {
            bail!("Upload of {} failed: hash mismatch", job.remote_path)
        }
        TransferStatus::Unverified => bail!(
            "Upload of {} finished but the device gave no verification verdict",
            job.remote_path
        ),
        TransferStatus::Failed(reason) => bail!("Upload of {} failed: {}", job.remote_path, reason),
        TransferStatus::InProgress => bail!("Upload of {} did not complete", job.remote_path),
    }
}

async fn cmd_download(args: &Args, remote: &str, output: Option<&Path>) -> Result<()> {
    let board = build_board(args);
    let transfer = FileTransfer::new(&board);
    let payload = transfer
        .download(build_resolver(args).as_ref(), remote)
        .await?;
    board.disconnect().await;

    match output {
        Some(path) => {
            std::fs::write(path, &payload)
                .with_context(|| format!("Cannot write {}", path.display()))?;
            println!("Downloaded {} ({} bytes)", path.display(), payload.len());
        }
        None => std::io::stdout().write_all(&payload)?,
    }
    Ok(())
}

async fn cmd_index(args: &Args, output: &Path) -> Result<()> {
    let board = build_board(args);
    let introspector = DeviceIntrospector::new(&board);
    let index = introspector
        .build_index(build_resolver(args).as_ref(), Arc::new(StderrSink))
        .await?;
    board.disconnect().await;

    let json = serde_json::to_string_pretty(&index)?;
    std::fs::write(output, json)
        .with_context(|| format!("Cannot write {}", output.display()))?;
    println!("Indexed {} modules into {}", index.len(), output.display());
    Ok(())
}

async fn cmd_tree(args: &Args) -> Result<()> {
    let board = build_board(args);
    let introspector = DeviceIntrospector::new(&board);
    let tree = introspector
        .scan_files(build_resolver(args).as_ref(), Arc::new(StderrSink))
        .await?;
    board.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}
