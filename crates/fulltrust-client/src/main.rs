//! FullTrust scenario runner
//!
//! Connects to a running host and walks through a full launch:
//! Create, StartProcess, optional LoadLibrary, ResumeMainThread, then ends
//! the session.

use anyhow::{bail, Context, Result};
use clap::Parser;
use fulltrust_client::{connect, RetryConfig};
use fulltrust_common::{
    init_logging, LoadLibraryRequest, LogConfig, ProcessStartInfoRequest, DEFAULT_PIPE_NAME,
};
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "fulltrust-client")]
#[command(about = "FullTrust client - launch a process through a running fulltrust-host")]
#[command(version)]
struct Args {
    /// Pipe name the host listens on
    #[arg(long, default_value = DEFAULT_PIPE_NAME)]
    pipe_name: String,

    /// Executable to launch
    #[arg(long, default_value = "notepad.exe")]
    app: String,

    /// Arguments passed to the executable
    #[arg(long, default_value = "")]
    args: String,

    /// Working directory (default: inherit from the host)
    #[arg(long, default_value = "")]
    cwd: String,

    /// Library to inject before resuming
    #[arg(long)]
    library: Option<String>,

    /// Connection attempts before giving up
    #[arg(long, default_value = "10")]
    retries: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_config = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default().with_level("warn")
    };
    init_logging(&log_config);

    let retry = RetryConfig {
        max_retries: args.retries,
        ..Default::default()
    };
    let mut client = connect(&args.pipe_name, &retry)
        .await
        .with_context(|| format!("Failed to connect to pipe {}", args.pipe_name))?;
    println!("Connected to {}", args.pipe_name);

    let request = ProcessStartInfoRequest::new(&args.app)
        .with_command_line(&args.args)
        .with_current_directory(&args.cwd);
    client.create(&request).await.context("Create failed")?;
    println!("Create: stored {}", args.app);

    let started = client.start_process().await.context("StartProcess failed")?;
    match (started.succeeded, started.process_id) {
        (true, Some(pid)) => println!("StartProcess: pid {} (suspended)", pid),
        _ => {
            let _ = client.terminate_session().await;
            bail!(
                "StartProcess: {}",
                started.error_message.unwrap_or_else(|| "unknown error".into())
            );
        }
    }

    if let Some(path) = &args.library {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        let loaded = client
            .load_library(&LoadLibraryRequest::new(name, path))
            .await
            .context("LoadLibrary failed")?;
        if loaded.succeeded {
            println!("LoadLibrary: {} loaded", path);
        } else {
            eprintln!(
                "LoadLibrary: {}",
                loaded.error_message.unwrap_or_else(|| "unknown error".into())
            );
        }
    }

    let resumed = client
        .resume_main_thread()
        .await
        .context("ResumeMainThread failed")?;
    if resumed.succeeded {
        println!("ResumeMainThread: running");
    } else {
        eprintln!(
            "ResumeMainThread: {}",
            resumed.error_message.unwrap_or_else(|| "unknown error".into())
        );
    }

    client.terminate_session().await?;
    println!("Session terminated");
    Ok(())
}
