use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;

use dx_ghost::protocol::{StatusResponse, DEFAULT_STATUS_PORT};
use dx_ghost::{BridgeServer, CliOverrides, Config, ScratchFileProvider};

#[derive(Parser)]
#[command(name = "dx-ghost")]
#[command(about = "Edit browser text areas in your local editor (GhostText protocol)", version)]
#[command(after_help = "Install the GhostText extension in your browser, run `dx-ghost`, then
click the GhostText button next to a text area. Each text area opens as a
scratch file in your editor; closing the file ends the link.

The editor command must block until the file is closed, e.g. `code --wait`
or `gvim -f`.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Serve(ServeArgs),

    /// Ask a running bridge where its socket listener is
    Status {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value_t = DEFAULT_STATUS_PORT)]
        port: u16,
    },
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Config file (default: <config dir>/dx-ghost/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port of the status endpoint the extension probes
    #[arg(long)]
    status_port: Option<u16>,

    /// WebSocket port (0 picks a free one)
    #[arg(long)]
    socket_port: Option<u16>,

    /// Editor command line, e.g. "code --wait"
    #[arg(short, long)]
    editor: Option<String>,

    /// Delay before a local edit is sent to the browser
    #[arg(long, value_name = "MS")]
    settle_delay_ms: Option<u64>,

    /// Where scratch files are created
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl ServeArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            host: self.host.clone(),
            status_port: self.status_port,
            socket_port: self.socket_port,
            editor: self.editor.clone(),
            settle_delay_ms: self.settle_delay_ms,
            scratch_dir: self.scratch_dir.clone(),
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = cli
        .command
        .unwrap_or_else(|| Commands::Serve(ServeArgs::default()));

    match command {
        Commands::Serve(args) => serve(args).await?,
        Commands::Status { host, port } => status(&host, port).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config_path = args.config.clone().or_else(Config::default_path);
    let config = Config::load(config_path.as_deref(), &args.overrides())?;

    let _log_guard = dx_ghost::logging::init(&config.log_level, config.log_dir.as_deref());

    let provider = ScratchFileProvider::new(config.editor.clone())
        .with_scratch_dir(config.scratch_dir.clone())
        .with_extension(config.extension.clone());

    let server = BridgeServer::bind(&config, Arc::new(provider)).await?;

    println!(
        "{}",
        format!("👻 GhostText bridge v{} ready", dx_ghost::VERSION)
            .cyan()
            .bold()
    );
    println!(
        "  {} {}",
        "Status:".yellow(),
        format!("http://{}", server.status_addr()).bright_blue()
    );
    println!(
        "  {} {}",
        "Socket:".yellow(),
        format!("ws://{}", server.socket_addr()).bright_blue()
    );
    println!("  {} {}", "Editor:".yellow(), config.editor.to_string().bright_white());
    println!("\n{}", "Press Ctrl-C to stop".dimmed());

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("{}", "✓ Bridge stopped".green());
    Ok(())
}

async fn status(host: &str, port: u16) -> Result<()> {
    let url = format!("http://{}:{}/", host, port);
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("No bridge answering at {}", url))?
        .error_for_status()?
        .json::<StatusResponse>()
        .await
        .context("Status endpoint returned an unexpected document")?;

    println!("{} Bridge running at {}", "✓".green(), url.bright_blue());
    println!("  Protocol version: {}", response.protocol_version);
    println!("  WebSocket port:   {}", response.web_socket_port);
    Ok(())
}
