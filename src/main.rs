//! # droidclaw
//!
//! Drive an Android device over adb toward a natural-language objective.
//!
//! Usage:
//!   droidclaw "Turn off Wi-Fi"
//!   droidclaw run --serial emulator-5554 "Open the clock app and start a 5 minute timer"
//!   droidclaw run                       (interactive prompt)
//!   droidclaw devices
//!   droidclaw screenshot -o screen.png --grid
//!   droidclaw mcp                       (MCP server on stdio)

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use droidclaw::agent_engine::engine::AgentEngine;
use droidclaw::agent_engine::state::SessionOutcome;
use droidclaw::config::{self, AppConfig};
use droidclaw::errors::DroidClawResult;
use droidclaw::executor::adb::AdbDevice;
use droidclaw::executor::backend::DeviceBackend;
use droidclaw::llm::registry::ProviderRegistry;
use droidclaw::mcp::server::{serve_stdio, McpServer};
use droidclaw::perception::screenshot::{encode_png, Screenshot};
use droidclaw::perception::som_grid::{overlay, GridSpec};

#[derive(Parser)]
#[command(name = "droidclaw")]
#[command(author, version, about = "DroidClaw - LLM-driven Android automation over adb")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Objective to run (shorthand for `run`)
    #[arg(trailing_var_arg = true)]
    objective: Vec<String>,

    /// Path to config.toml (default: next to the executable, then the working directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// adb serial of the device to drive
    #[arg(short, long, global = true)]
    serial: Option<String>,

    /// Model name for the active provider (overrides MODEL)
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[arg(long, global = true)]
    max_iterations: Option<u32>,

    /// Screenshots kept in the model context
    #[arg(long, global = true)]
    max_images: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an objective, or start an interactive prompt when none is given
    Run {
        #[arg(trailing_var_arg = true)]
        objective: Vec<String>,
    },
    /// List connected devices
    Devices,
    /// Save the current screen as PNG
    Screenshot {
        #[arg(short, long, default_value = "screenshot.png")]
        output: PathBuf,

        /// Save the downscaled, gridded image the model would see
        #[arg(long)]
        grid: bool,
    },
    /// Serve the device tools to an MCP client over stdio
    Mcp,
}

fn build_config(cli: &Cli) -> DroidClawResult<AppConfig> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    if let Ok(model) = std::env::var("MODEL") {
        if !model.is_empty() {
            cfg.set_model(&model)?;
        }
    }
    if let Some(model) = &cli.model {
        cfg.set_model(model)?;
    }
    if let Some(serial) = &cli.serial {
        cfg.device.serial = Some(serial.clone());
    }
    if let Some(n) = cli.max_iterations {
        cfg.agent.max_iterations = n;
    }
    if let Some(n) = cli.max_images {
        cfg.agent.max_images = n;
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn run_objectives(cfg: AppConfig, objective: Vec<String>) -> DroidClawResult<ExitCode> {
    let cfg = Arc::new(cfg);
    let registry = ProviderRegistry::from_config(&cfg);
    let (provider, call_cfg) = registry.active()?;
    let device: Arc<dyn DeviceBackend> = Arc::new(AdbDevice::from_config(&cfg.device));

    match device.screen_size().await {
        Ok((w, h)) => tracing::info!(width = w, height = h, "device screen size"),
        Err(e) => tracing::warn!(error = %e, "could not query screen size"),
    }

    let engine = AgentEngine::new(cfg, device, provider, call_cfg)?;

    if !objective.is_empty() {
        let report = engine.run(&objective.join(" ")).await?;
        println!("{}", report.outcome);
        return Ok(match report.outcome {
            SessionOutcome::Completed { .. } => ExitCode::SUCCESS,
            _ => ExitCode::from(2),
        });
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("objective> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }
        match engine.run(line).await {
            Ok(report) => println!("{} ({} iterations)", report.outcome, report.iterations),
            Err(e) => {
                tracing::error!(error = %e, "session aborted");
                println!("session aborted: {e}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn list_devices(cfg: &AppConfig) -> DroidClawResult<ExitCode> {
    let device = AdbDevice::from_config(&cfg.device);
    let serials = device.list_devices().await?;
    if serials.is_empty() {
        println!("no devices ready");
        return Ok(ExitCode::FAILURE);
    }
    for serial in serials {
        println!("{serial}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn save_screenshot(cfg: &AppConfig, output: PathBuf, grid: bool) -> DroidClawResult<ExitCode> {
    let device = AdbDevice::from_config(&cfg.device);
    let bytes = device.capture_screen().await?;
    let shot = Screenshot::from_bytes(&bytes)?;
    let png = if grid {
        let scaled = shot.downscaled(cfg.grid.max_edge);
        let spec = GridSpec::for_image(scaled.width(), scaled.height(), cfg.grid.cell_size);
        encode_png(&overlay(&scaled, spec))?
    } else {
        bytes
    };
    std::fs::write(&output, png)?;
    println!("{}x{} screenshot saved to {}", shot.width(), shot.height(), output.display());
    Ok(ExitCode::SUCCESS)
}

async fn run_mcp(cfg: AppConfig) -> DroidClawResult<ExitCode> {
    let device: Arc<dyn DeviceBackend> = Arc::new(AdbDevice::from_config(&cfg.device));
    let server = McpServer::new(Arc::new(cfg), device)?;
    serve_stdio(&server).await?;
    Ok(ExitCode::SUCCESS)
}

async fn dispatch(cli: Cli) -> DroidClawResult<ExitCode> {
    let cfg = build_config(&cli)?;
    match cli.command {
        Some(Commands::Run { objective }) => run_objectives(cfg, objective).await,
        Some(Commands::Devices) => list_devices(&cfg).await,
        Some(Commands::Screenshot { output, grid }) => save_screenshot(&cfg, output, grid).await,
        Some(Commands::Mcp) => run_mcp(cfg).await,
        None => run_objectives(cfg, cli.objective).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    droidclaw::init_tracing();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
