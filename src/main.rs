use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use netlimit::backends::elevation::{detect_elevators, select_elevator};
use netlimit::backends::shaping::{detect_backends, select_backend};
use netlimit::config::Config;
use netlimit::helper::{self, HelperOptions};
use netlimit::limit::{Rate, ShapingLimit, parse_rate};
use netlimit::session::SessionState;
use netlimit::ui::{self, AppState, UiAction};
use netlimit::Controller;

/// NetLimit - A TUI bandwidth limiter for the whole machine
#[derive(Parser, Debug)]
#[command(name = "netlimit")]
#[command(version)]
#[command(about = "Cap download and upload bandwidth for the whole machine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Shaping backend to use (dummynet, tc)
    #[arg(long, value_name = "BACKEND")]
    backend: Option<String>,

    /// Privilege elevation mechanism (osascript, pkexec, direct)
    #[arg(long, value_name = "ELEVATOR")]
    elevator: Option<String>,

    /// Network interface for the tc backend
    #[arg(long, value_name = "IFACE")]
    interface: Option<String>,

    /// List all available backends and exit
    #[arg(long)]
    list_backends: bool,

    /// Ask the helper to confirm each applied update
    #[arg(long)]
    acknowledge: bool,

    /// Don't remember the edited limit on exit
    #[arg(long)]
    no_save: bool,

    // CLI mode arguments
    /// One limit for both directions (CLI mode - skips TUI), e.g. "10M"
    #[arg(long, value_name = "RATE", conflicts_with_all = ["download", "upload"])]
    limit: Option<String>,

    /// Download limit (e.g., "512K", "10M", "1.5M") - requires --upload
    #[arg(long, value_name = "RATE", requires = "upload")]
    download: Option<String>,

    /// Upload limit (e.g., "512K", "10M", "1.5M") - requires --download
    #[arg(long, value_name = "RATE", requires = "download")]
    upload: Option<String>,

    /// Duration to keep the limit in seconds (default: until Ctrl+C)
    #[arg(long, value_name = "SECONDS")]
    duration: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Privileged shaping helper (launched elevated by netlimit itself)
    #[command(hide = true)]
    Helper(HelperArgs),
}

#[derive(clap::Args, Debug)]
struct HelperArgs {
    #[arg(long)]
    channel: PathBuf,

    #[arg(long)]
    marker: PathBuf,

    #[arg(long)]
    backend: String,

    #[arg(long)]
    download_kbps: u64,

    #[arg(long)]
    upload_kbps: Option<u64>,

    #[arg(long)]
    interface: Option<String>,

    #[arg(long, default_value_t = 200)]
    poll_ms: u64,

    #[arg(long)]
    ack: Option<PathBuf>,

    /// Only accept commands written by this uid
    #[arg(long)]
    owner_uid: Option<u32>,
}

impl Args {
    fn is_cli_mode(&self) -> bool {
        self.limit.is_some() || self.download.is_some()
    }
}

fn init_logging(always: bool) {
    if always {
        pretty_env_logger::formatted_builder()
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .init();
    } else if std::env::var("RUST_LOG").is_ok() {
        // TUI mode: only when asked, logging would corrupt the screen
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    }
}

fn print_available_backends() {
    println!("NetLimit v{} - Available Backends\n", env!("CARGO_PKG_VERSION"));

    println!("Shaping Backends:");
    let backends = detect_backends();
    if backends.is_empty() {
        println!("  (none compiled in)");
    } else {
        for backend in backends {
            let status = if backend.available {
                "✅ available"
            } else {
                "❌ unavailable"
            };
            println!(
                "  {:20} [priority: {:?}] {}",
                backend.name, backend.priority, status
            );
        }
    }

    println!();

    println!("Privilege Elevation:");
    for elevator in detect_elevators() {
        let status = if elevator.available {
            "✅ available"
        } else {
            "❌ unavailable"
        };
        println!(
            "  {:20} [priority: {:?}] {}",
            elevator.name, elevator.priority, status
        );
    }

    println!();
    println!("Usage:");
    println!("  TUI Mode:");
    println!("    netlimit [--backend <name>] [--elevator <name>]");
    println!();
    println!("  CLI Mode:");
    println!(
        "    netlimit --limit <RATE> | --download <RATE> --upload <RATE> [--duration <SECONDS>]"
    );
    println!("    Examples:");
    println!("      netlimit --limit 10M");
    println!("      netlimit --download 10M --upload 5M --duration 60");
}

/// Run the elevated helper until it is told to exit
async fn run_helper(args: HelperArgs) -> Result<()> {
    let limit = ShapingLimit::from_kbps(args.download_kbps, args.upload_kbps)
        .context("Invalid limit passed to helper")?;

    let options = HelperOptions {
        channel: args.channel,
        marker: args.marker,
        ack: args.ack,
        backend: args.backend,
        interface: args.interface,
        limit,
        poll_interval: Duration::from_millis(args.poll_ms.max(1)),
        owner_uid: args.owner_uid,
    };

    tokio::task::spawn_blocking(move || helper::run_privileged(options))
        .await
        .context("Helper thread panicked")?
}

fn build_controller(config: &Config) -> Result<Controller> {
    let backend = select_backend(
        config.preferred_backend.as_deref(),
        config.interface.as_deref(),
    )
    .context("No shaping backend available (need dnctl/pfctl on macOS or tc on Linux)")?;

    let elevator = select_elevator(config.preferred_elevator.as_deref())
        .context("No way to run the helper with administrator privileges")?;

    Ok(Controller::new(config.session(), backend, elevator)
        .with_timing(config.timing())
        .with_acknowledgements(config.acknowledge))
}

fn cli_limit(args: &Args) -> Result<ShapingLimit> {
    match (&args.limit, &args.download, &args.upload) {
        (Some(limit), _, _) => Ok(ShapingLimit::Single(Rate::new(parse_rate(limit)?)?)),
        (None, Some(download), Some(upload)) => Ok(ShapingLimit::from_kbps(
            parse_rate(download)?,
            Some(parse_rate(upload)?),
        )?),
        _ => Err(anyhow::anyhow!(
            "Use --limit <RATE>, or --download <RATE> together with --upload <RATE>"
        )),
    }
}

/// Run CLI mode - apply limit and wait
async fn run_cli_mode(args: &Args, mut controller: Controller) -> Result<()> {
    use tokio::signal;

    let limit = cli_limit(args)?;

    println!("NetLimit v{} - CLI Mode", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Limit:    {}", limit);
    println!("  Backend:  {}", controller.backend_name());
    println!("  Elevator: {}", controller.elevator_name());
    if let Some(dur) = args.duration {
        println!("  Duration: {} seconds", dur);
    } else {
        println!("  Duration: Until Ctrl+C");
    }
    println!();

    controller
        .enable(limit)
        .await
        .context("Failed to start limiting")?;
    match controller.helper_pid() {
        Some(pid) => println!("✅ Limit applied (helper pid {})", pid),
        None => println!("✅ Limit applied"),
    }
    println!();

    // Wait for duration or Ctrl+C
    if let Some(duration) = args.duration {
        println!(
            "Running for {} seconds... (Press Ctrl+C to stop early)",
            duration
        );
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(duration)) => {
                println!("\nDuration elapsed, removing limit...");
            }
            _ = signal::ctrl_c() => {
                println!("\nReceived Ctrl+C, removing limit...");
            }
        }
    } else {
        println!("Press Ctrl+C to stop and remove the limit...");
        signal::ctrl_c().await?;
        println!("\nReceived Ctrl+C, removing limit...");
    }

    controller.shutdown().await;
    match controller.last_error() {
        Some(error) => println!("⚠️  Limit removal may be incomplete: {}", error),
        None => println!("✅ Limit removed"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let mut args = Args::parse();

    if let Some(Commands::Helper(helper_args)) = args.command.take() {
        init_logging(true);
        return run_helper(helper_args).await;
    }

    init_logging(args.is_cli_mode());

    // Handle --list-backends
    if args.list_backends {
        print_available_backends();
        return Ok(());
    }

    // Stored settings, overridden by flags
    let mut config = Config::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    });
    if args.backend.is_some() {
        config.preferred_backend = args.backend.clone();
    }
    if args.elevator.is_some() {
        config.preferred_elevator = args.elevator.clone();
    }
    if args.interface.is_some() {
        config.interface = args.interface.clone();
    }
    config.acknowledge |= args.acknowledge;

    let controller = build_controller(&config)?;

    // Handle CLI mode (--limit or --download/--upload specified)
    if args.is_cli_mode() {
        return run_cli_mode(&args, controller).await;
    }

    run_tui(controller, &mut config, !args.no_save).await
}

async fn run_tui(mut controller: Controller, config: &mut Config, save: bool) -> Result<()> {
    // Setup terminal for TUI mode
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // The stored limit only pre-fills the editor
    let mut app = AppState::new(config.limit());

    let res = run_app(&mut terminal, &mut app, &mut controller).await;

    // Always leave the machine unshaped on exit
    controller.shutdown().await;

    if save {
        config.set_limit(&app.edited_limit());
        if let Err(e) = config.save() {
            log::warn!("Failed to save config: {}", e);
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        log::error!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    controller: &mut Controller,
) -> Result<()> {
    loop {
        // Apply readiness results from the background wait
        if controller.process_events() > 0 {
            app.status_message = if controller.is_enabled() {
                "Limiting active".to_string()
            } else {
                format!(
                    "Could not turn limiting on: {}",
                    controller.last_error().unwrap_or("unknown error")
                )
            };
        }
        app.sync_from(controller);

        // Draw UI
        terminal.draw(|f| ui::draw_ui(f, app))?;

        // Handle input with timeout
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match app.handle_key(key) {
            UiAction::Quit => return Ok(()),
            UiAction::Toggle(limit) => match controller.state() {
                SessionState::Active | SessionState::Starting => {
                    controller.disable();
                    app.status_message = "Limiting turned off".to_string();
                }
                SessionState::Disabled | SessionState::Stopping => {
                    match controller.begin_enable(limit) {
                        Ok(_) => {
                            app.status_message = format!(
                                "Requesting administrator privileges via {}...",
                                controller.elevator_name()
                            );
                        }
                        Err(e) => app.status_message = e.to_string(),
                    }
                }
            },
            UiAction::Apply(limit) => match controller.update_limit(limit) {
                Ok(()) => app.status_message = format!("Applied {}", limit),
                Err(e) => app.status_message = e.to_string(),
            },
            UiAction::None => {}
        }
    }
}
