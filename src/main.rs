//! Conterm runner
//!
//! Starts a program on a pseudoterminal, optionally types some lines into it,
//! runs the session until the child exits or the timeout passes, and prints
//! the final screen.

mod config;

use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use config::{CliArgs, Config};
use conterm_core::{
    AttributeResolver, Console, DrainReason, FontMetrics, GridCalculator, GridSnapshot,
    InputEvent, Key, LifecycleState, PlainGrid, PumpStatus, ResizeCoordinator,
};
use conterm_pty::{Session, WindowSize};
use serde::Serialize;

/// Sleep between pumps when the session is idle
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Serialize)]
struct Report {
    ended: Option<DrainReason>,
    timed_out: bool,
    screen: GridSnapshot,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = CliArgs::parse();

    let config = match Config::load_with_args(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("Palette: {}", config.palette);
    log::debug!("Font: {}px", config.font.size);

    let mut console = match start_console(&config) {
        Ok(console) => console,
        Err(e) => {
            log::error!("Failed to start session: {}", e);
            eprintln!("Failed to start session: {}", e);
            std::process::exit(1);
        }
    };

    if let Some((width, height)) = config.surface {
        console.handle_event(InputEvent::Resized { width, height })?;
    }
    let typed = args.send_lines.iter().flat_map(|line| {
        InputEvent::text(line).chain(std::iter::once(InputEvent::key(Key::Enter)))
    });
    for event in typed {
        if console.state() != LifecycleState::Running {
            log::warn!("Session ended before all input was sent");
            break;
        }
        console.handle_event(event)?;
    }

    let timed_out = run(&mut console, config.timeout())?;
    if timed_out {
        log::info!("Timed out after {:?}; closing session", config.timeout());
        console.handle_event(InputEvent::Quit)?;
    }

    let report = Report {
        ended: console.drain_reason().cloned(),
        timed_out,
        screen: console.engine().snapshot(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.screen.to_text());
    }
    Ok(())
}

fn start_console(config: &Config) -> Result<Console<PlainGrid>, Box<dyn Error>> {
    let metrics = FontMetrics::monospace(
        config.font.size,
        config.font.advance_ratio,
        config.font.line_spacing,
    )?;
    let resizer =
        ResizeCoordinator::new(GridCalculator::new(metrics).with_padding_rows(config.padding_rows));

    let grid = config.grid();
    let (width, height) = resizer.surface_for(grid);
    let size = WindowSize::with_pixels(
        grid.cols,
        grid.rows,
        u16::try_from(width).unwrap_or(u16::MAX),
        u16::try_from(height).unwrap_or(u16::MAX),
    );
    let session = Session::spawn(&config.command(), size)?;

    let engine = PlainGrid::with_scrollback(grid.rows, grid.cols, config.scrollback_lines);
    let mut console = Console::new(engine, resizer, AttributeResolver::named(config.palette));
    console.start(session)?;
    Ok(console)
}

/// Pump until the session ends. Returns `true` if `timeout` passed first.
fn run(console: &mut Console<PlainGrid>, timeout: Duration) -> Result<bool, Box<dyn Error>> {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Ok(true);
        }
        match console.pump()? {
            PumpStatus::Ended(reason) => {
                log::info!("Session ended: {:?}", reason);
                return Ok(false);
            }
            PumpStatus::Closed => return Ok(false),
            PumpStatus::Data(n) => log::trace!("Fed {} bytes", n),
            PumpStatus::Idle => thread::sleep(FRAME_INTERVAL),
        }
    }
}
