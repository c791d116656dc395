//! Headless kiosk runner.
//!
//! Usage:
//!   cargo run -- photo.jpg                    # wait for IPAD_SYNC over BLE
//!   cargo run -- photo.jpg --simulate         # built-in trigger source
//!   cargo run -- photo.jpg --preset Seoul     # start with a preset selected
//!
//! Commands (type + Enter):
//!   1..N     select preset N
//!   <label>  select preset by label
//!   t        manual trigger
//!   x        clear selection
//!   q        quit

use std::io::{self, BufRead};
use std::ops::ControlFlow;
use std::sync::mpsc;

use anyhow::Result;
use clap::Parser as _;
use log::{debug, error, info, warn};

use reveal_rs::cli::Options;
use reveal_rs::prelude::*;

/// Logs every frame instead of drawing it.
struct LogSurface;

impl Surface for LogSurface {
    fn present(&mut self, frame: Frame<'_>) -> Result<()> {
        match frame.kind {
            FrameKind::Block { index, total, rows } => debug!(
                "[{}] block {}/{} rows {}..{} ({} of {} rows shown)",
                frame.preset.label,
                index + 1,
                total,
                rows.start,
                rows.end,
                frame.canvas.rows_filled(),
                frame.canvas.height()
            ),
            FrameKind::Final => info!("[{}] full image shown", frame.preset.label),
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug to see every frame and notification payload.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = Options::parse();

    // ── Startup ───────────────────────────────────────────────────────────────
    let ctx = options.start()?;

    info!("Presets:");
    for (i, p) in ctx.registry.iter().enumerate() {
        info!("  {}  {}", i + 1, p.caption());
    }
    match ctx.selection.current() {
        Some(p) => info!("Selected: {}", p.caption()),
        None => info!("No preset selected; triggers are ignored until one is."),
    }
    info!("Commands: <n> | <label> select preset, x clear, t trigger, q quit");

    // ── Stdin command relay ───────────────────────────────────────────────────
    // Lines are read on their own thread so the dispatcher never blocks on
    // stdin; commands are applied between queue polls.
    let (cmd_tx, cmd_rx) = mpsc::channel::<OperatorCommand>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if let Some(cmd) = OperatorCommand::parse(&line) {
                if cmd_tx.send(cmd).is_err() {
                    break;
                }
            }
        }
    });

    // ── Presentation loop ─────────────────────────────────────────────────────
    let mut dispatcher = Dispatcher::new(ctx, options.dispatch_config());
    dispatcher.run(&mut LogSurface, |d, _, outcome| {
        if let StepOutcome::Revealed(report) = &outcome {
            info!(
                "{} ({:.3} ms preset) completed in {:.3} s, {} frames",
                report.preset.label,
                report.preset.latency_ms,
                report.elapsed.as_secs_f64(),
                report.frames
            );
        }

        while let Ok(cmd) = cmd_rx.try_recv() {
            match d.context_mut().apply(&cmd) {
                Ok(CommandOutcome::Quit) => {
                    info!("Quit requested.");
                    return Ok(ControlFlow::Break(()));
                }
                Ok(CommandOutcome::Triggered) => info!("Manual trigger queued"),
                Ok(CommandOutcome::Selected(_) | CommandOutcome::Cleared) => {}
                Err(e) => warn!("{e}"),
            }
        }
        Ok(ControlFlow::Continue(()))
    })?;

    // ── Teardown ──────────────────────────────────────────────────────────────
    let mut ctx = dispatcher.into_context();
    match ctx.shutdown() {
        Ok(Some(stats)) => info!(
            "Listener: {} scans, {} connections, {} notifications",
            stats.scans, stats.connections, stats.forwarded
        ),
        Ok(None) => info!("No listener was running"),
        Err(e) => error!("Listener did not shut down cleanly: {e}"),
    }
    Ok(())
}
