//! Terminal presentation surface for the reveal rig.
//!
//! Usage:
//!   cargo run --bin tui -- photo.jpg               # wait for IPAD_SYNC over BLE
//!   cargo run --bin tui -- photo.jpg --simulate    # built-in trigger source
//!
//! Keys
//! ----
//!   1 … 9    select preset
//!   t        manual trigger
//!   x        clear selection (triggers are ignored)
//!   q / Esc  quit
//!
//! The image is drawn with `▀` half-blocks: each terminal cell shows two
//! pixel rows, the upper one as foreground and the lower one as background.

use std::io::{self, Stdout};
use std::ops::ControlFlow;
use std::time::Duration;

use anyhow::Result;
use clap::Parser as _;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::warn;
use ratatui::{
    backend::CrosstermBackend,
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Widget},
    Frame, Terminal,
};

use reveal_rs::cli::Options;
use reveal_rs::prelude::*;
use reveal_rs::reveal::Frame as RevealFrame;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Width of the preset sidebar in columns.
const SIDEBAR_W: u16 = 30;

/// Dim grey for rows that have not been revealed yet.
const UNREVEALED: Color = Color::Rgb(16, 16, 16);

// ── View state ────────────────────────────────────────────────────────────────

/// What the header, sidebar and footer show.  The canvas itself lives in the
/// dispatcher and is passed in on every draw.
struct View {
    source: String,
    presets: Vec<String>,
    selected: Option<usize>,
    /// `Some((index, total))` while an animation is running.
    progress: Option<(usize, usize)>,
    last_run: Option<String>,
    last_note: Option<String>,
    runs: u64,
}

impl View {
    fn new(ctx: &AppContext, simulate: bool) -> Self {
        let mut view = Self {
            source: if simulate {
                "◆ Simulated".to_owned()
            } else {
                format!("● Listening for {TARGET_NAME}")
            },
            presets: ctx.registry.iter().map(Preset::caption).collect(),
            selected: None,
            progress: None,
            last_run: None,
            last_note: None,
            runs: 0,
        };
        view.sync_selection(ctx);
        view
    }

    fn sync_selection(&mut self, ctx: &AppContext) {
        self.selected = ctx
            .selection
            .current()
            .and_then(|p| ctx.registry.iter().position(|q| q == p));
    }
}

/// A [`Surface`] that owns the terminal.
struct TuiSurface {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    view: View,
}

impl TuiSurface {
    fn redraw(&mut self, canvas: &RevealCanvas) -> Result<()> {
        let view = &self.view;
        self.terminal.draw(|f| draw(f, view, canvas))?;
        Ok(())
    }
}

impl Surface for TuiSurface {
    fn present(&mut self, frame: RevealFrame<'_>) -> Result<()> {
        self.view.progress = match frame.kind {
            FrameKind::Block { index, total, .. } => Some((*index + 1, *total)),
            FrameKind::Final => None,
        };
        self.redraw(frame.canvas)
    }
}

// ── Canvas widget ─────────────────────────────────────────────────────────────

/// Renders a [`RevealCanvas`] scaled to fit, centred, aspect preserved.
struct CanvasView<'a> {
    canvas: &'a RevealCanvas,
}

impl Widget for CanvasView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (w, h) = (self.canvas.width(), self.canvas.height());
        if w == 0 || h == 0 || area.width == 0 || area.height == 0 {
            return;
        }
        // Source pixels per output pixel; one cell is 1 px wide, 2 px tall.
        let scale = (w as f64 / area.width as f64)
            .max(h as f64 / (area.height as f64 * 2.0))
            .max(1.0);
        let out_w = ((w as f64 / scale) as u16).clamp(1, area.width);
        let out_rows = ((h as f64 / scale) as usize).max(1);
        let out_h = (out_rows.div_ceil(2) as u16).min(area.height);
        let x0 = area.x + (area.width - out_w) / 2;
        let y0 = area.y + (area.height - out_h) / 2;
        let filled = self.canvas.rows_filled();

        let sample = |ox: u16, oy: usize| -> Color {
            let sx = ((ox as f64 * scale) as usize).min(w - 1);
            let sy = ((oy as f64 * scale) as usize).min(h - 1);
            if sy >= filled {
                return UNREVEALED;
            }
            let [r, g, b] = self.canvas.pixel(sx, sy);
            Color::Rgb(r, g, b)
        };

        for cy in 0..out_h {
            for cx in 0..out_w {
                let top = cy as usize * 2;
                let fg = sample(cx, top);
                let bg = if top + 1 < out_rows {
                    sample(cx, top + 1)
                } else {
                    Color::Reset
                };
                buf[(x0 + cx, y0 + cy)]
                    .set_char('▀')
                    .set_fg(fg)
                    .set_bg(bg);
            }
        }
    }
}

// ── Layout ────────────────────────────────────────────────────────────────────

fn draw(frame: &mut Frame, view: &View, canvas: &RevealCanvas) {
    let root = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .split(frame.area());
    let body = Layout::horizontal([Constraint::Length(SIDEBAR_W), Constraint::Min(0)])
        .split(root[1]);

    draw_header(frame, root[0], view);
    draw_presets(frame, body[0], view);

    let image_block = Block::default().borders(Borders::ALL).title(" Image ");
    let inner = image_block.inner(body[1]);
    frame.render_widget(image_block, body[1]);
    frame.render_widget(CanvasView { canvas }, inner);

    draw_footer(frame, root[2], view);
}

fn draw_header(frame: &mut Frame, area: Rect, view: &View) {
    let (state, color) = match view.progress {
        Some((i, n)) => (format!("▶ Revealing {i}/{n}"), Color::Green),
        None => ("Waiting for trigger".to_owned(), Color::Yellow),
    };
    let selected = view
        .selected
        .and_then(|i| view.presets.get(i))
        .cloned()
        .unwrap_or_else(|| "no preset".into());

    let line = Line::from(vec![
        Span::styled(
            " NCC Latency Reveal ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(view.source.as_str(), Style::default().fg(Color::Cyan)),
        sep(),
        Span::styled(state, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(selected, Style::default().fg(Color::LightBlue)),
        sep(),
        Span::styled(
            format!("{} runs", view.runs),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn draw_presets(frame: &mut Frame, area: Rect, view: &View) {
    let items: Vec<ListItem> = view
        .presets
        .iter()
        .enumerate()
        .map(|(i, caption)| {
            let active = view.selected == Some(i);
            let style = if active {
                Style::default().fg(Color::Black).bg(Color::Green)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(Line::from(vec![
                key_label(i),
                Span::styled(format!(" {caption} "), style),
            ]))
        })
        .collect();
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title(" Presets ")),
        area,
    );
}

fn draw_footer(frame: &mut Frame, area: Rect, view: &View) {
    let keys = Line::from(vec![
        Span::raw(" "),
        key("[1-9]"),
        Span::raw("Preset  "),
        key("[t]"),
        Span::raw("Trigger  "),
        key("[x]"),
        Span::raw("Clear  "),
        key("[q]"),
        Span::raw("Quit"),
    ]);
    let status = match (&view.last_note, &view.last_run) {
        (Some(note), _) => Line::from(Span::styled(
            format!(" {note}"),
            Style::default().fg(Color::Yellow),
        )),
        (None, Some(run)) => Line::from(Span::styled(
            format!(" {run}"),
            Style::default().fg(Color::Green),
        )),
        (None, None) => Line::from(Span::styled(
            " Select a preset, then trigger from the iPad.",
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(
        Paragraph::new(vec![keys, status]).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

#[inline]
fn key(s: &str) -> Span<'_> {
    Span::styled(
        s,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

fn key_label<'a>(index: usize) -> Span<'a> {
    let label = if index < 9 {
        format!(" [{}]", index + 1)
    } else {
        "    ".to_owned()
    };
    Span::styled(
        label,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

// ── Input ─────────────────────────────────────────────────────────────────────

/// Drain pending key presses without blocking.
fn read_commands() -> Result<Vec<OperatorCommand>> {
    let mut out = vec![];
    while event::poll(Duration::ZERO)? {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        // In raw mode Ctrl+C arrives as a key event, not SIGINT.
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        let cmd = match key.code {
            _ if ctrl_c => Some(OperatorCommand::Quit),
            KeyCode::Char('q') | KeyCode::Esc => Some(OperatorCommand::Quit),
            KeyCode::Char('t') => Some(OperatorCommand::ManualTrigger),
            KeyCode::Char('x') => Some(OperatorCommand::ClearSelection),
            KeyCode::Char(c @ '1'..='9') => {
                Some(OperatorCommand::SelectIndex(c as usize - '1' as usize))
            }
            _ => None,
        };
        if let Some(cmd) = cmd {
            out.push(cmd);
        }
    }
    Ok(out)
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    use std::io::IsTerminal as _;
    if !io::stdout().is_terminal() {
        eprintln!("Error: reveal-rs tui requires a real terminal (TTY).");
        eprintln!("Use the headless `reveal-rs` binary when piping or redirecting.");
        std::process::exit(1);
    }

    // ── Logging ─────────────────────────────────────────────────────────────
    // Logs go to reveal-tui.log so they never interfere with the display.
    //   RUST_LOG=debug cargo run --bin tui -- photo.jpg
    {
        use std::fs::File;
        if let Ok(file) = File::create("reveal-tui.log") {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
    }

    let options = Options::parse();

    // Load everything before touching the terminal so errors stay readable.
    let ctx = options.start()?;
    let view = View::new(&ctx, options.simulate);

    // ── Terminal setup ────────────────────────────────────────────────────────
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    let mut surface = TuiSurface { terminal, view };

    let mut dispatcher = Dispatcher::new(ctx, options.dispatch_config());
    surface.redraw(dispatcher.canvas())?;

    // ── Main loop ─────────────────────────────────────────────────────────────
    let result = dispatcher.run(&mut surface, |d, surface, outcome| {
        match outcome {
            StepOutcome::Revealed(report) => {
                surface.view.runs += 1;
                surface.view.last_note = None;
                surface.view.last_run = Some(format!(
                    "{} completed in {:.3} s ({} frames)",
                    report.preset.caption(),
                    report.elapsed.as_secs_f64(),
                    report.frames
                ));
            }
            StepOutcome::Ignored(IgnoreReason::NoPreset) => {
                surface.view.last_note = Some("Trigger ignored: select a preset first".into());
            }
            StepOutcome::Ignored(IgnoreReason::ArrivedWhileBusy) => {
                surface.view.last_note = Some("Trigger ignored: arrived mid-animation".into());
            }
            StepOutcome::QueueClosed => {
                surface.view.last_note = Some("Listener gone; no more triggers".into());
            }
            StepOutcome::Ignored(IgnoreReason::NotTrigger) | StepOutcome::Idle => {}
        }

        for cmd in read_commands()? {
            match d.context_mut().apply(&cmd) {
                Ok(CommandOutcome::Quit) => return Ok(ControlFlow::Break(())),
                Ok(CommandOutcome::Selected(_) | CommandOutcome::Cleared) => {
                    surface.view.last_note = None;
                    surface.view.sync_selection(d.context());
                }
                Ok(CommandOutcome::Triggered) => {}
                Err(e) => {
                    warn!("{e}");
                    surface.view.last_note = Some(e.to_string());
                }
            }
        }

        surface.redraw(d.canvas())?;
        Ok(ControlFlow::Continue(()))
    });

    // ── Teardown ──────────────────────────────────────────────────────────────
    disable_raw_mode()?;
    execute!(surface.terminal.backend_mut(), LeaveAlternateScreen)?;
    surface.terminal.show_cursor()?;
    if let Err(e) = dispatcher.into_context().shutdown() {
        warn!("{e}");
    }
    result
}
