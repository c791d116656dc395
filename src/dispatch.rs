//! The Dispatch Loop: poll the Event Queue, decide whether an event starts a
//! reveal, and run that reveal to completion before polling again.
//!
//! An event starts an animation only when all of these hold:
//!
//! | Check | Otherwise |
//! |---|---|
//! | `kind == Notify` and `payload == [0x01]` | [`IgnoreReason::NotTrigger`] |
//! | a preset is selected | [`IgnoreReason::NoPreset`] |
//! | [`BusyPolicy`] accepts it | [`IgnoreReason::ArrivedWhileBusy`] |
//!
//! Ignored events are discarded, never replayed.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, warn};

use crate::context::AppContext;
use crate::image_grid::RevealCanvas;
use crate::protocol::{DEFAULT_BLOCK_ROWS, QUEUE_POLL_TIMEOUT};
use crate::queue::QueueError;
use crate::reveal::{Animator, Pacing, RevealReport, Sleeper, SpinSleeper, Surface};
use crate::types::NotificationEvent;

/// What happens to triggers that arrive while an animation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolicy {
    /// They stay queued and each one runs a full animation afterwards, in
    /// arrival order.
    #[default]
    Queue,
    /// They are discarded when polled.  Only triggers received after the
    /// previous animation finished can start a new one.
    DropWhileBusy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Source rows per reveal block.  Default: 10.
    pub block_rows: usize,
    /// Bounded wait on each queue poll.  Default: 500 ms.
    pub poll_timeout: Duration,
    pub pacing: Pacing,
    pub busy_policy: BusyPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            block_rows: DEFAULT_BLOCK_ROWS,
            poll_timeout: QUEUE_POLL_TIMEOUT,
            pacing: Pacing::Exact,
            busy_policy: BusyPolicy::Queue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Wrong payload (anything but `0x01`).
    NotTrigger,
    /// No preset selected yet.
    NoPreset,
    /// Received during the previous animation under
    /// [`BusyPolicy::DropWhileBusy`].
    ArrivedWhileBusy,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Poll timed out with nothing queued.
    Idle,
    Ignored(IgnoreReason),
    Revealed(RevealReport),
    /// Every producer is gone.  The loop keeps idling at the poll interval.
    QueueClosed,
}

pub struct Dispatcher<S: Sleeper = SpinSleeper> {
    ctx: AppContext,
    canvas: RevealCanvas,
    animator: Animator<S>,
    config: DispatchConfig,
    /// End of the most recent animation, for [`BusyPolicy::DropWhileBusy`].
    last_finished: Option<Instant>,
    closed_logged: bool,
}

impl Dispatcher<SpinSleeper> {
    pub fn new(ctx: AppContext, config: DispatchConfig) -> Self {
        Self::with_sleeper(ctx, config, SpinSleeper::default())
    }
}

impl<S: Sleeper> Dispatcher<S> {
    pub fn with_sleeper(ctx: AppContext, config: DispatchConfig, sleeper: S) -> Self {
        // Idle screen is the whole picture; each reveal starts from blank.
        let mut canvas = RevealCanvas::for_grid(&ctx.grid);
        canvas.copy_all(&ctx.grid);
        let animator = Animator::with_sleeper(config.block_rows, config.pacing, sleeper);
        Self {
            ctx,
            canvas,
            animator,
            config,
            last_finished: None,
            closed_logged: false,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AppContext {
        &mut self.ctx
    }

    pub fn into_context(self) -> AppContext {
        self.ctx
    }

    /// The canvas as of the last presented frame, or the full image before
    /// the first reveal.
    pub fn canvas(&self) -> &RevealCanvas {
        &self.canvas
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Poll once (waiting at most `poll_timeout`) and act on what arrived.
    pub fn step(&mut self, surface: &mut dyn Surface) -> Result<StepOutcome> {
        match self.ctx.events().get(self.config.poll_timeout) {
            Ok(Some(event)) => self.handle(event, surface),
            Ok(None) => Ok(StepOutcome::Idle),
            Err(QueueError::Closed) => {
                if !self.closed_logged {
                    warn!("Event queue closed; no more triggers will arrive");
                    self.closed_logged = true;
                }
                self.animator.sleeper_mut().sleep(self.config.poll_timeout);
                Ok(StepOutcome::QueueClosed)
            }
        }
    }

    /// Qualify one event and, if it passes, run the reveal synchronously.
    pub fn handle(
        &mut self,
        event: NotificationEvent,
        surface: &mut dyn Surface,
    ) -> Result<StepOutcome> {
        if !event.is_trigger() {
            debug!("Ignoring non-trigger event {:02x?}", event.payload);
            return Ok(StepOutcome::Ignored(IgnoreReason::NotTrigger));
        }
        let Some(preset) = self.ctx.selection.current().cloned() else {
            debug!("Trigger ignored: no preset selected");
            return Ok(StepOutcome::Ignored(IgnoreReason::NoPreset));
        };
        if self.config.busy_policy == BusyPolicy::DropWhileBusy {
            if let Some(finished) = self.last_finished {
                if event.timestamp < finished {
                    debug!("Trigger ignored: arrived during the previous animation");
                    return Ok(StepOutcome::Ignored(IgnoreReason::ArrivedWhileBusy));
                }
            }
        }

        let report = self
            .animator
            .reveal(&preset, &self.ctx.grid, &mut self.canvas, surface)?;
        self.last_finished = Some(report.finished);
        Ok(StepOutcome::Revealed(report))
    }

    /// Loop over [`Dispatcher::step`] until `after_step` breaks.
    ///
    /// `after_step` runs on the presentation thread between polls; it is
    /// where operator input is applied and idle screens are redrawn.
    pub fn run<T, F>(&mut self, surface: &mut T, mut after_step: F) -> Result<()>
    where
        T: Surface,
        F: FnMut(&mut Self, &mut T, StepOutcome) -> Result<ControlFlow<()>>,
    {
        loop {
            let outcome = self.step(surface)?;
            if after_step(self, surface, outcome)?.is_break() {
                return Ok(());
            }
        }
    }
}
