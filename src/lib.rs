//! # reveal-rs
//!
//! A latency demo rig.  An iPad advertising as `IPAD_SYNC` sends a one-byte
//! BLE notification; the rig then reveals a still image top to bottom in
//! row-blocks, paced so the whole reveal takes exactly the network latency
//! of the selected preset.  Switching presets lets an audience *see* the
//! difference between e.g. 128 ms and 270 ms.
//!
//! ```text
//!  ┌──────────────┐  put   ┌─────────────┐  get(500 ms)  ┌────────────┐
//!  │ listener     │ ─────► │ Event Queue │ ────────────► │ Dispatcher │ ─► Surface
//!  │ (BLE thread) │        └─────────────┘               │ (main)     │
//!  └──────────────┘                                      └────────────┘
//! ```
//!
//! The listener never touches presentation state; the dispatcher never
//! touches BLE.  The queue is the only thing they share.
//!
//! ## Quick start
//!
//! ```no_run
//! use reveal_rs::prelude::*;
//!
//! struct Quiet;
//! impl Surface for Quiet {
//!     fn present(&mut self, _frame: Frame<'_>) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let grid = ImageGrid::open("photo.jpg".as_ref(), MAX_IMAGE_HEIGHT)?;
//!     let mut ctx = AppContext::new(grid, PresetRegistry::builtin());
//!     ctx.apply(&OperatorCommand::SelectLabel("Seoul".into()))?;
//!     ctx.start_listener(BtleCentral::new(), ListenerConfig::default())?;
//!
//!     let mut dispatcher = Dispatcher::new(ctx, DispatchConfig::default());
//!     dispatcher.run(&mut Quiet, |_, _, _| Ok(std::ops::ControlFlow::Continue(())))
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`protocol`] | Trigger UUIDs, device name, payload and timing constants |
//! | [`types`] | Notification events, listener states, operator commands |
//! | [`queue`] | The Event Queue between listener and dispatcher |
//! | [`presets`] | Latency preset table and the current selection |
//! | [`image_grid`] | Decoded source image and the partially revealed canvas |
//! | [`reveal`] | Block plan, pacing, and the animation itself |
//! | [`dispatch`] | Qualifies queued events and runs reveals one at a time |
//! | [`central`] | BLE scan / connect / subscribe via `btleplug` |
//! | [`listener`] | Reconnect loop that feeds the queue from a [`central::NotificationCentral`] |
//! | [`simulator`] | Software notification source for running without an iPad |
//! | [`context`] | Process-wide state shared by the binaries |
//! | [`cli`] | Command-line options and startup for both binaries |

pub mod central;
pub mod cli;
pub mod context;
pub mod dispatch;
pub mod image_grid;
pub mod listener;
pub mod presets;
pub mod protocol;
pub mod queue;
pub mod reveal;
pub mod simulator;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for the binaries and downstream crates.
pub mod prelude {
    // ── Listener side ─────────────────────────────────────────────────────────
    pub use crate::central::{BtleCentral, NotificationCentral, Subscription};
    pub use crate::listener::{stop_signal, ListenerConfig, ListenerStats, StopHandle};
    pub use crate::simulator::SimulatedCentral;

    // ── Presentation side ─────────────────────────────────────────────────────
    pub use crate::context::{AppContext, CommandOutcome};
    pub use crate::dispatch::{BusyPolicy, DispatchConfig, Dispatcher, IgnoreReason, StepOutcome};
    pub use crate::image_grid::{ImageGrid, RevealCanvas};
    pub use crate::presets::{Preset, PresetRegistry};
    pub use crate::reveal::{Frame, FrameKind, Pacing, RevealReport, Surface};

    // ── Events ────────────────────────────────────────────────────────────────
    pub use crate::types::{ListenerState, NotificationEvent, OperatorCommand};

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{MAX_IMAGE_HEIGHT, TARGET_NAME, TRIGGER_PAYLOAD};
}
