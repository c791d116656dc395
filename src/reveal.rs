//! The progressive block-reveal animation.
//!
//! A run paints the source [`ImageGrid`] onto a blank [`RevealCanvas`] one
//! row-block at a time, presenting a frame after every block and pacing the
//! blocks so the whole run lasts the selected preset's latency:
//!
//! ```text
//! num_blocks      = ceil(H / B)
//! per_block_delay = (latency_ms / 1000) / num_blocks
//! ```
//!
//! After the last block one extra frame of the full image is presented.
//! A run is never interrupted; whoever calls [`Animator::reveal`] is blocked
//! until the final frame is out.

use std::ops::Range;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info};

use crate::image_grid::{ImageGrid, RevealCanvas};
use crate::presets::Preset;
use crate::protocol::DEFAULT_BLOCK_ROWS;

// ── Plan ──────────────────────────────────────────────────────────────────────

/// Block geometry and timing for one run.
///
/// ```
/// # use reveal_rs::reveal::RevealPlan;
/// # use std::time::Duration;
/// let plan = RevealPlan::new(800, 10, 500.0);
/// assert_eq!(plan.num_blocks, 80);
/// assert_eq!(plan.per_block_delay, Duration::from_micros(6250));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RevealPlan {
    pub height: usize,
    pub block_rows: usize,
    pub num_blocks: usize,
    pub per_block_delay: Duration,
}

impl RevealPlan {
    /// `block_rows` of `0` is treated as `1`.  Negative or non-finite
    /// latencies are treated as `0` (no pacing).
    pub fn new(height: usize, block_rows: usize, latency_ms: f64) -> Self {
        let block_rows = block_rows.max(1);
        let num_blocks = height.div_ceil(block_rows);
        // Work in whole nanoseconds so e.g. 300 ms / 3 is exactly 100 ms.
        let total_nanos = if latency_ms.is_finite() && latency_ms > 0.0 {
            (latency_ms * 1_000_000.0).round() as u64
        } else {
            0
        };
        let per_block_delay = Duration::from_nanos(total_nanos / num_blocks.max(1) as u64);
        Self {
            height,
            block_rows,
            num_blocks,
            per_block_delay,
        }
    }

    /// Rows covered by block `index`; the last block may be short.
    pub fn block(&self, index: usize) -> Range<usize> {
        let start = (index * self.block_rows).min(self.height);
        let end = (start + self.block_rows).min(self.height);
        start..end
    }

    pub fn blocks(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.num_blocks).map(|i| self.block(i))
    }

    /// Sum of all per-block delays.
    pub fn total_delay(&self) -> Duration {
        self.per_block_delay * self.num_blocks as u32
    }
}

// ── Pacing ────────────────────────────────────────────────────────────────────

/// How the wait after each block is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// Sleep exactly `per_block_delay` after every block.  Rendering time
    /// adds on top, so slow surfaces stretch the run.
    #[default]
    Exact,
    /// Sleep until `start + (i + 1) × per_block_delay`, skipping the wait
    /// entirely when that deadline has already passed.  Keeps the total close
    /// to the preset even when frames are slow to present.
    DriftCorrected,
}

/// Blocking time source used for pacing.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
    fn now(&self) -> Instant;
}

/// Real clock.  Uses `spin_sleep` because per-block delays are a few
/// milliseconds, below the reliable granularity of a plain thread sleep on
/// some platforms.
#[derive(Debug, Default)]
pub struct SpinSleeper {
    inner: spin_sleep::SpinSleeper,
}

impl Sleeper for SpinSleeper {
    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            self.inner.sleep(duration);
        }
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ── Frames & surfaces ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Block `index` (of `total`) was just copied onto the canvas.
    Block {
        index: usize,
        total: usize,
        rows: Range<usize>,
    },
    /// The full-image correction frame that ends every run.
    Final,
}

/// One frame handed to a [`Surface`].
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub kind: &'a FrameKind,
    pub canvas: &'a RevealCanvas,
    pub preset: &'a Preset,
}

/// Anything that can display a pixel grid.  Each call replaces the previous
/// frame.
pub trait Surface {
    fn present(&mut self, frame: Frame<'_>) -> Result<()>;
}

// ── Run ───────────────────────────────────────────────────────────────────────

/// Outcome of one animation, logged by the binaries ("completed in …").
#[derive(Debug, Clone, PartialEq)]
pub struct RevealReport {
    pub preset: Preset,
    pub blocks: usize,
    /// Frames presented, including the final correction frame.
    pub frames: usize,
    /// Time spent inside [`Sleeper::sleep`].
    pub paced: Duration,
    /// Wall time from the first frame to the final frame.
    pub elapsed: Duration,
    pub started: Instant,
    pub finished: Instant,
}

/// Runs reveal animations with a fixed block size and pacing mode.
pub struct Animator<S: Sleeper> {
    block_rows: usize,
    pacing: Pacing,
    sleeper: S,
}

impl Animator<SpinSleeper> {
    pub fn new(block_rows: usize, pacing: Pacing) -> Self {
        Self::with_sleeper(block_rows, pacing, SpinSleeper::default())
    }
}

impl Default for Animator<SpinSleeper> {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_ROWS, Pacing::Exact)
    }
}

impl<S: Sleeper> Animator<S> {
    pub fn with_sleeper(block_rows: usize, pacing: Pacing, sleeper: S) -> Self {
        Self {
            block_rows: block_rows.max(1),
            pacing,
            sleeper,
        }
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn sleeper_mut(&mut self) -> &mut S {
        &mut self.sleeper
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Reveal `grid` on `canvas` over `preset.latency_ms`.
    ///
    /// The canvas is reset first and equals `grid` when this returns `Ok`.
    /// A surface error aborts the run and is returned as-is.
    pub fn reveal(
        &mut self,
        preset: &Preset,
        grid: &ImageGrid,
        canvas: &mut RevealCanvas,
        surface: &mut dyn Surface,
    ) -> Result<RevealReport> {
        let plan = RevealPlan::new(grid.height(), self.block_rows, preset.latency_ms);
        info!(
            "Reveal start: preset={} latency={} ms blocks={} per_block={:?} pacing={:?}",
            preset.label, preset.latency_ms, plan.num_blocks, plan.per_block_delay, self.pacing
        );

        canvas.reset();
        let started = self.sleeper.now();
        let mut frames = 0usize;
        let mut paced = Duration::ZERO;

        for (index, rows) in plan.blocks().enumerate() {
            canvas.copy_rows(grid, rows.clone());
            let kind = FrameKind::Block {
                index,
                total: plan.num_blocks,
                rows,
            };
            surface.present(Frame {
                kind: &kind,
                canvas: &*canvas,
                preset,
            })?;
            frames += 1;

            let wait = match self.pacing {
                Pacing::Exact => plan.per_block_delay,
                Pacing::DriftCorrected => {
                    let deadline = started + plan.per_block_delay * (index as u32 + 1);
                    deadline.saturating_duration_since(self.sleeper.now())
                }
            };
            if !wait.is_zero() {
                self.sleeper.sleep(wait);
                paced += wait;
            }
        }

        // Integer block division can leave nothing uncovered, but the final
        // frame is always the full source image.
        canvas.copy_all(grid);
        surface.present(Frame {
            kind: &FrameKind::Final,
            canvas: &*canvas,
            preset,
        })?;
        frames += 1;

        let finished = self.sleeper.now();
        let elapsed = finished.saturating_duration_since(started);
        info!(
            "Reveal done: preset={} completed in {:.3} s ({frames} frames)",
            preset.label,
            elapsed.as_secs_f64()
        );
        debug!("Reveal paced {paced:?} of {:?} planned", plan.total_delay());

        Ok(RevealReport {
            preset: preset.clone(),
            blocks: plan.num_blocks,
            frames,
            paced,
            elapsed,
            started,
            finished,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::image_grid::tests::gradient;

    /// Virtual clock: `sleep` advances time instantly; every `now()` call
    /// adds `lag` to simulate slow frame presentation.
    pub(crate) struct FakeSleeper {
        now: std::cell::Cell<Instant>,
        pub(crate) lag: Duration,
        pub(crate) sleeps: Vec<Duration>,
    }

    impl FakeSleeper {
        pub(crate) fn new() -> Self {
            Self {
                now: std::cell::Cell::new(Instant::now()),
                lag: Duration::ZERO,
                sleeps: Vec::new(),
            }
        }
    }

    impl Sleeper for FakeSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.sleeps.push(duration);
            self.now.set(self.now.get() + duration);
        }

        fn now(&self) -> Instant {
            let t = self.now.get() + self.lag;
            self.now.set(t);
            t
        }
    }

    /// Records a copy of every presented frame.
    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub(crate) frames: Vec<(FrameKind, Vec<u8>)>,
    }

    impl Surface for RecordingSurface {
        fn present(&mut self, frame: Frame<'_>) -> Result<()> {
            self.frames
                .push((frame.kind.clone(), frame.canvas.pixels().to_vec()));
            Ok(())
        }
    }

    struct NullSurface;

    impl Surface for NullSurface {
        fn present(&mut self, _frame: Frame<'_>) -> Result<()> {
            Ok(())
        }
    }

    struct FailingSurface {
        after: usize,
    }

    impl Surface for FailingSurface {
        fn present(&mut self, _frame: Frame<'_>) -> Result<()> {
            if self.after == 0 {
                anyhow::bail!("display went away");
            }
            self.after -= 1;
            Ok(())
        }
    }

    fn run(
        height: usize,
        block_rows: usize,
        latency_ms: f64,
        pacing: Pacing,
    ) -> (RevealReport, RecordingSurface, FakeSleeper, bool) {
        let grid = gradient(3, height);
        let mut canvas = RevealCanvas::for_grid(&grid);
        let mut surface = RecordingSurface::default();
        let mut animator = Animator::with_sleeper(block_rows, pacing, FakeSleeper::new());
        let report = animator
            .reveal(&Preset::new("test", latency_ms), &grid, &mut canvas, &mut surface)
            .unwrap();
        let matches = canvas.matches(&grid);
        (report, surface, animator.sleeper, matches)
    }

    #[test]
    fn plan_matches_reference_scenario() {
        let plan = RevealPlan::new(800, 10, 500.0);
        assert_eq!(plan.num_blocks, 80);
        assert_eq!(plan.per_block_delay, Duration::from_micros(6250));
        assert_eq!(plan.total_delay(), Duration::from_millis(500));
        assert_eq!(plan.block(79), 790..800);
    }

    #[test]
    fn plan_handles_partial_last_block() {
        let plan = RevealPlan::new(25, 10, 300.0);
        assert_eq!(plan.num_blocks, 3);
        let blocks: Vec<_> = plan.blocks().collect();
        assert_eq!(blocks, vec![0..10, 10..20, 20..25]);
        assert_eq!(plan.per_block_delay, Duration::from_millis(100));
    }

    #[test]
    fn plan_degenerate_inputs() {
        assert_eq!(RevealPlan::new(7, 0, 70.0).num_blocks, 7);
        assert_eq!(RevealPlan::new(0, 10, 500.0).num_blocks, 0);
        assert_eq!(RevealPlan::new(10, 10, -5.0).per_block_delay, Duration::ZERO);
        assert_eq!(RevealPlan::new(10, 10, f64::NAN).per_block_delay, Duration::ZERO);
    }

    #[test]
    fn emits_one_frame_per_block_plus_final() {
        for &(h, b) in &[(800usize, 10usize), (25, 10), (10, 10), (1, 10), (37, 4)] {
            let (report, surface, _, matches) = run(h, b, 500.0, Pacing::Exact);
            let blocks = h.div_ceil(b);
            assert_eq!(report.blocks, blocks);
            assert_eq!(report.frames, blocks + 1, "H={h} B={b}");
            assert_eq!(surface.frames.len(), blocks + 1);
            assert_eq!(surface.frames.last().unwrap().0, FrameKind::Final);
            assert!(matches, "canvas differs from image for H={h} B={b}");
        }
    }

    #[test]
    fn exact_pacing_sums_to_latency() {
        let (report, _, sleeper, _) = run(800, 10, 500.0, Pacing::Exact);
        assert_eq!(sleeper.sleeps.len(), 80);
        assert!(sleeper
            .sleeps
            .iter()
            .all(|&d| d == Duration::from_micros(6250)));
        assert_eq!(report.paced, Duration::from_millis(500));
        assert_eq!(report.elapsed, Duration::from_millis(500));
    }

    #[test]
    fn zero_latency_never_sleeps() {
        let (report, surface, sleeper, matches) = run(95, 10, 0.0, Pacing::Exact);
        assert!(sleeper.sleeps.is_empty());
        assert_eq!(report.paced, Duration::ZERO);
        assert_eq!(surface.frames.len(), 11);
        assert!(matches);
    }

    #[test]
    fn canvas_fills_monotonically() {
        let (_, surface, _, _) = run(45, 10, 100.0, Pacing::Exact);
        let mut prev_nonzero = 0;
        for (kind, px) in &surface.frames {
            let nonzero = px.iter().filter(|&&b| b != 0).count();
            assert!(nonzero >= prev_nonzero, "{kind:?} un-revealed pixels");
            prev_nonzero = nonzero;
        }
        // First block frame: rows 0..10 revealed, everything below still blank.
        let (kind, first) = &surface.frames[0];
        assert_eq!(
            kind,
            &FrameKind::Block {
                index: 0,
                total: 5,
                rows: 0..10
            }
        );
        let row_bytes = 3 * 3;
        assert!(first[..10 * row_bytes].iter().all(|&b| b != 0));
        assert!(first[10 * row_bytes..].iter().all(|&b| b == 0));
    }

    #[test]
    fn drift_corrected_absorbs_render_lag() {
        let grid = gradient(2, 800);
        let mut canvas = RevealCanvas::for_grid(&grid);
        let mut sleeper = FakeSleeper::new();
        sleeper.lag = Duration::from_millis(1);
        let mut animator = Animator::with_sleeper(10, Pacing::DriftCorrected, sleeper);
        let report = animator
            .reveal(&Preset::new("p", 500.0), &grid, &mut canvas, &mut NullSurface)
            .unwrap();
        // Each wait shrinks by the simulated lag, so the run still lands on
        // the preset (plus the lag of the final clock read).
        assert!(report.paced < Duration::from_millis(500));
        assert!(report.elapsed >= Duration::from_millis(500));
        assert!(report.elapsed <= Duration::from_millis(502));
    }

    #[test]
    fn drift_corrected_skips_waits_when_late() {
        let grid = gradient(2, 20);
        let mut canvas = RevealCanvas::for_grid(&grid);
        let mut sleeper = FakeSleeper::new();
        sleeper.lag = Duration::from_millis(50);
        let mut animator = Animator::with_sleeper(10, Pacing::DriftCorrected, sleeper);
        let report = animator
            .reveal(&Preset::new("p", 20.0), &grid, &mut canvas, &mut NullSurface)
            .unwrap();
        assert!(animator.sleeper().sleeps.is_empty());
        assert_eq!(report.paced, Duration::ZERO);
        assert!(canvas.matches(&grid));
    }

    #[test]
    fn surface_errors_abort_the_run() {
        let grid = gradient(2, 30);
        let mut canvas = RevealCanvas::for_grid(&grid);
        let mut animator = Animator::with_sleeper(10, Pacing::Exact, FakeSleeper::new());
        let err = animator
            .reveal(
                &Preset::new("p", 30.0),
                &grid,
                &mut canvas,
                &mut FailingSurface { after: 1 },
            )
            .unwrap_err();
        assert!(err.to_string().contains("display went away"));
    }

    #[test]
    fn real_clock_run_lands_on_latency() {
        let grid = gradient(4, 800);
        let mut canvas = RevealCanvas::for_grid(&grid);
        let mut animator = Animator::default();
        let report = animator
            .reveal(&Preset::new("p", 500.0), &grid, &mut canvas, &mut NullSurface)
            .unwrap();
        assert_eq!(report.frames, 81);
        assert!(report.elapsed >= Duration::from_millis(495), "{:?}", report.elapsed);
        assert!(report.elapsed < Duration::from_millis(750), "{:?}", report.elapsed);
        assert!(canvas.matches(&grid));
    }
}
