//! Command-line options shared by the `reveal-rs` and `tui` binaries, and the
//! startup sequence that turns them into a running [`AppContext`].

use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use log::info;

use crate::central::BtleCentral;
use crate::context::AppContext;
use crate::dispatch::{BusyPolicy, DispatchConfig};
use crate::image_grid::ImageGrid;
use crate::listener::ListenerConfig;
use crate::presets::PresetRegistry;
use crate::protocol::MAX_IMAGE_HEIGHT;
use crate::reveal::Pacing;
use crate::simulator::SimulatedCentral;
use crate::types::OperatorCommand;

#[derive(Debug, Parser, Clone, PartialEq)]
#[command(version, about = "Reveal an image at the pace of a latency preset on every IPAD_SYNC trigger")]
pub struct Options {
    /// Image revealed on every trigger (PNG or JPEG)
    pub image: PathBuf,

    /// Use the built-in notification source instead of Bluetooth
    #[arg(long)]
    pub simulate: bool,

    /// JSON preset table replacing the built-in one
    #[arg(long, value_name = "FILE")]
    pub presets: Option<PathBuf>,

    /// Preset selected at startup
    #[arg(long, value_name = "LABEL")]
    pub preset: Option<String>,

    /// Pace blocks against absolute deadlines instead of fixed sleeps
    #[arg(long)]
    pub drift_corrected: bool,

    /// Discard triggers that arrive while an animation is running
    #[arg(long)]
    pub drop_while_busy: bool,

    /// Source rows per reveal block
    #[arg(long, value_name = "N", default_value = "10")]
    pub block_rows: NonZeroUsize,
}

impl Options {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            block_rows: self.block_rows.get(),
            pacing: if self.drift_corrected {
                Pacing::DriftCorrected
            } else {
                Pacing::Exact
            },
            busy_policy: if self.drop_while_busy {
                BusyPolicy::DropWhileBusy
            } else {
                BusyPolicy::Queue
            },
            ..Default::default()
        }
    }

    pub fn registry(&self) -> Result<PresetRegistry> {
        match &self.presets {
            Some(path) => PresetRegistry::load(path),
            None => Ok(PresetRegistry::builtin()),
        }
    }

    /// Load the image and presets, apply the initial selection and start
    /// the listener.
    ///
    /// Errors here are fatal for the binaries: the rig has nothing to show
    /// without its image.
    pub fn start(&self) -> Result<AppContext> {
        let grid = ImageGrid::open(&self.image, MAX_IMAGE_HEIGHT)
            .with_context(|| format!("cannot load image {}", self.image.display()))?;
        let registry = self.registry()?;
        info!("{} presets loaded", registry.len());

        let mut ctx = AppContext::new(grid, registry);
        if let Some(label) = &self.preset {
            ctx.apply(&OperatorCommand::SelectLabel(label.clone()))?;
        }

        let config = ListenerConfig::default();
        if self.simulate {
            info!("Simulated notification source enabled");
            ctx.start_listener(SimulatedCentral::default(), config)?;
        } else {
            ctx.start_listener(BtleCentral::new(), config)?;
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Cursor;

    fn parse(args: &[&str]) -> Options {
        Options::try_parse_from(std::iter::once("reveal-rs").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn command_definition_is_consistent() {
        Options::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let o = parse(&["photo.jpg"]);
        assert_eq!(o.image, PathBuf::from("photo.jpg"));
        assert!(!o.simulate);
        let dispatch = o.dispatch_config();
        assert_eq!(dispatch, DispatchConfig::default());
        assert_eq!(dispatch.block_rows, 10);
    }

    #[test]
    fn all_flags() {
        let o = parse(&[
            "--simulate",
            "--drift-corrected",
            "a.png",
            "--presets",
            "p.json",
            "--preset",
            "Seoul",
            "--drop-while-busy",
            "--block-rows",
            "4",
        ]);
        assert!(o.simulate);
        assert_eq!(o.image, PathBuf::from("a.png"));
        assert_eq!(o.presets, Some(PathBuf::from("p.json")));
        assert_eq!(o.preset.as_deref(), Some("Seoul"));
        let dispatch = o.dispatch_config();
        assert_eq!(dispatch.pacing, Pacing::DriftCorrected);
        assert_eq!(dispatch.busy_policy, BusyPolicy::DropWhileBusy);
        assert_eq!(dispatch.block_rows, 4);
    }

    #[test]
    fn rejects_bad_input() {
        let bad: &[&[&str]] = &[
            &[],
            &["a.png", "b.png"],
            &["a.png", "--block-rows", "0"],
            &["a.png", "--block-rows"],
            &["a.png", "--frobnicate"],
        ];
        for args in bad {
            let argv = std::iter::once("reveal-rs").chain(args.iter().copied());
            assert!(Options::try_parse_from(argv).is_err(), "{args:?}");
        }
    }

    #[test]
    fn missing_image_is_fatal() {
        let o = parse(&["/definitely/not/here.png", "--simulate"]);
        let err = o.start().unwrap_err();
        assert!(format!("{err:#}").contains("cannot load image"));
    }

    #[test]
    fn start_selects_initial_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let mut png = Vec::new();
        image::RgbImage::from_pixel(4, 4, image::Rgb([9, 9, 9]))
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, png).unwrap();

        let mut o = parse(&["unused.png", "--simulate", "--preset", "Paris"]);
        o.image = path;
        let mut ctx = o.start().unwrap();
        assert_eq!(ctx.selection.current().unwrap().label, "Paris");
        assert!(ctx.listener_started());
        assert!(ctx.shutdown().unwrap().is_some());
    }
}
