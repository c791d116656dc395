//! Latency presets: the scenarios an operator picks before triggering a run.
//!
//! The built-in table reproduces the exhibit's round-trip figures for a
//! direct link versus routes through remote compute sites.  A replacement
//! table can be loaded from a JSON file shaped like:
//!
//! ```json
//! [
//!   { "label": "Paris",  "latency_ms": 273.838 },
//!   { "label": "Mumbai", "latency_ms": 151.748 }
//! ]
//! ```

use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PresetError {
    #[error("preset index {0} is out of range ({1} presets)")]
    IndexOutOfRange(usize, usize),
    #[error("no preset labelled {0:?}")]
    UnknownLabel(String),
    #[error("duplicate preset label {0:?}")]
    DuplicateLabel(String),
    #[error("preset {0:?} has invalid latency {1} ms (must be finite and >= 0)")]
    InvalidLatency(String, f64),
    #[error("preset file: {0}")]
    Malformed(String),
    #[error("preset table is empty")]
    Empty,
}

/// One named scenario and its simulated transfer duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub label: String,
    pub latency_ms: f64,
}

impl Preset {
    pub fn new(label: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            label: label.into(),
            latency_ms,
        }
    }

    /// Button caption, e.g. `"Seoul (244 ms)"`.
    pub fn caption(&self) -> String {
        format!("{} ({} ms)", self.label, self.latency_ms)
    }
}

/// Built-in exhibit presets, in button order.
const BUILTIN: [(&str, f64); 5] = [
    ("No NCC", 269.546),
    ("Paris", 273.838),
    ("Mumbai", 151.748),
    ("Seoul", 244.0),
    ("NCC x3", 128.0),
];

/// One record of a preset file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PresetEntry {
    label: String,
    latency_ms: f64,
}

/// Static, ordered mapping from label to latency.  Labels are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetRegistry {
    presets: Vec<Preset>,
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetRegistry {
    pub fn builtin() -> Self {
        Self {
            presets: BUILTIN
                .iter()
                .map(|&(label, ms)| Preset::new(label, ms))
                .collect(),
        }
    }

    /// Build a registry, rejecting duplicate labels and negative / NaN latencies.
    pub fn new(presets: Vec<Preset>) -> Result<Self, PresetError> {
        if presets.is_empty() {
            return Err(PresetError::Empty);
        }
        for (i, p) in presets.iter().enumerate() {
            if !p.latency_ms.is_finite() || p.latency_ms < 0.0 {
                return Err(PresetError::InvalidLatency(p.label.clone(), p.latency_ms));
            }
            if presets[..i].iter().any(|q| q.label == p.label) {
                return Err(PresetError::DuplicateLabel(p.label.clone()));
            }
        }
        Ok(Self { presets })
    }

    /// Parse the JSON array format shown in the module docs.
    pub fn from_json_str(json: &str) -> Result<Self, PresetError> {
        let entries: Vec<PresetEntry> =
            serde_json::from_str(json).map_err(|e| PresetError::Malformed(e.to_string()))?;
        Self::new(
            entries
                .into_iter()
                .map(|e| Preset::new(e.label, e.latency_ms))
                .collect(),
        )
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading preset file {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("loading preset file {}", path.display()))
    }

    pub fn get(&self, index: usize) -> Result<&Preset, PresetError> {
        self.presets
            .get(index)
            .ok_or(PresetError::IndexOutOfRange(index, self.presets.len()))
    }

    pub fn find(&self, label: &str) -> Result<&Preset, PresetError> {
        self.presets
            .iter()
            .find(|p| p.label == label)
            .ok_or_else(|| PresetError::UnknownLabel(label.to_owned()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

/// The single "currently selected preset" slot.
///
/// Written by operator actions, read by the dispatcher when an animation
/// starts.  Owned by the presentation context; the listener never sees it.
#[derive(Debug, Clone, Default)]
pub struct PresetSelection {
    current: Option<Preset>,
}

impl PresetSelection {
    pub fn select(&mut self, preset: Preset) {
        self.current = Some(preset);
    }

    pub fn current(&self) -> Option<&Preset> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
